//! Inbound PCC webhook deliveries.
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::model::PublishingLevel;
use crate::sync::{SyncError, SyncManager};

/// Header carrying the shared webhook secret.
pub const WEBHOOK_SECRET_HEADER: &str = "x-pcc-webhook-secret";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook secret missing or invalid")]
    Unauthorized,
    #[error("PCC integration is not configured")]
    NotConfigured,
    #[error("invalid webhook payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct WebhookDelivery {
    pub event: String,
    pub payload: WebhookPayload,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub article_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    ArticleUpdate,
    ArticlePublish,
    ArticleUnpublish,
    Other(String),
}

impl WebhookEvent {
    pub fn parse_event(s: &str) -> Self {
        match s {
            "article.update" => WebhookEvent::ArticleUpdate,
            "article.publish" => WebhookEvent::ArticlePublish,
            "article.unpublish" => WebhookEvent::ArticleUnpublish,
            other => WebhookEvent::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Stored { post_id: i64 },
    Unpublished { post_id: Option<i64> },
    Ignored { event: String },
}

fn secrets_match(expected: &str, provided: &str) -> bool {
    let (a, b) = (expected.as_bytes(), provided.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Authenticate a delivery and route it to the sync manager.
#[instrument(skip_all)]
pub async fn handle_webhook(
    manager: &SyncManager,
    secret: Option<&str>,
    body: &[u8],
) -> Result<WebhookOutcome, WebhookError> {
    let expected = manager
        .settings()
        .webhook_secret()
        .ok_or(WebhookError::Unauthorized)?;
    if !secret.is_some_and(|provided| secrets_match(expected, provided)) {
        warn!("rejected webhook delivery with bad secret");
        return Err(WebhookError::Unauthorized);
    }
    if !manager.is_pcc_configured() {
        return Err(WebhookError::NotConfigured);
    }

    let delivery: WebhookDelivery = serde_json::from_slice(body)?;
    let document_id = delivery.payload.article_id.as_str();
    info!(event = %delivery.event, document_id, "received webhook");

    let outcome = match WebhookEvent::parse_event(&delivery.event) {
        WebhookEvent::ArticleUpdate | WebhookEvent::ArticlePublish => {
            let post_id = manager
                .fetch_and_store_document(document_id, PublishingLevel::Production, false)
                .await?;
            WebhookOutcome::Stored { post_id }
        }
        WebhookEvent::ArticleUnpublish => WebhookOutcome::Unpublished {
            post_id: manager.un_publish_post_by_document_id(document_id).await?,
        },
        WebhookEvent::Other(event) => {
            info!(%event, "ignoring webhook event");
            WebhookOutcome::Ignored { event }
        }
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_delivery() {
        let d: WebhookDelivery = serde_json::from_str(
            r#"{"event":"article.update","payload":{"articleId":"doc-1"}}"#,
        )
        .unwrap();
        assert_eq!(d.payload.article_id, "doc-1");
        assert_eq!(WebhookEvent::parse_event(&d.event), WebhookEvent::ArticleUpdate);
        assert_eq!(
            WebhookEvent::parse_event("article.metadataupdate"),
            WebhookEvent::Other("article.metadataupdate".into())
        );
    }

    #[test]
    fn secret_comparison() {
        assert!(secrets_match("abc", "abc"));
        assert!(!secrets_match("abc", "abd"));
        assert!(!secrets_match("abc", "abcd"));
        assert!(!secrets_match("abc", ""));
    }
}
