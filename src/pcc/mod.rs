use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{Article, ArticlesResponse, ContentType, PublishingLevel};
use crate::pcc::model::{ArticleData, ArticlesData, GraphQlResponse};

pub mod model;

pub const PCC_API_BASE: &str = "https://gql.prod.pcc.pantheon.io/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const ARTICLE_QUERY: &str = "query GetArticle($id: String!, $contentType: ContentType, $publishingLevel: PublishingLevel) { \
article(id: $id, contentType: $contentType, publishingLevel: $publishingLevel) { id title content slug } }";

const ARTICLES_QUERY: &str = "query ListArticles($contentType: ContentType) { \
articles(contentType: $contentType) { id title content slug } }";

#[derive(Debug, Error)]
pub enum PccError {
    #[error("failed to reach PCC: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("PCC rejected the credentials ({0})")]
    Unauthorized(StatusCode),
    #[error("PCC resource not found: {0}")]
    NotFound(String),
    #[error("PCC error {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("PCC query failed: {0}")]
    GraphQl(String),
    #[error("invalid PCC response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid PCC client configuration: {0}")]
    Config(String),
}

/// How requests authenticate against the content API.
#[derive(Clone, PartialEq, Eq)]
pub enum PccAuth {
    /// Long-lived site API key, used for background and bulk sync.
    ApiKey(String),
    /// Short-lived grant for user-initiated, narrowly scoped calls.
    Grant(String),
}

impl fmt::Debug for PccAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PccAuth::ApiKey(_) => f.write_str("ApiKey([REDACTED])"),
            PccAuth::Grant(_) => f.write_str("Grant([REDACTED])"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PccClientConfig {
    pub site_id: String,
    pub auth: PccAuth,
    pub base_url: Url,
}

impl PccClientConfig {
    pub fn api_key(site_id: &str, api_key: &str, base_url: Url) -> Self {
        Self {
            site_id: site_id.to_string(),
            auth: PccAuth::ApiKey(api_key.to_string()),
            base_url,
        }
    }

    pub fn grant(site_id: &str, grant: &str, base_url: Url) -> Self {
        Self {
            site_id: site_id.to_string(),
            auth: PccAuth::Grant(grant.to_string()),
            base_url,
        }
    }
}

#[derive(Clone)]
pub struct PccClient {
    http: Client,
    config: PccClientConfig,
}

impl fmt::Debug for PccClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PccClient")
            .field("base_url", &self.config.base_url)
            .field("site_id", &self.config.site_id)
            .finish_non_exhaustive()
    }
}

/// Read side of the content API consumed by the sync manager.
#[async_trait]
pub trait PccService: Send + Sync {
    async fn get_article_by_id(
        &self,
        id: &str,
        publishing_level: PublishingLevel,
        content_type: ContentType,
    ) -> Result<Article, PccError>;

    async fn get_all_articles(&self) -> Result<ArticlesResponse, PccError>;
}

impl PccClient {
    pub fn new(config: PccClientConfig) -> Result<Self, PccError> {
        if config.site_id.trim().is_empty() {
            return Err(PccError::Config("site id must be non-empty".into()));
        }
        let http = Client::builder()
            .user_agent(concat!("pcc-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &PccClientConfig {
        &self.config
    }

    fn endpoint(&self) -> Result<Url, PccError> {
        let base = &self.config.base_url;
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| PccError::Config(format!("invalid PCC base URL: {}", base)))?
            .pop_if_empty()
            .push("sites")
            .push(&self.config.site_id)
            .push("query");
        Ok(url)
    }

    pub fn build_request(&self, body: &Value) -> Result<reqwest::Request, PccError> {
        let builder = self
            .http
            .post(self.endpoint()?)
            .header("Content-Type", "application/json")
            .json(body);
        let builder = match &self.config.auth {
            PccAuth::ApiKey(key) => builder.header("PCC-TOKEN", key),
            PccAuth::Grant(grant) => builder.header("Authorization", format!("Bearer {}", grant)),
        };
        Ok(builder.build()?)
    }

    async fn execute_query<T: DeserializeOwned>(&self, body: Value) -> Result<T, PccError> {
        let request = self.build_request(&body)?;
        debug!(url = %request.url(), auth = ?self.config.auth, "sending PCC query");

        let res = self.http.execute(request).await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(status_error(status, &self.config.site_id, body));
        }

        let text = res.text().await?;
        decode_response(&text)
    }

    pub async fn get_article_by_id(
        &self,
        id: &str,
        publishing_level: PublishingLevel,
        content_type: ContentType,
    ) -> Result<Article, PccError> {
        let body = build_article_query(id, publishing_level, content_type);
        let data: ArticleData = self.execute_query(body).await?;
        let article = data
            .article
            .ok_or_else(|| PccError::NotFound(format!("article {}", id)))?;
        info!(article_id = %article.id, level = publishing_level.as_str(), "fetched PCC article");
        Ok(article)
    }

    pub async fn get_all_articles(&self) -> Result<ArticlesResponse, PccError> {
        let body = build_articles_query(ContentType::TreePantheonV2);
        let data: ArticlesData = self.execute_query(body).await?;
        info!(count = data.articles.len(), "fetched PCC article collection");
        Ok(ArticlesResponse {
            articles: data.articles,
        })
    }
}

#[async_trait]
impl PccService for PccClient {
    async fn get_article_by_id(
        &self,
        id: &str,
        publishing_level: PublishingLevel,
        content_type: ContentType,
    ) -> Result<Article, PccError> {
        PccClient::get_article_by_id(self, id, publishing_level, content_type).await
    }

    async fn get_all_articles(&self) -> Result<ArticlesResponse, PccError> {
        PccClient::get_all_articles(self).await
    }
}

pub fn build_article_query(
    id: &str,
    publishing_level: PublishingLevel,
    content_type: ContentType,
) -> Value {
    json!({
        "query": ARTICLE_QUERY,
        "variables": {
            "id": id,
            "contentType": content_type.as_str(),
            "publishingLevel": publishing_level.as_str(),
        },
    })
}

pub fn build_articles_query(content_type: ContentType) -> Value {
    json!({
        "query": ARTICLES_QUERY,
        "variables": {
            "contentType": content_type.as_str(),
        },
    })
}

/// Error for a non-success HTTP status.
fn status_error(status: StatusCode, site_id: &str, body: String) -> PccError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            warn!(%status, site_id, "PCC rejected credentials");
            PccError::Unauthorized(status)
        }
        StatusCode::NOT_FOUND => PccError::NotFound(format!("site {}", site_id)),
        _ => {
            warn!(%status, body = %body, "PCC API error");
            PccError::Status { status, body }
        }
    }
}

/// Unwrap a GraphQL envelope, turning an `errors` array into [`PccError::GraphQl`].
pub fn decode_response<T: DeserializeOwned>(text: &str) -> Result<T, PccError> {
    let envelope: GraphQlResponse<T> = serde_json::from_str(text)?;
    if !envelope.errors.is_empty() {
        let messages: Vec<String> = envelope
            .errors
            .iter()
            .map(|e| {
                if e.path.is_empty() {
                    e.message.clone()
                } else {
                    format!("{} (at {})", e.message, Value::Array(e.path.clone()))
                }
            })
            .collect();
        return Err(PccError::GraphQl(messages.join("; ")));
    }
    envelope
        .data
        .ok_or_else(|| PccError::GraphQl("response carried no data".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn base() -> Url {
        Url::parse(PCC_API_BASE).unwrap()
    }

    /// Answer a single HTTP request on a loopback port with a fixed response.
    async fn serve_once(status_line: &'static str, body: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64 * 1024];
            let mut read = 0;
            loop {
                let n = socket.read(&mut buf[read..]).await.unwrap();
                if n == 0 {
                    break;
                }
                read += n;
                let text = String::from_utf8_lossy(&buf[..read]).into_owned();
                if let Some(end) = text.find("\r\n\r\n") {
                    let content_length = text[..end]
                        .lines()
                        .filter_map(|line| line.split_once(':'))
                        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if read >= end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        Url::parse(&format!("http://{}/", addr)).unwrap()
    }

    fn local_client(base_url: Url) -> PccClient {
        PccClient {
            http: Client::builder().no_proxy().build().unwrap(),
            config: PccClientConfig::api_key("site-1", "key-1", base_url),
        }
    }

    async fn fetch_with_response(
        status_line: &'static str,
        body: &'static str,
    ) -> Result<Article, PccError> {
        let client = local_client(serve_once(status_line, body).await);
        client
            .get_article_by_id("doc-1", PublishingLevel::Production, ContentType::TreePantheonV2)
            .await
    }

    #[tokio::test]
    async fn rejected_credentials_map_to_unauthorized() {
        let err = fetch_with_response("401 Unauthorized", "{}").await.unwrap_err();
        assert!(matches!(err, PccError::Unauthorized(StatusCode::UNAUTHORIZED)), "{err:?}");

        let err = fetch_with_response("403 Forbidden", "{}").await.unwrap_err();
        assert!(matches!(err, PccError::Unauthorized(StatusCode::FORBIDDEN)), "{err:?}");
    }

    #[tokio::test]
    async fn missing_site_maps_to_not_found() {
        let err = fetch_with_response("404 Not Found", "{}").await.unwrap_err();
        match err {
            PccError::NotFound(what) => assert_eq!(what, "site site-1"),
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_failures_keep_status_and_body() {
        let err = fetch_with_response("502 Bad Gateway", "upstream down").await.unwrap_err();
        match err {
            PccError::Status { status, body } => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert_eq!(body, "upstream down");
            }
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn null_article_maps_to_not_found() {
        let err = fetch_with_response("200 OK", r#"{"data":{"article":null}}"#)
            .await
            .unwrap_err();
        match err {
            PccError::NotFound(what) => assert_eq!(what, "article doc-1"),
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn successful_fetch_returns_article() {
        let article = fetch_with_response(
            "200 OK",
            r#"{"data":{"article":{"id":"doc-1","title":"Hello","content":"<p>Hi</p>","slug":"hello"}}}"#,
        )
        .await
        .unwrap();
        assert_eq!(article.id, "doc-1");
        assert_eq!(article.title, "Hello");
    }

    #[test]
    fn endpoint_keeps_base_path_and_escapes_site_id() {
        let nested = Url::parse("https://gql.example.com/v1").unwrap();
        let client = PccClient::new(PccClientConfig::api_key("site-1", "key", nested)).unwrap();
        assert_eq!(
            client.endpoint().unwrap().as_str(),
            "https://gql.example.com/v1/sites/site-1/query"
        );

        let client = PccClient::new(PccClientConfig::api_key("a/b?c", "key", base())).unwrap();
        let url = client.endpoint().unwrap();
        assert_eq!(url.path(), "/sites/a%2Fb%3Fc/query");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn build_article_query_carries_variables() {
        let body =
            build_article_query("doc-1", PublishingLevel::Realtime, ContentType::TreePantheonV2);
        assert_eq!(body["variables"]["id"], "doc-1");
        assert_eq!(body["variables"]["publishingLevel"], "REALTIME");
        assert_eq!(body["variables"]["contentType"], "TREE_PANTHEON_V2");
        assert!(body["query"].as_str().unwrap().contains("article(id: $id"));
    }

    #[test]
    fn build_request_uses_api_key_header() {
        let client = PccClient::new(PccClientConfig::api_key("site-1", "key-1", base())).unwrap();
        let request = client.build_request(&json!({ "sample": true })).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/sites/site-1/query");
        let headers = request.headers();
        assert_eq!(headers.get("PCC-TOKEN").and_then(|h| h.to_str().ok()).unwrap(), "key-1");
        assert!(headers.get("Authorization").is_none());
        assert_eq!(
            headers.get("Content-Type").and_then(|h| h.to_str().ok()).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn build_request_uses_bearer_grant() {
        let client = PccClient::new(PccClientConfig::grant("site-1", "grant-1", base())).unwrap();
        let request = client.build_request(&json!({})).unwrap();
        let headers = request.headers();
        assert_eq!(
            headers.get("Authorization").and_then(|h| h.to_str().ok()).unwrap(),
            "Bearer grant-1"
        );
        assert!(headers.get("PCC-TOKEN").is_none());
    }

    #[test]
    fn empty_site_id_is_rejected() {
        let err = PccClient::new(PccClientConfig::api_key(" ", "key", base())).unwrap_err();
        assert!(matches!(err, PccError::Config(_)));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let cfg = PccClientConfig::api_key("site-1", "super-secret", base());
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("site-1"));
    }

    #[test]
    fn decode_response_reads_article() {
        let data: ArticleData = decode_response(
            r#"{"data":{"article":{"id":"doc-1","title":"Hello","content":"<p>Hi</p>","slug":"hello"}}}"#,
        )
        .unwrap();
        let article = data.article.unwrap();
        assert_eq!(article.title, "Hello");
        assert_eq!(article.slug, "hello");
    }

    #[test]
    fn decode_response_surfaces_graphql_errors() {
        let err = decode_response::<ArticleData>(
            r#"{"data":null,"errors":[{"message":"Article not found","path":["article"]}]}"#,
        )
        .unwrap_err();
        match err {
            PccError::GraphQl(msg) => assert!(msg.contains("Article not found")),
            other => panic!("wrong error: {other:?}"),
        }
    }

    #[test]
    fn decode_response_rejects_garbage() {
        assert!(matches!(
            decode_response::<ArticlesData>("<html>"),
            Err(PccError::Decode(_))
        ));
    }
}
