//! Article → post synchronization.
//!
//! [`SyncManager`] fetches articles from PCC, maps them onto [`PostFields`]
//! and creates or updates the connected post. The document id ↔ post id
//! mapping is a `pcc_id` metadata row on the post.
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::config::{Config, ConfigError};
use crate::db::{self, Pool};
use crate::model::{
    Article, ContentType, PostFields, PostStatus, PublishingLevel, PCC_CONTENT_META_KEY,
    PREVIEW_MARKER,
};
use crate::pcc::{PccClient, PccClientConfig, PccError, PccService, PCC_API_BASE};
use crate::settings::IntegrationSettings;

/// Post type used when none has been selected.
pub const DEFAULT_POST_TYPE: &str = "post";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Pcc(#[from] PccError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("PCC integration is not configured")]
    NotConfigured,
    #[error("document {0} is not connected to a post")]
    NotConnected(String),
    #[error("post {0} not found")]
    PostNotFound(i64),
}

/// Outcome of a bulk [`SyncManager::store_articles`] run.
#[derive(Debug, Default)]
pub struct StoreReport {
    /// No target post type is selected, so nothing was fetched.
    pub skipped: bool,
    /// `(document id, post id)` for every article stored.
    pub stored: Vec<(String, i64)>,
    /// `(document id, error)` for every article that failed.
    pub failed: Vec<(String, SyncError)>,
}

impl StoreReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct SyncManager {
    pool: Pool,
    api: Option<Arc<dyn PccService>>,
    settings: IntegrationSettings,
    site_url: Url,
    api_base_url: String,
    document_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SyncManager {
    pub fn new(pool: Pool, settings: IntegrationSettings, site_url: Url) -> Self {
        Self {
            pool,
            api: None,
            settings,
            site_url,
            api_base_url: PCC_API_BASE.to_string(),
            document_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_api(mut self, api: Arc<dyn PccService>) -> Self {
        self.api = Some(api);
        self
    }

    /// Build a manager for the configured site. When a site id and API key are
    /// stored, an API-key client is attached for background sync.
    pub fn from_config(
        pool: Pool,
        cfg: &Config,
        settings: IntegrationSettings,
    ) -> Result<Self, SyncError> {
        let site_url = cfg.app.parsed_site_url()?;
        let mut manager = Self::new(pool, settings, site_url);
        manager.api_base_url = cfg.pcc.api_base_url.clone();

        if let (Some(site_id), Some(api_key)) =
            (manager.settings.site_id(), manager.settings.api_key())
        {
            let client = PccClient::new(PccClientConfig::api_key(
                site_id,
                api_key,
                manager.api_base()?,
            ))?;
            manager.api = Some(Arc::new(client));
        }
        Ok(manager)
    }

    pub fn settings(&self) -> &IntegrationSettings {
        &self.settings
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn api(&self) -> Result<&dyn PccService, SyncError> {
        self.api.as_deref().ok_or(SyncError::NotConfigured)
    }

    fn api_base(&self) -> Result<Url, SyncError> {
        Url::parse(&self.api_base_url)
            .map_err(|e| SyncError::Pcc(PccError::Config(format!("invalid PCC base URL: {}", e))))
    }

    /// Client authenticated with a short-lived grant instead of the API key.
    pub fn grant_client(&self, grant: &str) -> Result<PccClient, SyncError> {
        let site_id = self.settings.site_id().ok_or(SyncError::NotConfigured)?;
        Ok(PccClient::new(PccClientConfig::grant(site_id, grant, self.api_base()?))?)
    }

    fn post_type(&self) -> &str {
        self.settings
            .integration_post_type()
            .unwrap_or(DEFAULT_POST_TYPE)
    }

    /// Fetch one article at `publishing_level` and upsert its post.
    #[instrument(skip(self))]
    pub async fn fetch_and_store_document(
        &self,
        document_id: &str,
        publishing_level: PublishingLevel,
        is_draft: bool,
    ) -> Result<i64, SyncError> {
        let article = self
            .api()?
            .get_article_by_id(document_id, publishing_level, ContentType::TreePantheonV2)
            .await?;
        self.store_article(&article, is_draft).await
    }

    /// Upsert every article in the collection, continuing past individual
    /// failures. Does nothing until a target post type is selected.
    #[instrument(skip_all)]
    pub async fn store_articles(&self) -> Result<StoreReport, SyncError> {
        if self.settings.integration_post_type().is_none() {
            info!("no integration post type selected; skipping bulk sync");
            return Ok(StoreReport {
                skipped: true,
                ..Default::default()
            });
        }

        let response = self.api()?.get_all_articles().await?;
        let mut report = StoreReport::default();
        for article in &response.articles {
            match self.store_article(article, false).await {
                Ok(post_id) => report.stored.push((article.id.clone(), post_id)),
                Err(err) => {
                    warn!(?err, document_id = %article.id, "failed to store article");
                    report.failed.push((article.id.clone(), err));
                }
            }
        }
        info!(
            stored = report.stored.len(),
            failed = report.failed.len(),
            "bulk article sync finished"
        );
        Ok(report)
    }

    async fn document_lock(&self, document_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.document_locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(document_id.to_string()).or_default().clone()
    }

    async fn store_article(&self, article: &Article, is_draft: bool) -> Result<i64, SyncError> {
        let lock = self.document_lock(&article.id).await;
        let _guard = lock.lock().await;
        let post_id = self.find_existing_connected_post(&article.id).await?;
        self.create_or_update_post(post_id, article, is_draft).await
    }

    async fn create_or_update_post(
        &self,
        post_id: Option<i64>,
        article: &Article,
        is_draft: bool,
    ) -> Result<i64, SyncError> {
        let fields = PostFields::from_article(article, is_draft, self.post_type());
        match post_id {
            None => {
                let meta_key = PCC_CONTENT_META_KEY;
                let id = db::insert_post_with_meta(&self.pool, &fields, meta_key, &article.id).await?;
                info!(post_id = id, document_id = %article.id, "created connected post");
                Ok(id)
            }
            Some(id) => {
                db::update_post(&self.pool, id, &fields).await?;
                info!(post_id = id, document_id = %article.id, "updated connected post");
                Ok(id)
            }
        }
    }

    pub async fn find_existing_connected_post(
        &self,
        document_id: &str,
    ) -> Result<Option<i64>, SyncError> {
        Ok(db::get_post_id_by_meta(&self.pool, PCC_CONTENT_META_KEY, document_id).await?)
    }

    /// Move the connected post back to draft. Returns the post id, or `None`
    /// when the document has no post.
    #[instrument(skip(self))]
    pub async fn un_publish_post_by_document_id(
        &self,
        document_id: &str,
    ) -> Result<Option<i64>, SyncError> {
        let Some(post_id) = self.find_existing_connected_post(document_id).await? else {
            return Ok(None);
        };
        db::set_post_status(&self.pool, post_id, PostStatus::Draft).await?;
        info!(post_id, "unpublished connected post");
        Ok(Some(post_id))
    }

    /// Permalink of the connected post with realtime preview parameters appended.
    pub async fn prepare_previewing_url(
        &self,
        document_id: &str,
        post_id: Option<i64>,
    ) -> Result<Url, SyncError> {
        let post_id = match post_id {
            Some(id) => id,
            None => self
                .find_existing_connected_post(document_id)
                .await?
                .ok_or_else(|| SyncError::NotConnected(document_id.to_string()))?,
        };
        let post = db::get_post(&self.pool, post_id)
            .await?
            .ok_or(SyncError::PostNotFound(post_id))?;

        let mut url = db::permalink(&self.site_url, &post)?;
        url.query_pairs_mut()
            .append_pair("preview", PREVIEW_MARKER)
            .append_pair("publishing_level", PublishingLevel::Realtime.as_str())
            .append_pair("document_id", document_id);
        Ok(url)
    }

    /// Forget every credential and document mapping. Posts stay as ordinary content.
    /// Returns the number of mappings removed.
    #[instrument(skip_all)]
    pub async fn disconnect(&mut self) -> Result<u64, SyncError> {
        self.settings.clear(&self.pool).await?;
        self.api = None;
        let removed = db::delete_meta_by_key(&self.pool, PCC_CONTENT_META_KEY).await?;
        info!(removed, "disconnected PCC integration");
        Ok(removed)
    }

    pub fn is_pcc_configured(&self) -> bool {
        self.settings.is_configured_for(&self.site_url)
    }
}
