//! Persisted integration settings (credentials, site binding, target post type).
//!
//! Values live in the `options` table. They are loaded once into an
//! [`IntegrationSettings`] value which callers hand to the sync manager.
use anyhow::Result;
use md5::{Digest, Md5};
use reqwest::Url;
use std::fmt;
use tracing::{info, instrument};

use crate::db::{self, Pool};

pub const PCC_ACCESS_TOKEN_OPTION_KEY: &str = "pcc_access_token";
pub const PCC_SITE_ID_OPTION_KEY: &str = "pcc_site_id";
pub const PCC_API_KEY_OPTION_KEY: &str = "pcc_api_key";
pub const PCC_ENCODED_SITE_URL_OPTION_KEY: &str = "pcc_encoded_site_url";
pub const PCC_INTEGRATION_POST_TYPE_OPTION_KEY: &str = "pcc_integration_post_type";
pub const PCC_WEBHOOK_SECRET_OPTION_KEY: &str = "pcc_webhook_secret";
pub const PCC_CREDENTIALS_OPTION_KEY: &str = "pcc_credentials";

/// Options removed on disconnect. The OAuth credentials blob survives so the
/// site returns to the create-collection stage.
const CONNECTION_OPTION_KEYS: [&str; 6] = [
    PCC_ACCESS_TOKEN_OPTION_KEY,
    PCC_SITE_ID_OPTION_KEY,
    PCC_ENCODED_SITE_URL_OPTION_KEY,
    PCC_INTEGRATION_POST_TYPE_OPTION_KEY,
    PCC_WEBHOOK_SECRET_OPTION_KEY,
    PCC_API_KEY_OPTION_KEY,
];

/// Where the admin is in the connection flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    /// No credentials yet.
    Setup,
    /// Credentials stored, no collection (site id) created.
    CreateCollection,
    Connected,
}

impl SetupStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupStage::Setup => "setup",
            SetupStage::CreateCollection => "create-collection",
            SetupStage::Connected => "connected-collection",
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct IntegrationSettings {
    pub access_token: Option<String>,
    pub site_id: Option<String>,
    pub api_key: Option<String>,
    pub encoded_site_url: Option<String>,
    pub integration_post_type: Option<String>,
    pub webhook_secret: Option<String>,
    pub credentials: Option<String>,
}

impl fmt::Debug for IntegrationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("IntegrationSettings")
            .field("access_token", &redact(&self.access_token))
            .field("site_id", &self.site_id)
            .field("api_key", &redact(&self.api_key))
            .field("encoded_site_url", &self.encoded_site_url)
            .field("integration_post_type", &self.integration_post_type)
            .field("webhook_secret", &redact(&self.webhook_secret))
            .field("credentials", &redact(&self.credentials))
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

/// md5 hex digest of the URL's host, the form in which a site binding is stored.
pub fn hash_site_host(site_url: &Url) -> Option<String> {
    site_url
        .host_str()
        .map(|host| hex::encode(Md5::digest(host.as_bytes())))
}

impl IntegrationSettings {
    #[instrument(skip_all)]
    pub async fn load(pool: &Pool) -> Result<Self> {
        Ok(Self {
            access_token: db::get_option(pool, PCC_ACCESS_TOKEN_OPTION_KEY).await?,
            site_id: db::get_option(pool, PCC_SITE_ID_OPTION_KEY).await?,
            api_key: db::get_option(pool, PCC_API_KEY_OPTION_KEY).await?,
            encoded_site_url: db::get_option(pool, PCC_ENCODED_SITE_URL_OPTION_KEY).await?,
            integration_post_type: db::get_option(pool, PCC_INTEGRATION_POST_TYPE_OPTION_KEY)
                .await?,
            webhook_secret: db::get_option(pool, PCC_WEBHOOK_SECRET_OPTION_KEY).await?,
            credentials: db::get_option(pool, PCC_CREDENTIALS_OPTION_KEY).await?,
        })
    }

    pub fn site_id(&self) -> Option<&str> {
        non_empty(&self.site_id)
    }

    pub fn api_key(&self) -> Option<&str> {
        non_empty(&self.api_key)
    }

    pub fn integration_post_type(&self) -> Option<&str> {
        non_empty(&self.integration_post_type)
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        non_empty(&self.webhook_secret)
    }

    /// True when every credential is present and the stored site hash matches
    /// the host of `site_url`. A configuration copied from another environment
    /// fails the hash check.
    pub fn is_configured_for(&self, site_url: &Url) -> bool {
        let (Some(_), Some(_), Some(_), Some(stored_hash)) = (
            non_empty(&self.access_token),
            self.site_id(),
            self.api_key(),
            non_empty(&self.encoded_site_url),
        ) else {
            return false;
        };
        hash_site_host(site_url).as_deref() == Some(stored_hash)
    }

    pub fn setup_stage(&self) -> SetupStage {
        let has_credentials = non_empty(&self.credentials).is_some();
        match (self.site_id().is_some(), has_credentials) {
            (true, true) => SetupStage::Connected,
            (false, true) => SetupStage::CreateCollection,
            _ => SetupStage::Setup,
        }
    }

    pub fn needs_setup_notice(&self) -> bool {
        self.setup_stage() != SetupStage::Connected
    }

    #[instrument(skip_all)]
    pub async fn save_credentials(
        &mut self,
        pool: &Pool,
        access_token: &str,
        api_key: &str,
        credentials: Option<&str>,
    ) -> Result<()> {
        db::set_option(pool, PCC_ACCESS_TOKEN_OPTION_KEY, access_token).await?;
        db::set_option(pool, PCC_API_KEY_OPTION_KEY, api_key).await?;
        self.access_token = Some(access_token.to_string());
        self.api_key = Some(api_key.to_string());
        if let Some(credentials) = credentials {
            db::set_option(pool, PCC_CREDENTIALS_OPTION_KEY, credentials).await?;
            self.credentials = Some(credentials.to_string());
        }
        Ok(())
    }

    /// Bind this installation to a PCC collection: store the site id and the
    /// hash of the current site host.
    #[instrument(skip_all, fields(site_id = site_id))]
    pub async fn save_collection(
        &mut self,
        pool: &Pool,
        site_id: &str,
        site_url: &Url,
    ) -> Result<()> {
        let hash = hash_site_host(site_url)
            .ok_or_else(|| anyhow::anyhow!("site URL {} has no host", site_url))?;
        db::set_option(pool, PCC_SITE_ID_OPTION_KEY, site_id).await?;
        db::set_option(pool, PCC_ENCODED_SITE_URL_OPTION_KEY, &hash).await?;
        self.site_id = Some(site_id.to_string());
        self.encoded_site_url = Some(hash);
        info!(site_id, "stored PCC collection binding");
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn set_integration_post_type(&mut self, pool: &Pool, post_type: &str) -> Result<()> {
        db::set_option(pool, PCC_INTEGRATION_POST_TYPE_OPTION_KEY, post_type).await?;
        self.integration_post_type = Some(post_type.to_string());
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn set_webhook_secret(&mut self, pool: &Pool, secret: &str) -> Result<()> {
        db::set_option(pool, PCC_WEBHOOK_SECRET_OPTION_KEY, secret).await?;
        self.webhook_secret = Some(secret.to_string());
        Ok(())
    }

    /// Delete the connection options and reset them on this value. Stored
    /// credentials are kept.
    #[instrument(skip_all)]
    pub async fn clear(&mut self, pool: &Pool) -> Result<()> {
        for key in CONNECTION_OPTION_KEYS {
            db::delete_option(pool, key).await?;
        }
        *self = Self {
            credentials: self.credentials.take(),
            ..Self::default()
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn site() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    fn complete() -> IntegrationSettings {
        IntegrationSettings {
            access_token: Some("token".into()),
            site_id: Some("site-1".into()),
            api_key: Some("key".into()),
            encoded_site_url: hash_site_host(&site()),
            ..Default::default()
        }
    }

    #[test]
    fn hash_uses_host_only() {
        // md5("example.com")
        let expected = "5ababd603b22780302dd8d83498e5172";
        assert_eq!(hash_site_host(&site()).as_deref(), Some(expected));
        let with_port_and_path = Url::parse("http://example.com:8080/wp/admin?x=1").unwrap();
        assert_eq!(hash_site_host(&with_port_and_path).as_deref(), Some(expected));
    }

    #[test]
    fn configured_requires_every_field() {
        assert!(complete().is_configured_for(&site()));

        let mut s = complete();
        s.access_token = None;
        assert!(!s.is_configured_for(&site()));

        let mut s = complete();
        s.site_id = Some(String::new());
        assert!(!s.is_configured_for(&site()));

        let mut s = complete();
        s.api_key = None;
        assert!(!s.is_configured_for(&site()));

        let mut s = complete();
        s.encoded_site_url = None;
        assert!(!s.is_configured_for(&site()));
    }

    #[test]
    fn configured_rejects_other_host() {
        let staging = Url::parse("https://staging.example.com/").unwrap();
        assert!(!complete().is_configured_for(&staging));
    }

    #[test]
    fn setup_stage_follows_credentials_and_site() {
        let mut s = IntegrationSettings::default();
        assert_eq!(s.setup_stage(), SetupStage::Setup);
        assert!(s.needs_setup_notice());

        s.credentials = Some("{\"token\":\"x\"}".into());
        assert_eq!(s.setup_stage(), SetupStage::CreateCollection);

        s.site_id = Some("site-1".into());
        assert_eq!(s.setup_stage(), SetupStage::Connected);
        assert!(!s.needs_setup_notice());

        s.credentials = None;
        assert_eq!(s.setup_stage(), SetupStage::Setup);
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", complete());
        assert!(!rendered.contains("token\""));
        assert!(!rendered.contains("\"key\""));
        assert!(rendered.contains("site-1"));
    }

    #[tokio::test]
    async fn persist_load_and_clear() {
        let pool = setup_pool().await;
        let mut s = IntegrationSettings::default();
        s.save_credentials(&pool, "token", "key", Some("{}")).await.unwrap();
        s.save_collection(&pool, "site-1", &site()).await.unwrap();
        s.set_integration_post_type(&pool, "page").await.unwrap();
        s.set_webhook_secret(&pool, "shh").await.unwrap();

        let loaded = IntegrationSettings::load(&pool).await.unwrap();
        assert_eq!(loaded, s);
        assert!(loaded.is_configured_for(&site()));
        assert_eq!(loaded.integration_post_type(), Some("page"));

        s.clear(&pool).await.unwrap();
        let kept = IntegrationSettings {
            credentials: Some("{}".into()),
            ..Default::default()
        };
        assert_eq!(s, kept);
        assert_eq!(s.setup_stage(), SetupStage::CreateCollection);
        let reloaded = IntegrationSettings::load(&pool).await.unwrap();
        assert_eq!(reloaded, kept);
    }
}
