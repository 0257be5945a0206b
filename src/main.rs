use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use pcc_sync::config;
use pcc_sync::db;
use pcc_sync::model::{PublishingLevel, PCC_CONTENT_META_KEY};
use pcc_sync::settings::IntegrationSettings;
use pcc_sync::sync::SyncManager;
use pcc_sync::webhook;

#[derive(Debug, Parser)]
#[command(author, version, about = "Sync PCC articles into the local post store")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show connection state and mapped post count
    Status,
    /// Store PCC credentials and optionally bind a collection (site id)
    Connect {
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        api_key: String,
        /// Opaque credentials blob from the OAuth flow
        #[arg(long)]
        credentials: Option<String>,
        #[arg(long)]
        site_id: Option<String>,
        #[arg(long)]
        webhook_secret: Option<String>,
    },
    /// Select the post type articles are stored as
    SetPostType { post_type: String },
    /// Fetch one document and create or update its post
    Sync {
        document_id: String,
        /// PRODUCTION or REALTIME
        #[arg(long, default_value = "PRODUCTION")]
        level: String,
        /// Store the post as a draft
        #[arg(long)]
        draft: bool,
    },
    /// Fetch every article and create or update their posts
    SyncAll,
    /// List posts connected to PCC documents
    List,
    /// Move a document's post back to draft
    Unpublish { document_id: String },
    /// Print the realtime preview URL for a document
    PreviewUrl {
        document_id: String,
        #[arg(long)]
        post_id: Option<i64>,
    },
    /// Remove all credentials and document mappings
    Disconnect {
        /// Confirm the irreversible removal
        #[arg(long)]
        yes: bool,
    },
    /// Handle a webhook delivery read from a file, or stdin with `-`
    Webhook {
        #[arg(long)]
        secret: Option<String>,
        #[arg(long, default_value = "-")]
        payload: PathBuf,
    },
}

async fn read_payload(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin().read_to_end(&mut buf).await?;
        return Ok(buf);
    }
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read payload {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.app.database_url()).await?;
    db::run_migrations(&pool).await?;

    let mut settings = IntegrationSettings::load(&pool).await?;

    let mut manager = SyncManager::from_config(pool.clone(), &cfg, settings.clone())?;

    match args.command {
        Command::Connect {
            access_token,
            api_key,
            credentials,
            site_id,
            webhook_secret,
        } => {
            settings
                .save_credentials(&pool, &access_token, &api_key, credentials.as_deref())
                .await?;
            if let Some(site_id) = site_id {
                settings
                    .save_collection(&pool, &site_id, &cfg.app.parsed_site_url()?)
                    .await?;
            }
            if let Some(secret) = webhook_secret {
                settings.set_webhook_secret(&pool, &secret).await?;
            }
            info!(stage = settings.setup_stage().as_str(), "credentials stored");
        }
        Command::SetPostType { post_type } => {
            settings.set_integration_post_type(&pool, &post_type).await?;
            info!(%post_type, "integration post type selected");
        }
        Command::Status => {
            let mapped = db::count_meta_by_key(&pool, PCC_CONTENT_META_KEY).await?;
            let s = manager.settings();
            println!("configured:  {}", manager.is_pcc_configured());
            println!("stage:       {}", s.setup_stage().as_str());
            println!("site id:     {}", s.site_id().unwrap_or("-"));
            println!("post type:   {}", s.integration_post_type().unwrap_or("-"));
            println!("mapped docs: {}", mapped);
            if s.needs_setup_notice() {
                warn!("PCC setup is incomplete");
            }
        }
        Command::Sync {
            document_id,
            level,
            draft,
        } => {
            let Some(level) = PublishingLevel::parse_level(&level) else {
                bail!("unknown publishing level {}", level);
            };
            let post_id = manager
                .fetch_and_store_document(&document_id, level, draft)
                .await?;
            println!("{}", post_id);
        }
        Command::SyncAll => {
            if !manager.is_pcc_configured() {
                bail!("PCC is not configured for {}", cfg.app.site_url);
            }
            let report = manager.store_articles().await?;
            if report.skipped {
                warn!("no post type selected; run `set-post-type` first");
            }
            for (document_id, post_id) in &report.stored {
                println!("{}\t{}", document_id, post_id);
            }
            for (document_id, err) in &report.failed {
                eprintln!("{}\tFAILED: {}", document_id, err);
            }
            if !report.is_success() {
                bail!("{} article(s) failed to sync", report.failed.len());
            }
        }
        Command::List => {
            for post in db::list_mapped_posts(&pool, PCC_CONTENT_META_KEY).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    post.document_id,
                    post.post_id,
                    post.status.as_str(),
                    post.title
                );
            }
        }
        Command::Unpublish { document_id } => {
            match manager.un_publish_post_by_document_id(&document_id).await? {
                Some(post_id) => info!(post_id, "post moved to draft"),
                None => info!(%document_id, "document has no connected post"),
            }
        }
        Command::PreviewUrl {
            document_id,
            post_id,
        } => {
            let url = manager.prepare_previewing_url(&document_id, post_id).await?;
            println!("{}", url);
        }
        Command::Disconnect { yes } => {
            if !yes {
                bail!("disconnect removes all credentials and mappings; pass --yes to confirm");
            }
            let removed = manager.disconnect().await?;
            info!(removed, "PCC disconnected");
        }
        Command::Webhook { secret, payload } => {
            let body = read_payload(&payload).await?;
            let outcome = webhook::handle_webhook(&manager, secret.as_deref(), &body).await?;
            info!(?outcome, "webhook handled");
        }
    }

    Ok(())
}
