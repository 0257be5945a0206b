use super::model::MappedPost;
use crate::model::{ConnectedPost, PostFields, PostStatus};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Url;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {}", normalized))?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/`, make sure the parent
/// directory exists and ask SQLite to create the file. In-memory and
/// non-sqlite URLs pass through unchanged.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query_part {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{}&mode=rwc", q),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{}?{}", expanded, query)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn post_from_row(row: &SqliteRow) -> Result<ConnectedPost> {
    let id: i64 = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let status = PostStatus::parse_status(&status)
        .ok_or_else(|| anyhow!("post {} has unknown status {}", id, status))?;
    Ok(ConnectedPost {
        id,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        slug: row.try_get("slug")?,
        status,
        post_type: row.try_get("post_type")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[instrument(skip_all)]
pub async fn insert_post(pool: &Pool, fields: &PostFields) -> Result<i64> {
    let now = Utc::now();
    let id: i64 = sqlx::query(
        "INSERT INTO posts (title, content, slug, status, post_type, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&fields.title)
    .bind(&fields.content)
    .bind(&fields.slug)
    .bind(fields.status.as_str())
    .bind(&fields.post_type)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .context("failed to insert post")?
    .try_get("id")?;
    Ok(id)
}

/// Insert a post together with one metadata row in a single transaction, so a
/// post never exists without its metadata.
#[instrument(skip_all, fields(meta_key = meta_key))]
pub async fn insert_post_with_meta(
    pool: &Pool,
    fields: &PostFields,
    meta_key: &str,
    meta_value: &str,
) -> Result<i64> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let id: i64 = sqlx::query(
        "INSERT INTO posts (title, content, slug, status, post_type, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&fields.title)
    .bind(&fields.content)
    .bind(&fields.slug)
    .bind(fields.status.as_str())
    .bind(&fields.post_type)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .context("failed to insert post")?
    .try_get("id")?;
    sqlx::query("INSERT INTO postmeta (post_id, meta_key, meta_value) VALUES (?, ?, ?)")
        .bind(id)
        .bind(meta_key)
        .bind(meta_value)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to attach {} to post {}", meta_key, id))?;
    tx.commit().await?;
    Ok(id)
}

#[instrument(skip_all, fields(post_id = id))]
pub async fn update_post(pool: &Pool, id: i64, fields: &PostFields) -> Result<()> {
    let res = sqlx::query(
        "UPDATE posts SET title = ?, content = ?, slug = ?, status = ?, post_type = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&fields.title)
    .bind(&fields.content)
    .bind(&fields.slug)
    .bind(fields.status.as_str())
    .bind(&fields.post_type)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .context("failed to update post")?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("post {} not found", id));
    }
    Ok(())
}

#[instrument(skip_all, fields(post_id = id))]
pub async fn set_post_status(pool: &Pool, id: i64, status: PostStatus) -> Result<()> {
    let res = sqlx::query("UPDATE posts SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("post {} not found", id));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_post(pool: &Pool, id: i64) -> Result<Option<ConnectedPost>> {
    let row = sqlx::query(
        "SELECT id, title, content, slug, status, post_type, created_at, updated_at FROM posts WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(post_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn count_posts(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Point lookup of the post carrying `meta_key = meta_value`. The lowest post
/// id wins if more than one matches.
#[instrument(skip_all)]
pub async fn get_post_id_by_meta(
    pool: &Pool,
    meta_key: &str,
    meta_value: &str,
) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT post_id FROM postmeta WHERE meta_key = ? AND meta_value = ? ORDER BY post_id ASC LIMIT 1",
    )
    .bind(meta_key)
    .bind(meta_value)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn get_post_meta(pool: &Pool, post_id: i64, meta_key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>(
        "SELECT meta_value FROM postmeta WHERE post_id = ? AND meta_key = ? ORDER BY meta_id ASC LIMIT 1",
    )
    .bind(post_id)
    .bind(meta_key)
    .fetch_optional(pool)
    .await?;
    Ok(value)
}

/// Set `meta_key` on a post, replacing any existing value for that key.
#[instrument(skip_all)]
pub async fn set_post_meta(
    pool: &Pool,
    post_id: i64,
    meta_key: &str,
    meta_value: &str,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    let updated =
        sqlx::query("UPDATE postmeta SET meta_value = ? WHERE post_id = ? AND meta_key = ?")
            .bind(meta_value)
            .bind(post_id)
            .bind(meta_key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    if updated == 0 {
        sqlx::query("INSERT INTO postmeta (post_id, meta_key, meta_value) VALUES (?, ?, ?)")
            .bind(post_id)
            .bind(meta_key)
            .bind(meta_value)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Remove every metadata row with `meta_key`, across all posts.
#[instrument(skip_all)]
pub async fn delete_meta_by_key(pool: &Pool, meta_key: &str) -> Result<u64> {
    let res = sqlx::query("DELETE FROM postmeta WHERE meta_key = ?")
        .bind(meta_key)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn count_meta_by_key(pool: &Pool, meta_key: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM postmeta WHERE meta_key = ?")
        .bind(meta_key)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn list_mapped_posts(pool: &Pool, meta_key: &str) -> Result<Vec<MappedPost>> {
    let rows = sqlx::query(
        "SELECT p.id, m.meta_value, p.title, p.status \
         FROM postmeta m JOIN posts p ON p.id = m.post_id \
         WHERE m.meta_key = ? ORDER BY p.id ASC",
    )
    .bind(meta_key)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| -> Result<MappedPost> {
            let post_id: i64 = row.try_get("id")?;
            let status: String = row.try_get("status")?;
            Ok(MappedPost {
                post_id,
                document_id: row.try_get("meta_value")?,
                title: row.try_get("title")?,
                status: PostStatus::parse_status(&status)
                    .ok_or_else(|| anyhow!("post {} has unknown status {}", post_id, status))?,
            })
        })
        .collect()
}

#[instrument(skip_all)]
pub async fn get_option(pool: &Pool, name: &str) -> Result<Option<String>> {
    let value =
        sqlx::query_scalar::<_, String>("SELECT option_value FROM options WHERE option_name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?;
    Ok(value)
}

#[instrument(skip_all)]
pub async fn set_option(pool: &Pool, name: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO options (option_name, option_value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT(option_name) DO UPDATE SET option_value = excluded.option_value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(name)
    .bind(value)
    .execute(pool)
    .await
    .with_context(|| format!("failed to persist option {}", name))?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn delete_option(pool: &Pool, name: &str) -> Result<()> {
    sqlx::query("DELETE FROM options WHERE option_name = ?")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(())
}

/// Canonical public URL of a post on the site rooted at `site_url`.
pub fn permalink(site_url: &Url, post: &ConnectedPost) -> Result<Url> {
    let mut url = site_url.clone();
    url.set_query(None);
    url.set_fragment(None);
    {
        // Each part is pushed as one percent-encoded segment, so a slug can
        // never leave the site or escape its base path.
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| anyhow!("site URL {} cannot carry a path", site_url))?;
        segments.pop_if_empty();
        if !post.slug.trim().is_empty() {
            if post.post_type != "post" {
                segments.push(&post.post_type);
            }
            segments.push(&post.slug);
        }
        segments.push("");
    }

    if post.slug.trim().is_empty() {
        url.query_pairs_mut().append_pair("p", &post.id.to_string());
    }
    Ok(url)
}
