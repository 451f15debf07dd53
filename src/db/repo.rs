use super::model::{Subscription, NEVER_SYNCED};
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // WAL plus full fsync: a registered item id must survive a crash.
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {}", normalized))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .context("failed to open sqlite database")?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn add_subscription(pool: &Pool, url: &str, channel_id: i64) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO subscriptions (url, channel_id, last_sync) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(url)
    .bind(channel_id)
    .bind(NEVER_SYNCED)
    .fetch_one(pool)
    .await
    .context("failed to insert subscription")?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn list_subscriptions(pool: &Pool) -> Result<Vec<Subscription>> {
    let subs = sqlx::query_as::<_, Subscription>(
        "SELECT id, url, channel_id, last_sync, created_at FROM subscriptions ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(subs)
}

#[instrument(skip_all)]
pub async fn get_subscription(pool: &Pool, id: i64) -> Result<Option<Subscription>> {
    let sub = sqlx::query_as::<_, Subscription>(
        "SELECT id, url, channel_id, last_sync, created_at FROM subscriptions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(sub)
}

/// Returns `false` when no subscription had this id.
#[instrument(skip_all)]
pub async fn remove_subscription(pool: &Pool, id: i64) -> Result<bool> {
    let res = sqlx::query("DELETE FROM subscriptions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Advance the watermark. The stored value never decreases; returns whether it moved.
#[instrument(skip_all)]
pub async fn update_last_sync(pool: &Pool, id: i64, timestamp: i64) -> Result<bool> {
    let res = sqlx::query("UPDATE subscriptions SET last_sync = ? WHERE id = ? AND last_sync < ?")
        .bind(timestamp)
        .bind(id)
        .bind(timestamp)
        .execute(pool)
        .await
        .context("failed to persist subscription watermark")?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn count_subscriptions(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn count_subscriptions_for_channel(pool: &Pool, channel_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE channel_id = ?")
        .bind(channel_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Register an item id as delivered. Check and insert happen in one statement;
/// returns `true` only for the caller that registered it first.
#[instrument(skip_all)]
pub async fn mark_item_seen(pool: &Pool, item_id: i64) -> Result<bool> {
    let res = sqlx::query("INSERT OR IGNORE INTO items (id) VALUES (?)")
        .bind(item_id)
        .execute(pool)
        .await
        .context("failed to register seen item")?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn is_item_seen(pool: &Pool, item_id: i64) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM items WHERE id = ?")
        .bind(item_id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Undo a registration whose delivery failed, so the next cycle retries it.
#[instrument(skip_all)]
pub async fn release_item(pool: &Pool, item_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM items WHERE id = ?")
        .bind(item_id)
        .execute(pool)
        .await
        .context("failed to release seen item")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_seen_items(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
