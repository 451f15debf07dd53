//! Chat commands for managing subscriptions, independent of the Telegram SDK.
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, instrument};

use crate::db::{self, Pool, Subscription};
use crate::marketplace::{search_api_url, FetchError};

pub const USAGE: &str = "Commands:\n\
/subscribe <url> [destination] - watch a search; destination is @channel, a chat id, or this chat\n\
/subscriptions - list subscriptions\n\
/unsubscribe <id> - stop watching a search\n\
/ping - health check";

static DESTINATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(@[A-Za-z][A-Za-z0-9_]{3,31}|-?[0-9]{1,19})$").unwrap());

/// Where notifications for a new subscription go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    CurrentChat,
    Username(String),
    ChatId(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Ping,
    Subscribe { url: String, destination: Destination },
    Subscriptions,
    Unsubscribe { id: i64 },
    /// Known command with bad arguments; carries the usage line to reply with.
    Invalid(&'static str),
    Unknown,
}

/// Parse a message as a command. Returns `None` for plain text.
pub fn parse_command(text: &str) -> Option<Command> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let head = parts.next().unwrap_or_default();
    // "/subscribe@my_bot" in group chats
    let name = head.split('@').next().unwrap_or_default().to_ascii_lowercase();
    let args: Vec<&str> = parts.collect();

    let cmd = match (name.as_str(), args.as_slice()) {
        ("start", _) => Command::Start,
        ("help", _) => Command::Help,
        ("ping", _) => Command::Ping,
        ("subscriptions", []) => Command::Subscriptions,
        ("subscriptions", _) => Command::Invalid("Usage: /subscriptions"),
        ("subscribe", [url]) => Command::Subscribe {
            url: url.to_string(),
            destination: Destination::CurrentChat,
        },
        ("subscribe", [url, dest]) => match parse_destination(dest) {
            Some(destination) => Command::Subscribe {
                url: url.to_string(),
                destination,
            },
            None => Command::Invalid("Destination must be @channel or a numeric chat id."),
        },
        ("subscribe", _) => Command::Invalid("Usage: /subscribe <url> [destination]"),
        ("unsubscribe", [id]) => match id.trim_start_matches('#').parse::<i64>() {
            Ok(id) => Command::Unsubscribe { id },
            Err(_) => Command::Invalid("Usage: /unsubscribe <id>"),
        },
        ("unsubscribe", _) => Command::Invalid("Usage: /unsubscribe <id>"),
        _ => Command::Unknown,
    };
    Some(cmd)
}

fn parse_destination(raw: &str) -> Option<Destination> {
    if !DESTINATION.is_match(raw) {
        return None;
    }
    if raw.starts_with('@') {
        return Some(Destination::Username(raw.to_string()));
    }
    raw.parse().ok().map(Destination::ChatId)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Created(Subscription),
    InvalidUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    Removed(Subscription),
    NotFound,
}

/// Store a new subscription after checking the URL can be searched.
#[instrument(skip_all)]
pub async fn subscribe(pool: &Pool, url: &str, channel_id: i64) -> Result<SubscribeOutcome> {
    if let Err(FetchError::InvalidUrl(reason)) = search_api_url(url, None, 1) {
        return Ok(SubscribeOutcome::InvalidUrl(reason));
    }
    let id = db::add_subscription(pool, url.trim(), channel_id).await?;
    info!(id, url = %url, channel_id, "subscription created");
    match db::get_subscription(pool, id).await? {
        Some(sub) => Ok(SubscribeOutcome::Created(sub)),
        None => anyhow::bail!("subscription {} vanished after insert", id),
    }
}

pub async fn subscriptions(pool: &Pool) -> Result<Vec<Subscription>> {
    db::list_subscriptions(pool).await
}

/// Remove a subscription. Unknown ids are reported, not treated as errors.
#[instrument(skip_all)]
pub async fn unsubscribe(pool: &Pool, id: i64) -> Result<UnsubscribeOutcome> {
    let Some(sub) = db::get_subscription(pool, id).await? else {
        return Ok(UnsubscribeOutcome::NotFound);
    };
    if !db::remove_subscription(pool, id).await? {
        return Ok(UnsubscribeOutcome::NotFound);
    }
    info!(id, "deleted subscription");
    Ok(UnsubscribeOutcome::Removed(sub))
}

pub fn subscribed_reply(sub: &Subscription, destination: &str) -> String {
    format!("✅ Created subscription #{} in {}", sub.id, destination)
}

pub fn invalid_url_reply(reason: &str) -> String {
    format!("❌ Error: {}", reason)
}

pub fn subscriptions_reply(subs: &[Subscription]) -> String {
    if subs.is_empty() {
        return "No subscriptions yet. Use /subscribe <url> [destination].".to_string();
    }
    let mut out = String::from("📋 Subscriptions");
    for sub in subs {
        out.push_str(&format!("\n#{} {} → chat {}", sub.id, sub.url, sub.channel_id));
    }
    out
}

pub fn unsubscribed_reply(id: i64) -> String {
    format!("🗑 Deleted subscription #{}.", id)
}

pub fn not_found_reply(id: i64) -> String {
    format!("❌ Error: Subscription not found with ID {}.", id)
}
