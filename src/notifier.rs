//! Rendering of new listings into chat notifications.
//!
//! `render` is pure: the clock and the language detector are passed in.
use chrono::{DateTime, Utc};
use reqwest::Url;
use teloxide::utils::html::escape;

use crate::language::{language_flag, LanguageDetector};
use crate::model::Item;

const TITLE_PLACEHOLDER: &str = "Untitled item";
const FIELD_PLACEHOLDER: &str = "N/A";
const AUTHOR_PLACEHOLDER: &str = "unknown";
const MAX_TITLE_CHARS: usize = 200;

/// Display payload for one listing, independent of the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMessage {
    pub title: String,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub price: String,
    pub size: String,
    pub brand: Option<String>,
    pub language: String,
    pub published: Option<String>,
    pub footer: String,
    pub author: Author,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub profile_url: Option<String>,
}

pub fn render(
    item: &Item,
    subscription_id: i64,
    detector: &dyn LanguageDetector,
    now: DateTime<Utc>,
) -> ItemMessage {
    let raw = &item.details;
    let title = non_empty(raw.title.as_deref());

    let language = title.and_then(|t| detector.detect(t));
    let price = raw
        .price_parts()
        .map(|(amount, currency)| format_price(&amount, currency.as_deref()))
        .unwrap_or_else(|| FIELD_PLACEHOLDER.to_string());

    let user = raw.user.as_ref();
    let author = Author {
        name: non_empty(user.and_then(|u| u.login.as_deref()))
            .unwrap_or(AUTHOR_PLACEHOLDER)
            .to_string(),
        profile_url: non_empty(user.and_then(|u| u.profile_url.as_deref())).map(str::to_string),
    };

    ItemMessage {
        title: title
            .map(|t| t.chars().take(MAX_TITLE_CHARS).collect())
            .unwrap_or_else(|| TITLE_PLACEHOLDER.to_string()),
        url: non_empty(raw.url.as_deref()).map(str::to_string),
        image_url: non_empty(raw.image_url()).map(str::to_string),
        price,
        size: non_empty(raw.size_title.as_deref())
            .unwrap_or(FIELD_PLACEHOLDER)
            .to_string(),
        brand: non_empty(raw.brand_title.as_deref()).map(str::to_string),
        language: language_flag(language.as_deref()).to_string(),
        published: DateTime::from_timestamp(item.timestamp, 0)
            .map(|d| d.format("%d-%m-%Y").to_string()),
        footer: format!(
            "Subscription #{} • {}",
            subscription_id,
            now.format("%d-%m-%Y %H:%M:%S UTC")
        ),
        author,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn format_price(amount: &str, currency: Option<&str>) -> String {
    match currency.map(str::trim) {
        None | Some("") | Some("EUR") => format!("{} €", amount),
        Some("GBP") => format!("{} £", amount),
        Some("USD") => format!("{} $", amount),
        Some("PLN") => format!("{} zł", amount),
        Some("CZK") => format!("{} Kč", amount),
        Some(code) => format!("{} {}", amount, code),
    }
}

/// Telegram HTML body (photo caption or message text).
pub fn to_html(msg: &ItemMessage) -> String {
    let mut out = String::new();
    match msg.url.as_deref().and_then(href) {
        Some(url) => out.push_str(&format!(
            "<a href=\"{}\"><b>{}</b></a>\n",
            url,
            escape(&msg.title)
        )),
        None => out.push_str(&format!("<b>{}</b>\n", escape(&msg.title))),
    }
    out.push_str(&format!("💶 Price: {}\n", escape(&msg.price)));
    out.push_str(&format!("📏 Size: {}\n", escape(&msg.size)));
    if let Some(brand) = &msg.brand {
        out.push_str(&format!("🏷 Brand: {}\n", escape(brand)));
    }
    out.push_str(&format!("🌐 Language: {}\n", msg.language));
    if let Some(published) = &msg.published {
        out.push_str(&format!("📅 Published on {}\n", published));
    }
    let author = match msg.author.profile_url.as_deref().and_then(href) {
        Some(profile) => format!(
            "<a href=\"{}\">{}</a>",
            profile,
            escape(&msg.author.name)
        ),
        None => escape(&msg.author.name),
    };
    out.push_str(&format!("👤 Posted by {}\n", author));
    out.push_str(&format!("<i>{}</i>", escape(&msg.footer)));
    out
}

/// Attribute-safe link target. Only absolute http(s) URLs become links.
fn href(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    Some(escape(url.as_str()).replace('"', "&quot;"))
}
