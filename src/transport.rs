use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode};
use tracing::warn;

use crate::notifier::{self, ItemMessage};

/// Delivery sink for rendered notifications.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_item(&self, channel_id: i64, message: &ItemMessage) -> Result<()>;
}

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn open_listing_markup(message: &ItemMessage) -> Option<InlineKeyboardMarkup> {
    let url = Url::parse(message.url.as_deref()?).ok()?;
    Some(InlineKeyboardMarkup::new([[InlineKeyboardButton::url(
        "🔍 Open listing",
        url,
    )]]))
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_item(&self, channel_id: i64, message: &ItemMessage) -> Result<()> {
        let chat = ChatId(channel_id);
        let html = notifier::to_html(message);
        let markup = open_listing_markup(message);

        if let Some(photo) = message.image_url.as_deref().and_then(|u| Url::parse(u).ok()) {
            let mut req = self
                .bot
                .send_photo(chat, InputFile::url(photo))
                .caption(html.clone())
                .parse_mode(ParseMode::Html);
            if let Some(markup) = markup.clone() {
                req = req.reply_markup(markup);
            }
            match req.await {
                Ok(_) => return Ok(()),
                // Telegram rejects some CDN images; the text alone is still worth sending.
                Err(err) => warn!(?err, channel_id, "photo send failed; falling back to text"),
            }
        }

        let mut req = self.bot.send_message(chat, html).parse_mode(ParseMode::Html);
        if let Some(markup) = markup {
            req = req.reply_markup(markup);
        }
        req.await
            .with_context(|| format!("failed to deliver to chat {}", channel_id))?;
        Ok(())
    }
}
