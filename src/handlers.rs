use crate::commands::{self, Command, Destination, SubscribeOutcome, UnsubscribeOutcome};
use crate::db;
use anyhow::Result;
use sqlx::SqlitePool;
use teloxide::prelude::*;
use teloxide::types::{Chat, Recipient};
use tracing::{info, instrument, warn};

#[instrument(skip_all)]
pub async fn handle_update(
    bot: &Bot,
    pool: &SqlitePool,
    allowed_users: &[i64],
    msg: &Message,
) -> Result<()> {
    let Some(command) = msg.text().and_then(commands::parse_command) else {
        return Ok(());
    };
    let user = match msg.from() {
        Some(u) => u,
        None => return Ok(()),
    };

    let tg_user_id = user.id.0 as i64;
    if !allowed_users.is_empty() && !allowed_users.contains(&tg_user_id) {
        warn!(tg_user_id, "ignoring command from user outside allowed_users");
        return Ok(());
    }

    let reply = match command {
        Command::Start | Command::Help => commands::USAGE.to_string(),
        Command::Ping => "PONG".to_string(),
        Command::Invalid(usage) => usage.to_string(),
        Command::Unknown => "Unknown command.".to_string(),
        Command::Subscriptions => {
            let subs = commands::subscriptions(pool).await?;
            commands::subscriptions_reply(&subs)
        }
        Command::Subscribe { url, destination } => {
            handle_subscribe(bot, pool, msg, &url, destination).await?
        }
        Command::Unsubscribe { id } => handle_unsubscribe(bot, pool, msg, id).await?,
    };

    let _ = bot.send_message(msg.chat.id, reply).await;
    Ok(())
}

async fn handle_subscribe(
    bot: &Bot,
    pool: &SqlitePool,
    msg: &Message,
    url: &str,
    destination: Destination,
) -> Result<String> {
    let (channel_id, label) = match resolve_destination(bot, msg, destination).await {
        Ok(resolved) => resolved,
        Err(err) => {
            warn!(?err, "failed to resolve destination chat");
            return Ok(
                "❌ Error: Could not find the destination chat. Add the bot to it first."
                    .to_string(),
            );
        }
    };

    let reply = match commands::subscribe(pool, url, channel_id).await? {
        SubscribeOutcome::Created(sub) => commands::subscribed_reply(&sub, &label),
        SubscribeOutcome::InvalidUrl(reason) => commands::invalid_url_reply(&reason),
    };
    Ok(reply)
}

/// Chat id and display label for a subscription destination.
async fn resolve_destination(
    bot: &Bot,
    msg: &Message,
    destination: Destination,
) -> Result<(i64, String)> {
    let chat = match destination {
        Destination::CurrentChat => return Ok((msg.chat.id.0, "this chat".to_string())),
        Destination::ChatId(id) => bot.get_chat(ChatId(id)).await?,
        Destination::Username(name) => bot.get_chat(Recipient::ChannelUsername(name)).await?,
    };
    Ok((chat.id.0, chat_label(&chat)))
}

fn chat_label(chat: &Chat) -> String {
    chat.title()
        .map(str::to_string)
        .or_else(|| chat.username().map(|u| format!("@{}", u)))
        .unwrap_or_else(|| format!("chat {}", chat.id.0))
}

async fn handle_unsubscribe(
    bot: &Bot,
    pool: &SqlitePool,
    msg: &Message,
    id: i64,
) -> Result<String> {
    let sub = match commands::unsubscribe(pool, id).await? {
        UnsubscribeOutcome::NotFound => return Ok(commands::not_found_reply(id)),
        UnsubscribeOutcome::Removed(sub) => sub,
    };

    // Bots cannot delete chats, so leave destinations nothing targets anymore.
    let remaining = db::count_subscriptions_for_channel(pool, sub.channel_id).await?;
    if remaining == 0 && sub.channel_id != msg.chat.id.0 {
        match bot.leave_chat(ChatId(sub.channel_id)).await {
            Ok(_) => info!(channel_id = sub.channel_id, "left unused destination"),
            Err(err) => warn!(?err, channel_id = sub.channel_id, "failed to leave destination"),
        }
    }
    Ok(commands::unsubscribed_reply(id))
}
