//! Background poll loop: search, filter, deliver, advance the watermark.
use anyhow::{Context, Result};
use chrono::Utc;
use futures::FutureExt;
use rand::Rng;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::config;
use crate::db::{self, Pool, Subscription};
use crate::language::LanguageDetector;
use crate::marketplace::Marketplace;
use crate::notifier;
use crate::transport::ChatTransport;

/// Collaborators shared by every cycle.
#[derive(Clone, Copy)]
pub struct PollContext<'a> {
    pub pool: &'a Pool,
    pub marketplace: &'a dyn Marketplace,
    pub transport: &'a dyn ChatTransport,
    pub detector: &'a dyn LanguageDetector,
    pub per_page: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub min_pause: Duration,
    pub max_pause: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            min_pause: Duration::from_secs(60),
            max_pause: Duration::from_secs(120),
        }
    }
}

impl PollSettings {
    pub fn from_config(app: &config::App) -> Self {
        Self {
            min_pause: Duration::from_secs(app.poll_min_seconds),
            max_pause: Duration::from_secs(app.poll_max_seconds),
        }
    }

    /// Uniformly random whole-second pause in `[min_pause, max_pause]`.
    pub fn next_pause(&self) -> Duration {
        let min = self.min_pause.as_secs();
        let max = self.max_pause.as_secs().max(min);
        Duration::from_secs(rand::thread_rng().gen_range(min..=max))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionOutcome {
    pub delivered: usize,
    pub failed: usize,
    /// Watermark persisted by this run, if it moved.
    pub watermark: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub subscriptions: usize,
    pub delivered: usize,
    pub failed_deliveries: usize,
    pub failed_subscriptions: usize,
}

/// Run poll cycles forever, sleeping a random pause between them.
pub async fn run(ctx: PollContext<'_>, settings: PollSettings) {
    info!("poller started");
    loop {
        info!("executing poll cycle");
        match poll_once(ctx).await {
            Ok(report) => info!(
                subscriptions = report.subscriptions,
                delivered = report.delivered,
                failed_deliveries = report.failed_deliveries,
                failed_subscriptions = report.failed_subscriptions,
                "poll cycle finished"
            ),
            Err(err) => error!(?err, "poll cycle failed"),
        }

        let pause = settings.next_pause();
        info!(seconds = pause.as_secs(), "sleeping until next cycle");
        tokio::time::sleep(pause).await;
    }
}

/// One pass over a snapshot of all subscriptions. A failing subscription is
/// logged and counted; the others are still processed.
#[instrument(skip_all)]
pub async fn poll_once(ctx: PollContext<'_>) -> Result<CycleReport> {
    let subscriptions = db::list_subscriptions(ctx.pool)
        .await
        .context("failed to load subscriptions")?;
    let mut report = CycleReport {
        subscriptions: subscriptions.len(),
        ..Default::default()
    };

    for sub in &subscriptions {
        let result = AssertUnwindSafe(process_subscription(ctx, sub))
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(outcome)) => {
                report.delivered += outcome.delivered;
                report.failed_deliveries += outcome.failed;
            }
            Ok(Err(err)) => {
                report.failed_subscriptions += 1;
                warn!(?err, subscription_id = sub.id, "subscription skipped this cycle");
            }
            Err(_) => {
                report.failed_subscriptions += 1;
                error!(subscription_id = sub.id, "subscription processing panicked");
            }
        }
    }
    Ok(report)
}

/// Fetch, filter and deliver for one subscription, then persist the watermark.
///
/// A listing whose delivery fails is released from the item store (when this
/// run registered it) and the watermark stays below it, so the next cycle
/// retries it. If the release itself fails the watermark is left alone and
/// the error is returned.
#[instrument(skip_all, fields(subscription_id = sub.id))]
pub async fn process_subscription(
    ctx: PollContext<'_>,
    sub: &Subscription,
) -> Result<SubscriptionOutcome> {
    let raw = ctx
        .marketplace
        .search(&sub.url, ctx.per_page)
        .await
        .with_context(|| format!("search failed for {}", sub.url))?;
    let fetched = raw.len();

    let new_items = crate::novelty::compute_new_items(ctx.pool, raw, sub).await?;
    debug!(fetched, new = new_items.len(), "filtered listings");

    let now = Utc::now();
    let mut outcome = SubscriptionOutcome::default();
    let mut newest_delivered: Option<i64> = None;
    let mut oldest_failed: Option<i64> = None;
    let mut stuck: Vec<i64> = Vec::new();

    for item in &new_items {
        let message = notifier::render(item, sub.id, ctx.detector, now);
        match ctx.transport.send_item(sub.channel_id, &message).await {
            Ok(()) => {
                outcome.delivered += 1;
                newest_delivered = Some(newest_delivered.map_or(item.timestamp, |t| t.max(item.timestamp)));
                info!(item_id = item.id, channel_id = sub.channel_id, "delivered listing");
            }
            Err(err) => {
                outcome.failed += 1;
                oldest_failed = Some(oldest_failed.map_or(item.timestamp, |t| t.min(item.timestamp)));
                warn!(?err, item_id = item.id, "delivery failed; will retry next cycle");
                if !item.registered {
                    continue;
                }
                if let Err(err) = db::release_item(ctx.pool, item.id).await {
                    error!(?err, item_id = item.id, "failed to release undelivered listing");
                    stuck.push(item.id);
                }
            }
        }
    }

    // A listing that stays registered without being delivered cannot be
    // retried; keep the watermark and report the subscription as failed.
    if !stuck.is_empty() {
        anyhow::bail!("undelivered listings still registered: {:?}", stuck);
    }

    if let Some(watermark) = next_watermark(newest_delivered, oldest_failed) {
        if db::update_last_sync(ctx.pool, sub.id, watermark).await? {
            info!(last_sync = watermark, "advanced watermark");
            outcome.watermark = Some(watermark);
        }
    }
    Ok(outcome)
}

/// Newest delivered timestamp, kept strictly below the oldest failed delivery.
/// `None` when nothing was delivered.
pub fn next_watermark(newest_delivered: Option<i64>, oldest_failed: Option<i64>) -> Option<i64> {
    let newest = newest_delivered?;
    match oldest_failed {
        Some(failed) => Some(newest.min(failed - 1)),
        None => Some(newest),
    }
}
