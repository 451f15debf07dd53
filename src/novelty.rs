//! Selection of listings that have not been delivered yet.
//!
//! A listing is new when it is not promoted, was published after the
//! subscription's watermark, and its id has never been registered. The first
//! poll of a subscription only delivers the newest listing so that a fresh
//! subscription does not flood the chat with history.
use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::db::{self, Pool, Subscription};
use crate::model::{Item, RawItem};

/// Reduce one page of search results to the listings to deliver, in API order.
///
/// Every returned id is in the item store when this returns, so calling it
/// again with the same page yields nothing. `Item::registered` tells which of
/// them this call inserted. Malformed listings are
/// skipped; only store errors are returned.
#[instrument(skip_all, fields(subscription_id = subscription.id))]
pub async fn compute_new_items(
    pool: &Pool,
    raw_items: Vec<RawItem>,
    subscription: &Subscription,
) -> Result<Vec<Item>> {
    let candidates: Vec<RawItem> = raw_items
        .into_iter()
        .filter(|item| !item.is_promoted())
        .collect();
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    if subscription.is_first_sync() {
        let Some(mut first) = candidates.into_iter().find_map(Item::from_raw) else {
            warn!("no usable listing for first sync");
            return Ok(Vec::new());
        };
        // Another subscription may already own this id; the baseline is
        // delivered either way.
        first.registered = db::mark_item_seen(pool, first.id).await?;
        debug!(
            item_id = first.id,
            timestamp = first.timestamp,
            registered = first.registered,
            "first sync baseline"
        );
        return Ok(vec![first]);
    }

    let mut fresh = Vec::new();
    for raw in candidates {
        let Some(timestamp) = raw.timestamp() else {
            warn!(item_id = ?raw.id, "listing without timestamp; skipping");
            continue;
        };
        let Some(id) = raw.id else {
            warn!(timestamp, "listing without id; skipping");
            continue;
        };
        if timestamp <= subscription.last_sync {
            continue;
        }
        if !db::mark_item_seen(pool, id).await? {
            debug!(item_id = id, "already delivered");
            continue;
        }
        fresh.push(Item {
            id,
            timestamp,
            registered: true,
            details: raw,
        });
    }
    Ok(fresh)
}
