//! Row models returned by repositories.

use chrono::NaiveDateTime;

/// `last_sync` value of a subscription that has never been polled successfully.
pub const NEVER_SYNCED: i64 = -1;

/// A persisted search subscription.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub url: String,
    /// Telegram chat receiving notifications for this subscription.
    pub channel_id: i64,
    /// Publication timestamp of the newest delivered item, or [`NEVER_SYNCED`].
    pub last_sync: i64,
    pub created_at: NaiveDateTime,
}

impl Subscription {
    pub fn is_first_sync(&self) -> bool {
        self.last_sync == NEVER_SYNCED
    }
}
