use anyhow::{anyhow, Result};
use reqwest::StatusCode;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use vinted_watchbot::db;
use vinted_watchbot::language::LanguageDetector;
use vinted_watchbot::marketplace::{FetchError, Marketplace};
use vinted_watchbot::model::RawItem;
use vinted_watchbot::notifier::ItemMessage;
use vinted_watchbot::poller::{poll_once, PollContext};
use vinted_watchbot::transport::ChatTransport;

const URL_A: &str = "https://www.vinted.fr/catalog?search_text=jacket";
const URL_B: &str = "https://www.vinted.fr/catalog?search_text=boots";

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

fn listing(id: i64, timestamp: i64) -> RawItem {
    serde_json::from_value(json!({
        "id": id,
        "title": format!("Listing {}", id),
        "url": format!("https://www.vinted.fr/items/{}", id),
        "promoted": false,
        "price": "10.0",
        "size_title": "M",
        "photo": {"url": format!("https://img/{}.jpg", id), "high_resolution": {"timestamp": timestamp}},
        "user": {"login": "seller", "profile_url": "https://www.vinted.fr/member/9"}
    }))
    .unwrap()
}

fn promoted(id: i64, timestamp: i64) -> RawItem {
    let mut item = listing(id, timestamp);
    item.promoted = Some(true);
    item
}

/// Serves queued pages per URL; an exhausted queue serves an empty page.
#[derive(Default)]
struct StubMarketplace {
    pages: Mutex<HashMap<String, VecDeque<Result<Vec<RawItem>, FetchError>>>>,
    calls: Mutex<Vec<(String, u32)>>,
}

impl StubMarketplace {
    async fn push(&self, url: &str, page: Result<Vec<RawItem>, FetchError>) {
        self.pages
            .lock()
            .await
            .entry(url.to_string())
            .or_default()
            .push_back(page);
    }
}

#[async_trait::async_trait]
impl Marketplace for StubMarketplace {
    async fn search(&self, url: &str, per_page: u32) -> Result<Vec<RawItem>, FetchError> {
        self.calls.lock().await.push((url.to_string(), per_page));
        self.pages
            .lock()
            .await
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[derive(Clone, Default)]
struct RecordingTransport {
    responses: Arc<Mutex<VecDeque<Result<()>>>>,
    sent: Arc<Mutex<Vec<(i64, ItemMessage)>>>,
}

impl RecordingTransport {
    fn with_responses(responses: Vec<Result<()>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn sent_titles(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|(_, m)| m.title.clone()).collect()
    }
}

#[async_trait::async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_item(&self, channel_id: i64, message: &ItemMessage) -> Result<()> {
        let response = self.responses.lock().await.pop_front().unwrap_or(Ok(()));
        if response.is_ok() {
            self.sent.lock().await.push((channel_id, message.clone()));
        }
        response
    }
}

struct EnglishDetector;

impl LanguageDetector for EnglishDetector {
    fn detect(&self, _text: &str) -> Option<String> {
        Some("en".into())
    }
}

fn ctx<'a>(
    pool: &'a sqlx::SqlitePool,
    marketplace: &'a StubMarketplace,
    transport: &'a RecordingTransport,
) -> PollContext<'a> {
    PollContext {
        pool,
        marketplace,
        transport,
        detector: &EnglishDetector,
        per_page: 20,
    }
}

async fn last_sync(pool: &sqlx::SqlitePool, id: i64) -> i64 {
    db::get_subscription(pool, id).await.unwrap().unwrap().last_sync
}

#[tokio::test]
async fn first_sync_delivers_one_then_only_newer_listings() {
    let pool = setup_pool().await;
    let sub_id = db::add_subscription(&pool, URL_A, -100123).await.unwrap();
    let market = StubMarketplace::default();
    let transport = RecordingTransport::default();

    market.push(URL_A, Ok(vec![listing(4, 10), listing(5, 9), listing(6, 8)])).await;
    let report = poll_once(ctx(&pool, &market, &transport)).await.unwrap();
    assert_eq!(report.subscriptions, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(transport.sent_titles().await, vec!["Listing 4"]);
    assert_eq!(last_sync(&pool, sub_id).await, 10);

    let page = vec![listing(7, 20), listing(4, 10), listing(5, 9)];
    market.push(URL_A, Ok(page.clone())).await;
    market.push(URL_A, Ok(page)).await;

    let report = poll_once(ctx(&pool, &market, &transport)).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(last_sync(&pool, sub_id).await, 20);

    let report = poll_once(ctx(&pool, &market, &transport)).await.unwrap();
    assert_eq!(report.delivered, 0);
    assert_eq!(transport.sent_titles().await, vec!["Listing 4", "Listing 7"]);

    let sent = transport.sent.lock().await;
    assert!(sent.iter().all(|(channel, _)| *channel == -100123));
    assert_eq!(sent[0].1.language, "🇬🇧");
    assert_eq!(sent[0].1.footer.split(" • ").next(), Some(format!("Subscription #{}", sub_id).as_str()));
    drop(sent);

    let calls = market.calls.lock().await;
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|(url, per_page)| url == URL_A && *per_page == 20));
}

#[tokio::test]
async fn promoted_and_old_listings_are_not_delivered() {
    let pool = setup_pool().await;
    let sub_id = db::add_subscription(&pool, URL_A, 1).await.unwrap();
    db::update_last_sync(&pool, sub_id, 60).await.unwrap();
    let market = StubMarketplace::default();
    let transport = RecordingTransport::default();

    market
        .push(URL_A, Ok(vec![promoted(1, 500), listing(2, 100), listing(3, 50)]))
        .await;
    let report = poll_once(ctx(&pool, &market, &transport)).await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(transport.sent_titles().await, vec!["Listing 2"]);
    assert_eq!(last_sync(&pool, sub_id).await, 100);
    assert!(db::is_item_seen(&pool, 2).await.unwrap());
    assert_eq!(db::count_seen_items(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn watermark_uses_newest_timestamp_not_page_order() {
    let pool = setup_pool().await;
    let sub_id = db::add_subscription(&pool, URL_A, 1).await.unwrap();
    db::update_last_sync(&pool, sub_id, 1).await.unwrap();
    let market = StubMarketplace::default();
    let transport = RecordingTransport::default();

    market
        .push(URL_A, Ok(vec![listing(10, 5), listing(11, 50), listing(12, 7)]))
        .await;
    let report = poll_once(ctx(&pool, &market, &transport)).await.unwrap();
    assert_eq!(report.delivered, 3);
    assert_eq!(last_sync(&pool, sub_id).await, 50);
}

#[tokio::test]
async fn failed_delivery_is_retried_next_cycle() {
    let pool = setup_pool().await;
    let sub_id = db::add_subscription(&pool, URL_A, 1).await.unwrap();
    db::update_last_sync(&pool, sub_id, 0).await.unwrap();
    let market = StubMarketplace::default();
    let transport =
        RecordingTransport::with_responses(vec![Ok(()), Err(anyhow!("chat not found")), Ok(())]);

    let page = vec![listing(1, 30), listing(2, 20), listing(3, 10)];
    market.push(URL_A, Ok(page.clone())).await;
    market.push(URL_A, Ok(page)).await;

    let report = poll_once(ctx(&pool, &market, &transport)).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed_deliveries, 1);
    assert_eq!(last_sync(&pool, sub_id).await, 19);
    assert!(!db::is_item_seen(&pool, 2).await.unwrap());

    let report = poll_once(ctx(&pool, &market, &transport)).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed_deliveries, 0);
    assert_eq!(
        transport.sent_titles().await,
        vec!["Listing 1", "Listing 3", "Listing 2"]
    );
    assert_eq!(last_sync(&pool, sub_id).await, 20);
}

#[tokio::test]
async fn failed_first_sync_keeps_subscription_unsynced() {
    let pool = setup_pool().await;
    let sub_id = db::add_subscription(&pool, URL_A, 1).await.unwrap();
    let market = StubMarketplace::default();
    let transport = RecordingTransport::with_responses(vec![Err(anyhow!("forbidden"))]);

    market.push(URL_A, Ok(vec![listing(4, 10)])).await;
    market.push(URL_A, Ok(vec![listing(4, 10)])).await;

    poll_once(ctx(&pool, &market, &transport)).await.unwrap();
    assert_eq!(last_sync(&pool, sub_id).await, db::NEVER_SYNCED);
    assert!(!db::is_item_seen(&pool, 4).await.unwrap());

    let report = poll_once(ctx(&pool, &market, &transport)).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(last_sync(&pool, sub_id).await, 10);
}

#[tokio::test]
async fn fetch_failure_skips_only_that_subscription() {
    let pool = setup_pool().await;
    let broken = db::add_subscription(&pool, URL_A, 1).await.unwrap();
    let healthy = db::add_subscription(&pool, URL_B, 2).await.unwrap();
    let market = StubMarketplace::default();
    let transport = RecordingTransport::default();

    market
        .push(
            URL_A,
            Err(FetchError::Status {
                status: StatusCode::FORBIDDEN,
                body: "blocked".into(),
            }),
        )
        .await;
    market.push(URL_B, Ok(vec![listing(9, 90)])).await;

    let report = poll_once(ctx(&pool, &market, &transport)).await.unwrap();
    assert_eq!(report.subscriptions, 2);
    assert_eq!(report.failed_subscriptions, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(last_sync(&pool, broken).await, db::NEVER_SYNCED);
    assert_eq!(last_sync(&pool, healthy).await, 90);

    let sent = transport.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 2);
}

#[tokio::test]
async fn empty_page_leaves_state_untouched() {
    let pool = setup_pool().await;
    let sub_id = db::add_subscription(&pool, URL_A, 1).await.unwrap();
    let market = StubMarketplace::default();
    let transport = RecordingTransport::default();

    market.push(URL_A, Ok(vec![promoted(1, 10)])).await;
    let report = poll_once(ctx(&pool, &market, &transport)).await.unwrap();
    assert_eq!(report.delivered, 0);
    assert_eq!(last_sync(&pool, sub_id).await, db::NEVER_SYNCED);
    assert_eq!(db::count_seen_items(&pool).await.unwrap(), 0);

    let report = poll_once(ctx(&pool, &market, &transport)).await.unwrap();
    assert_eq!(report.delivered, 0);
}

#[tokio::test]
async fn removed_subscription_is_not_polled() {
    let pool = setup_pool().await;
    let sub_id = db::add_subscription(&pool, URL_A, 1).await.unwrap();
    assert!(db::remove_subscription(&pool, sub_id).await.unwrap());
    let market = StubMarketplace::default();
    let transport = RecordingTransport::default();

    let report = poll_once(ctx(&pool, &market, &transport)).await.unwrap();
    assert_eq!(report.subscriptions, 0);
    assert!(market.calls.lock().await.is_empty());
}

#[tokio::test]
async fn failed_baseline_keeps_listing_delivered_elsewhere_seen() {
    let pool = setup_pool().await;
    let synced = db::add_subscription(&pool, URL_A, 1).await.unwrap();
    db::update_last_sync(&pool, synced, 0).await.unwrap();
    let fresh = db::add_subscription(&pool, URL_B, 2).await.unwrap();
    let market = StubMarketplace::default();
    let transport = RecordingTransport::with_responses(vec![
        Ok(()),
        Err(anyhow!("rate limited")),
        Err(anyhow!("chat not found")),
    ]);

    for _ in 0..2 {
        market.push(URL_A, Ok(vec![listing(1, 30), listing(2, 20)])).await;
        market.push(URL_B, Ok(vec![listing(1, 30)])).await;
    }

    let report = poll_once(ctx(&pool, &market, &transport)).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed_deliveries, 2);
    assert!(db::is_item_seen(&pool, 1).await.unwrap());
    assert!(!db::is_item_seen(&pool, 2).await.unwrap());
    assert_eq!(last_sync(&pool, synced).await, 19);
    assert_eq!(last_sync(&pool, fresh).await, db::NEVER_SYNCED);

    let report = poll_once(ctx(&pool, &market, &transport)).await.unwrap();
    assert_eq!(report.delivered, 2);

    let sent = transport.sent.lock().await;
    let titles_for = |channel: i64| -> Vec<String> {
        sent.iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, m)| m.title.clone())
            .collect()
    };
    assert_eq!(titles_for(1), vec!["Listing 1", "Listing 2"]);
    assert_eq!(titles_for(2), vec!["Listing 1"]);
}

/// Fails every send after closing the pool, so the listing cannot be released.
struct PoolClosingTransport {
    pool: sqlx::SqlitePool,
}

#[async_trait::async_trait]
impl ChatTransport for PoolClosingTransport {
    async fn send_item(&self, _channel_id: i64, _message: &ItemMessage) -> Result<()> {
        self.pool.close().await;
        Err(anyhow!("network unreachable"))
    }
}

#[tokio::test]
async fn unreleased_listing_fails_the_subscription() {
    let pool = setup_pool().await;
    let sub_id = db::add_subscription(&pool, URL_A, 1).await.unwrap();
    db::update_last_sync(&pool, sub_id, 0).await.unwrap();
    let market = StubMarketplace::default();
    let transport = PoolClosingTransport { pool: pool.clone() };

    market.push(URL_A, Ok(vec![listing(1, 10)])).await;
    let report = poll_once(PollContext {
        pool: &pool,
        marketplace: &market,
        transport: &transport,
        detector: &EnglishDetector,
        per_page: 20,
    })
    .await
    .unwrap();

    assert_eq!(report.subscriptions, 1);
    assert_eq!(report.delivered, 0);
    assert_eq!(report.failed_subscriptions, 1);
}

/// Panics while searching one URL and serves the rest from the inner stub.
struct PanickingMarketplace {
    broken_url: &'static str,
    inner: StubMarketplace,
}

#[async_trait::async_trait]
impl Marketplace for PanickingMarketplace {
    async fn search(&self, url: &str, per_page: u32) -> Result<Vec<RawItem>, FetchError> {
        if url == self.broken_url {
            panic!("unexpected payload for {}", url);
        }
        self.inner.search(url, per_page).await
    }
}

#[tokio::test]
async fn panicking_subscription_does_not_stop_the_cycle() {
    let pool = setup_pool().await;
    let broken = db::add_subscription(&pool, URL_A, 1).await.unwrap();
    let healthy = db::add_subscription(&pool, URL_B, 2).await.unwrap();
    let market = PanickingMarketplace {
        broken_url: URL_A,
        inner: StubMarketplace::default(),
    };
    market.inner.push(URL_B, Ok(vec![listing(9, 90)])).await;
    let transport = RecordingTransport::default();

    let report = poll_once(PollContext {
        pool: &pool,
        marketplace: &market,
        transport: &transport,
        detector: &EnglishDetector,
        per_page: 20,
    })
    .await
    .unwrap();

    assert_eq!(report.subscriptions, 2);
    assert_eq!(report.failed_subscriptions, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(last_sync(&pool, broken).await, db::NEVER_SYNCED);
    assert_eq!(last_sync(&pool, healthy).await, 90);
    assert_eq!(transport.sent_titles().await, vec!["Listing 9"]);
}
