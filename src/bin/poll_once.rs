use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use teloxide::Bot;
use tracing::info;

use vinted_watchbot::config;
use vinted_watchbot::db;
use vinted_watchbot::language::WhatlangDetector;
use vinted_watchbot::marketplace::VintedClient;
use vinted_watchbot::poller::{self, PollContext};
use vinted_watchbot::transport::TelegramTransport;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run a single poll cycle over all subscriptions and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override marketplace.per_page for this run
    #[arg(long)]
    per_page: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let marketplace = VintedClient::from_config(&cfg.marketplace)?;
    let transport = TelegramTransport::new(Bot::new(cfg.telegram.bot_token.clone()));
    let ctx = PollContext {
        pool: &pool,
        marketplace: &marketplace,
        transport: &transport,
        detector: &WhatlangDetector,
        per_page: args.per_page.unwrap_or(cfg.marketplace.per_page),
    };

    let report = poller::poll_once(ctx).await?;
    info!(
        subscriptions = report.subscriptions,
        delivered = report.delivered,
        failed_deliveries = report.failed_deliveries,
        failed_subscriptions = report.failed_subscriptions,
        seen_items = db::count_seen_items(&pool).await?,
        "poll cycle completed"
    );
    Ok(())
}
