use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use teloxide::prelude::*;
use tracing::{error, info};

use vinted_watchbot::config;
use vinted_watchbot::db;
use vinted_watchbot::handlers;
use vinted_watchbot::language::WhatlangDetector;
use vinted_watchbot::marketplace::VintedClient;
use vinted_watchbot::poller::{self, PollContext, PollSettings};
use vinted_watchbot::transport::TelegramTransport;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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
    info!(
        count = db::count_subscriptions(&pool).await?,
        "subscriptions registered"
    );

    let bot = Bot::new(cfg.telegram.bot_token.clone());

    // Spawn the poll loop (single task, subscriptions processed sequentially)
    let marketplace = VintedClient::from_config(&cfg.marketplace)?;
    let transport = TelegramTransport::new(bot.clone());
    let poll_pool = pool.clone();
    let settings = PollSettings::from_config(&cfg.app);
    let per_page = cfg.marketplace.per_page;
    tokio::spawn(async move {
        let ctx = PollContext {
            pool: &poll_pool,
            marketplace: &marketplace,
            transport: &transport,
            detector: &WhatlangDetector,
            per_page,
        };
        poller::run(ctx, settings).await;
    });

    let allowed_users = cfg.telegram.allowed_users.clone();
    info!("starting telegram bot");
    teloxide::repl(bot, move |bot: Bot, msg: Message| {
        let pool = pool.clone();
        let allowed_users = allowed_users.clone();
        async move {
            if let Err(err) = handlers::handle_update(&bot, &pool, &allowed_users, &msg).await {
                error!(?err, "failed to handle update");
            }
            respond(())
        }
    })
    .await;

    Ok(())
}
