//! Harvest example
//!
//! Runs a full harvest with settings taken from the environment (a `.env` file is
//! honoured):
//!
//! - `START_PAGE` / `END_PAGE` - page range (default: 0..=23400)
//! - `CONCURRENCY` - parallel page fetches (default: 50)
//! - `DATABASE_PATH` - SQLite file (default: catalog-harvest.db)
//! - `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID` - optional progress messages
//! - `RUST_LOG` - log filter (default: `catalog_harvest=info`)
//!
//! Ctrl+C cancels the run; records already accepted are still flushed.
//!
//! ```bash
//! START_PAGE=0 END_PAGE=20 cargo run --example harvest
//! ```

use catalog_harvest::config::TelegramConfig;
use catalog_harvest::{Config, Harvester, PageRange, cancel_on_shutdown_signal};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // RUST_LOG overrides, e.g. RUST_LOG=catalog_harvest=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("catalog_harvest=info")),
        )
        .init();

    let mut config = Config::default();
    config.pages = PageRange::new(
        env_or("START_PAGE", config.pages.start),
        env_or("END_PAGE", config.pages.end),
    );
    config.pool.concurrency = env_or("CONCURRENCY", config.pool.concurrency);
    if let Ok(path) = std::env::var("DATABASE_PATH") {
        config.persistence.database_path = path.into();
    }
    if let (Ok(bot_token), Ok(chat_id)) = (
        std::env::var("TELEGRAM_BOT_TOKEN"),
        std::env::var("TELEGRAM_CHAT_ID"),
    ) {
        config.notifications.telegram = Some(TelegramConfig {
            bot_token,
            chat_id,
            api_base: "https://api.telegram.org".to_string(),
            timeout: Duration::from_secs(10),
            min_interval: Duration::from_secs(1),
        });
    }

    println!(
        "Harvesting pages {}..={} into {}",
        config.pages.start,
        config.pages.end,
        config.persistence.database_path.display()
    );

    let harvester = Harvester::from_config(config).await?;

    let cancel = CancellationToken::new();
    cancel_on_shutdown_signal(cancel.clone());

    let summary = harvester.run(cancel).await?;

    println!("✓ Processed {} records", summary.processed);
    println!(
        "  {} batches committed ({} records), {} flush errors",
        summary.batches_committed, summary.records_committed, summary.flush_errors
    );
    if !summary.failed_pages.is_empty() {
        println!("✗ {} pages failed: {:?}", summary.failed(), summary.failed_pages);
    }
    if summary.cancelled {
        println!("Run was cancelled before completion");
    }

    if let Some(db) = harvester.database() {
        println!(
            "Database now holds {} products and {} history rows",
            db.count_products().await?,
            db.count_history(None).await?
        );
    }

    Ok(())
}
