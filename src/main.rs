mod audio;
mod catalog;
mod compose;
mod config;
mod console;
mod dedup;
mod districts;
mod fetch;
mod lang;
mod logging;
mod poller;

use anyhow::{Context, Result};
use audio::{AlarmSink, ConsoleBell};
use catalog::AlertCatalog;
use config::ConfigStore;
use console::Console;
use districts::DistrictCache;
use dotenvy::dotenv;
use poller::Poller;
use reqwest::Client as HttpClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

/// Interval of the unconditional reference-cache refresh.
const DAILY_REFRESH: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    eprintln!(
        "Preparing Red Alert Listener v{}...",
        env!("CARGO_PKG_VERSION")
    );

    let log = logging::init(tracing_subscriber::filter::LevelFilter::INFO);

    let config_path = std::env::var("RED_ALERT_CONFIG")
        .unwrap_or_else(|_| config::DEFAULT_CONFIG_PATH.to_string());
    let config = Arc::new(ConfigStore::load(&config_path)?);
    log.set(config.get().log_level.to_filter());

    // Startup resource failures are fatal; everything later is retried.
    let alarm: Arc<dyn AlarmSink> =
        Arc::new(ConsoleBell::open().context("opening audio output")?);

    let http = HttpClient::new();
    let districts = Arc::new(DistrictCache::new());
    let catalog = Arc::new(AlertCatalog::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Unconditional startup refresh of both reference caches.
    {
        let cfg = config.get();
        let mut rx = shutdown_rx.clone();
        districts
            .refresh(&http, cfg.language_code, cfg.timeout(), &mut rx)
            .await;
        catalog.refresh(&http, cfg.timeout(), &mut rx).await;
        let unknown = districts.unknown_districts_of_interest(&cfg.districts_of_interest);
        if !unknown.is_empty() {
            warn!("those districts don't exist: {unknown:?}");
        }
    }

    // Daily refresh timer, independent of the poll loop.
    {
        let http = http.clone();
        let config = Arc::clone(&config);
        let districts = Arc::clone(&districts);
        let catalog = Arc::clone(&catalog);
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(DAILY_REFRESH) => {}
                    _ = rx.changed() => {}
                }
                if *rx.borrow() {
                    break;
                }
                let cfg = config.get();
                districts
                    .refresh(&http, cfg.language_code, cfg.timeout(), &mut rx)
                    .await;
                catalog.refresh(&http, cfg.timeout(), &mut rx).await;
            }
        });
    }

    // Operator command listener.
    tokio::spawn(
        Console {
            http: http.clone(),
            config: Arc::clone(&config),
            districts: Arc::clone(&districts),
            catalog: Arc::clone(&catalog),
            alarm: Arc::clone(&alarm),
            log: log.clone(),
            // main keeps a sender alive; stdin EOF must not close the channel.
            shutdown: shutdown_tx.clone(),
        }
        .run(),
    );

    // The poll loop runs on the main task until shutdown.
    Poller {
        http,
        config,
        districts,
        catalog,
        alarm,
        log,
        shutdown: shutdown_rx,
    }
    .run()
    .await;

    drop(shutdown_tx);
    eprintln!("Bye Bye!");
    Ok(())
}
