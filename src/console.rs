//! Operator console: a line-oriented command listener on stdin.
//!
//! Commands that hit the network (`r`, `l` with a language change) are
//! dispatched to background tasks so keystroke echoing never blocks on a
//! refresh in progress.

use crate::audio::{AlarmCue, AlarmSink};
use crate::catalog::AlertCatalog;
use crate::config::{ConfigStore, Reload};
use crate::districts::DistrictCache;
use crate::logging::LogHandle;
use reqwest::Client as HttpClient;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::info;

pub fn print_help() {
    eprintln!(
        "Enter \"t\" for a sound test, \"c\" to clear the screen, \
         \"r\" to refresh the translation caches, \"l\" to reload the configuration, \
         \"q\" to quit or \"h\" to display this help message."
    );
}

pub struct Console {
    pub http: HttpClient,
    pub config: Arc<ConfigStore>,
    pub districts: Arc<DistrictCache>,
    pub catalog: Arc<AlertCatalog>,
    pub alarm: Arc<dyn AlarmSink>,
    pub log: LogHandle,
    pub shutdown: watch::Sender<bool>,
}

impl Console {
    pub async fn run(self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        print_help();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = shutdown_rx.changed() => break,
            };
            let Ok(Some(line)) = line else {
                // stdin closed; the poll loop keeps running.
                break;
            };
            match line.trim() {
                "" => {}
                "q" | "quit" | "exit" => {
                    let _ = self.shutdown.send(true);
                    break;
                }
                "t" | "test" | "test-sound" => {
                    eprintln!("Testing sound...");
                    self.alarm.play(AlarmCue::Once);
                }
                "c" | "clear" => eprintln!("\x1b[H\x1b[2JListening..."),
                "r" | "refresh" | "refresh-districts" => self.dispatch_refresh(),
                "l" | "reload" | "reload-configuration" => self.reload_configuration(),
                "h" | "help" => print_help(),
                _ => {
                    eprintln!("Unrecognized command!");
                    print_help();
                }
            }
        }
    }

    fn dispatch_refresh(&self) {
        let http = self.http.clone();
        let config = Arc::clone(&self.config);
        let districts = Arc::clone(&self.districts);
        let catalog = Arc::clone(&self.catalog);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let cfg = config.get();
            if let Some(at) = districts.last_refresh() {
                info!("districts last refreshed {} seconds ago", at.elapsed().as_secs());
            }
            districts
                .refresh(&http, cfg.language_code, cfg.timeout(), &mut shutdown)
                .await;
            catalog.refresh(&http, cfg.timeout(), &mut shutdown).await;
        });
    }

    fn reload_configuration(&self) {
        self.config.mark_dirty();
        match self.config.poll() {
            Reload::Updated { language_changed } => {
                let cfg = self.config.get();
                self.log.set(cfg.log_level.to_filter());
                info!("configuration reloaded");
                if language_changed {
                    // Language purity: the caches must be rebuilt under the
                    // new language before the next event resolves.
                    self.dispatch_refresh();
                }
            }
            Reload::Unchanged => info!("configuration unchanged"),
        }
    }
}
