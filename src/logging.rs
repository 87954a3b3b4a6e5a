//! Log setup with a reload handle so the configured level can change at
//! runtime (configuration hot reload, `l` console command).

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Registry, fmt, reload};

#[derive(Clone)]
pub struct LogHandle(reload::Handle<LevelFilter, Registry>);

/// Install the global subscriber. Logs go to stderr so the alert stream on
/// stdout stays clean.
pub fn init(initial: LevelFilter) -> LogHandle {
    let (filter, handle) = reload::Layer::new(initial);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
    LogHandle(handle)
}

impl LogHandle {
    pub fn set(&self, level: LevelFilter) {
        if let Err(e) = self.0.reload(level) {
            eprintln!("failed to change log level: {e}");
        }
    }
}
