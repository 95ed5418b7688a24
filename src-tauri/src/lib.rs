pub mod debounce;
pub mod extract;
pub mod pipeline;
pub mod session;
pub mod settings;
pub mod shell;
pub mod store;
pub mod utils;
pub mod watcher;

pub use extract::CodeExtractor;
pub use pipeline::{bootstrap, Pipeline, Prepared, StoreAccessError, Trigger};
pub use session::{CodeSink, ExtractionSession, HistoryEntry};
pub use settings::{SettingsStore, WatcherSettings};
pub use store::{MessageRecord, MessageSource, MessageStore};

/// Tray application entry point.
#[cfg(feature = "tray")]
pub fn run() {
    shell::tray::run();
}

/// Windowless entry point: logs to stderr, stops on Ctrl-C.
pub fn run_headless() -> anyhow::Result<()> {
    utils::logging::init();
    shell::headless::run_headless()
}
