use std::{fmt, sync::Arc, time::Instant};

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    debounce::{DebounceGate, QuerySnapshot},
    extract::CodeExtractor,
    session::{CodeSink, ExtractionSession},
    settings::WatcherSettings,
    store::{MessageRecord, MessageSource, MessageStore},
    watcher::{watched_paths, ChangeDetector, ChangeEvent},
};

pub mod startup;

pub use startup::{check_store_access, StoreAccessError, PERMISSION_HINT};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// What caused an extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Change(ChangeEvent),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Startup => write!(f, "startup"),
            Trigger::Change(event) => match event.paths.first() {
                Some(path) => write!(f, "change to {}", path.display()),
                None => write!(f, "change"),
            },
        }
    }
}

/// Query → extract → emit, driven by debounced change events.
///
/// One task owns the pipeline, so the session is only ever touched from there.
pub struct Pipeline<S: MessageSource> {
    source: S,
    sink: Arc<dyn CodeSink>,
    extractor: CodeExtractor,
    session: ExtractionSession,
    gate: DebounceGate<Trigger>,
    settings: WatcherSettings,
}

impl<S: MessageSource> Pipeline<S> {
    pub fn new(settings: &WatcherSettings, source: S, sink: Arc<dyn CodeSink>) -> Self {
        Self {
            source,
            sink,
            extractor: CodeExtractor::new(settings.marker.clone()),
            session: ExtractionSession::new(
                settings.history_limit,
                settings.notification_title.clone(),
            ),
            gate: DebounceGate::new(settings.debounce()),
            settings: settings.clone(),
        }
    }

    pub fn session(&self) -> &ExtractionSession {
        &self.session
    }

    /// Run one query/extract/emit cycle. Returns the code if one was emitted.
    pub async fn check_now(&mut self, trigger: &Trigger) -> Option<String> {
        let now = Utc::now();
        let record = match self
            .source
            .latest_candidate(now, self.settings.window())
            .await
        {
            Ok(record) => record,
            Err(err) => {
                log_error!("query after {trigger} failed, skipping: {err:?}");
                return None;
            }
        };

        self.log_result(trigger, record.as_ref());

        let code = self.extractor.extract(record.as_ref())?;
        let source_text = record.as_ref().map(MessageRecord::text).unwrap_or_default();
        self.session
            .maybe_emit(&code, source_text, now, self.sink.as_ref())
            .then_some(code)
    }

    fn log_result(&mut self, trigger: &Trigger, record: Option<&MessageRecord>) {
        let text = record.and_then(|r| r.text.as_deref());
        let timestamp = record.map(|r| r.timestamp.timestamp());
        let now = Instant::now();

        if QuerySnapshot::is_new(
            self.session.last_query_snapshot.as_ref(),
            text,
            timestamp,
            now,
            self.settings.log_dedup(),
        ) {
            match record {
                Some(r) => log_info!(
                    "[{trigger}] latest message at {}: {:?}",
                    r.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                    r.text()
                ),
                None => log_info!("[{trigger}] no new messages"),
            }
        } else {
            log_debug!("[{trigger}] query result unchanged");
        }

        self.session.last_query_snapshot = Some(QuerySnapshot::capture(text, timestamp, now));
    }

    /// Check once, then react to `changes` until `cancel` fires or the
    /// detector goes away. Hands back the session for inspection.
    pub async fn run(
        mut self,
        mut changes: mpsc::Receiver<ChangeEvent>,
        cancel: CancellationToken,
    ) -> ExtractionSession {
        self.check_now(&Trigger::Startup).await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log_info!("pipeline shutting down");
                    break;
                }
                trigger = self.gate.fired() => {
                    self.check_now(&trigger).await;
                }
                event = changes.recv() => match event {
                    Some(event) => self.gate.trigger(Trigger::Change(event)),
                    None => {
                        log_warn!("change detector stopped");
                        if self.gate.is_pending() {
                            let trigger = self.gate.fired().await;
                            self.check_now(&trigger).await;
                        }
                        break;
                    }
                },
            }
        }

        self.session
    }
}

/// Everything needed to start watching, created only after the access gate.
pub struct Prepared {
    pub pipeline: Pipeline<MessageStore>,
    pub detector: ChangeDetector,
    pub changes: mpsc::Receiver<ChangeEvent>,
}

/// Gate on store access, then open the store and the watchers.
///
/// A [`StoreAccessError`] inside the returned error means the user has to
/// grant access; nothing has been queried in that case.
pub fn bootstrap(settings: &WatcherSettings, sink: Arc<dyn CodeSink>) -> Result<Prepared> {
    check_store_access(&settings.db_path)?;

    let store = MessageStore::open(settings.db_path.clone())
        .with_context(|| format!("failed to open {}", settings.db_path.display()))?;
    let (detector, changes) = ChangeDetector::start(
        &watched_paths(store.path()),
        settings.stability(),
        settings.poll_interval(),
    )?;

    Ok(Prepared {
        pipeline: Pipeline::new(settings, store, sink),
        detector,
        changes,
    })
}
