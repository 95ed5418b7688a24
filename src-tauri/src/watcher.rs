//! Change detection for the Messages store.
//!
//! SQLite in WAL mode touches `chat.db-wal` and `chat.db-shm` many times per
//! incoming message, so raw notify events are coalesced by a write-stability
//! window before anything reaches the pipeline.
//!
//! The sidecars come and go: SQLite creates them on first write and may delete
//! them when the last connection closes. The detector therefore watches the
//! directory holding the store and keeps only events for the store's files.

use std::{
    collections::HashSet,
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{
    new_debouncer_opt, Config, DebounceEventResult, DebouncedEvent, DebouncedEventKind, Debouncer,
};
use tokio::sync::mpsc;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const CHANNEL_CAPACITY: usize = 64;
const SIDECAR_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

/// A settled modification of one or more watched files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub paths: Vec<PathBuf>,
}

/// The store file followed by its WAL and shared-memory sidecars.
pub fn watched_paths(db_path: &Path) -> Vec<PathBuf> {
    let mut paths = vec![db_path.to_path_buf()];
    paths.extend(SIDECAR_SUFFIXES.iter().map(|suffix| {
        let mut name = OsString::from(db_path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }));
    paths
}

/// Directory to watch for a file; bare file names live in the current directory.
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Paths of settled events whose file name is one of `names`.
///
/// `AnyContinuous` is emitted while writes are still going on past the
/// stability window, so it is not a settled change.
fn settled_paths(events: Vec<DebouncedEvent>, names: &HashSet<OsString>) -> Vec<PathBuf> {
    events
        .into_iter()
        .filter(|event| matches!(event.kind, DebouncedEventKind::Any))
        .filter(|event| {
            event
                .path
                .file_name()
                .map(|name| names.contains(name))
                .unwrap_or(false)
        })
        .map(|event| event.path)
        .collect()
}

/// Keeps the underlying watcher alive; dropping it stops all watches.
pub struct ChangeDetector {
    _debouncer: Debouncer<RecommendedWatcher>,
    watching: Vec<PathBuf>,
}

impl ChangeDetector {
    /// Watch the directories holding `paths`, forwarding settled changes to
    /// any of those files to the returned receiver. Files that do not exist
    /// yet are picked up once created.
    ///
    /// A directory that cannot be watched is logged and skipped.
    pub fn start(
        paths: &[PathBuf],
        stability: Duration,
        poll_interval: Duration,
    ) -> Result<(Self, mpsc::Receiver<ChangeEvent>)> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let names: HashSet<OsString> = paths
            .iter()
            .filter_map(|path| path.file_name().map(OsStr::to_os_string))
            .collect();

        let config = Config::default()
            .with_timeout(stability)
            .with_notify_config(notify::Config::default().with_poll_interval(poll_interval));

        let mut debouncer = new_debouncer_opt::<_, RecommendedWatcher>(
            config,
            move |res: DebounceEventResult| match res {
                Ok(events) => {
                    let paths = settled_paths(events, &names);
                    if paths.is_empty() {
                        return;
                    }
                    log_debug!("store files settled: {paths:?}");
                    // A full queue already holds a trigger for this burst.
                    if let Err(mpsc::error::TrySendError::Closed(_)) =
                        tx.try_send(ChangeEvent { paths })
                    {
                        log_debug!("change receiver closed, dropping event");
                    }
                }
                Err(err) => log_error!("file watch error: {err:?}"),
            },
        )
        .context("failed to create file watcher")?;

        let mut dirs: Vec<PathBuf> = Vec::new();
        for dir in paths.iter().map(|path| parent_dir(path)) {
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }

        let mut watching = Vec::new();
        for dir in dirs {
            match debouncer
                .watcher()
                .watch(&dir, RecursiveMode::NonRecursive)
            {
                Ok(()) => watching.push(dir),
                Err(err) => log_warn!("not watching {}: {err}", dir.display()),
            }
        }

        if watching.is_empty() {
            log_warn!("no store directory could be watched; only the startup check will run");
        } else {
            log_info!("watching {} store directory(ies)", watching.len());
        }

        Ok((
            Self {
                _debouncer: debouncer,
                watching,
            },
            rx,
        ))
    }

    /// Directories currently watched.
    pub fn watching(&self) -> &[PathBuf] {
        &self.watching
    }
}
