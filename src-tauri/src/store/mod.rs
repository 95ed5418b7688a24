use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tokio::sync::oneshot;

pub mod models;

pub use models::{normalize_apple_date, MessageRecord, APPLE_EPOCH_OFFSET_SECS};
use models::NANOSECOND_DATE_THRESHOLD;

/// Anything that can answer "latest message inside the trailing window".
pub trait MessageSource: Send + Sync + 'static {
    fn latest_candidate(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> impl Future<Output = Result<Option<MessageRecord>>> + Send;
}

type StoreTask = Box<dyn FnOnce(&Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

/// Read-only handle on the Messages database, owned by a dedicated thread.
#[derive(Clone)]
pub struct MessageStore {
    inner: Arc<StoreInner>,
    db_path: Arc<PathBuf>,
}

impl MessageStore {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("smscode-store".into())
            .spawn(move || {
                let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
                let conn = match Connection::open_with_flags(&path_for_thread, flags) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open message store read-only")));
                        return;
                    }
                };

                if let Err(err) = conn.busy_timeout(Duration::from_millis(250)) {
                    error!("Failed to set busy timeout: {err}");
                }

                if ready_tx.send(Ok(())).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => task(&conn),
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .with_context(|| "failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        info!("Message store opened read-only at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }

    pub async fn latest_message_since(&self, cutoff_unix: i64) -> Result<Option<MessageRecord>> {
        self.execute(move |conn| {
            let row = conn
                .query_row(
                    "SELECT text,
                            (CASE WHEN date > ?2 THEN date / 1000000000 ELSE date END) + ?3 AS unix_ts
                     FROM message
                     WHERE (CASE WHEN date > ?2 THEN date / 1000000000 ELSE date END) + ?3 > ?1
                     ORDER BY date DESC
                     LIMIT 1",
                    params![cutoff_unix, NANOSECOND_DATE_THRESHOLD, APPLE_EPOCH_OFFSET_SECS],
                    |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()
                .context("failed to query latest message")?;

            row.map(|(text, unix_ts)| {
                let timestamp = DateTime::from_timestamp(unix_ts, 0)
                    .ok_or_else(|| anyhow!("message timestamp {unix_ts} out of range"))?;
                Ok::<_, anyhow::Error>(MessageRecord { text, timestamp })
            })
            .transpose()
        })
        .await
    }
}

impl MessageSource for MessageStore {
    fn latest_candidate(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> impl Future<Output = Result<Option<MessageRecord>>> + Send {
        let window_secs = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
        let cutoff = now.timestamp().saturating_sub(window_secs);
        self.latest_message_since(cutoff)
    }
}
