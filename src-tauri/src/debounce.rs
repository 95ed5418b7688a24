use std::{
    pin::Pin,
    time::{Duration, Instant},
};

use tokio::time::{self, Sleep};

/// Cap applied when `now + window` would overflow the clock.
const MAX_WINDOW: Duration = Duration::from_secs(60 * 60 * 24 * 365);

struct Pending<T> {
    timer: Pin<Box<Sleep>>,
    payload: T,
}

/// Trailing-edge debounce: the last `trigger` in a burst wins, and fires once
/// `window` has passed without another trigger.
pub struct DebounceGate<T> {
    window: Duration,
    pending: Option<Pending<T>>,
}

impl<T> DebounceGate<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Restart the window and replace whatever payload was waiting.
    pub fn trigger(&mut self, payload: T) {
        let now = time::Instant::now();
        let deadline = now.checked_add(self.window).unwrap_or(now + MAX_WINDOW);
        match self.pending.as_mut() {
            Some(pending) => {
                pending.timer.as_mut().reset(deadline);
                pending.payload = payload;
            }
            None => {
                self.pending = Some(Pending {
                    timer: Box::pin(time::sleep_until(deadline)),
                    payload,
                });
            }
        }
    }

    /// Resolves with the surviving payload once the window elapses.
    /// Never resolves while nothing is pending. Cancel safe.
    pub async fn fired(&mut self) -> T {
        if let Some(pending) = self.pending.as_mut() {
            pending.timer.as_mut().await;
        }
        match self.pending.take() {
            Some(pending) => pending.payload,
            None => std::future::pending().await,
        }
    }
}

/// Last query result, kept only to keep identical results out of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySnapshot {
    text: Option<String>,
    timestamp: Option<i64>,
    captured_at: Instant,
}

impl QuerySnapshot {
    /// True when `text`/`timestamp` differ from `previous` or `previous` is
    /// older than `dedup`.
    pub fn is_new(
        previous: Option<&QuerySnapshot>,
        text: Option<&str>,
        timestamp: Option<i64>,
        now: Instant,
        dedup: Duration,
    ) -> bool {
        let Some(prev) = previous else {
            return true;
        };
        let identical = prev.text.as_deref() == text && prev.timestamp == timestamp;
        !(identical && now.saturating_duration_since(prev.captured_at) < dedup)
    }

    pub fn capture(text: Option<&str>, timestamp: Option<i64>, now: Instant) -> Self {
        Self {
            text: text.map(str::to_string),
            timestamp,
            captured_at: now,
        }
    }
}
