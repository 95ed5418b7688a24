use chrono::{DateTime, Utc};

/// Seconds between the Unix epoch and the Apple reference date (2001-01-01 UTC).
pub const APPLE_EPOCH_OFFSET_SECS: i64 = 978_307_200;

/// Raw `date` values above this are nanoseconds since the Apple epoch;
/// older Messages databases stored whole seconds.
pub const NANOSECOND_DATE_THRESHOLD: i64 = 100_000_000_000;

/// One row from the `message` table. Never written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub text: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MessageRecord {
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

/// Convert a raw Messages `date` column to Unix seconds. The store query
/// does the same in SQL; its tests hold the two together.
pub fn normalize_apple_date(raw: i64) -> i64 {
    let secs = if raw > NANOSECOND_DATE_THRESHOLD {
        raw / 1_000_000_000
    } else {
        raw
    };
    secs + APPLE_EPOCH_OFFSET_SECS
}
