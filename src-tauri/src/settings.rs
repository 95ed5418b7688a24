use anyhow::{Context, Result};
use directories::{BaseDirs, ProjectDirs};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    ops::RangeInclusive,
    path::{Path, PathBuf},
    time::Duration,
};

const DB_PATH_ENV: &str = "SMSCODE_DB_PATH";
const DEBUG_ENV: &str = "SMSCODE_DEBUG";
const DEBUG_DEBOUNCE_MS: u64 = 200;

const DEBOUNCE_MS_RANGE: RangeInclusive<u64> = 0..=60_000;
const STABILITY_MS_RANGE: RangeInclusive<u64> = 10..=60_000;
const POLL_INTERVAL_MS_RANGE: RangeInclusive<u64> = 10..=60_000;
const WINDOW_SECS_RANGE: RangeInclusive<u64> = 1..=30 * 24 * 60 * 60;
const HISTORY_LIMIT_RANGE: RangeInclusive<usize> = 1..=100;
const LOG_DEDUP_SECS_RANGE: RangeInclusive<u64> = 0..=3600;

fn clamp_to<T: Ord + Copy>(value: T, range: &RangeInclusive<T>) -> T {
    value.clamp(*range.start(), *range.end())
}

/// Tunables for the watch/extract pipeline, persisted as `settings.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatcherSettings {
    pub db_path: PathBuf,
    pub debounce_ms: u64,
    /// Quiet period after the last file write before a change counts.
    pub stability_ms: u64,
    pub poll_interval_ms: u64,
    /// Only messages newer than this many seconds are candidates.
    pub window_secs: u64,
    pub marker: String,
    pub history_limit: usize,
    pub log_dedup_secs: u64,
    pub notification_title: String,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            debounce_ms: 2000,
            stability_ms: 500,
            poll_interval_ms: 100,
            window_secs: 60,
            marker: "验证码".into(),
            history_limit: 5,
            log_dedup_secs: 10,
            notification_title: "验证码已复制".into(),
        }
    }
}

impl WatcherSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn stability(&self) -> Duration {
        Duration::from_millis(self.stability_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn log_dedup(&self) -> Duration {
        Duration::from_secs(self.log_dedup_secs)
    }

    /// Pull every numeric tunable into a range the timers and buffers can hold.
    pub fn clamped(mut self) -> Self {
        self.debounce_ms = clamp_to(self.debounce_ms, &DEBOUNCE_MS_RANGE);
        self.stability_ms = clamp_to(self.stability_ms, &STABILITY_MS_RANGE);
        self.poll_interval_ms = clamp_to(self.poll_interval_ms, &POLL_INTERVAL_MS_RANGE);
        self.window_secs = clamp_to(self.window_secs, &WINDOW_SECS_RANGE);
        self.history_limit = clamp_to(self.history_limit, &HISTORY_LIMIT_RANGE);
        self.log_dedup_secs = clamp_to(self.log_dedup_secs, &LOG_DEDUP_SECS_RANGE);
        self
    }

    /// Apply `SMSCODE_DB_PATH` and `SMSCODE_DEBUG` on top of the file values.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var_os(DB_PATH_ENV).map(PathBuf::from),
            std::env::var(DEBUG_ENV).ok().as_deref(),
        )
    }

    fn with_overrides(mut self, db_path: Option<PathBuf>, debug: Option<&str>) -> Self {
        if let Some(path) = db_path.filter(|p| !p.as_os_str().is_empty()) {
            self.db_path = path;
        }

        let debug_mode = debug
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.debounce_ms = self.debounce_ms.min(DEBUG_DEBOUNCE_MS);
        }
        self.clamped()
    }
}

/// `~/Library/Messages/chat.db`, or a relative `chat.db` when no home is known.
pub fn default_db_path() -> PathBuf {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join("Library/Messages/chat.db"))
        .unwrap_or_else(|| PathBuf::from("chat.db"))
}

/// Settings location for the headless build. The tray build uses Tauri's config dir.
pub fn default_settings_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "smscode", "SmsCodeWatcher")
        .map(|dirs| dirs.config_dir().join("settings.json"))
}

pub struct SettingsStore {
    path: PathBuf,
    data: WatcherSettings,
}

impl SettingsStore {
    /// Read `path` if it exists, otherwise write the defaults there.
    pub fn load_or_init(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str::<WatcherSettings>(&contents)
                .map(WatcherSettings::clamped)
                .unwrap_or_else(|err| {
                    warn!(
                        "Ignoring malformed settings at {}: {err}; using defaults",
                        path.display()
                    );
                    WatcherSettings::default()
                })
        } else {
            let defaults = WatcherSettings::default();
            persist(&path, &defaults)?;
            defaults
        };

        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current settings with environment overrides applied.
    pub fn effective(&self) -> WatcherSettings {
        self.data.clone().with_env_overrides()
    }
}

fn persist(path: &Path, data: &WatcherSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create settings directory {}", parent.display())
        })?;
    }
    let serialized = serde_json::to_string_pretty(data)?;
    fs::write(path, serialized)
        .with_context(|| format!("Failed to write settings to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let store = SettingsStore::load_or_init(path.clone()).unwrap();

        assert!(path.exists());
        let written: WatcherSettings =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, WatcherSettings::default());
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "debounceMs": 750, "marker": "code" }"#).unwrap();

        let store = SettingsStore::load_or_init(path).unwrap();
        let settings = store.data.clone();

        assert_eq!(settings.debounce_ms, 750);
        assert_eq!(settings.marker, "code");
        assert_eq!(settings.window_secs, 60);
        assert_eq!(settings.history_limit, 5);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let store = SettingsStore::load_or_init(path).unwrap();

        assert_eq!(store.data, WatcherSettings::default());
    }

    #[test]
    fn overrides_replace_path_and_shorten_debounce() {
        let settings = WatcherSettings::default()
            .with_overrides(Some(PathBuf::from("/tmp/other.db")), Some("true"));

        assert_eq!(settings.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(settings.debounce_ms, DEBUG_DEBOUNCE_MS);
    }

    #[test]
    fn empty_override_is_ignored() {
        let settings = WatcherSettings::default().with_overrides(Some(PathBuf::new()), Some("0"));

        assert_eq!(settings, WatcherSettings::default());
    }

    #[test]
    fn out_of_range_values_are_clamped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            format!(
                r#"{{ "debounceMs": {max}, "historyLimit": {max}, "windowSecs": 0, "pollIntervalMs": 0 }}"#,
                max = u64::MAX
            ),
        )
        .unwrap();

        let store = SettingsStore::load_or_init(path).unwrap();

        assert_eq!(store.data.debounce_ms, *DEBOUNCE_MS_RANGE.end());
        assert_eq!(store.data.history_limit, *HISTORY_LIMIT_RANGE.end());
        assert_eq!(store.data.window_secs, 1);
        assert_eq!(store.data.poll_interval_ms, 10);
        assert_eq!(store.data.marker, "验证码");
    }

    #[test]
    fn defaults_are_already_in_range() {
        assert_eq!(WatcherSettings::default().clamped(), WatcherSettings::default());
    }
}
