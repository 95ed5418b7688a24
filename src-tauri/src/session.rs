use std::collections::VecDeque;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::debounce::QuerySnapshot;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Where an emitted code ends up. Implementations are best-effort; errors are
/// logged by the session and never stop the emission.
pub trait CodeSink: Send + Sync + 'static {
    fn copy_to_clipboard(&self, code: &str) -> Result<()>;

    fn notify(&self, title: &str, body: &str) -> Result<()>;

    /// Called after the history changed, newest entry first.
    fn history_changed(&self, _history: &[HistoryEntry]) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub code: String,
    pub extracted_at: DateTime<Utc>,
    pub source_text: String,
}

/// Process-lifetime extraction state. Owned by the pipeline task; nothing
/// else mutates it.
#[derive(Debug)]
pub struct ExtractionSession {
    last_emitted_code: Option<String>,
    recent_history: VecDeque<HistoryEntry>,
    history_limit: usize,
    notification_title: String,
    pub(crate) last_query_snapshot: Option<QuerySnapshot>,
}

impl ExtractionSession {
    pub fn new(history_limit: usize, notification_title: impl Into<String>) -> Self {
        Self {
            last_emitted_code: None,
            recent_history: VecDeque::new(),
            history_limit,
            notification_title: notification_title.into(),
            last_query_snapshot: None,
        }
    }

    pub fn last_emitted_code(&self) -> Option<&str> {
        self.last_emitted_code.as_deref()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.recent_history.iter().cloned().collect()
    }

    /// Surface `code` unless it is the one already surfaced. Returns whether
    /// anything was emitted.
    pub fn maybe_emit<S: CodeSink + ?Sized>(
        &mut self,
        code: &str,
        source_text: &str,
        now: DateTime<Utc>,
        sink: &S,
    ) -> bool {
        if self.last_emitted_code.as_deref() == Some(code) {
            return false;
        }

        self.last_emitted_code = Some(code.to_string());
        self.recent_history.push_front(HistoryEntry {
            code: code.to_string(),
            extracted_at: now,
            source_text: source_text.to_string(),
        });
        self.recent_history.truncate(self.history_limit);

        if let Err(err) = sink.copy_to_clipboard(code) {
            log_warn!("clipboard write failed for new code: {err:?}");
        }
        if let Err(err) = sink.notify(&self.notification_title, code) {
            log_warn!("notification failed: {err:?}");
        }
        sink.history_changed(self.recent_history.make_contiguous());

        log_info!("verification code copied ({} in history)", self.recent_history.len());
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub clipboard: Mutex<Vec<String>>,
        pub notifications: Mutex<Vec<(String, String)>>,
        pub history_updates: Mutex<Vec<Vec<String>>>,
        pub fail_clipboard: bool,
    }

    impl CodeSink for RecordingSink {
        fn copy_to_clipboard(&self, code: &str) -> Result<()> {
            if self.fail_clipboard {
                return Err(anyhow!("pasteboard unavailable"));
            }
            self.clipboard.lock().unwrap().push(code.to_string());
            Ok(())
        }

        fn notify(&self, title: &str, body: &str) -> Result<()> {
            self.notifications
                .lock()
                .unwrap()
                .push((title.to_string(), body.to_string()));
            Ok(())
        }

        fn history_changed(&self, history: &[HistoryEntry]) {
            self.history_updates
                .lock()
                .unwrap()
                .push(history.iter().map(|entry| entry.code.clone()).collect());
        }
    }

    #[test]
    fn same_code_twice_emits_once() {
        let sink = RecordingSink::default();
        let mut session = ExtractionSession::new(5, "验证码已复制");

        assert!(session.maybe_emit("839201", "验证码 839201", Utc::now(), &sink));
        assert!(!session.maybe_emit("839201", "验证码 839201", Utc::now(), &sink));

        assert_eq!(*sink.clipboard.lock().unwrap(), vec!["839201".to_string()]);
        assert_eq!(
            *sink.notifications.lock().unwrap(),
            vec![("验证码已复制".to_string(), "839201".to_string())]
        );
        assert_eq!(session.last_emitted_code(), Some("839201"));
    }

    #[test]
    fn history_keeps_five_newest_first() {
        let sink = RecordingSink::default();
        let mut session = ExtractionSession::new(5, "t");

        for i in 0..7 {
            let code = format!("10000{i}");
            assert!(session.maybe_emit(&code, "验证码", Utc::now(), &sink));
        }

        let codes: Vec<String> = session.history().into_iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec!["100006", "100005", "100004", "100003", "100002"]
        );
        assert_eq!(sink.history_updates.lock().unwrap().len(), 7);
    }

    #[test]
    fn returning_code_emits_again_after_another() {
        let sink = RecordingSink::default();
        let mut session = ExtractionSession::new(5, "t");

        session.maybe_emit("1111", "a", Utc::now(), &sink);
        session.maybe_emit("2222", "b", Utc::now(), &sink);
        assert!(session.maybe_emit("1111", "a", Utc::now(), &sink));

        assert_eq!(sink.clipboard.lock().unwrap().len(), 3);
    }

    #[test]
    fn clipboard_failure_still_notifies_and_records() {
        let sink = RecordingSink {
            fail_clipboard: true,
            ..Default::default()
        };
        let mut session = ExtractionSession::new(5, "t");

        assert!(session.maybe_emit("4321", "验证码 4321", Utc::now(), &sink));

        assert!(sink.clipboard.lock().unwrap().is_empty());
        assert_eq!(sink.notifications.lock().unwrap().len(), 1);
        assert_eq!(session.history()[0].source_text, "验证码 4321");
    }

    #[test]
    fn oversized_history_limit_does_not_preallocate() {
        let sink = RecordingSink::default();
        let mut session = ExtractionSession::new(usize::MAX, "t");

        assert!(session.maybe_emit("8642", "验证码 8642", Utc::now(), &sink));
        assert_eq!(session.history().len(), 1);
    }
}
