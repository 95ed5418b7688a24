use regex::Regex;

use crate::store::MessageRecord;

/// ASCII digits only; `\d` would also accept full-width and other Unicode digits.
const CODE_PATTERN: &str = "[0-9]{4,6}";

/// Pulls a 4-6 digit verification code out of message text.
///
/// The first digit run wins. A message carrying another number before the
/// real code (a phone number, an amount) yields that number instead.
#[derive(Debug, Clone)]
pub struct CodeExtractor {
    marker: String,
    pattern: Regex,
}

impl CodeExtractor {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            // Constant pattern, covered by the tests below.
            pattern: Regex::new(CODE_PATTERN).expect("code pattern is valid"),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn extract(&self, record: Option<&MessageRecord>) -> Option<String> {
        record.and_then(|record| self.extract_text(record.text()))
    }

    pub fn extract_text(&self, text: &str) -> Option<String> {
        if !text.contains(self.marker.as_str()) {
            return None;
        }
        self.pattern.find(text).map(|m| m.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn extractor() -> CodeExtractor {
        CodeExtractor::new("验证码")
    }

    #[test]
    fn extracts_code_after_marker() {
        assert_eq!(
            extractor().extract_text("您的验证码是 839201, 请勿泄露"),
            Some("839201".to_string())
        );
    }

    #[test]
    fn code_may_precede_marker() {
        assert_eq!(
            extractor().extract_text("4821 是您的验证码"),
            Some("4821".to_string())
        );
    }

    #[test]
    fn no_marker_means_no_code() {
        assert_eq!(extractor().extract_text("随机聊天消息"), None);
        assert_eq!(extractor().extract_text("order 123456 shipped"), None);
    }

    #[test]
    fn marker_without_digit_run_yields_nothing() {
        assert_eq!(extractor().extract_text("验证码已发送"), None);
        assert_eq!(extractor().extract_text("验证码 123 和 45"), None);
    }

    #[test]
    fn first_run_wins_even_if_it_is_not_the_code() {
        assert_eq!(
            extractor().extract_text("客服 95588 提醒: 验证码 654321"),
            Some("95588".to_string())
        );
    }

    #[test]
    fn long_digit_runs_are_truncated_to_six() {
        assert_eq!(
            extractor().extract_text("验证码 12345678"),
            Some("123456".to_string())
        );
    }

    #[test]
    fn full_width_digits_are_not_codes() {
        assert_eq!(extractor().extract_text("验证码 １２３４５６"), None);
    }

    #[test]
    fn absent_record_or_text_yields_nothing() {
        let extractor = extractor();
        assert_eq!(extractor.extract(None), None);

        let empty = MessageRecord {
            text: None,
            timestamp: Utc::now(),
        };
        assert_eq!(extractor.extract(Some(&empty)), None);
    }

    #[test]
    fn custom_marker_is_honoured() {
        let extractor = CodeExtractor::new("verification code");
        assert_eq!(extractor.marker(), "verification code");
        assert_eq!(
            extractor.extract_text("Your verification code is 5521"),
            Some("5521".to_string())
        );
        assert_eq!(extractor.extract_text("您的验证码是 5521"), None);
    }
}
