//! Lightweight regex-based PII redaction, standing in for a full NLP-grade redactor.
//! Applied to user transcripts only, before they enter ConversationHistory or telemetry.
//! Matches the original's fail-open behavior: a pass that cannot run returns the input
//! unredacted rather than failing the turn.

use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\+?\d{1,2}[\s.-]?)?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}\b").unwrap()
    })
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap()
    })
}

fn credit_card_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(?:\d[ -]?){13,16}\b").unwrap()
    })
}

/// Replace phone numbers, emails, and credit-card-shaped digit runs with their
/// corresponding tokens. On an internal regex failure, logs a warning and returns the
/// original text unredacted.
pub fn redact_text(text: &str) -> String {
    let result = std::panic::catch_unwind(|| {
        let text = credit_card_pattern().replace_all(text, "<CREDIT_CARD>");
        let text = email_pattern().replace_all(&text, "<EMAIL>");
        phone_pattern().replace_all(&text, "<PHONE>").into_owned()
    });

    match result {
        Ok(redacted) => redacted,
        Err(_) => {
            warn!(target: "redact", "redaction pass failed, returning text unredacted");
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_phone_number() {
        let redacted = redact_text("call me at 555-123-4567 please");
        assert!(redacted.contains("<PHONE>"));
        assert!(!redacted.contains("555-123-4567"));
    }

    #[test]
    fn redacts_email() {
        let redacted = redact_text("reach me at jane@example.com");
        assert_eq!(redacted, "reach me at <EMAIL>");
    }

    #[test]
    fn redacts_credit_card_digit_run() {
        let redacted = redact_text("card is 4111 1111 1111 1111");
        assert!(redacted.contains("<CREDIT_CARD>"));
    }

    #[test]
    fn leaves_ordinary_text_untouched() {
        let redacted = redact_text("What are your hours?");
        assert_eq!(redacted, "What are your hours?");
    }
}
