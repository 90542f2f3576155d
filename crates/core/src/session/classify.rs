//! Maps raw platform responses onto [`SessionError`] classes.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;

use crate::error::SessionError;

/// Messages the platform uses when a seat or waitlist slot is gone.
static DEFAULT_SOLD_OUT: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_defaults(&[
        r"(?i)sold\s*out",
        "잔여석\\s*없음",
        "예약대기 접수가 마감",
        "예약대기자한도수초과",
    ])
});

/// Messages that mean "slow down", not "stop".
static DEFAULT_THROTTLED: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_defaults(&[
        "사용자가 많아 접속이 원활하지 않습니다",
        "정상적인 경로로 접근",
        r"(?i)too many requests",
        r"(?i)try again later",
    ])
});

/// Messages that mean the login is no longer valid.
static DEFAULT_EXPIRED: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_defaults(&[
        "로그인 후 사용",
        r"(?i)session (has )?expired",
        r"(?i)not logged in",
    ])
});

fn compile_defaults(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
}

/// Platform call a response belongs to. Unrecognised refusals are read
/// differently depending on the call.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Login,
    Search,
    Reserve,
    JoinWaitlist,
    ListReservations,
    Cancel,
    Pay,
}

impl Operation {
    fn is_claim(&self) -> bool {
        matches!(
            self,
            Operation::Reserve | Operation::JoinWaitlist | Operation::Pay
        )
    }
}

/// Pattern sets used to read platform refusal messages.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    sold_out: Vec<Regex>,
    throttled: Vec<Regex>,
    expired: Vec<Regex>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            sold_out: DEFAULT_SOLD_OUT.clone(),
            throttled: DEFAULT_THROTTLED.clone(),
            expired: DEFAULT_EXPIRED.clone(),
        }
    }
}

impl ErrorClassifier {
    /// Defaults extended with caller-supplied patterns.
    pub fn with_patterns(
        sold_out: &[String],
        throttled: &[String],
        expired: &[String],
    ) -> Result<Self, regex::Error> {
        let mut classifier = Self::default();
        for pattern in sold_out {
            classifier.sold_out.push(Regex::new(pattern)?);
        }
        for pattern in throttled {
            classifier.throttled.push(Regex::new(pattern)?);
        }
        for pattern in expired {
            classifier.expired.push(Regex::new(pattern)?);
        }
        Ok(classifier)
    }

    /// Classify a non-success HTTP response.
    pub fn classify_status(
        &self,
        operation: Operation,
        status: StatusCode,
        message: &str,
    ) -> SessionError {
        let detail = if message.trim().is_empty() {
            status.to_string()
        } else {
            message.trim().to_string()
        };

        if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            return SessionError::Transient(detail);
        }
        match status {
            StatusCode::UNAUTHORIZED => {
                return SessionError::Fatal(format!("session expired: {detail}"))
            }
            StatusCode::FORBIDDEN => {
                return SessionError::Fatal(format!("account blocked: {detail}"))
            }
            _ => {}
        }
        self.classify_message(operation, &detail)
    }

    /// Classify a refusal from its message alone.
    pub fn classify_message(&self, operation: Operation, message: &str) -> SessionError {
        let message = message.to_string();
        if matches_any(&self.throttled, &message) {
            SessionError::Transient(message)
        } else if matches_any(&self.expired, &message) {
            SessionError::Fatal(format!("session expired: {message}"))
        } else if matches_any(&self.sold_out, &message) {
            SessionError::SoldOut(message)
        } else if operation.is_claim() {
            SessionError::Rejected(message)
        } else {
            SessionError::Fatal(message)
        }
    }
}

fn matches_any(patterns: &[Regex], message: &str) -> bool {
    patterns.iter().any(|pattern| pattern.is_match(message))
}

/// Classify a failure that never produced a response.
pub fn classify_request_error(err: &reqwest::Error) -> SessionError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        SessionError::Transient(err.to_string())
    } else if err.is_decode() || err.is_body() {
        SessionError::Transient(format!("unreadable response: {err}"))
    } else {
        SessionError::Fatal(err.to_string())
    }
}

/// Classify a success response whose body could not be read.
///
/// A claim that came back with a success status has been applied on the
/// platform, so retrying it could take a second hold.
pub fn classify_unreadable_success(operation: Operation, err: &reqwest::Error) -> SessionError {
    if operation.is_claim() {
        SessionError::Fatal(format!("reservation state unknown: {err}"))
    } else {
        SessionError::Transient(format!("unreadable response: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_and_server_errors_are_transient() {
        let classifier = ErrorClassifier::default();
        assert!(classifier
            .classify_status(Operation::Search, StatusCode::TOO_MANY_REQUESTS, "")
            .is_transient());
        assert!(classifier
            .classify_status(Operation::Reserve, StatusCode::BAD_GATEWAY, "upstream")
            .is_transient());
        assert!(classifier
            .classify_status(
                Operation::Search,
                StatusCode::BAD_REQUEST,
                "사용자가 많아 접속이 원활하지 않습니다"
            )
            .is_transient());
    }

    #[test]
    fn auth_failures_are_fatal() {
        let classifier = ErrorClassifier::default();
        let err = classifier.classify_status(Operation::Reserve, StatusCode::UNAUTHORIZED, "");
        assert!(err.is_fatal());
        let err = classifier.classify_status(
            Operation::Search,
            StatusCode::BAD_REQUEST,
            "로그인 후 사용하십시오",
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn sold_out_messages_are_races() {
        let classifier = ErrorClassifier::default();
        let err =
            classifier.classify_status(Operation::Reserve, StatusCode::CONFLICT, "잔여석없음");
        assert_eq!(err, SessionError::SoldOut("잔여석없음".to_string()));
        let err = classifier.classify_message(Operation::Reserve, "Sold out");
        assert_eq!(err, SessionError::SoldOut("Sold out".to_string()));
    }

    #[test]
    fn unknown_refusal_depends_on_operation() {
        let classifier = ErrorClassifier::default();
        assert_eq!(
            classifier.classify_message(Operation::Reserve, "unexpected state"),
            SessionError::Rejected("unexpected state".to_string())
        );
        assert_eq!(
            classifier.classify_message(Operation::Search, "unknown station"),
            SessionError::Fatal("unknown station".to_string())
        );
    }

    #[test]
    fn extra_patterns_extend_defaults() -> Result<(), regex::Error> {
        let classifier =
            ErrorClassifier::with_patterns(&["(?i)no seats left".to_string()], &[], &[])?;
        assert!(classifier
            .classify_message(Operation::Reserve, "No seats left on this train")
            .is_sold_out_race());
        assert!(ErrorClassifier::with_patterns(&["(".to_string()], &[], &[]).is_err());
        Ok(())
    }
}
