//! Error taxonomy shared by the engine and its capabilities.

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

/// Criteria rejected before any network call.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CriteriaError {
    /// A station name is blank.
    #[error("{field} station is empty")]
    EmptyStation {
        /// Which side of the route is blank.
        field: &'static str,
    },

    /// Departure and arrival are the same station.
    #[error("departure and arrival are both {station}")]
    SameStation {
        /// The repeated station.
        station: String,
    },

    /// Travel date lies before today.
    #[error("travel date {date} is before {today}")]
    DateInPast {
        /// Requested travel date.
        date: NaiveDate,
        /// Date the run was started.
        today: NaiveDate,
    },

    /// Nobody to book for.
    #[error("at least one passenger is required")]
    NoPassengers,

    /// More travellers than one booking may carry.
    #[error("{count} passengers exceeds the platform limit of {max}")]
    TooManyPassengers {
        /// Requested traveller count.
        count: u32,
        /// Platform maximum.
        max: u8,
    },
}

/// Failure reported by a session capability, already classified.
///
/// The engine trusts the classification and never inspects the message.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SessionError {
    /// Retry-worthy: timeouts, 5xx, throttling.
    #[error("transient transport failure: {0}")]
    Transient(String),

    /// Retry-futile: expired session, blocked account, malformed request.
    #[error("fatal transport failure: {0}")]
    Fatal(String),

    /// The seat went to someone else between search and attempt.
    #[error("sold out: {0}")]
    SoldOut(String),

    /// The platform refused without saying why.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl SessionError {
    /// True when retrying cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Fatal(_))
    }

    /// True when a retry after backoff is warranted.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Transient(_))
    }

    /// Lost seat race. Ambiguous rejections count as one.
    pub fn is_sold_out_race(&self) -> bool {
        matches!(self, SessionError::SoldOut(_) | SessionError::Rejected(_))
    }
}

/// Failure of the payment step. The reservation itself is kept.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum PaymentError {
    /// Card or payment refused by the platform.
    #[error("payment declined: {0}")]
    Declined(String),

    /// Payment call could not be completed.
    #[error("payment request failed: {0}")]
    Transport(String),

    /// Auto-pay was requested but no dispatcher is wired up.
    #[error("no payment dispatcher configured")]
    Unavailable,
}

impl From<SessionError> for PaymentError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Rejected(message) | SessionError::SoldOut(message) => {
                PaymentError::Declined(message)
            }
            SessionError::Transient(message) | SessionError::Fatal(message) => {
                PaymentError::Transport(message)
            }
        }
    }
}

/// Why a run ended without a seat.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "error", rename_all = "snake_case")]
pub enum ExhaustReason {
    /// Criteria failed validation.
    #[error("invalid criteria: {0}")]
    InvalidCriteria(CriteriaError),

    /// The platform reported an unrecoverable condition.
    #[error("{0}")]
    FatalTransport(SessionError),
}
