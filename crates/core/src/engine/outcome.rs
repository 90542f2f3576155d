//! Terminal results of a run.

use serde::Serialize;

use crate::{
    error::{ExhaustReason, PaymentError},
    models::Reservation,
};

/// How a run ended. Every run produces exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ReservationOutcome {
    /// A seat is held.
    Secured(Reservation),
    /// The run is queued on a waitlist.
    Waitlisted(Reservation),
    /// Stopped on request.
    Cancelled,
    /// Gave up.
    Exhausted(ExhaustReason),
}

impl ReservationOutcome {
    /// The held or queued reservation, if any.
    pub fn reservation(&self) -> Option<&Reservation> {
        match self {
            ReservationOutcome::Secured(reservation)
            | ReservationOutcome::Waitlisted(reservation) => Some(reservation),
            ReservationOutcome::Cancelled | ReservationOutcome::Exhausted(_) => None,
        }
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        match self {
            ReservationOutcome::Secured(reservation) => {
                format!("seat secured: {}", reservation.summary())
            }
            ReservationOutcome::Waitlisted(reservation) => {
                format!("joined waitlist: {}", reservation.summary())
            }
            ReservationOutcome::Cancelled => "run cancelled".to_string(),
            ReservationOutcome::Exhausted(reason) => format!("run gave up: {reason}"),
        }
    }
}

/// What happened to the payment step of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Payment went through.
    Paid,
    /// Payment failed; the reservation is still held.
    Failed(PaymentError),
}

/// Everything the caller learns from a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Terminal outcome.
    pub outcome: ReservationOutcome,
    /// Set only when auto-pay ran for a secured seat.
    pub payment: Option<PaymentStatus>,
    /// Number of search cycles performed.
    pub polls: u64,
}
