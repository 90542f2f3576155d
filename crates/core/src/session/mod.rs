//! Booking platform capabilities consumed by the reservation engine.
//!
//! The engine only sees these traits. Implementations classify every failure
//! as a [`SessionError`] variant; that classification is treated as
//! authoritative.

pub mod classify;
pub mod http;

use async_trait::async_trait;
use chrono::NaiveTime;

use crate::{
    error::{PaymentError, SessionError},
    models::{Reservation, ReservationAttempt, SearchCriteria, TrainOption},
};

pub use classify::{ErrorClassifier, Operation};
pub use http::{CardDetails, HttpPaymentDispatcher, HttpSession};

/// Convenience alias for capability results.
pub type SessionResult<T> = Result<T, SessionError>;

/// An authenticated session against the booking platform.
///
/// A run owns its session exclusively, so implementations never see two calls
/// from the same run at once.
#[async_trait]
pub trait SessionCapability: Send + Sync {
    /// Trains matching `criteria` departing from `from` onwards.
    async fn search(&self, criteria: &SearchCriteria, from: NaiveTime)
        -> SessionResult<Vec<TrainOption>>;

    /// Place a direct reservation for one train and seat class.
    async fn reserve(&self, attempt: &ReservationAttempt) -> SessionResult<Reservation>;

    /// Queue on the train's waitlist.
    async fn join_waitlist(&self, attempt: &ReservationAttempt) -> SessionResult<Reservation>;

    /// Reservations currently held by the account.
    async fn list_reservations(&self) -> SessionResult<Vec<Reservation>>;

    /// Release a reservation.
    async fn cancel(&self, reservation: &Reservation) -> SessionResult<()>;
}

/// Completes payment for a secured reservation.
#[async_trait]
pub trait PaymentDispatcher: Send + Sync {
    /// Pay for `reservation`. Invoked at most once per run.
    async fn pay(&self, reservation: &Reservation) -> Result<(), PaymentError>;
}
