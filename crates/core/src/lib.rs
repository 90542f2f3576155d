#![warn(clippy::all, missing_docs)]

//! Core of the railgrab seat acquisition engine.
//!
//! This crate hosts the search and reservation models, the polling loop
//! that turns a watch into a held seat, the platform gateway adapter,
//! configuration, notifications and the on-disk run journal used by the
//! command line frontend.

pub mod config;
pub mod engine;
pub mod error;
pub mod journal;
pub mod models;
pub mod notify;
pub mod selection;
pub mod session;
pub mod slots;

pub use config::AppConfig;
pub use engine::{CancelHandle, ReservationLoop, ReservationOutcome, RunReport, RunRequest};
pub use error::{CriteriaError, ExhaustReason, PaymentError, SessionError};
pub use journal::{JournalNotifier, RunJournal};
pub use models::{Reservation, SearchCriteria, SeatPreference, TrainOption};
pub use notify::{LogNotifier, Notifier, NotifierSet, RunEvent, WebhookNotifier};
pub use session::{HttpSession, PaymentDispatcher, SessionCapability};
pub use slots::{SlotGuard, SlotManager};
