//! Run event delivery.
//!
//! Notifiers are fire-and-forget from the engine's point of view: delivery
//! problems are logged by the notifier and never affect a run.

pub mod webhook;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::{engine::ReservationOutcome, models::SearchCriteria};

pub use webhook::WebhookNotifier;

/// Periodic sign of life from a polling run.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    /// Run name.
    pub run: String,
    /// Search cycles so far.
    pub polls: u64,
    /// Time since the run started.
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    /// What the run is looking for.
    pub criteria: SearchCriteria,
    /// When the report was produced.
    pub at: DateTime<Utc>,
}

/// Final word on a run.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeReport {
    /// Run name.
    pub run: String,
    /// Terminal outcome.
    pub outcome: ReservationOutcome,
    /// What the run was looking for.
    pub criteria: SearchCriteria,
    /// Search cycles performed.
    pub polls: u64,
    /// When the run ended.
    pub at: DateTime<Utc>,
}

/// Event delivered to a [`Notifier`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// Emitted every few polls while searching.
    Progress(ProgressReport),
    /// Emitted exactly once per run.
    Finished(OutcomeReport),
}

impl RunEvent {
    /// Name of the run the event belongs to.
    pub fn run(&self) -> &str {
        match self {
            RunEvent::Progress(report) => &report.run,
            RunEvent::Finished(report) => &report.run,
        }
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        match self {
            RunEvent::Progress(report) => format!(
                "[{}] still searching {}: {} polls, {} elapsed",
                report.run,
                report.criteria.route_label(),
                report.polls,
                format_elapsed(report.elapsed)
            ),
            RunEvent::Finished(report) => format!(
                "[{}] {}: {} after {} polls",
                report.run,
                report.criteria.route_label(),
                report.outcome.summary(),
                report.polls
            ),
        }
    }
}

/// `HH:MM:SS`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}

/// Receives run events.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `event`. Must not fail the caller.
    async fn notify(&self, event: &RunEvent);
}

/// Writes events to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &RunEvent) {
        match event {
            RunEvent::Progress(_) => info!("{}", event.summary()),
            RunEvent::Finished(report) => match report.outcome {
                ReservationOutcome::Exhausted(_) => warn!("{}", event.summary()),
                _ => info!("{}", event.summary()),
            },
        }
    }
}

/// Forwards each event to every member in order.
#[derive(Default, Clone)]
pub struct NotifierSet {
    members: Vec<Arc<dyn Notifier>>,
}

impl NotifierSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member.
    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.members.push(notifier);
        self
    }
}

#[async_trait]
impl Notifier for NotifierSet {
    async fn notify(&self, event: &RunEvent) {
        for member in &self.members {
            member.notify(event).await;
        }
    }
}
