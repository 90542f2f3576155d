//! Reservation acquisition loop.
//!
//! A run moves through `Idle → Polling → Attempting` and ends in exactly one
//! of `Secured`, `Waitlisted`, `Exhausted` or `Cancelled`. The loop owns its
//! session, so at most one platform call is ever in flight per run.
//! Cancellation is checked between states and during sleeps, never while a
//! call is outstanding: a reservation request that reached the platform may
//! have placed a hold, and it is allowed to finish.

mod backoff;
mod cancel;
mod outcome;

use std::{fmt, sync::Arc, time::Duration};

use chrono::{Local, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    error::{ExhaustReason, PaymentError, SessionError},
    models::{ReservationAttempt, SearchCriteria, SeatPreference, TrainOption},
    notify::{Notifier, OutcomeReport, ProgressReport, RunEvent},
    selection::{merge_search_results, select, Candidate, CandidateKind, SelectionRules},
    session::{PaymentDispatcher, SessionCapability},
};

pub use backoff::{PollSchedule, PollSettings};
pub use cancel::{CancelHandle, CancelSignal};
pub use outcome::{PaymentStatus, ReservationOutcome, RunReport};

/// Everything a run needs to know about what to book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRequest {
    /// Route, date, time window and passengers.
    pub criteria: SearchCriteria,
    /// Seat class order.
    pub preference: SeatPreference,
    /// Fall back to the waitlist when every direct attempt loses.
    pub waitlist: bool,
    /// Pay immediately once a seat is secured.
    pub auto_pay: bool,
    /// When non-empty, only these train ids are attempted.
    pub train_filter: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Polling,
    Attempting,
    Secured,
    Waitlisted,
    Exhausted,
    Cancelled,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Polling => "polling",
            Phase::Attempting => "attempting",
            Phase::Secured => "secured",
            Phase::Waitlisted => "waitlisted",
            Phase::Exhausted => "exhausted",
            Phase::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl From<&ReservationOutcome> for Phase {
    fn from(outcome: &ReservationOutcome) -> Self {
        match outcome {
            ReservationOutcome::Secured(_) => Phase::Secured,
            ReservationOutcome::Waitlisted(_) => Phase::Waitlisted,
            ReservationOutcome::Cancelled => Phase::Cancelled,
            ReservationOutcome::Exhausted(_) => Phase::Exhausted,
        }
    }
}

/// Which pause follows a cycle that did not end the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pause {
    Poll,
    Transient,
}

enum AttemptResult {
    Finished(ReservationOutcome),
    Retry(Pause),
}

/// One reservation run bound to one session.
pub struct ReservationLoop<S> {
    name: String,
    session: S,
    notifier: Arc<dyn Notifier>,
    payment: Option<Arc<dyn PaymentDispatcher>>,
    schedule: PollSchedule,
    cancel: CancelSignal,
    phase: Phase,
    polls: u64,
}

impl<S: SessionCapability> ReservationLoop<S> {
    /// Build a run named `name` that stops when `cancel` is triggered.
    pub fn new(
        name: impl Into<String>,
        session: S,
        notifier: Arc<dyn Notifier>,
        settings: PollSettings,
        cancel: &CancelHandle,
    ) -> Self {
        Self {
            name: name.into(),
            session,
            notifier,
            payment: None,
            schedule: PollSchedule::new(settings),
            cancel: cancel.signal(),
            phase: Phase::Idle,
            polls: 0,
        }
    }

    /// Dispatcher used when a request asks for auto-pay.
    pub fn with_payment(mut self, dispatcher: Arc<dyn PaymentDispatcher>) -> Self {
        self.payment = Some(dispatcher);
        self
    }

    /// Replace the pause schedule, e.g. with a seeded one.
    pub fn with_schedule(mut self, schedule: PollSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Drive the run to its single terminal outcome, notify, and pay if asked.
    pub async fn run(mut self, request: &RunRequest) -> RunReport {
        let started = Instant::now();
        info!(
            "[{}] starting run for {} ({}, {}{})",
            self.name,
            request.criteria.route_label(),
            request.criteria.passengers.description(),
            request.preference.description(),
            if request.waitlist { ", waitlist allowed" } else { "" }
        );
        let outcome = self.acquire(request, started).await;
        self.finish(request, outcome).await
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!("[{}] {} -> {}", self.name, self.phase, phase);
            self.phase = phase;
        }
    }

    async fn acquire(&mut self, request: &RunRequest, started: Instant) -> ReservationOutcome {
        let today = Local::now().date_naive();
        if let Err(err) = request.criteria.validate(today) {
            warn!("[{}] rejected criteria: {err}", self.name);
            return ReservationOutcome::Exhausted(ExhaustReason::InvalidCriteria(err));
        }

        let rules = SelectionRules {
            departure_after: request.criteria.departure_after,
            preference: request.preference,
            waitlist: request.waitlist,
            train_filter: &request.train_filter,
        };

        loop {
            if self.cancel.is_cancelled() {
                return ReservationOutcome::Cancelled;
            }
            self.enter(Phase::Polling);
            self.polls += 1;
            if self.schedule.progress_due(self.polls) {
                self.report_progress(request, started).await;
            }

            let options = match self.search(&request.criteria).await {
                Ok(options) => {
                    self.schedule.reset();
                    options
                }
                Err(err) if err.is_fatal() => {
                    warn!("[{}] search failed fatally: {err}", self.name);
                    return ReservationOutcome::Exhausted(ExhaustReason::FatalTransport(err));
                }
                Err(err) if err.is_transient() => {
                    let delay = self.schedule.transient_delay();
                    warn!(
                        "[{}] search failed ({err}); retrying in {:?}",
                        self.name, delay
                    );
                    if !self.sleep(delay).await {
                        return ReservationOutcome::Cancelled;
                    }
                    continue;
                }
                Err(err) => {
                    debug!("[{}] search refused ({err}); nothing bookable", self.name);
                    Vec::new()
                }
            };

            let candidates = select(&options, &rules);
            debug!(
                "[{}] poll {}: {} trains, {} candidates",
                self.name,
                self.polls,
                options.len(),
                candidates.len()
            );
            if candidates.is_empty() {
                let delay = self.schedule.poll_delay();
                if !self.sleep(delay).await {
                    return ReservationOutcome::Cancelled;
                }
                continue;
            }

            if self.cancel.is_cancelled() {
                return ReservationOutcome::Cancelled;
            }
            self.enter(Phase::Attempting);
            let delay = match self.attempt(request, &candidates).await {
                AttemptResult::Finished(outcome) => return outcome,
                AttemptResult::Retry(Pause::Poll) => self.schedule.poll_delay(),
                AttemptResult::Retry(Pause::Transient) => self.schedule.transient_delay(),
            };
            if !self.sleep(delay).await {
                return ReservationOutcome::Cancelled;
            }
        }
    }

    /// Query every search anchor in turn and merge the results.
    ///
    /// Stops issuing searches once cancelled; the caller observes the
    /// cancellation at its next check.
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<TrainOption>, SessionError> {
        let mut batches = Vec::new();
        for from in criteria.search_times() {
            if self.cancel.is_cancelled() {
                break;
            }
            batches.push(self.session.search(criteria, from).await?);
        }
        Ok(merge_search_results(batches))
    }

    async fn attempt(&self, request: &RunRequest, candidates: &[Candidate]) -> AttemptResult {
        for candidate in candidates
            .iter()
            .filter(|candidate| candidate.kind == CandidateKind::Reserve)
        {
            let attempt = attempt_for(request, candidate);
            info!(
                "[{}] reserving train {} at {} ({})",
                self.name, candidate.option.train_id, candidate.option.departs_at, candidate.seat_class
            );
            match self.session.reserve(&attempt).await {
                Ok(reservation) => {
                    return AttemptResult::Finished(ReservationOutcome::Secured(reservation))
                }
                Err(err) if err.is_sold_out_race() => {
                    info!(
                        "[{}] train {} lost to another buyer: {err}",
                        self.name, candidate.option.train_id
                    );
                }
                Err(err) if err.is_fatal() => {
                    warn!("[{}] reservation failed fatally: {err}", self.name);
                    return AttemptResult::Finished(ReservationOutcome::Exhausted(
                        ExhaustReason::FatalTransport(err),
                    ));
                }
                Err(err) => {
                    // The request may have reached the platform; trying another
                    // train now could leave two holds.
                    warn!("[{}] reservation interrupted ({err}); back to polling", self.name);
                    return AttemptResult::Retry(Pause::Transient);
                }
            }
        }

        if !request.waitlist {
            return AttemptResult::Retry(Pause::Poll);
        }
        let Some(candidate) = candidates
            .iter()
            .find(|candidate| candidate.kind == CandidateKind::Waitlist)
        else {
            return AttemptResult::Retry(Pause::Poll);
        };

        let attempt = attempt_for(request, candidate);
        info!(
            "[{}] joining waitlist for train {} ({})",
            self.name, candidate.option.train_id, candidate.seat_class
        );
        match self.session.join_waitlist(&attempt).await {
            Ok(reservation) => AttemptResult::Finished(ReservationOutcome::Waitlisted(reservation)),
            Err(err) if err.is_fatal() => {
                warn!("[{}] waitlist join failed fatally: {err}", self.name);
                AttemptResult::Finished(ReservationOutcome::Exhausted(
                    ExhaustReason::FatalTransport(err),
                ))
            }
            Err(err) if err.is_transient() => {
                warn!("[{}] waitlist join interrupted ({err})", self.name);
                AttemptResult::Retry(Pause::Transient)
            }
            Err(err) => {
                info!("[{}] waitlist join refused: {err}", self.name);
                AttemptResult::Retry(Pause::Poll)
            }
        }
    }

    /// Sleep for `delay`. Returns `false` if cancelled meanwhile.
    async fn sleep(&mut self, delay: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.cancel.cancelled() => false,
        }
    }

    async fn report_progress(&self, request: &RunRequest, started: Instant) {
        let event = RunEvent::Progress(ProgressReport {
            run: self.name.clone(),
            polls: self.polls,
            elapsed: started.elapsed(),
            criteria: request.criteria.clone(),
            at: Utc::now(),
        });
        self.notifier.notify(&event).await;
    }

    async fn finish(mut self, request: &RunRequest, outcome: ReservationOutcome) -> RunReport {
        self.enter(Phase::from(&outcome));
        info!(
            "[{}] finished after {} polls: {}",
            self.name,
            self.polls,
            outcome.summary()
        );

        let event = RunEvent::Finished(OutcomeReport {
            run: self.name.clone(),
            outcome: outcome.clone(),
            criteria: request.criteria.clone(),
            polls: self.polls,
            at: Utc::now(),
        });
        self.notifier.notify(&event).await;

        let payment = match &outcome {
            ReservationOutcome::Secured(reservation) if request.auto_pay => {
                Some(self.pay(reservation).await)
            }
            _ => None,
        };

        RunReport {
            outcome,
            payment,
            polls: self.polls,
        }
    }

    async fn pay(&self, reservation: &crate::models::Reservation) -> PaymentStatus {
        let Some(dispatcher) = &self.payment else {
            warn!(
                "[{}] auto-pay requested but no payment dispatcher is configured",
                self.name
            );
            return PaymentStatus::Failed(PaymentError::Unavailable);
        };
        match dispatcher.pay(reservation).await {
            Ok(()) => {
                info!("[{}] paid for reservation {}", self.name, reservation.id);
                PaymentStatus::Paid
            }
            Err(err) => {
                warn!(
                    "[{}] payment for reservation {} failed, reservation kept: {err}",
                    self.name, reservation.id
                );
                PaymentStatus::Failed(err)
            }
        }
    }
}

fn attempt_for(request: &RunRequest, candidate: &Candidate) -> ReservationAttempt {
    ReservationAttempt {
        option: candidate.option.clone(),
        seat_class: candidate.seat_class,
        passengers: request.criteria.passengers,
    }
}
