//! Command handlers for the `railgrab` binary.

use std::{path::Path, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, Utc};
use railgrab_core::{
    config::{self, AppConfig, PlatformSettings, WatchConfig},
    engine::{CancelHandle, PaymentStatus, PollSchedule, PollSettings, ReservationLoop},
    error::ExhaustReason,
    journal::{JournalNotifier, RunJournal},
    notify::{LogNotifier, Notifier, NotifierSet, OutcomeReport, RunEvent, WebhookNotifier},
    session::{CardDetails, HttpSession, SessionCapability},
    slots::{SlotGuard, SlotManager},
    ReservationOutcome, RunReport, RunRequest,
};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// `railgrab init`
pub fn init(path: &Path) -> Result<()> {
    if config::write_default_config(path)? {
        println!("wrote default configuration to {}", path.display());
    } else {
        println!("configuration already exists at {}", path.display());
    }
    Ok(())
}

fn load(path: &Path) -> Result<AppConfig> {
    AppConfig::load_from(path)
}

/// `railgrab run [--watch NAME]`
pub async fn run_watches(path: &Path, only: Option<&str>) -> Result<()> {
    let config = load(path)?;
    let watches: Vec<WatchConfig> = match only {
        Some(name) => vec![config
            .watch(name)
            .cloned()
            .ok_or_else(|| anyhow!("no watch named '{name}' in {}", path.display()))?],
        None => config.watches.clone(),
    };
    if watches.is_empty() {
        bail!("no [[watch]] entries configured in {}", path.display());
    }

    let journal = RunJournal::new(config.journal_dir());
    let mut notifiers = NotifierSet::new().with(Arc::new(LogNotifier));
    if let Some(url) = &config.notify.webhook_url {
        let webhook = WebhookNotifier::new(url.clone()).context("failed to build webhook client")?;
        notifiers = notifiers.with(Arc::new(webhook));
    }

    let slots = SlotManager::new(config.runs.max_slots);
    let cancel = CancelHandle::new();
    let card = CardDetails::from_settings(&config.payment);
    let poll_settings = config.polling.poll_settings();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping runs after their current step");
            ctrl_c.cancel();
        }
    });

    let (claimed, skipped) = claim_slots(&slots, watches);
    info!(
        "{} of {} run slots in use: {}",
        slots.active_count(),
        config.runs.max_slots,
        slots
            .slots()
            .iter()
            .map(|slot| slot.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut runs = JoinSet::new();
    for (watch, slot) in claimed {
        let job = WatchJob {
            request: watch.to_request(config.platform.family),
            platform: config.platform.clone(),
            poll_settings: poll_settings.clone(),
            journal: journal.clone(),
            notifiers: notifiers.clone(),
            card: card.clone(),
            cancel: cancel.clone(),
            slot,
        };
        runs.spawn(job.run());
    }

    let mut failures = skipped;
    while let Some(joined) = runs.join_next().await {
        match joined {
            Ok(Ok((name, report))) => {
                println!("{name}: {}", describe(&report));
                if matches!(report.outcome, ReservationOutcome::Exhausted(_)) {
                    failures += 1;
                }
            }
            Ok(Err(err)) => {
                error!("run failed: {err:#}");
                failures += 1;
            }
            Err(err) => {
                error!("run task aborted: {err}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} run(s) did not complete");
    }
    Ok(())
}

/// Take a slot for each watch in order. Returns the watches that got one and
/// the number that were skipped.
fn claim_slots(
    slots: &SlotManager,
    watches: Vec<WatchConfig>,
) -> (Vec<(WatchConfig, SlotGuard)>, usize) {
    let mut claimed = Vec::new();
    let mut skipped = 0;
    for watch in watches {
        match slots.acquire(&watch.name) {
            Some(slot) => claimed.push((watch, slot)),
            None if slots.is_full() => {
                warn!("skipping watch '{}': every run slot is busy", watch.name);
                skipped += 1;
            }
            None => {
                warn!("skipping watch '{}': it is already running", watch.name);
                skipped += 1;
            }
        }
    }
    (claimed, skipped)
}

fn describe(report: &RunReport) -> String {
    let mut line = report.outcome.summary();
    match &report.payment {
        Some(PaymentStatus::Paid) => line.push_str(" (paid)"),
        Some(PaymentStatus::Failed(err)) => line.push_str(&format!(" (payment failed: {err})")),
        None => {}
    }
    line
}

/// One watch, owning its slot for as long as it runs.
struct WatchJob {
    request: RunRequest,
    platform: PlatformSettings,
    poll_settings: PollSettings,
    journal: RunJournal,
    notifiers: NotifierSet,
    card: Option<CardDetails>,
    cancel: CancelHandle,
    slot: SlotGuard,
}

impl WatchJob {
    async fn run(self) -> Result<(String, RunReport)> {
        let name = self.slot.name().to_string();
        let entry = self.journal.open_run(&name, &self.request.criteria)?;
        let notifier = self
            .notifiers
            .clone()
            .with(Arc::new(JournalNotifier::new(self.journal.clone(), entry.clone())));

        // Bad criteria must end the run before anything touches the network.
        if let Err(err) = self.request.criteria.validate(Local::now().date_naive()) {
            warn!("[{name}] rejected criteria: {err}");
            let outcome = ReservationOutcome::Exhausted(ExhaustReason::InvalidCriteria(err));
            let report = self.end_early(&notifier, &name, outcome).await;
            return Ok((name, report));
        }

        let mut platform = self.platform.clone();
        platform.family = self.request.criteria.family;

        let session = match login(&platform, &self.poll_settings, &self.cancel).await {
            Ok(session) => session,
            Err(outcome) => {
                let report = self.end_early(&notifier, &name, outcome).await;
                return Ok((name, report));
            }
        };

        let mut engine = ReservationLoop::new(
            name.clone(),
            session.clone(),
            Arc::new(notifier),
            self.poll_settings.clone(),
            &self.cancel,
        );
        if let Some(card) = self.card.clone() {
            engine = engine.with_payment(Arc::new(session.payment_dispatcher(card)));
        } else if self.request.auto_pay {
            warn!("[{name}] auto_pay is set but no card is configured");
        }

        let report = engine.run(&self.request).await;
        if let Some(payment) = &report.payment {
            if let Err(err) = self.journal.record_payment(&entry, payment) {
                warn!("[{name}] failed to record payment: {err:#}");
            }
        }
        Ok((name, report))
    }

    /// Report a run that ended before its loop started.
    async fn end_early(
        &self,
        notifier: &NotifierSet,
        name: &str,
        outcome: ReservationOutcome,
    ) -> RunReport {
        notifier
            .notify(&RunEvent::Finished(OutcomeReport {
                run: name.to_string(),
                outcome: outcome.clone(),
                criteria: self.request.criteria.clone(),
                polls: 0,
                at: Utc::now(),
            }))
            .await;
        RunReport {
            outcome,
            payment: None,
            polls: 0,
        }
    }
}

/// Log in, retrying transient failures with backoff until cancelled.
async fn login(
    platform: &PlatformSettings,
    settings: &PollSettings,
    cancel: &CancelHandle,
) -> Result<HttpSession, ReservationOutcome> {
    let mut schedule = PollSchedule::new(settings.clone());
    let mut signal = cancel.signal();
    loop {
        if signal.is_cancelled() {
            return Err(ReservationOutcome::Cancelled);
        }
        match HttpSession::login(platform).await {
            Ok(session) => return Ok(session),
            Err(err) if err.is_transient() => {
                let delay = schedule.transient_delay();
                warn!("login failed ({err}); retrying in {delay:?}");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = signal.cancelled() => return Err(ReservationOutcome::Cancelled),
                }
            }
            Err(err) => {
                error!("login failed: {err}");
                return Err(ReservationOutcome::Exhausted(ExhaustReason::FatalTransport(
                    err,
                )));
            }
        }
    }
}

async fn connect(config: &AppConfig) -> Result<HttpSession> {
    HttpSession::login(&config.platform)
        .await
        .context("failed to log in to the platform")
}

/// `railgrab reservations`
pub async fn list_reservations(path: &Path) -> Result<()> {
    let config = load(path)?;
    let session = connect(&config).await?;
    let reservations = session
        .list_reservations()
        .await
        .context("failed to list reservations")?;
    if reservations.is_empty() {
        println!("no reservations");
    }
    for reservation in reservations {
        println!("{}  {}", reservation.id, reservation.summary());
    }
    Ok(())
}

/// `railgrab cancel <ID>`
pub async fn cancel_reservation(path: &Path, id: &str) -> Result<()> {
    let config = load(path)?;
    let session = connect(&config).await?;
    let reservations = session
        .list_reservations()
        .await
        .context("failed to list reservations")?;
    let reservation = reservations
        .into_iter()
        .find(|reservation| reservation.id == id)
        .ok_or_else(|| anyhow!("no reservation with id '{id}'"))?;
    session
        .cancel(&reservation)
        .await
        .with_context(|| format!("failed to cancel reservation {id}"))?;
    info!("cancelled reservation {id}");
    println!("cancelled {}", reservation.summary());
    Ok(())
}

/// `railgrab history`
pub fn history(path: &Path, limit: usize) -> Result<()> {
    let config = load(path)?;
    let journal = RunJournal::new(config.journal_dir());
    let entries = journal.entries()?;
    if entries.is_empty() {
        println!("no recorded runs in {}", journal.root().display());
        return Ok(());
    }
    for entry in entries.into_iter().take(limit) {
        match journal.load(&entry) {
            Ok(record) => println!(
                "{}  {:<10} {:<12} {} ({} polls){}",
                record.updated_at.format("%Y-%m-%d %H:%M:%S"),
                record.status.label(),
                record.run,
                record.route,
                record.polls,
                record
                    .detail
                    .map(|detail| format!(": {detail}"))
                    .unwrap_or_default()
            ),
            Err(err) => warn!("failed to read {:?}: {err:#}", entry.path),
        }
    }
    Ok(())
}
