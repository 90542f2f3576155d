//! On-disk record of reservation runs.
//!
//! Each run gets one JSON file under the journal root, rewritten as the run
//! progresses. The file survives the process so `history` can show what
//! earlier runs achieved.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    engine::{PaymentStatus, ReservationOutcome},
    models::SearchCriteria,
    notify::{Notifier, RunEvent},
};

/// Journal directory below the user's data directory.
pub const DEFAULT_JOURNAL_DIR: &str = "railgrab/runs";

/// Where a run stands.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Searching,
    Reserved,
    Waitlisted,
    Paid,
    Cancelled,
    Failed,
}

impl RunStatus {
    /// Status a finished run settles in.
    pub fn from_outcome(outcome: &ReservationOutcome) -> Self {
        match outcome {
            ReservationOutcome::Secured(_) => RunStatus::Reserved,
            ReservationOutcome::Waitlisted(_) => RunStatus::Waitlisted,
            ReservationOutcome::Cancelled => RunStatus::Cancelled,
            ReservationOutcome::Exhausted(_) => RunStatus::Failed,
        }
    }

    /// Lowercase label.
    pub fn label(self) -> &'static str {
        match self {
            RunStatus::Searching => "searching",
            RunStatus::Reserved => "reserved",
            RunStatus::Waitlisted => "waitlisted",
            RunStatus::Paid => "paid",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        }
    }
}

/// Contents of one journal file.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run name.
    pub run: String,
    /// Route label, e.g. `Suseo → Busan 2026-11-01`.
    pub route: String,
    pub status: RunStatus,
    /// Search cycles so far.
    #[serde(default)]
    pub polls: u64,
    /// Set once a seat is held or a waitlist place is taken.
    #[serde(default)]
    pub reservation_id: Option<String>,
    /// Last outcome or payment message.
    #[serde(default)]
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Index entry pointing at a journal file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// File holding the record.
    pub path: PathBuf,
    /// Run name.
    pub run: String,
    /// Status at last write.
    pub status: RunStatus,
    /// Time of last write.
    pub updated_at: DateTime<Utc>,
}

impl JournalEntry {
    fn from_record(path: PathBuf, record: &RunRecord) -> Self {
        Self {
            path,
            run: record.run.clone(),
            status: record.status,
            updated_at: record.updated_at,
        }
    }
}

/// Reads and writes run records below one directory.
#[derive(Debug, Clone)]
pub struct RunJournal {
    root: PathBuf,
}

impl RunJournal {
    /// Journal rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default location under the user's data directory.
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_JOURNAL_DIR)
    }

    /// Directory holding the records.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a record for a new run.
    pub fn open_run(&self, run: &str, criteria: &SearchCriteria) -> Result<JournalEntry> {
        let now = Utc::now();
        let record = RunRecord {
            run: run.to_string(),
            route: criteria.route_label(),
            status: RunStatus::Searching,
            polls: 0,
            reservation_id: None,
            detail: None,
            started_at: now,
            updated_at: now,
        };
        let file_name = format!(
            "{}_{}.json",
            sanitize_component(run),
            now.format("%Y%m%d%H%M%S%3f")
        );
        let path = self.root.join(file_name);
        self.write_record(&path, &record)?;
        Ok(JournalEntry::from_record(path, &record))
    }

    /// Read the record behind `entry`.
    pub fn load(&self, entry: &JournalEntry) -> Result<RunRecord> {
        self.read_record(&entry.path)
    }

    /// Note the poll count of a run that is still searching.
    pub fn record_progress(&self, entry: &JournalEntry, polls: u64) -> Result<JournalEntry> {
        self.update(entry, |record| {
            record.polls = polls;
        })
    }

    /// Settle a run on its terminal outcome.
    pub fn record_outcome(
        &self,
        entry: &JournalEntry,
        outcome: &ReservationOutcome,
        polls: u64,
    ) -> Result<JournalEntry> {
        self.update(entry, |record| {
            record.status = RunStatus::from_outcome(outcome);
            record.polls = polls;
            record.reservation_id = outcome.reservation().map(|r| r.id.clone());
            record.detail = Some(outcome.summary());
        })
    }

    /// Apply the payment result. A failed payment leaves the run reserved.
    pub fn record_payment(&self, entry: &JournalEntry, payment: &PaymentStatus) -> Result<JournalEntry> {
        self.update(entry, |record| match payment {
            PaymentStatus::Paid => {
                record.status = RunStatus::Paid;
            }
            PaymentStatus::Failed(err) => {
                record.detail = Some(format!("payment failed: {err}"));
            }
        })
    }

    /// All records, most recently updated first. Unreadable files are skipped.
    pub fn entries(&self) -> Result<Vec<JournalEntry>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root).context("failed to read journal directory")? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if entry.path().extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match self.read_record(&entry.path()) {
                Ok(record) => entries.push(JournalEntry::from_record(entry.path(), &record)),
                Err(err) => warn!("skipping journal file {:?}: {err}", entry.path()),
            }
        }

        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(entries)
    }

    fn update(
        &self,
        entry: &JournalEntry,
        change: impl FnOnce(&mut RunRecord),
    ) -> Result<JournalEntry> {
        let mut record = self.read_record(&entry.path)?;
        change(&mut record);
        record.updated_at = Utc::now();
        self.write_record(&entry.path, &record)?;
        Ok(JournalEntry::from_record(entry.path.clone(), &record))
    }

    fn write_record(&self, path: &Path, record: &RunRecord) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let serialised = serde_json::to_vec_pretty(record)?;
        fs::write(path, serialised).with_context(|| format!("failed to write {}", path.display()))
    }

    fn read_record(&self, path: &Path) -> Result<RunRecord> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }
}

fn sanitize_component(input: &str) -> String {
    let result: String = input
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'))
        .collect();
    if result.is_empty() {
        "run".to_string()
    } else {
        result
    }
}

/// Keeps one run's journal record in step with its events.
#[derive(Debug, Clone)]
pub struct JournalNotifier {
    journal: RunJournal,
    entry: JournalEntry,
}

impl JournalNotifier {
    /// Notifier writing to the record behind `entry`.
    pub fn new(journal: RunJournal, entry: JournalEntry) -> Self {
        Self { journal, entry }
    }

}

#[async_trait]
impl Notifier for JournalNotifier {
    async fn notify(&self, event: &RunEvent) {
        let journal = self.journal.clone();
        let entry = self.entry.clone();
        let owned = event.clone();
        let result = tokio::task::spawn_blocking(move || match &owned {
            RunEvent::Progress(report) => journal.record_progress(&entry, report.polls),
            RunEvent::Finished(report) => {
                journal.record_outcome(&entry, &report.outcome, report.polls)
            }
        })
        .await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!("failed to update journal for run {}: {err:#}", event.run()),
            Err(err) => warn!("journal task for run {} did not finish: {err}", event.run()),
        }
    }
}
