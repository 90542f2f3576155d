//! Application configuration.
//!
//! Values come from an optional TOML file (by default
//! `<config_dir>/railgrab/config.toml`) overlaid by `RAILGRAB_*` environment
//! variables, e.g. `RAILGRAB_PLATFORM__PASSWORD`.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{
    engine::{PollSettings, RunRequest},
    models::{PassengerMix, SearchCriteria, SeatPreference, TrainFamily},
};

/// Directory under the user's config directory holding `config.toml`.
pub const CONFIG_DIR_NAME: &str = "railgrab";
const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_PREFIX: &str = "RAILGRAB";

const DEFAULT_CONFIG: &str = r#"# railgrab configuration
#
# Credentials and card data are best supplied through the environment:
#   RAILGRAB_PLATFORM__USERNAME, RAILGRAB_PLATFORM__PASSWORD,
#   RAILGRAB_PAYMENT__CARD_NUMBER, ...

[platform]
base_url = "http://127.0.0.1:8080/api"
family = "srt"
request_timeout_secs = 15
# Extra regular expressions for reading platform refusal messages.
sold_out_patterns = []
throttled_patterns = []
expired_patterns = []

[polling]
min_interval_ms = 500
jitter_ms = 2000
transient_backoff_ms = 5000
transient_backoff_max_ms = 60000
progress_every = 10

[runs]
max_slots = 4
# journal_dir = "/path/to/runs"

[notify]
# webhook_url = "https://discord.com/api/webhooks/..."

# [[watch]]
# name = "busan-friday"
# departure = "Suseo"
# arrival = "Busan"
# date = "2026-11-06"
# departure_after = "17:00:00"
# extra_search_times = ["19:00:00"]
# passengers = { adults = 1, children = 0, seniors = 0 }
# seat_preference = "standard-first"
# waitlist = true
# auto_pay = false
# trains = []
"#;

/// String whose value never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Borrow the underlying value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

/// Booking gateway connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    /// Gateway root, e.g. `https://gateway.example/api`.
    pub base_url: String,
    /// Operator family the account belongs to.
    pub family: TrainFamily,
    /// Per-request timeout enforced by the HTTP client.
    pub request_timeout_secs: u64,
    /// Account name.
    pub username: Option<Secret>,
    /// Account password.
    pub password: Option<Secret>,
    /// Extra sold-out message patterns.
    pub sold_out_patterns: Vec<String>,
    /// Extra throttling message patterns.
    pub throttled_patterns: Vec<String>,
    /// Extra session-expired message patterns.
    pub expired_patterns: Vec<String>,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
            family: TrainFamily::Srt,
            request_timeout_secs: 15,
            username: None,
            password: None,
            sold_out_patterns: Vec::new(),
            throttled_patterns: Vec::new(),
            expired_patterns: Vec::new(),
        }
    }
}

/// Poll cadence and backoff, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    /// Shortest pause between two polls.
    pub min_interval_ms: u64,
    /// Upper bound of the random extra pause added to each poll.
    pub jitter_ms: u64,
    /// First pause after a transient failure.
    pub transient_backoff_ms: u64,
    /// Cap for the doubling transient pause.
    pub transient_backoff_max_ms: u64,
    /// Emit a progress event every this many polls (0 disables).
    pub progress_every: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: 500,
            jitter_ms: 2000,
            transient_backoff_ms: 5000,
            transient_backoff_max_ms: 60_000,
            progress_every: 10,
        }
    }
}

impl PollingSettings {
    /// Engine view of these settings.
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            min_interval: Duration::from_millis(self.min_interval_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            transient_backoff: Duration::from_millis(self.transient_backoff_ms),
            transient_backoff_max: Duration::from_millis(
                self.transient_backoff_max_ms.max(self.transient_backoff_ms),
            ),
            progress_every: self.progress_every,
        }
    }
}

/// Limits and bookkeeping for concurrent runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Maximum number of runs active at once.
    pub max_slots: usize,
    /// Where run records are written. Defaults under the data directory.
    pub journal_dir: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_slots: 4,
            journal_dir: None,
        }
    }
}

/// Outbound notification channels.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    /// Webhook receiving a JSON body per run event.
    pub webhook_url: Option<String>,
}

/// Card used for automatic payment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PaymentSettings {
    /// Card number.
    pub card_number: Option<Secret>,
    /// First two digits of the card PIN.
    pub card_password: Option<Secret>,
    /// Birth date (`YYMMDD`) or business registration number.
    pub card_validation: Option<Secret>,
    /// Expiry as `YYMM`.
    pub card_expiry: Option<Secret>,
}

/// A named run definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Identifier used on the command line and in the journal.
    pub name: String,
    /// Departure station.
    pub departure: String,
    /// Arrival station.
    pub arrival: String,
    /// Travel date.
    pub date: NaiveDate,
    /// Earliest acceptable departure.
    pub departure_after: NaiveTime,
    /// Additional search anchors.
    #[serde(default)]
    pub extra_search_times: Vec<NaiveTime>,
    /// Traveller mix.
    #[serde(default)]
    pub passengers: PassengerMix,
    /// Overrides the platform family for this watch.
    #[serde(default)]
    pub family: Option<TrainFamily>,
    /// Seat class order.
    #[serde(default)]
    pub seat_preference: SeatPreference,
    /// Fall back to the waitlist when no seat can be claimed.
    #[serde(default)]
    pub waitlist: bool,
    /// Pay as soon as a seat is secured.
    #[serde(default)]
    pub auto_pay: bool,
    /// Restrict attempts to these train ids.
    #[serde(default)]
    pub trains: Vec<String>,
}

impl WatchConfig {
    /// Build the engine request for this watch.
    pub fn to_request(&self, default_family: TrainFamily) -> RunRequest {
        RunRequest {
            criteria: SearchCriteria {
                departure: self.departure.trim().to_string(),
                arrival: self.arrival.trim().to_string(),
                date: self.date,
                departure_after: self.departure_after,
                extra_search_times: self.extra_search_times.clone(),
                passengers: self.passengers,
                family: self.family.unwrap_or(default_family),
            },
            preference: self.seat_preference,
            waitlist: self.waitlist,
            auto_pay: self.auto_pay,
            train_filter: self.trains.clone(),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Gateway settings.
    pub platform: PlatformSettings,
    /// Poll cadence.
    pub polling: PollingSettings,
    /// Concurrency and journal.
    pub runs: RunSettings,
    /// Notification channels.
    pub notify: NotifySettings,
    /// Auto-pay card.
    pub payment: PaymentSettings,
    /// Configured watches.
    #[serde(rename = "watch")]
    pub watches: Vec<WatchConfig>,
}

impl AppConfig {
    /// Load from the default location plus environment.
    pub fn load() -> Result<Self> {
        Self::load_from(&default_config_path())
    }

    /// Load from `path` (missing file is fine) plus environment.
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("failed to read configuration {}", path.display()))?;

        let config: AppConfig = settings
            .try_deserialize()
            .with_context(|| format!("failed to parse configuration {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.runs.max_slots == 0 {
            bail!("runs.max_slots must be at least 1");
        }
        let mut names = std::collections::HashSet::new();
        for watch in &self.watches {
            if watch.name.trim().is_empty() {
                bail!("every [[watch]] needs a name");
            }
            if !names.insert(watch.name.as_str()) {
                bail!("duplicate watch name '{}'", watch.name);
            }
        }
        Ok(())
    }

    /// Look up a watch by name.
    pub fn watch(&self, name: &str) -> Option<&WatchConfig> {
        self.watches.iter().find(|watch| watch.name == name)
    }

    /// Directory for run records.
    pub fn journal_dir(&self) -> PathBuf {
        self.runs
            .journal_dir
            .clone()
            .unwrap_or_else(crate::journal::RunJournal::default_root)
    }
}

/// `<config_dir>/railgrab/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}

/// Write the default configuration to `path` unless a file is already there.
pub fn write_default_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}
