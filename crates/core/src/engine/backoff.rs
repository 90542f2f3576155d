//! Pause lengths between polls.
//!
//! Two cadences: the regular poll interval (short, jittered so requests do not
//! land on a fixed beat) and the transient-failure backoff (doubling, capped,
//! reset by the next successful search).

use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};

/// Tunables for [`PollSchedule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    /// Shortest pause between two polls.
    pub min_interval: Duration,
    /// Upper bound of the random extra pause added to each poll.
    pub jitter: Duration,
    /// First pause after a transient failure.
    pub transient_backoff: Duration,
    /// Cap for the doubling transient pause.
    pub transient_backoff_max: Duration,
    /// Emit a progress event every this many polls (0 disables).
    pub progress_every: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
            jitter: Duration::from_millis(2000),
            transient_backoff: Duration::from_secs(5),
            transient_backoff_max: Duration::from_secs(60),
            progress_every: 10,
        }
    }
}

/// Stateful source of pause durations for one run.
#[derive(Debug)]
pub struct PollSchedule {
    settings: PollSettings,
    consecutive_transient: u32,
    rng: StdRng,
}

impl PollSchedule {
    /// Schedule seeded from OS entropy.
    pub fn new(settings: PollSettings) -> Self {
        Self {
            settings,
            consecutive_transient: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic jitter, for tests.
    pub fn with_seed(settings: PollSettings, seed: u64) -> Self {
        Self {
            settings,
            consecutive_transient: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Pause before the next regular poll.
    pub fn poll_delay(&mut self) -> Duration {
        let jitter_ms = self.settings.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            self.rng.gen_range(0..=jitter_ms)
        };
        self.settings.min_interval + Duration::from_millis(extra)
    }

    /// Pause after a transient failure; grows with each consecutive one.
    pub fn transient_delay(&mut self) -> Duration {
        let exponent = self.consecutive_transient.min(16);
        self.consecutive_transient = self.consecutive_transient.saturating_add(1);
        let delay = self
            .settings
            .transient_backoff
            .saturating_mul(1u32 << exponent);
        delay.min(self.settings.transient_backoff_max)
    }

    /// Forget earlier transient failures.
    pub fn reset(&mut self) {
        self.consecutive_transient = 0;
    }

    /// Whether poll number `polls` should emit a progress event.
    pub fn progress_due(&self, polls: u64) -> bool {
        self.settings.progress_every > 0 && polls > 0 && polls % self.settings.progress_every == 0
    }
}
