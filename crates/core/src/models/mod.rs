#![allow(missing_docs)]

//! Shared domain models.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::CriteriaError;

/// Upper bound on passengers per booking accepted by the platform.
pub const MAX_PASSENGERS: u8 = 9;

/// Operator family a search is run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainFamily {
    /// Super Rapid Train.
    Srt,
    /// Korea Train eXpress.
    Ktx,
}

impl fmt::Display for TrainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainFamily::Srt => f.write_str("SRT"),
            TrainFamily::Ktx => f.write_str("KTX"),
        }
    }
}

/// Passenger counts by fare type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassengerMix {
    #[serde(default = "default_adults")]
    pub adults: u8,
    #[serde(default)]
    pub children: u8,
    #[serde(default)]
    pub seniors: u8,
}

fn default_adults() -> u8 {
    1
}

impl Default for PassengerMix {
    fn default() -> Self {
        Self {
            adults: 1,
            children: 0,
            seniors: 0,
        }
    }
}

impl PassengerMix {
    /// Total number of travellers.
    pub fn total(&self) -> u32 {
        u32::from(self.adults) + u32::from(self.children) + u32::from(self.seniors)
    }

    /// Short description such as `2 adults, 1 child`.
    pub fn description(&self) -> String {
        let mut parts = Vec::new();
        if self.adults > 0 {
            parts.push(plural(self.adults, "adult", "adults"));
        }
        if self.children > 0 {
            parts.push(plural(self.children, "child", "children"));
        }
        if self.seniors > 0 {
            parts.push(plural(self.seniors, "senior", "seniors"));
        }
        if parts.is_empty() {
            "no passengers".to_string()
        } else {
            parts.join(", ")
        }
    }
}

fn plural(count: u8, one: &str, many: &str) -> String {
    if count == 1 {
        format!("1 {one}")
    } else {
        format!("{count} {many}")
    }
}

/// What a run is looking for. Validated once before the first search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub departure: String,
    pub arrival: String,
    pub date: NaiveDate,
    /// Earliest acceptable departure time.
    pub departure_after: NaiveTime,
    /// Additional search anchors queried in the same poll cycle.
    #[serde(default)]
    pub extra_search_times: Vec<NaiveTime>,
    #[serde(default)]
    pub passengers: PassengerMix,
    pub family: TrainFamily,
}

impl SearchCriteria {
    /// Check the criteria against platform limits relative to `today`.
    pub fn validate(&self, today: NaiveDate) -> Result<(), CriteriaError> {
        if self.departure.trim().is_empty() {
            return Err(CriteriaError::EmptyStation { field: "departure" });
        }
        if self.arrival.trim().is_empty() {
            return Err(CriteriaError::EmptyStation { field: "arrival" });
        }
        if self.departure.trim() == self.arrival.trim() {
            return Err(CriteriaError::SameStation {
                station: self.departure.trim().to_string(),
            });
        }
        if self.date < today {
            return Err(CriteriaError::DateInPast {
                date: self.date,
                today,
            });
        }
        let count = self.passengers.total();
        if count == 0 {
            return Err(CriteriaError::NoPassengers);
        }
        if count > u32::from(MAX_PASSENGERS) {
            return Err(CriteriaError::TooManyPassengers {
                count,
                max: MAX_PASSENGERS,
            });
        }
        Ok(())
    }

    /// Every time anchor to search, lower bound first, without duplicates.
    pub fn search_times(&self) -> Vec<NaiveTime> {
        let mut times = vec![self.departure_after];
        for time in &self.extra_search_times {
            if !times.contains(time) {
                times.push(*time);
            }
        }
        times
    }

    /// Route label such as `Suseo → Busan 2026-11-01`.
    pub fn route_label(&self) -> String {
        format!("{} → {} {}", self.departure, self.arrival, self.date)
    }
}

/// Seat classes the engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatClass {
    Standard,
    First,
}

impl fmt::Display for SeatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeatClass::Standard => f.write_str("standard"),
            SeatClass::First => f.write_str("first"),
        }
    }
}

/// Live availability of one seat class on one train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatStatus {
    Available,
    SoldOut,
    WaitlistOpen,
    WaitlistClosed,
}

/// Ordered preference over seat classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeatPreference {
    #[default]
    StandardFirst,
    StandardOnly,
    FirstFirst,
    FirstOnly,
}

impl SeatPreference {
    /// Classes to consider, most preferred first.
    pub fn classes(&self) -> &'static [SeatClass] {
        match self {
            SeatPreference::StandardFirst => &[SeatClass::Standard, SeatClass::First],
            SeatPreference::StandardOnly => &[SeatClass::Standard],
            SeatPreference::FirstFirst => &[SeatClass::First, SeatClass::Standard],
            SeatPreference::FirstOnly => &[SeatClass::First],
        }
    }

    /// Position of `class` in the preference, if it is accepted at all.
    pub fn rank(&self, class: SeatClass) -> Option<usize> {
        self.classes().iter().position(|candidate| *candidate == class)
    }

    pub fn description(&self) -> &'static str {
        match self {
            SeatPreference::StandardFirst => "standard preferred",
            SeatPreference::StandardOnly => "standard only",
            SeatPreference::FirstFirst => "first class preferred",
            SeatPreference::FirstOnly => "first class only",
        }
    }
}

/// One train returned by a search. Fetched fresh on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainOption {
    pub train_id: String,
    pub departs_at: NaiveTime,
    pub arrives_at: NaiveTime,
    pub standard: SeatStatus,
    pub first: SeatStatus,
    /// Fare in the platform's minor currency unit.
    #[serde(default)]
    pub fare: u64,
}

impl TrainOption {
    pub fn status(&self, class: SeatClass) -> SeatStatus {
        match class {
            SeatClass::Standard => self.standard,
            SeatClass::First => self.first,
        }
    }

    /// Key used to de-duplicate trains seen from several search anchors.
    pub fn dedup_key(&self) -> (&str, NaiveTime) {
        (self.train_id.as_str(), self.departs_at)
    }
}

/// Request submitted to the platform for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationAttempt {
    pub option: TrainOption,
    pub seat_class: SeatClass,
    pub passengers: PassengerMix,
}

/// Local copy of a platform-side reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub train_id: String,
    pub departs_at: NaiveTime,
    pub seat_class: SeatClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seat: Option<String>,
    pub price: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pay_by: Option<NaiveDateTime>,
    #[serde(default)]
    pub waitlisted: bool,
}

impl Reservation {
    /// One-line human summary.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "#{} train {} {} {}",
            self.id,
            self.train_id,
            self.departs_at.format("%H:%M"),
            self.seat_class
        );
        if let Some(seat) = self.seat.as_deref() {
            line.push_str(&format!(" seat {seat}"));
        }
        line.push_str(&format!(", {}", self.price));
        if let Some(deadline) = self.pay_by {
            line.push_str(&format!(", pay by {}", deadline.format("%m-%d %H:%M")));
        }
        line
    }
}
