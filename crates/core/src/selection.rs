//! Seat selection policy: which train/class pairs to try, and in what order.
//!
//! Earliest usable train wins over seat-class comfort: candidates are ordered
//! by departure time first and preference rank second.

use std::collections::HashSet;

use chrono::NaiveTime;
use serde::Serialize;

use crate::models::{SeatClass, SeatPreference, SeatStatus, TrainOption};

/// How a candidate is to be claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    /// Seat is free; claim it with a direct reservation.
    Reserve,
    /// Seat is sold out but the waitlist accepts entries.
    Waitlist,
}

/// A train/seat-class pair deemed attemptable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    /// Train as seen by the search that produced this candidate.
    pub option: TrainOption,
    /// Class to request.
    pub seat_class: SeatClass,
    /// Position of `seat_class` in the run's preference.
    pub rank: usize,
    /// Direct reservation or waitlist.
    pub kind: CandidateKind,
}

/// Inputs of the policy besides the options themselves.
#[derive(Debug, Clone, Copy)]
pub struct SelectionRules<'a> {
    /// Earliest acceptable departure.
    pub departure_after: NaiveTime,
    /// Seat class order.
    pub preference: SeatPreference,
    /// Whether `WaitlistOpen` classes qualify.
    pub waitlist: bool,
    /// When non-empty, only these train ids qualify.
    pub train_filter: &'a [String],
}

/// Order the attemptable train/class pairs of `options`.
///
/// An empty `options` slice yields an empty list.
pub fn select(options: &[TrainOption], rules: &SelectionRules<'_>) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for option in options {
        if option.departs_at < rules.departure_after {
            continue;
        }
        if !rules.train_filter.is_empty()
            && !rules
                .train_filter
                .iter()
                .any(|train_id| train_id == &option.train_id)
        {
            continue;
        }

        for (rank, class) in rules.preference.classes().iter().enumerate() {
            let kind = match option.status(*class) {
                SeatStatus::Available => CandidateKind::Reserve,
                SeatStatus::WaitlistOpen if rules.waitlist => CandidateKind::Waitlist,
                _ => continue,
            };
            candidates.push(Candidate {
                option: option.clone(),
                seat_class: *class,
                rank,
                kind,
            });
        }
    }

    // Stable: trains with equal departure keep their search order.
    candidates.sort_by(|a, b| {
        a.option
            .departs_at
            .cmp(&b.option.departs_at)
            .then(a.rank.cmp(&b.rank))
    });
    candidates
}

/// Combine the results of several search anchors into one list.
///
/// Duplicates (same train id and departure) keep their first occurrence; the
/// result is sorted by departure time.
pub fn merge_search_results(batches: Vec<Vec<TrainOption>>) -> Vec<TrainOption> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for option in batches.into_iter().flatten() {
        let (train_id, departs_at) = option.dedup_key();
        if seen.insert((train_id.to_string(), departs_at)) {
            merged.push(option);
        }
    }
    merged.sort_by_key(|option| option.departs_at);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn train(id: &str, departs: NaiveTime, standard: SeatStatus, first: SeatStatus) -> TrainOption {
        TrainOption {
            train_id: id.to_string(),
            departs_at: departs,
            arrives_at: departs + chrono::Duration::hours(2),
            standard,
            first,
            fare: 52_900,
        }
    }

    fn rules(preference: SeatPreference, waitlist: bool) -> SelectionRules<'static> {
        SelectionRules {
            departure_after: at(8, 0),
            preference,
            waitlist,
            train_filter: &[],
        }
    }

    #[test]
    fn empty_options_yield_no_candidates() {
        assert!(select(&[], &rules(SeatPreference::StandardFirst, true)).is_empty());
    }

    #[test]
    fn drops_trains_before_lower_bound() {
        let options = vec![
            train("301", at(7, 59), SeatStatus::Available, SeatStatus::Available),
            train("303", at(8, 0), SeatStatus::Available, SeatStatus::SoldOut),
        ];
        let candidates = select(&options, &rules(SeatPreference::StandardFirst, false));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].option.train_id, "303");
    }

    #[test]
    fn only_available_or_open_waitlist_qualifies() {
        let options = vec![
            train("301", at(9, 0), SeatStatus::SoldOut, SeatStatus::WaitlistClosed),
            train("303", at(10, 0), SeatStatus::WaitlistOpen, SeatStatus::SoldOut),
            train("305", at(11, 0), SeatStatus::SoldOut, SeatStatus::Available),
        ];

        let direct = select(&options, &rules(SeatPreference::StandardFirst, false));
        assert!(direct
            .iter()
            .all(|candidate| candidate.option.status(candidate.seat_class) == SeatStatus::Available));
        assert_eq!(direct.len(), 1);

        let with_waitlist = select(&options, &rules(SeatPreference::StandardFirst, true));
        assert!(with_waitlist.iter().all(|candidate| matches!(
            candidate.option.status(candidate.seat_class),
            SeatStatus::Available | SeatStatus::WaitlistOpen
        )));
        assert_eq!(with_waitlist.len(), 2);
        assert_eq!(with_waitlist[0].kind, CandidateKind::Waitlist);
        assert_eq!(with_waitlist[1].kind, CandidateKind::Reserve);
    }

    #[test]
    fn orders_by_departure_then_preference_rank() {
        let options = vec![
            train("305", at(11, 0), SeatStatus::Available, SeatStatus::Available),
            train("301", at(9, 0), SeatStatus::Available, SeatStatus::Available),
        ];
        let candidates = select(&options, &rules(SeatPreference::FirstFirst, false));
        let order: Vec<_> = candidates
            .iter()
            .map(|candidate| (candidate.option.train_id.as_str(), candidate.seat_class))
            .collect();
        assert_eq!(
            order,
            vec![
                ("301", SeatClass::First),
                ("301", SeatClass::Standard),
                ("305", SeatClass::First),
                ("305", SeatClass::Standard),
            ]
        );
    }

    #[test]
    fn only_preferences_exclude_other_class() {
        let options = vec![train(
            "301",
            at(9, 0),
            SeatStatus::SoldOut,
            SeatStatus::Available,
        )];
        assert!(select(&options, &rules(SeatPreference::StandardOnly, true)).is_empty());
        assert_eq!(
            select(&options, &rules(SeatPreference::FirstOnly, true)).len(),
            1
        );
    }

    #[test]
    fn train_filter_restricts_candidates() {
        let options = vec![
            train("301", at(9, 0), SeatStatus::Available, SeatStatus::SoldOut),
            train("303", at(10, 0), SeatStatus::Available, SeatStatus::SoldOut),
        ];
        let filter = vec!["303".to_string()];
        let rules = SelectionRules {
            train_filter: &filter,
            ..rules(SeatPreference::StandardFirst, false)
        };
        let candidates = select(&options, &rules);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].option.train_id, "303");
    }

    #[test]
    fn merge_deduplicates_and_sorts() {
        let early = train("301", at(9, 0), SeatStatus::SoldOut, SeatStatus::SoldOut);
        let late = train("305", at(12, 0), SeatStatus::SoldOut, SeatStatus::SoldOut);
        let mut stale = early.clone();
        stale.standard = SeatStatus::Available;

        let merged = merge_search_results(vec![vec![late.clone(), early.clone()], vec![stale, late]]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], early);
        assert_eq!(merged[1].train_id, "305");
    }
}
