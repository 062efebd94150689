//! Run records, scan windows and registry query filters.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::errors::WardenError;
use super::ids::{FlowId, RunId};
use super::state::RunState;

/// A run as the registry reports it.
///
/// The watchdog only ever reads these fields; no ordering between
/// `scheduled_start_time` and `actual_start_time` is assumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub flow_id: FlowId,

    #[serde(default)]
    pub name: String,

    pub state: RunState,

    /// Expected start. Only absent before the run has been scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_start_time: Option<DateTime<Utc>>,

    /// Null until the run begins executing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_start_time: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Read the timestamp a filter on `field` compares against.
    pub fn time_of(&self, field: TimeField) -> Option<DateTime<Utc>> {
        match field {
            TimeField::ExpectedStart => self.scheduled_start_time,
            TimeField::ActualStart => self.actual_start_time,
        }
    }
}

/// Which timestamp of a run a query cutoff applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeField {
    ExpectedStart,
    ActualStart,
}

/// The two classes of runs the watchdog reaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    /// Still SCHEDULED, expected start too far in the past.
    Stale,
    /// RUNNING, actual start too far in the past.
    LongRunning,
}

impl ScanKind {
    pub fn state(self) -> RunState {
        match self {
            ScanKind::Stale => RunState::Scheduled,
            ScanKind::LongRunning => RunState::Running,
        }
    }

    pub fn time_field(self) -> TimeField {
        match self {
            ScanKind::Stale => TimeField::ExpectedStart,
            ScanKind::LongRunning => TimeField::ActualStart,
        }
    }

    /// Reason string handed to the canceller for runs found by this scan.
    pub fn cancel_reason(self, threshold_hours: f64) -> String {
        match self {
            ScanKind::Stale => {
                format!("scheduled run did not start within {threshold_hours} hours")
            }
            ScanKind::LongRunning => {
                format!("run exceeded the {threshold_hours} hour duration budget")
            }
        }
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanKind::Stale => f.write_str("stale"),
            ScanKind::LongRunning => f.write_str("long_running"),
        }
    }
}

/// Upper bound for a threshold (100 years). Keeps `now - threshold` in range.
pub const MAX_THRESHOLD_HOURS: f64 = 100.0 * 365.0 * 24.0;

/// A scan kind together with its cutoff in hours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdWindow {
    pub kind: ScanKind,
    pub threshold_hours: f64,
}

impl ThresholdWindow {
    pub fn new(kind: ScanKind, threshold_hours: f64) -> Result<Self, WardenError> {
        if !threshold_hours.is_finite()
            || threshold_hours <= 0.0
            || threshold_hours > MAX_THRESHOLD_HOURS
        {
            return Err(WardenError::InvalidThreshold {
                kind,
                hours: threshold_hours,
            });
        }
        Ok(Self {
            kind,
            threshold_hours,
        })
    }

    pub fn threshold(&self) -> Duration {
        hours_to_duration(self.threshold_hours)
    }

    /// Absolute cutoff: runs whose relevant time is strictly before it match.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.threshold()
    }

    /// Registry filter for this window evaluated at `now`.
    pub fn filter(&self, now: DateTime<Utc>) -> RunFilter {
        RunFilter {
            states: BTreeSet::from([self.kind.state()]),
            time_field: self.kind.time_field(),
            before: self.cutoff(now),
        }
    }
}

/// Hours as a microsecond-precise duration (whole hours convert exactly).
/// Clamped to `0..=MAX_THRESHOLD_HOURS`; NaN maps to zero.
pub fn hours_to_duration(hours: f64) -> Duration {
    let hours = if hours.is_nan() {
        0.0
    } else {
        hours.clamp(0.0, MAX_THRESHOLD_HOURS)
    };
    Duration::microseconds((hours * 3_600_000_000.0).round() as i64)
}

/// Query filter accepted by `RunRegistry::query_runs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFilter {
    states: BTreeSet<RunState>,
    time_field: TimeField,
    before: DateTime<Utc>,
}

impl RunFilter {
    pub fn new(
        states: impl IntoIterator<Item = RunState>,
        time_field: TimeField,
        before: DateTime<Utc>,
    ) -> Result<Self, WardenError> {
        let states: BTreeSet<RunState> = states.into_iter().collect();
        if states.is_empty() {
            return Err(WardenError::EmptyStateFilter);
        }
        Ok(Self {
            states,
            time_field,
            before,
        })
    }

    pub fn states(&self) -> &BTreeSet<RunState> {
        &self.states
    }

    pub fn time_field(&self) -> TimeField {
        self.time_field
    }

    pub fn before(&self) -> DateTime<Utc> {
        self.before
    }

    /// Does `record` satisfy this filter? (strict `<` on the cutoff)
    pub fn matches(&self, record: &RunRecord) -> bool {
        self.states.contains(&record.state)
            && record
                .time_of(self.time_field)
                .is_some_and(|t| t < self.before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn record(state: RunState, scheduled: Option<DateTime<Utc>>) -> RunRecord {
        RunRecord {
            id: RunId::from_ulid(Ulid::new()),
            flow_id: FlowId::from_ulid(Ulid::new()),
            name: "nightly-load".to_string(),
            state,
            scheduled_start_time: scheduled,
            actual_start_time: None,
        }
    }

    #[test]
    fn empty_state_filter_is_rejected() {
        let now = Utc::now();
        let err = RunFilter::new([], TimeField::ExpectedStart, now).unwrap_err();
        assert!(matches!(err, WardenError::EmptyStateFilter));
    }

    #[test]
    fn threshold_must_be_positive_and_finite() {
        assert!(ThresholdWindow::new(ScanKind::Stale, 0.0).is_err());
        assert!(ThresholdWindow::new(ScanKind::Stale, -1.0).is_err());
        assert!(ThresholdWindow::new(ScanKind::LongRunning, f64::NAN).is_err());
        assert!(ThresholdWindow::new(ScanKind::LongRunning, 0.5).is_ok());
    }

    #[test]
    fn threshold_is_bounded_above() {
        assert!(ThresholdWindow::new(ScanKind::Stale, MAX_THRESHOLD_HOURS).is_ok());
        assert!(ThresholdWindow::new(ScanKind::Stale, MAX_THRESHOLD_HOURS + 1.0).is_err());
        assert!(ThresholdWindow::new(ScanKind::Stale, 1e10).is_err());
        assert!(ThresholdWindow::new(ScanKind::Stale, f64::INFINITY).is_err());
    }

    #[test]
    fn largest_threshold_cutoff_stays_in_range() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let window = ThresholdWindow::new(ScanKind::Stale, MAX_THRESHOLD_HOURS).unwrap();
        assert!(window.cutoff(now) < now);

        // fields are public; out-of-range values still convert without panicking
        let forged = ThresholdWindow {
            kind: ScanKind::Stale,
            threshold_hours: 1e10,
        };
        assert_eq!(forged.threshold(), window.threshold());
    }

    #[test]
    fn window_filter_uses_kind_state_and_field() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let stale = ThresholdWindow::new(ScanKind::Stale, 12.0).unwrap().filter(now);
        assert_eq!(stale.states(), &BTreeSet::from([RunState::Scheduled]));
        assert_eq!(stale.time_field(), TimeField::ExpectedStart);
        assert_eq!(stale.before(), Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());

        let long = ThresholdWindow::new(ScanKind::LongRunning, 1.5).unwrap().filter(now);
        assert_eq!(long.states(), &BTreeSet::from([RunState::Running]));
        assert_eq!(long.time_field(), TimeField::ActualStart);
        assert_eq!(long.before(), Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap());
    }

    #[test]
    fn cutoff_comparison_is_strict() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let filter = ThresholdWindow::new(ScanKind::Stale, 12.0).unwrap().filter(now);

        let exactly = record(RunState::Scheduled, Some(now - Duration::hours(12)));
        let older = record(
            RunState::Scheduled,
            Some(now - Duration::hours(12) - Duration::microseconds(1)),
        );
        assert!(!filter.matches(&exactly));
        assert!(filter.matches(&older));
    }

    #[test]
    fn missing_time_or_wrong_state_never_matches() {
        let now = Utc::now();
        let filter = ThresholdWindow::new(ScanKind::Stale, 1.0).unwrap().filter(now);

        assert!(!filter.matches(&record(RunState::Scheduled, None)));
        assert!(!filter.matches(&record(RunState::Running, Some(now - Duration::hours(5)))));
    }
}
