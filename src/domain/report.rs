//! Per-run outcome summary.

use crate::domain::series::SeriesId;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// New bars were written.
    Updated { bars_written: usize },
    /// Provider had nothing further for this series.
    NoData,
    /// Nothing to do: fresh, fully backfilled and gap-free.
    UpToDate,
    /// The series step failed; it is retried next run.
    Failed { reason: String },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Updated { bars_written } => write!(f, "updated ({bars_written} bars)"),
            Outcome::NoData => f.write_str("no data"),
            Outcome::UpToDate => f.write_str("up to date"),
            Outcome::Failed { reason } => write!(f, "error: {reason}"),
        }
    }
}

/// Phase of the sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Discovering,
    Backfilling,
    InteriorGapFill,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Discovering => "discovering",
            Phase::Backfilling => "backfilling",
            Phase::InteriorGapFill => "interior-gap-fill",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SeriesReport {
    pub series: SeriesId,
    pub phase: Phase,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reports: Vec<SeriesReport>,
    pub fetch_calls: usize,
    pub bars_dropped: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome. A series reported in several phases keeps every
    /// report; `updated`, `errors` and friends count reports, not series.
    pub fn record(&mut self, series: &SeriesId, phase: Phase, outcome: Outcome) {
        self.reports.push(SeriesReport {
            series: series.clone(),
            phase,
            outcome,
        });
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Updated { .. }))
    }

    pub fn no_data(&self) -> usize {
        self.count(|o| matches!(o, Outcome::NoData))
    }

    pub fn up_to_date(&self) -> usize {
        self.count(|o| matches!(o, Outcome::UpToDate))
    }

    pub fn errors(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed { .. }))
    }

    pub fn bars_written(&self) -> usize {
        self.reports
            .iter()
            .map(|r| match r.outcome {
                Outcome::Updated { bars_written } => bars_written,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &SeriesReport> {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Failed { .. }))
    }

    pub fn outcomes_for<'a>(&'a self, series: &'a SeriesId) -> impl Iterator<Item = &'a Outcome> {
        self.reports
            .iter()
            .filter(move |r| &r.series == series)
            .map(|r| &r.outcome)
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn log_summary(&self, namespace: &str) {
        tracing::info!(
            namespace,
            series = self.reports.len(),
            updated = self.updated(),
            no_data = self.no_data(),
            up_to_date = self.up_to_date(),
            errors = self.errors(),
            bars_written = self.bars_written(),
            bars_dropped = self.bars_dropped,
            fetch_calls = self.fetch_calls,
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "sync run complete"
        );
    }
}
