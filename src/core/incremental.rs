use crate::core::context::RunMode;
use crate::domain::model::TableRow;
use crate::domain::period::{FetchRange, Period};
use crate::domain::source::SourceProfile;
use chrono::NaiveDate;

/// Latest period in `rows` for `reporter`.
pub fn last_period<R: TableRow>(rows: &[R], reporter: &str) -> Option<Period> {
    rows.iter()
        .filter(|r| r.reporter() == reporter)
        .map(|r| r.period())
        .max()
}

/// Oldest period in `rows` for `reporter`.
pub fn first_period<R: TableRow>(rows: &[R], reporter: &str) -> Option<Period> {
    rows.iter()
        .filter(|r| r.reporter() == reporter)
        .map(|r| r.period())
        .min()
}

/// Most recent month a provider has plausibly published by `reference_date`.
pub fn latest_published(reference_date: NaiveDate, lag_months: u32) -> Period {
    Period::from_date(reference_date).minus_months(lag_months)
}

/// Months to request for `reporter`. Incremental runs start one month after
/// the newest stored period (or at the provider's earliest period for an
/// empty table); force runs always start at the earliest period. The range
/// ends at the latest published month and is empty when there is nothing new.
pub fn next_fetch_range<R: TableRow>(
    existing: &[R],
    reporter: &str,
    mode: RunMode,
    profile: &SourceProfile,
    reference_date: NaiveDate,
) -> FetchRange {
    let end = latest_published(reference_date, profile.publication_lag_months);
    let start = match mode {
        RunMode::Force => profile.earliest_period,
        RunMode::Incremental => last_period(existing, reporter)
            .map(|last| last.succ().max(profile.earliest_period))
            .unwrap_or(profile.earliest_period),
    };
    FetchRange::new(start, end)
}

/// Months missing in front of the oldest stored period, e.g. after the
/// configured earliest period was moved back. Incremental runs only.
pub fn backfill_range<R: TableRow>(
    existing: &[R],
    reporter: &str,
    mode: RunMode,
    profile: &SourceProfile,
    reference_date: NaiveDate,
) -> Option<FetchRange> {
    if mode == RunMode::Force {
        return None;
    }
    let first = first_period(existing, reporter)?;
    let end = first
        .minus_months(1)
        .min(latest_published(reference_date, profile.publication_lag_months));
    let range = FetchRange::new(profile.earliest_period, end);
    (!range.is_empty()).then_some(range)
}

/// What to request for one reporter, covering both of its tables.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RangePlan {
    /// Older months to fill in, fetched newest year first so an interrupted
    /// run still leaves the stored months contiguous.
    pub backfill: Option<FetchRange>,
    /// Months after the stored data, fetched oldest first.
    pub forward: Option<FetchRange>,
}

impl RangePlan {
    /// Joins the per-table ranges. The earlier start wins so neither table
    /// is left behind; a backfill touching the forward range is folded in.
    pub fn new(forward: [FetchRange; 2], backfill: [Option<FetchRange>; 2]) -> Self {
        let forward = forward.into_iter().filter(|r| !r.is_empty()).reduce(span);
        let backfill = backfill.into_iter().flatten().reduce(span);

        match (backfill, forward) {
            (Some(back), Some(fwd)) if back.end.succ() >= fwd.start => Self {
                backfill: None,
                forward: Some(span(back, fwd)),
            },
            (backfill, forward) => Self { backfill, forward },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.backfill.is_none() && self.forward.is_none()
    }

    pub fn ranges(&self) -> impl Iterator<Item = FetchRange> + '_ {
        self.backfill.iter().chain(self.forward.iter()).copied()
    }
}

fn span(a: FetchRange, b: FetchRange) -> FetchRange {
    FetchRange::new(a.start.min(b.start), a.end.max(b.end))
}
