use crate::adapters::storage::TableStore;
use crate::core::classification::ClassificationMapper;
use crate::core::context::{RunContext, RunMode};
use crate::core::incremental::{backfill_range, next_fetch_range, RangePlan};
use crate::core::merge::{merge, MergePolicy};
use crate::core::normalize::normalize;
use crate::domain::model::{AggregateRow, BilateralRow, RawRecord};
use crate::domain::period::FetchRange;
use crate::domain::ports::{FetchedRange, SourceAdapter, Storage};
use crate::domain::source::{SourceGroup, SourceId};
use crate::utils::error::{EtlError, Result};
use serde::Serialize;
use std::time::Instant;

/// Which source groups a run touches (`--only`, `--skip`).
#[derive(Debug, Clone, Default)]
pub struct SourceSelection {
    pub only: Vec<SourceGroup>,
    pub skip: Vec<SourceGroup>,
}

impl SourceSelection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn includes(&self, source: SourceId) -> bool {
        let group = source.group();
        (self.only.is_empty() || self.only.contains(&group)) && !self.skip.contains(&group)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    Success { new_rows: usize },
    /// Nothing new was published since the last run.
    UpToDate,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: SourceId,
    pub outcome: SourceOutcome,
    /// Rows persisted for this source, including rows kept when the call
    /// budget ran out part way.
    pub persisted_rows: usize,
    pub unclassified: usize,
    pub calls: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    AllSucceeded,
    PartiallySucceeded,
    AllFailed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    pub fn status(&self) -> RunStatus {
        let failed = self
            .sources
            .iter()
            .filter(|r| matches!(r.outcome, SourceOutcome::Failed { .. }))
            .count();
        if failed == 0 {
            RunStatus::AllSucceeded
        } else if failed == self.sources.len() {
            RunStatus::AllFailed
        } else {
            RunStatus::PartiallySucceeded
        }
    }

    pub fn source(&self, id: SourceId) -> Option<&SourceReport> {
        self.sources.iter().find(|r| r.source == id)
    }

    pub fn total_new_rows(&self) -> usize {
        self.sources.iter().map(|r| r.persisted_rows).sum()
    }

    /// Run summary for the JSON log.
    pub fn summary(&self) -> serde_json::Value {
        let total_duration_ms: u64 = self.sources.iter().map(|r| r.duration_ms).sum();
        let total_calls: u32 = self.sources.iter().map(|r| r.calls).sum();
        let total_unclassified: usize = self.sources.iter().map(|r| r.unclassified).sum();

        serde_json::json!({
            "status": self.status(),
            "total_sources": self.sources.len(),
            "total_new_rows": self.total_new_rows(),
            "total_unclassified": total_unclassified,
            "total_calls": total_calls,
            "total_duration_ms": total_duration_ms,
            "sources": self.sources,
        })
    }
}

/// The ranges a run would request for one reporter, oldest first. Empty
/// when the reporter is up to date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedFetch {
    pub source: SourceId,
    pub reporter: String,
    pub ranges: Vec<(String, String)>,
}

/// Merged tables of one reporter, held until the whole source is done.
/// A table is only set when the merge changed it.
struct StagedReporter {
    reporter: String,
    aggregate: Option<Vec<AggregateRow>>,
    bilateral: Option<Vec<BilateralRow>>,
    aggregate_new: usize,
    bilateral_new: usize,
}

/// Tables of one reporter while its ranges are merged in.
struct ReporterTables {
    aggregate: Vec<AggregateRow>,
    bilateral: Vec<BilateralRow>,
    aggregate_new: usize,
    bilateral_new: usize,
    aggregate_changed: bool,
    bilateral_changed: bool,
    unclassified: usize,
}

impl ReporterTables {
    fn new(aggregate: Vec<AggregateRow>, bilateral: Vec<BilateralRow>) -> Self {
        Self {
            aggregate,
            bilateral,
            aggregate_new: 0,
            bilateral_new: 0,
            aggregate_changed: false,
            bilateral_changed: false,
            unclassified: 0,
        }
    }

    fn into_staged(self, reporter: &str) -> Option<StagedReporter> {
        if !self.aggregate_changed && !self.bilateral_changed {
            return None;
        }
        Some(StagedReporter {
            reporter: reporter.to_string(),
            aggregate: self.aggregate_changed.then_some(self.aggregate),
            bilateral: self.bilateral_changed.then_some(self.bilateral),
            aggregate_new: self.aggregate_new,
            bilateral_new: self.bilateral_new,
        })
    }
}

#[derive(Default)]
struct SourceProgress {
    staged: Vec<StagedReporter>,
    unclassified: usize,
}

/// Runs the source adapters one after another against the persisted
/// tables. A failing source never stops the ones after it.
pub struct Orchestrator<S: Storage> {
    adapters: Vec<Box<dyn SourceAdapter>>,
    store: TableStore<S>,
    mapper: ClassificationMapper,
}

impl<S: Storage> Orchestrator<S> {
    pub fn new(store: TableStore<S>) -> Self {
        Self {
            adapters: Vec::new(),
            store,
            mapper: ClassificationMapper::new(),
        }
    }

    pub fn add_adapter(&mut self, adapter: Box<dyn SourceAdapter>) {
        self.adapters.push(adapter);
        self.adapters.sort_by_key(|a| a.profile().id);
    }

    pub fn with_adapters(mut self, adapters: Vec<Box<dyn SourceAdapter>>) -> Self {
        for adapter in adapters {
            self.add_adapter(adapter);
        }
        self
    }

    /// Fetch ranges per reporter without calling any provider or writing.
    pub async fn plan(&self, ctx: &RunContext, selection: &SourceSelection) -> Result<Vec<PlannedFetch>> {
        let mut planned = Vec::new();
        for adapter in self.selected(selection) {
            let profile = adapter.profile();
            for reporter in &profile.reporters {
                let (_, _, plan) = self.load_reporter(adapter.as_ref(), ctx, reporter).await?;
                planned.push(PlannedFetch {
                    source: profile.id,
                    reporter: reporter.clone(),
                    ranges: plan
                        .ranges()
                        .map(|range| (range.start.to_string(), range.end.to_string()))
                        .collect(),
                });
            }
        }
        Ok(planned)
    }

    pub async fn run(&self, ctx: &mut RunContext, selection: &SourceSelection) -> RunReport {
        let mut report = RunReport::default();

        for adapter in self.selected(selection) {
            let id = adapter.profile().id;
            let started = Instant::now();
            let calls_before = ctx.calls_made(id);
            tracing::info!(source = id.name(), mode = ?ctx.mode, "source started");

            let mut progress = SourceProgress::default();
            let result = self.run_source(adapter.as_ref(), ctx, &mut progress).await;

            let (outcome, persisted_rows) = match result {
                Ok(()) => match self.commit(&progress.staged).await {
                    (0, None) => (SourceOutcome::UpToDate, 0),
                    (rows, None) => (SourceOutcome::Success { new_rows: rows }, rows),
                    (rows, Some(e)) => (self.failure(id, &e), rows),
                },
                Err(e @ EtlError::BudgetExceededError { .. }) => {
                    // everything fetched before the budget ran out is kept
                    let (kept, commit_err) = self.commit(&progress.staged).await;
                    if let Some(commit_err) = commit_err {
                        tracing::error!(source = id.name(), error = %commit_err, "cannot persist rows fetched before budget ran out");
                    }
                    (self.failure(id, &e), kept)
                }
                Err(e) => (self.failure(id, &e), 0),
            };

            let source_report = SourceReport {
                source: id,
                outcome,
                persisted_rows,
                unclassified: progress.unclassified,
                calls: ctx.calls_made(id).saturating_sub(calls_before),
                duration_ms: started.elapsed().as_millis() as u64,
            };
            tracing::info!(
                source = id.name(),
                outcome = ?source_report.outcome,
                unclassified = source_report.unclassified,
                calls = source_report.calls,
                duration_ms = source_report.duration_ms,
                "source finished"
            );
            report.sources.push(source_report);
        }

        report
    }

    fn selected<'a>(&'a self, selection: &'a SourceSelection) -> impl Iterator<Item = &'a Box<dyn SourceAdapter>> + 'a {
        self.adapters
            .iter()
            .filter(move |a| selection.includes(a.profile().id))
    }

    /// Both stored tables of a reporter and the ranges that bring both of
    /// them up to date.
    async fn load_reporter(
        &self,
        adapter: &dyn SourceAdapter,
        ctx: &RunContext,
        reporter: &str,
    ) -> Result<(Vec<AggregateRow>, Vec<BilateralRow>, RangePlan)> {
        let profile = adapter.profile();
        let aggregate = self.store.load_aggregate(reporter).await?;
        let bilateral = self.store.load_bilateral(reporter).await?;
        let plan = RangePlan::new(
            [
                next_fetch_range(&aggregate, reporter, ctx.mode, profile, ctx.reference_date),
                next_fetch_range(&bilateral, reporter, ctx.mode, profile, ctx.reference_date),
            ],
            [
                backfill_range(&aggregate, reporter, ctx.mode, profile, ctx.reference_date),
                backfill_range(&bilateral, reporter, ctx.mode, profile, ctx.reference_date),
            ],
        );
        Ok((aggregate, bilateral, plan))
    }

    async fn run_source(&self, adapter: &dyn SourceAdapter, ctx: &mut RunContext, progress: &mut SourceProgress) -> Result<()> {
        let id = adapter.profile().id;

        for reporter in &adapter.profile().reporters {
            let (aggregate, bilateral, plan) = self.load_reporter(adapter, ctx, reporter).await?;

            if plan.is_empty() {
                tracing::info!(source = id.name(), reporter = %reporter, "already current");
                continue;
            }

            let mut tables = ReporterTables::new(aggregate, bilateral);
            let fetched = self.fetch_plan(adapter, ctx, reporter, &plan, &mut tables).await;
            progress.unclassified += tables.unclassified;
            let interrupted = fetched?;

            if let Some(staged) = tables.into_staged(reporter) {
                progress.staged.push(staged);
            }
            if let Some(e) = interrupted {
                return Err(e);
            }
        }

        Ok(())
    }

    /// Fetches and merges every range of `plan`. Returns the budget error
    /// that stopped it early, if any; what was merged before stays in `tables`.
    async fn fetch_plan(
        &self,
        adapter: &dyn SourceAdapter,
        ctx: &mut RunContext,
        reporter: &str,
        plan: &RangePlan,
        tables: &mut ReporterTables,
    ) -> Result<Option<EtlError>> {
        let id = adapter.profile().id;
        let reporters = [reporter.to_string()];

        if let Some(backfill) = plan.backfill {
            let inserted_before = tables.aggregate_new + tables.bilateral_new;
            for year in backfill.start.year_chunks(backfill.end).into_iter().rev() {
                tracing::info!(source = id.name(), reporter = %reporter, range = %year, "backfilling");
                let fetched = adapter.fetch_range(ctx, &reporters, year.start, year.end).await?;
                if let Some(e) = fetched.interrupted {
                    // a partial year would leave a hole before the stored months
                    return Ok(Some(e));
                }
                self.absorb(id, reporter, ctx.mode, year, fetched.records, tables);
            }
            if tables.aggregate_new + tables.bilateral_new == inserted_before {
                // asked again on every run until earliest_period is moved up
                tracing::warn!(
                    source = id.name(),
                    reporter = %reporter,
                    range = %backfill,
                    "provider has no data before the stored months"
                );
            }
        }

        if let Some(forward) = plan.forward {
            tracing::info!(source = id.name(), reporter = %reporter, range = %forward, "fetching range");
            let fetched = adapter.fetch_range(ctx, &reporters, forward.start, forward.end).await?;
            let covered = covered_range(&fetched, reporter, forward);
            if let Some(covered) = covered {
                self.absorb(id, reporter, ctx.mode, covered, fetched.records, tables);
            }
            if let Some(e) = fetched.interrupted {
                return Ok(Some(e));
            }
        }

        Ok(None)
    }

    /// Normalizes fetched records and merges them into the reporter's tables.
    fn absorb(
        &self,
        id: SourceId,
        reporter: &str,
        mode: RunMode,
        range: FetchRange,
        records: Vec<RawRecord>,
        tables: &mut ReporterTables,
    ) {
        let mut batch = normalize(id, &self.mapper, records);
        tables.unclassified += batch.unclassified;
        batch.aggregate.retain(|r| r.reporter == reporter);
        batch.bilateral.retain(|r| r.reporter == reporter);

        let policy = match mode {
            RunMode::Incremental => MergePolicy::AppendNewPeriods,
            RunMode::Force => MergePolicy::ReplaceRange {
                reporter: reporter.to_string(),
                range,
            },
        };
        let aggregate = merge(std::mem::take(&mut tables.aggregate), batch.aggregate, &policy);
        let bilateral = merge(std::mem::take(&mut tables.bilateral), batch.bilateral, &policy);

        tracing::info!(
            source = id.name(),
            reporter = %reporter,
            range = %range,
            aggregate_inserted = aggregate.inserted,
            aggregate_skipped = aggregate.skipped,
            bilateral_inserted = bilateral.inserted,
            bilateral_skipped = bilateral.skipped,
            resubmissions = batch.resubmissions,
            "merged"
        );

        tables.aggregate_new += aggregate.inserted;
        tables.bilateral_new += bilateral.inserted;
        tables.aggregate_changed |= aggregate.changed();
        tables.bilateral_changed |= bilateral.changed();
        tables.aggregate = aggregate.rows;
        tables.bilateral = bilateral.rows;
    }

    /// Persists staged tables file by file. Returns the new rows of every
    /// file written and the error that stopped the commit, if any.
    async fn commit(&self, staged: &[StagedReporter]) -> (usize, Option<EtlError>) {
        let mut written = 0;
        for entry in staged {
            if let Some(rows) = &entry.aggregate {
                if let Err(e) = self.store.save_aggregate(&entry.reporter, rows).await {
                    return (written, Some(e));
                }
                written += entry.aggregate_new;
            }
            if let Some(rows) = &entry.bilateral {
                if let Err(e) = self.store.save_bilateral(&entry.reporter, rows).await {
                    return (written, Some(e));
                }
                written += entry.bilateral_new;
            }
        }
        (written, None)
    }

    fn failure(&self, source: SourceId, error: &EtlError) -> SourceOutcome {
        tracing::error!(
            source = source.name(),
            error = %error,
            category = ?error.category(),
            severity = ?error.severity(),
            suggestion = error.recovery_suggestion(),
            "source failed"
        );
        SourceOutcome::Failed {
            reason: error.user_friendly_message(),
        }
    }
}

/// The part of `requested` whose records can be merged: all of it, or up to
/// the last complete chunk when the fetch was interrupted.
fn covered_range(fetched: &FetchedRange, reporter: &str, requested: FetchRange) -> Option<FetchRange> {
    match fetched.interrupted {
        None => Some(requested),
        Some(_) => fetched
            .completed_through(reporter)
            .map(|through| FetchRange::new(requested.start, through.min(requested.end))),
    }
}
