use crate::core::context::RunContext;
use crate::domain::model::RawRecord;
use crate::domain::period::Period;
use crate::domain::source::SourceProfile;
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    /// Whole file contents, or `None` when the file does not exist yet.
    fn read_file(
        &self,
        path: &str,
    ) -> impl std::future::Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Replaces the file in one step; readers see either the old or the new
    /// contents, never a partial write.
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Records gathered by one `fetch_range` call.
///
/// Adapters fetch in chunks (a year, a month) in ascending order and only
/// add a chunk once every request for it has succeeded. When the call
/// budget runs out, `interrupted` carries the error and `records` holds the
/// chunks completed before it.
#[derive(Debug, Default)]
pub struct FetchedRange {
    pub records: Vec<RawRecord>,
    pub interrupted: Option<EtlError>,
    completed: Vec<(String, Period)>,
}

impl FetchedRange {
    /// Adds the records of a chunk of `reporter` that is complete up to `through`.
    pub fn push_chunk(&mut self, reporter: &str, through: Period, records: Vec<RawRecord>) {
        self.records.extend(records);
        match self.completed.iter_mut().find(|(r, _)| r == reporter) {
            Some((_, last)) => *last = (*last).max(through),
            None => self.completed.push((reporter.to_string(), through)),
        }
    }

    /// Last month fetched in full for `reporter`.
    pub fn completed_through(&self, reporter: &str) -> Option<Period> {
        self.completed
            .iter()
            .find(|(r, _)| r == reporter)
            .map(|(_, last)| *last)
    }

    /// Ends the fetch at `error`. An exhausted budget keeps the completed
    /// chunks; any other error is returned and they are dropped.
    pub fn stop(mut self, error: EtlError) -> Result<Self> {
        match error {
            EtlError::BudgetExceededError { .. } => {
                tracing::warn!(
                    error = %error,
                    records = self.records.len(),
                    "call budget ran out, keeping completed chunks"
                );
                self.interrupted = Some(error);
                Ok(self)
            }
            other => Err(other),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn profile(&self) -> &SourceProfile;

    /// Raw observations for `reporters` over `[start, end]`. Returns an empty
    /// result without touching the network when `start > end`.
    async fn fetch_range(
        &self,
        ctx: &mut RunContext,
        reporters: &[String],
        start: Period,
        end: Period,
    ) -> Result<FetchedRange>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Currency, Flow};

    fn p(s: &str) -> Period {
        s.parse().unwrap()
    }

    fn budget_error() -> EtlError {
        EtlError::BudgetExceededError {
            source_name: "comtrade".to_string(),
            limit: 3,
        }
    }

    #[test]
    fn test_budget_stop_keeps_completed_chunks() {
        let mut fetched = FetchedRange::default();
        let record = RawRecord::world(p("2023-03"), "JP", "27", Flow::Export, 1.0, Currency::Usd);
        fetched.push_chunk("JP", p("2023-12"), vec![record]);

        let fetched = fetched.stop(budget_error()).unwrap();
        assert_eq!(fetched.records.len(), 1);
        assert_eq!(fetched.completed_through("JP"), Some(p("2023-12")));
        assert_eq!(fetched.completed_through("GB"), None);
        assert!(matches!(fetched.interrupted, Some(EtlError::BudgetExceededError { .. })));
    }

    #[test]
    fn test_other_errors_drop_the_partial_result() {
        let mut fetched = FetchedRange::default();
        fetched.push_chunk("DE", p("2024-01"), Vec::new());
        let err = fetched.stop(EtlError::schema("eurostat", "no 'id'")).unwrap_err();
        assert!(matches!(err, EtlError::SchemaMismatchError { .. }));
    }
}
