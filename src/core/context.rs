use crate::domain::period::Period;
use crate::domain::source::SourceId;
use crate::utils::error::{EtlError, Result};
use chrono::NaiveDate;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Incremental,
    Force,
}

/// Remaining provider calls for this run. Every attempt counts, including
/// failed ones and retries.
#[derive(Debug, Clone)]
pub struct CallBudget {
    limit: Option<u32>,
    used: u32,
}

impl CallBudget {
    pub fn limited(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            used: 0,
        }
    }

    pub fn unlimited() -> Self {
        Self {
            limit: None,
            used: 0,
        }
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    /// Claims one call, or fails without claiming when the cap is reached.
    pub fn try_consume(&mut self, source: SourceId) -> Result<()> {
        if let Some(limit) = self.limit {
            if self.used >= limit {
                return Err(EtlError::BudgetExceededError {
                    source_name: source.name().to_string(),
                    limit,
                });
            }
        }
        self.used += 1;
        Ok(())
    }
}

/// Per-run state handed to adapters: the mode, the reference date used for
/// publication-lag arithmetic and the per-provider call budgets.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub mode: RunMode,
    pub reference_date: NaiveDate,
    budgets: HashMap<SourceId, CallBudget>,
}

impl RunContext {
    pub fn new(mode: RunMode, reference_date: NaiveDate) -> Self {
        Self {
            mode,
            reference_date,
            budgets: HashMap::new(),
        }
    }

    pub fn with_budget(mut self, source: SourceId, budget: CallBudget) -> Self {
        self.budgets.insert(source, budget);
        self
    }

    pub fn reference_period(&self) -> Period {
        Period::from_date(self.reference_date)
    }

    pub fn budget_mut(&mut self, source: SourceId) -> &mut CallBudget {
        self.budgets.entry(source).or_insert_with(CallBudget::unlimited)
    }

    pub fn calls_made(&self, source: SourceId) -> u32 {
        self.budgets.get(&source).map(|b| b.used()).unwrap_or(0)
    }
}
