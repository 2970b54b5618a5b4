pub mod classification;
pub mod context;
pub mod dedup;
pub mod http;
pub mod incremental;
pub mod merge;
pub mod normalize;
pub mod orchestrator;

pub use crate::domain::ports::{SourceAdapter, Storage};
pub use crate::utils::error::Result;
pub use context::{CallBudget, RunContext, RunMode};
pub use orchestrator::{Orchestrator, RunReport, RunStatus, SourceOutcome, SourceSelection};
