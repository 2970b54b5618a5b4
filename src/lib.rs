pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliArgs;

pub use adapters::{build_adapters, LocalStorage, TableStore};
pub use config::EtlConfig;
pub use core::{Orchestrator, RunContext, RunMode, RunReport, RunStatus, SourceSelection};
pub use utils::error::{EtlError, Result};
