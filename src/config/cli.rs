use crate::core::context::RunMode;
use crate::domain::source::SourceGroup;
use crate::utils::error::{EtlError, Result};
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "trade-etl")]
#[command(about = "Incremental trade-balance ETL for Eurostat, US Census and UN Comtrade")]
pub struct CliArgs {
    /// Path to TOML configuration file (defaults apply when absent)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Override the data directory from the config
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Refetch the full history and replace stored rows
    #[arg(long)]
    pub force: bool,

    /// Only run these source groups (eu, us, un), comma separated
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Skip these source groups (eu, us, un), comma separated
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Show the fetch ranges that would be requested without calling any API
    #[arg(long)]
    pub dry_run: bool,

    /// Emit JSON log lines instead of compact text
    #[arg(long)]
    pub json_logs: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl CliArgs {
    pub fn mode(&self) -> RunMode {
        if self.force {
            RunMode::Force
        } else {
            RunMode::Incremental
        }
    }

    pub fn only_groups(&self) -> Result<Vec<SourceGroup>> {
        parse_groups("--only", &self.only)
    }

    pub fn skip_groups(&self) -> Result<Vec<SourceGroup>> {
        parse_groups("--skip", &self.skip)
    }
}

fn parse_groups(flag: &str, raw: &[String]) -> Result<Vec<SourceGroup>> {
    raw.iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.parse::<SourceGroup>().map_err(|reason| EtlError::InvalidConfigValueError {
                field: flag.to_string(),
                value: s.clone(),
                reason,
            })
        })
        .collect()
}
