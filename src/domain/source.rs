use crate::domain::period::Period;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three upstream providers, in the order a run processes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    Eurostat,
    Census,
    Comtrade,
}

impl SourceId {
    pub const ALL: [SourceId; 3] = [SourceId::Eurostat, SourceId::Census, SourceId::Comtrade];

    pub fn name(&self) -> &'static str {
        match self {
            SourceId::Eurostat => "eurostat",
            SourceId::Census => "census",
            SourceId::Comtrade => "comtrade",
        }
    }

    pub fn group(&self) -> SourceGroup {
        match self {
            SourceId::Eurostat => SourceGroup::Eu,
            SourceId::Census => SourceGroup::Us,
            SourceId::Comtrade => SourceGroup::Un,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Selection unit for subset runs (`--only eu,un`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceGroup {
    Eu,
    Us,
    Un,
}

impl FromStr for SourceGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eu" | "eurostat" => Ok(SourceGroup::Eu),
            "us" | "census" => Ok(SourceGroup::Us),
            "un" | "comtrade" => Ok(SourceGroup::Un),
            other => Err(format!("unknown source group '{}' (expected eu, us or un)", other)),
        }
    }
}

/// Static facts about a provider that drive incremental range computation.
#[derive(Debug, Clone)]
pub struct SourceProfile {
    pub id: SourceId,
    pub reporters: Vec<String>,
    pub earliest_period: Period,
    pub publication_lag_months: u32,
}
