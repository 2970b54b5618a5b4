use crate::core::http::RetryPolicy;
use crate::domain::period::Period;
use crate::domain::source::{SourceId, SourceProfile};
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range, validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const EUROSTAT_BASE_URL: &str =
    "https://ec.europa.eu/eurostat/api/comext/dissemination/sdmx/3.0/data/dataflow/ESTAT/ds-059331/1.0";
pub const CENSUS_BASE_URL: &str = "https://api.census.gov/data/timeseries/intltrade";
pub const COMTRADE_BASE_URL: &str = "https://comtradeapi.un.org/data/v1/get/C/M/HS";

/// Run configuration. Every key is optional; a missing file means all
/// defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub data_dir: Option<String>,
    pub http: HttpConfig,
    pub retry: RetryConfig,
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub eurostat: SourceConfig,
    pub census: SourceConfig,
    pub comtrade: SourceConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub enabled: Option<bool>,
    pub base_url: Option<String>,
    pub reporters: Option<Vec<String>>,
    pub earliest_period: Option<String>,
    pub publication_lag_months: Option<u32>,
    pub daily_call_limit: Option<u32>,
    pub min_interval_ms: Option<u64>,
    pub credential_env: Option<String>,
}

/// A source's settings with defaults filled in.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub id: SourceId,
    pub enabled: bool,
    pub base_url: String,
    pub reporters: Vec<String>,
    pub earliest_period: Period,
    pub publication_lag_months: u32,
    pub daily_call_limit: Option<u32>,
    pub min_interval: Duration,
    pub credential_env: Option<String>,
}

impl ResolvedSource {
    pub fn profile(&self) -> SourceProfile {
        SourceProfile {
            id: self.id,
            reporters: self.reporters.clone(),
            earliest_period: self.earliest_period,
            publication_lag_months: self.publication_lag_months,
        }
    }
}

struct SourceDefaults {
    base_url: &'static str,
    reporters: &'static [&'static str],
    earliest_period: &'static str,
    daily_call_limit: Option<u32>,
    min_interval_ms: u64,
    credential_env: Option<&'static str>,
}

impl SourceDefaults {
    fn for_source(id: SourceId) -> Self {
        match id {
            SourceId::Eurostat => Self {
                base_url: EUROSTAT_BASE_URL,
                reporters: &["DE", "ES", "FR", "IT"],
                earliest_period: "2002-01",
                daily_call_limit: None,
                min_interval_ms: 0,
                credential_env: None,
            },
            SourceId::Census => Self {
                base_url: CENSUS_BASE_URL,
                reporters: &["US"],
                earliest_period: "2010-01",
                daily_call_limit: None,
                min_interval_ms: 200,
                credential_env: Some("CENSUS_API_KEY"),
            },
            SourceId::Comtrade => Self {
                base_url: COMTRADE_BASE_URL,
                reporters: &["GB", "JP", "CA", "CN"],
                earliest_period: "2010-01",
                daily_call_limit: Some(500),
                min_interval_ms: 1000,
                credential_env: Some("COMTRADE_API_KEY"),
            },
        }
    }
}

impl EtlConfig {
    /// Loads the configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` references with environment values.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| EtlError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn data_dir(&self) -> &str {
        self.data_dir.as_deref().unwrap_or("./data")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_seconds.unwrap_or(120))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.retry.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: self
                .retry
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: self
                .retry
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        }
    }

    pub fn source(&self, id: SourceId) -> Result<ResolvedSource> {
        let raw = match id {
            SourceId::Eurostat => &self.sources.eurostat,
            SourceId::Census => &self.sources.census,
            SourceId::Comtrade => &self.sources.comtrade,
        };
        let defaults = SourceDefaults::for_source(id);

        let earliest_raw = raw.earliest_period.as_deref().unwrap_or(defaults.earliest_period);
        let earliest_period = earliest_raw
            .parse::<Period>()
            .map_err(|reason| EtlError::InvalidConfigValueError {
                field: format!("sources.{}.earliest_period", id),
                value: earliest_raw.to_string(),
                reason,
            })?;

        Ok(ResolvedSource {
            id,
            enabled: raw.enabled.unwrap_or(true),
            base_url: raw
                .base_url
                .clone()
                .unwrap_or_else(|| defaults.base_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            reporters: raw
                .reporters
                .clone()
                .unwrap_or_else(|| defaults.reporters.iter().map(|r| r.to_string()).collect()),
            earliest_period,
            publication_lag_months: raw.publication_lag_months.unwrap_or(2),
            daily_call_limit: raw.daily_call_limit.or(defaults.daily_call_limit),
            min_interval: Duration::from_millis(raw.min_interval_ms.unwrap_or(defaults.min_interval_ms)),
            credential_env: raw
                .credential_env
                .clone()
                .or_else(|| defaults.credential_env.map(str::to_string)),
        })
    }

    pub fn validate_config(&self) -> Result<()> {
        validate_path("data_dir", self.data_dir())?;
        validate_positive_number("http.timeout_seconds", self.timeout().as_secs(), 1)?;
        validate_positive_number("retry.max_attempts", self.retry_policy().max_attempts as u64, 1)?;

        for id in SourceId::ALL {
            let source = self.source(id)?;
            validate_url(&format!("sources.{}.base_url", id), &source.base_url)?;
            validate_range(
                &format!("sources.{}.publication_lag_months", id),
                source.publication_lag_months,
                0,
                24,
            )?;
            if source.reporters.is_empty() {
                return Err(EtlError::InvalidConfigValueError {
                    field: format!("sources.{}.reporters", id),
                    value: String::new(),
                    reason: "at least one reporter is required".to_string(),
                });
            }
            for reporter in &source.reporters {
                validate_non_empty_string(&format!("sources.{}.reporters", id), reporter)?;
            }
            if let Some(env) = &source.credential_env {
                validate_non_empty_string(&format!("sources.{}.credential_env", id), env)?;
            }
        }

        Ok(())
    }
}

impl Validate for EtlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_resolves_to_builtin_defaults() {
        let config = EtlConfig::from_toml_str("").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.data_dir(), "./data");

        let comtrade = config.source(SourceId::Comtrade).unwrap();
        assert_eq!(comtrade.reporters, vec!["GB", "JP", "CA", "CN"]);
        assert_eq!(comtrade.daily_call_limit, Some(500));
        assert_eq!(comtrade.credential_env.as_deref(), Some("COMTRADE_API_KEY"));

        let eurostat = config.source(SourceId::Eurostat).unwrap();
        assert_eq!(eurostat.earliest_period.to_string(), "2002-01");
        assert!(eurostat.credential_env.is_none());
    }

    #[test]
    fn test_partial_source_section_keeps_other_defaults() {
        let toml_content = r#"
data_dir = "/var/lib/trade"

[retry]
max_attempts = 2

[sources.census]
publication_lag_months = 3
base_url = "http://localhost:9000/intltrade/"
"#;
        let config = EtlConfig::from_toml_str(toml_content).unwrap();
        let census = config.source(SourceId::Census).unwrap();

        assert_eq!(census.publication_lag_months, 3);
        assert_eq!(census.base_url, "http://localhost:9000/intltrade");
        assert_eq!(census.reporters, vec!["US"]);
        assert_eq!(census.earliest_period.to_string(), "2010-01");
        assert_eq!(config.retry_policy().max_attempts, 2);
        assert_eq!(config.data_dir(), "/var/lib/trade");
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("TRADE_ETL_TEST_DATA_DIR", "/tmp/trade-data");

        let config = EtlConfig::from_toml_str(r#"data_dir = "${TRADE_ETL_TEST_DATA_DIR}""#).unwrap();
        assert_eq!(config.data_dir(), "/tmp/trade-data");

        std::env::remove_var("TRADE_ETL_TEST_DATA_DIR");
    }

    #[test]
    fn test_config_validation() {
        let config = EtlConfig::from_toml_str(
            r#"
[sources.eurostat]
base_url = "invalid-url"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());

        let config = EtlConfig::from_toml_str(
            r#"
[sources.comtrade]
earliest_period = "sometime"
"#,
        )
        .unwrap();
        assert!(config.source(SourceId::Comtrade).is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[sources.comtrade]\nreporters = [\"JP\"]\ndaily_call_limit = 100\n")
            .unwrap();

        let config = EtlConfig::from_file(temp_file.path()).unwrap();
        let comtrade = config.source(SourceId::Comtrade).unwrap();
        assert_eq!(comtrade.reporters, vec!["JP"]);
        assert_eq!(comtrade.daily_call_limit, Some(100));
    }
}
