// Adapters layer: concrete implementations for the three providers and local storage.

pub mod census;
pub mod comtrade;
pub mod eurostat;
pub mod storage;

pub use census::CensusAdapter;
pub use comtrade::ComtradeAdapter;
pub use eurostat::EurostatAdapter;
pub use storage::{LocalStorage, TableStore};

use crate::config::credentials::Credential;
use crate::config::toml_config::{EtlConfig, ResolvedSource};
use crate::core::http::RateLimitedClient;
use crate::domain::ports::SourceAdapter;
use crate::domain::source::SourceId;
use crate::utils::error::Result;
use serde_json::Value;

/// Builds the adapter of one source from its resolved settings. Credentials
/// are read from the environment here; a missing key only fails once the
/// adapter is asked to fetch.
pub fn build_adapter(config: &EtlConfig, settings: &ResolvedSource) -> Result<Box<dyn SourceAdapter>> {
    let client = RateLimitedClient::new(settings.id, config.timeout(), config.retry_policy(), settings.min_interval)?;
    let credential = || {
        let variable = settings.credential_env.as_deref().unwrap_or_default();
        Credential::from_env(variable)
    };

    let adapter: Box<dyn SourceAdapter> = match settings.id {
        SourceId::Eurostat => Box::new(EurostatAdapter::new(settings, client)),
        SourceId::Census => Box::new(CensusAdapter::new(settings, client, credential())),
        SourceId::Comtrade => Box::new(ComtradeAdapter::new(settings, client, credential())),
    };
    Ok(adapter)
}

/// Adapters of every enabled source, in processing order.
pub fn build_adapters(config: &EtlConfig) -> Result<Vec<Box<dyn SourceAdapter>>> {
    let mut adapters = Vec::new();
    for id in SourceId::ALL {
        let settings = config.source(id)?;
        if !settings.enabled {
            tracing::info!(source = id.name(), "source disabled in config");
            continue;
        }
        adapters.push(build_adapter(config, &settings)?);
    }
    Ok(adapters)
}

/// Text of a JSON scalar; numbers are rendered without quotes.
pub(crate) fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numeric value of a JSON number or numeric string.
pub(crate) fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

pub(crate) fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}
