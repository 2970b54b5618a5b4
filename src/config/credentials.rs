use crate::domain::source::SourceId;
use crate::utils::error::{EtlError, Result};

/// An API key looked up by environment variable name. The value is never
/// printed by `Debug`.
#[derive(Clone)]
pub struct Credential {
    variable: String,
    value: Option<String>,
}

impl Credential {
    pub fn from_env(variable: &str) -> Self {
        let value = std::env::var(variable).ok().filter(|v| !v.trim().is_empty());
        Self {
            variable: variable.to_string(),
            value,
        }
    }

    pub fn with_value(variable: &str, value: Option<&str>) -> Self {
        Self {
            variable: variable.to_string(),
            value: value.map(str::to_string),
        }
    }

    /// The key, or `MissingCredentialError` naming the variable.
    pub fn require(&self, source: SourceId) -> Result<&str> {
        self.value.as_deref().ok_or_else(|| EtlError::MissingCredentialError {
            source_name: source.name().to_string(),
            variable: self.variable.clone(),
        })
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("variable", &self.variable)
            .field("present", &self.value.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credential_names_the_variable() {
        let credential = Credential::with_value("CENSUS_API_KEY", None);
        let err = credential.require(SourceId::Census).unwrap_err();
        match err {
            EtlError::MissingCredentialError { variable, .. } => assert_eq!(variable, "CENSUS_API_KEY"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_debug_hides_the_key() {
        let credential = Credential::with_value("COMTRADE_API_KEY", Some("s3cr3t"));
        let printed = format!("{:?}", credential);
        assert!(!printed.contains("s3cr3t"));
        assert_eq!(credential.require(SourceId::Comtrade).unwrap(), "s3cr3t");
    }

    #[test]
    fn test_blank_env_value_counts_as_missing() {
        std::env::set_var("TRADE_ETL_TEST_BLANK_KEY", "   ");
        assert!(Credential::from_env("TRADE_ETL_TEST_BLANK_KEY").require(SourceId::Census).is_err());
        std::env::remove_var("TRADE_ETL_TEST_BLANK_KEY");
    }
}
