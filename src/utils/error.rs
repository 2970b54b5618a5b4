use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Transient fetch error from {source_name}: {message}")]
    TransientFetchError {
        source_name: String,
        message: String,
    },

    #[error("Fatal fetch error from {source_name}: {message}")]
    FatalFetchError {
        source_name: String,
        message: String,
    },

    #[error("Call budget exhausted for {source_name} ({limit} calls per run)")]
    BudgetExceededError { source_name: String, limit: u32 },

    #[error("Schema mismatch in {source_name} response: {details}")]
    SchemaMismatchError {
        source_name: String,
        details: String,
    },

    #[error("Missing credential for {source_name}: environment variable {variable} is not set")]
    MissingCredentialError {
        source_name: String,
        variable: String,
    },

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Quota,
    Credential,
    Schema,
    Storage,
    Configuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn transient(source_name: &str, message: impl Into<String>) -> Self {
        Self::TransientFetchError {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }

    pub fn fatal(source_name: &str, message: impl Into<String>) -> Self {
        Self::FatalFetchError {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }

    pub fn schema(source_name: &str, details: impl Into<String>) -> Self {
        Self::SchemaMismatchError {
            source_name: source_name.to_string(),
            details: details.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TransientFetchError { .. } | Self::FatalFetchError { .. } => {
                ErrorCategory::Network
            }
            Self::BudgetExceededError { .. } => ErrorCategory::Quota,
            Self::MissingCredentialError { .. } => ErrorCategory::Credential,
            Self::SchemaMismatchError { .. } => ErrorCategory::Schema,
            Self::CsvError(_) | Self::IoError(_) => ErrorCategory::Storage,
            Self::ConfigError { .. } | Self::InvalidConfigValueError { .. } => {
                ErrorCategory::Configuration
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::BudgetExceededError { .. } => ErrorSeverity::Low,
            Self::TransientFetchError { .. } => ErrorSeverity::Medium,
            Self::FatalFetchError { .. }
            | Self::MissingCredentialError { .. }
            | Self::SchemaMismatchError { .. } => ErrorSeverity::High,
            Self::CsvError(_)
            | Self::IoError(_)
            | Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. } => ErrorSeverity::Critical,
        }
    }

    /// Only transient errors are worth another attempt inside the same run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientFetchError { .. })
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::TransientFetchError { .. } => {
                "The provider was unreachable or overloaded; run again later"
            }
            Self::FatalFetchError { .. } => {
                "Check the API key and the configured endpoint for this source"
            }
            Self::BudgetExceededError { .. } => {
                "The daily call cap was reached; the next run continues where this one stopped"
            }
            Self::SchemaMismatchError { .. } => {
                "The provider changed its response format; the adapter needs updating"
            }
            Self::MissingCredentialError { .. } => {
                "Export the API key in the named environment variable"
            }
            Self::CsvError(_) | Self::IoError(_) => {
                "Check that the data directory exists and is writable"
            }
            Self::ConfigError { .. } | Self::InvalidConfigValueError { .. } => {
                "Fix the configuration file and retry"
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::MissingCredentialError {
                source_name,
                variable,
            } => format!("{} needs an API key in ${}", source_name, variable),
            Self::BudgetExceededError { source_name, .. } => {
                format!("{} call budget exhausted for today", source_name)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(EtlError::transient("census", "timeout").is_retryable());
        assert!(!EtlError::fatal("census", "401").is_retryable());
        assert!(!EtlError::schema("census", "no header row").is_retryable());
        assert!(!EtlError::BudgetExceededError {
            source_name: "comtrade".to_string(),
            limit: 500
        }
        .is_retryable());
    }

    #[test]
    fn test_categories_and_severity() {
        let err = EtlError::MissingCredentialError {
            source_name: "comtrade".to_string(),
            variable: "COMTRADE_API_KEY".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Credential);
        assert_eq!(err.severity(), ErrorSeverity::High);
        assert!(err.user_friendly_message().contains("$COMTRADE_API_KEY"));

        let err = EtlError::ConfigError {
            message: "bad".to_string(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Critical);
    }
}
