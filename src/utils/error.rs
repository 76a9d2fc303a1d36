use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Wiki API returned error '{code}': {info}")]
    WikiApiError { code: String, info: String },

    #[error("Bot appears to be blocked or denied write access (code '{code}')")]
    BotBlockedError { code: String },

    #[error("Missing data: {message}")]
    MissingDataError { message: String },

    #[error("Runfile for '{category}' is unusable: {message}")]
    RunfileError { category: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Configuration,
    WikiApi,
    Data,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl BotError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BotError::HttpError(_) => ErrorCategory::Network,
            BotError::IoError(_) | BotError::RunfileError { .. } => ErrorCategory::Storage,
            BotError::SerializationError(_) | BotError::MissingDataError { .. } => {
                ErrorCategory::Data
            }
            BotError::ConfigError { .. }
            | BotError::ConfigValidationError { .. }
            | BotError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            BotError::WikiApiError { .. } | BotError::BotBlockedError { .. } => {
                ErrorCategory::WikiApi
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BotError::HttpError(_) => ErrorSeverity::Medium,
            BotError::WikiApiError { .. } => ErrorSeverity::Medium,
            BotError::SerializationError(_)
            | BotError::MissingDataError { .. }
            | BotError::RunfileError { .. } => ErrorSeverity::High,
            BotError::ConfigError { .. }
            | BotError::ConfigValidationError { .. }
            | BotError::InvalidConfigValueError { .. } => ErrorSeverity::High,
            BotError::IoError(_) | BotError::BotBlockedError { .. } => ErrorSeverity::Critical,
        }
    }

    /// 只有這類錯誤在下一次排程時有機會自行恢復
    pub fn is_retryable(&self) -> bool {
        matches!(self.severity(), ErrorSeverity::Medium)
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            BotError::HttpError(_) => "Check network connectivity and the configured api_url",
            BotError::IoError(_) => "Check file permissions for the runfile directory",
            BotError::SerializationError(_) => {
                "Inspect the on-wiki JSON state pages; they may have been hand-edited"
            }
            BotError::ConfigError { .. }
            | BotError::ConfigValidationError { .. }
            | BotError::InvalidConfigValueError { .. } => {
                "Fix the configuration file and run again"
            }
            BotError::WikiApiError { .. } => "Retry on the next scheduled run",
            BotError::BotBlockedError { .. } => {
                "Check the bot account for blocks before running again"
            }
            BotError::MissingDataError { .. } => "Verify the configured page IDs still exist",
            BotError::RunfileError { .. } => "Delete the corrupt runfile to restart from now",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Network => format!("Could not reach the wiki: {}", self),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::WikiApi => format!("The wiki rejected a request: {}", self),
            ErrorCategory::Data => format!("Unexpected data on the wiki: {}", self),
            ErrorCategory::Storage => format!("Local storage problem: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_is_critical() {
        let err = BotError::BotBlockedError {
            code: "blocked".to_string(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(err.category(), ErrorCategory::WikiApi);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_api_error_is_retryable() {
        let err = BotError::WikiApiError {
            code: "maxlag".to_string(),
            info: "Waiting for replicas".to_string(),
        };
        assert!(err.is_retryable());
        assert!(err.user_friendly_message().contains("maxlag"));
    }
}
