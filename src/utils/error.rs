use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpsError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CRM request failed with status {status}: {message}")]
    Crm { status: u16, message: String },

    #[error("CRM session expired")]
    SessionExpired,

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Workbook read error: {0}")]
    WorkbookRead(#[from] calamine::XlsxError),

    #[error("Workbook write error: {message}")]
    WorkbookWrite { message: String },

    #[error("Browser command failed: {0}")]
    Browser(#[from] fantoccini::error::CmdError),

    #[error("Browser session could not be started: {0}")]
    BrowserSession(#[from] fantoccini::error::NewSessionError),

    #[error("Timed out waiting for {what}")]
    Timeout { what: String },

    #[error("Element went stale: {what}")]
    StaleElement { what: String },

    #[error("Element not found: {what}")]
    ElementNotFound { what: String },

    #[error("SFTP error: {0}")]
    Sftp(#[from] ssh2::Error),

    #[error("Email error: {message}")]
    Email { message: String },

    #[error("Interrupted by user")]
    Interrupted,

    #[error("Batch stopped early ({outcome}): {summary}")]
    BatchStopped { outcome: String, summary: String },

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

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Crm,
    Browser,
    Data,
    Io,
    Configuration,
    Batch,
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// How a per-item failure inside a batch run is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    StaleElement,
    Other,
    Fatal,
}

impl FailureKind {
    pub fn is_fatal(self) -> bool {
        matches!(self, FailureKind::Fatal)
    }
}

impl OpsError {
    pub fn processing(message: impl Into<String>) -> Self {
        OpsError::ProcessingError {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        OpsError::ValidationError {
            message: message.into(),
        }
    }

    pub fn workbook(err: impl std::fmt::Display) -> Self {
        OpsError::WorkbookWrite {
            message: err.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            OpsError::ApiError(_) => ErrorCategory::Network,
            OpsError::Sftp(_) | OpsError::Email { .. } => ErrorCategory::Network,
            OpsError::Crm { .. } | OpsError::SessionExpired => ErrorCategory::Crm,
            OpsError::Browser(_)
            | OpsError::BrowserSession(_)
            | OpsError::Timeout { .. }
            | OpsError::StaleElement { .. }
            | OpsError::ElementNotFound { .. } => ErrorCategory::Browser,
            OpsError::CsvError(_)
            | OpsError::SerializationError(_)
            | OpsError::WorkbookRead(_)
            | OpsError::WorkbookWrite { .. }
            | OpsError::ProcessingError { .. }
            | OpsError::ValidationError { .. } => ErrorCategory::Data,
            OpsError::IoError(_) => ErrorCategory::Io,
            OpsError::ConfigError { .. }
            | OpsError::ConfigValidationError { .. }
            | OpsError::InvalidConfigValueError { .. }
            | OpsError::MissingConfigError { .. } => ErrorCategory::Configuration,
            OpsError::BatchStopped { .. } => ErrorCategory::Batch,
            OpsError::Interrupted => ErrorCategory::Interrupt,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Interrupt => ErrorSeverity::Low,
            ErrorCategory::Network | ErrorCategory::Browser => ErrorSeverity::Medium,
            ErrorCategory::Crm | ErrorCategory::Data | ErrorCategory::Io | ErrorCategory::Batch => {
                ErrorSeverity::High
            }
            ErrorCategory::Configuration => ErrorSeverity::Critical,
        }
    }

    /// Classification used by the batch runner.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            OpsError::Timeout { .. } => FailureKind::Timeout,
            OpsError::StaleElement { .. } => FailureKind::StaleElement,
            OpsError::Interrupted => FailureKind::Fatal,
            _ if self.category() == ErrorCategory::Configuration => FailureKind::Fatal,
            _ => FailureKind::Other,
        }
    }

    pub fn is_transient(&self) -> bool {
        !self.failure_kind().is_fatal()
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => "Check network access to the remote host and retry",
            ErrorCategory::Crm => {
                "Verify the CRM credentials and that the queried objects and fields exist"
            }
            ErrorCategory::Browser => {
                "Make sure the WebDriver server is running and the CRM page layout has not changed"
            }
            ErrorCategory::Data => "Inspect the input workbook or the CRM data for unexpected values",
            ErrorCategory::Io => "Check that the paths exist and are writable",
            ErrorCategory::Configuration => "Fix the configuration file and run again",
            ErrorCategory::Batch => {
                "Check the failed items in the log, fix their cause and run again"
            }
            ErrorCategory::Interrupt => "Re-run the command to resume the remaining items",
        }
    }

    /// Process exit code. An interrupt exits like SIGINT does.
    pub fn exit_code(&self) -> i32 {
        if matches!(self, OpsError::Interrupted) {
            return 130;
        }
        match self.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            OpsError::Crm { status, message } => {
                format!("The CRM rejected the request ({}): {}", status, message)
            }
            OpsError::Timeout { what } => format!("The page did not show {} in time", what),
            OpsError::Interrupted => "The run was stopped by the user".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OpsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_stale_are_transient() {
        let timeout = OpsError::Timeout {
            what: "save button".to_string(),
        };
        let stale = OpsError::StaleElement {
            what: "student row".to_string(),
        };
        assert_eq!(timeout.failure_kind(), FailureKind::Timeout);
        assert_eq!(stale.failure_kind(), FailureKind::StaleElement);
        assert!(timeout.is_transient());
        assert!(stale.is_transient());
    }

    #[test]
    fn interrupt_and_config_errors_are_fatal() {
        assert!(OpsError::Interrupted.failure_kind().is_fatal());
        let missing = OpsError::MissingConfigError {
            field: "crm.username".to_string(),
        };
        assert!(missing.failure_kind().is_fatal());
        assert_eq!(missing.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn stopped_and_interrupted_runs_exit_nonzero() {
        let stopped = OpsError::BatchStopped {
            outcome: "ErrorLimit".to_string(),
            summary: "3 attempted, 0 done".to_string(),
        };
        assert_eq!(stopped.category(), ErrorCategory::Batch);
        assert_eq!(stopped.exit_code(), 1);
        assert_eq!(OpsError::Interrupted.exit_code(), 130);
        assert_eq!(OpsError::processing("bad row").exit_code(), 1);
        assert_eq!(
            OpsError::MissingConfigError {
                field: "smtp".to_string()
            }
            .exit_code(),
            3
        );
    }

    #[test]
    fn unknown_processing_errors_count_as_other() {
        let err = OpsError::processing("student not in roster");
        assert_eq!(err.failure_kind(), FailureKind::Other);
        assert_eq!(err.category(), ErrorCategory::Data);
    }

    #[test]
    fn crm_error_message_mentions_status() {
        let err = OpsError::Crm {
            status: 400,
            message: "MALFORMED_QUERY".to_string(),
        };
        assert!(err.user_friendly_message().contains("400"));
        assert!(err.user_friendly_message().contains("MALFORMED_QUERY"));
    }
}
