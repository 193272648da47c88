use thiserror::Error;

/// Errors surfaced while loading and validating the app configuration.
///
/// A config error always halts startup: a production process list that
/// fails to parse must not run partially.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("app #{index} is missing required field `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("app #{index}: field `{field}` has the wrong type")]
    InvalidField { index: usize, field: &'static str },

    #[error("app `{app}`: environment value for `{key}` must be a string")]
    InvalidEnv { app: String, key: String },

    #[error("duplicate app name `{0}`")]
    DuplicateName(String),

    #[error("app #{index} must be a JSON object")]
    InvalidEntry { index: usize },

    #[error("configuration must be a JSON array of app declarations")]
    NotAnArray,

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Core error types for supervisor operations
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("app not found: {0}")]
    AppNotFound(String),

    #[error("launch failed: {0}")]
    LaunchFailed(String),

    #[error("process management error: {0}")]
    ProcessError(String),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("invalid restart policy: {0}")]
    InvalidPolicy(String),

    #[error("restart limit exceeded for app `{0}`")]
    RestartLimitExceeded(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl SupervisorError {
    pub fn launch_failed(message: impl Into<String>) -> Self {
        SupervisorError::LaunchFailed(message.into())
    }

    pub fn process_error(message: impl Into<String>) -> Self {
        SupervisorError::ProcessError(message.into())
    }

    /// Check if this error is worth another launch attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SupervisorError::LaunchFailed(_) | SupervisorError::ProcessError(_)
        )
    }

    /// Check if this error indicates a permanent failure
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SupervisorError::Configuration(_)
                | SupervisorError::InvalidPolicy(_)
                | SupervisorError::Cancelled
                | SupervisorError::RestartLimitExceeded(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SupervisorError::LaunchFailed("spawn denied".to_string());
        let display = format!("{error}");
        assert!(display.contains("launch failed"));

        let error = SupervisorError::RestartLimitExceeded("chat-backend".to_string());
        let display = format!("{error}");
        assert!(display.contains("chat-backend"));
    }

    #[test]
    fn test_error_categorization() {
        // Retryable errors
        assert!(SupervisorError::LaunchFailed("test".to_string()).is_retryable());
        assert!(SupervisorError::ProcessError("test".to_string()).is_retryable());

        // Permanent errors
        assert!(SupervisorError::Cancelled.is_permanent());
        assert!(SupervisorError::RestartLimitExceeded("a".to_string()).is_permanent());
        assert!(!SupervisorError::LaunchFailed("test".to_string()).is_permanent());
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::MissingField {
            index: 0,
            field: "script",
        };
        let display = format!("{error}");
        assert!(display.contains("script"));

        let error = ConfigError::InvalidEnv {
            app: "chat-backend".to_string(),
            key: "PORT".to_string(),
        };
        assert!(format!("{error}").contains("PORT"));
    }

    #[test]
    fn test_config_error_converts() {
        let config_error = ConfigError::DuplicateName("a".to_string());
        let error: SupervisorError = config_error.into();
        assert!(error.is_permanent());
    }
}
