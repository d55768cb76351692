//! Configuration validation shared by all policy configs.

use thiserror::Error;

/// Errors produced by policy configuration validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A configuration field failed validation.
    #[error("invalid configuration: {message}")]
    Validation {
        /// What was wrong.
        message: String,
    },
}

impl ConfigError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Contract implemented by every policy configuration.
pub trait PolicyConfig {
    /// Check the configuration for internal consistency.
    fn validate(&self) -> ConfigResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display_names_the_problem() {
        let err = ConfigError::validation("max_permits must be greater than 0");
        assert_eq!(
            err.to_string(),
            "invalid configuration: max_permits must be greater than 0"
        );
    }
}
