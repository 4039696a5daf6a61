//! Error types for the deployment pipeline.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for deployment operations.
pub type DeployResult<T> = Result<T, DeployError>;

/// Errors that can occur while processing a blueprint.
#[derive(Debug, Error)]
pub enum DeployError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration and reference errors (never retried)
    // ─────────────────────────────────────────────────────────────────────────
    /// Blueprint configuration is malformed or rejected by the service schema.
    #[error("invalid blueprint configuration: {0}")]
    Validation(String),

    /// A referenced entity (remote, blueprint) does not exist.
    #[error("missing reference: {0}")]
    Reference(String),

    /// Repository host is not on the supported-provider list.
    #[error("unsupported source provider: {0}")]
    UnsupportedProvider(String),

    /// Runtime name has no version-management backend.
    #[error("unsupported runtime: {0}")]
    UnsupportedRuntime(String),

    /// Failed to load or parse service configuration.
    #[error("configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Command execution errors
    // ─────────────────────────────────────────────────────────────────────────
    /// An external command exited non-zero.
    #[error("command failed: {command}: {stderr}")]
    Execution {
        /// The command that failed (tokens redacted).
        command: String,
        /// Captured standard error output.
        stderr: String,
    },

    /// An external command exceeded its allotted duration.
    #[error("command timed out after {limit:?}: {command}")]
    Timeout {
        /// The command that timed out.
        command: String,
        /// The configured timeout.
        limit: Duration,
    },

    /// Runtime install or pin step failed.
    #[error("failed to set up {runtime} {version}: {stderr}")]
    RuntimeSetup {
        /// Logical runtime name.
        runtime: String,
        /// Requested version.
        version: String,
        /// Captured standard error output.
        stderr: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Reverse-proxy configuration errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Site directory creation, temp-file write, or atomic rename failed.
    #[error("failed to install proxy configuration: {0}")]
    ConfigInstall(String),

    /// The proxy validator rejected the merged configuration.
    #[error("proxy configuration rejected: {0}")]
    ConfigValidation(String),

    /// Rolling back a rejected site file failed. Operator intervention is
    /// required: the on-disk state can no longer be trusted.
    #[error("proxy rollback failed, manual intervention required: {0}")]
    RollbackFailure(String),

    /// The live proxy process refused to apply a valid configuration.
    #[error("proxy reload failed: {0}")]
    ReloadFailed(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Store and queue errors
    // ─────────────────────────────────────────────────────────────────────────
    /// A status update would move a blueprint backwards.
    #[error("invalid status transition: cannot move from {from} to {to}")]
    InvalidStatusTransition {
        /// Current status.
        from: &'static str,
        /// Attempted target status.
        to: &'static str,
    },

    /// The deploy queue is at capacity.
    #[error("deploy queue is full")]
    QueueFull,

    // ─────────────────────────────────────────────────────────────────────────
    // Ambient errors
    // ─────────────────────────────────────────────────────────────────────────
    /// A remote API call returned a non-success status.
    #[error("{context} request failed: {message}")]
    Api {
        /// Logical context of the call ("repository", "branches", "schema").
        context: String,
        /// Response message or body.
        message: String,
    },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to write a managed file.
    #[error("failed to write {path}: {message}")]
    FileWrite {
        /// Path that could not be written.
        path: PathBuf,
        /// Underlying error message.
        message: String,
    },

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Required tools are missing from the environment.
    #[error("missing required tools: {}", tools.join(", "))]
    MissingTools {
        /// List of missing tool names.
        tools: Vec<String>,
    },

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a reference error.
    #[must_use]
    pub fn reference(msg: impl Into<String>) -> Self {
        Self::Reference(msg.into())
    }

    /// Create an API error with its logical context.
    #[must_use]
    pub fn api(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error could ever succeed on a fresh run.
    ///
    /// Validation and reference failures are permanent until the blueprint
    /// itself changes; everything else may clear on retry.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Reference(_)
                | Self::UnsupportedProvider(_)
                | Self::UnsupportedRuntime(_)
        )
    }
}

impl From<figment::Error> for DeployError {
    fn from(e: figment::Error) -> Self {
        Self::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_includes_stderr() {
        let err = DeployError::Execution {
            command: "npm run build".to_owned(),
            stderr: "missing package.json".to_owned(),
        };
        assert!(err.to_string().contains("npm run build"));
        assert!(err.to_string().contains("missing package.json"));
    }

    #[test]
    fn permanent_errors() {
        assert!(DeployError::validation("bad port").is_permanent());
        assert!(DeployError::reference("remote gone").is_permanent());
        assert!(DeployError::UnsupportedRuntime("cobol".to_owned()).is_permanent());
        assert!(!DeployError::QueueFull.is_permanent());
        assert!(!DeployError::ReloadFailed("busy".to_owned()).is_permanent());
    }

    #[test]
    fn missing_tools_message_lists_all() {
        let err = DeployError::MissingTools {
            tools: vec!["git".to_owned(), "caddy".to_owned()],
        };
        assert_eq!(err.to_string(), "missing required tools: git, caddy");
    }
}
