//! Error types for the CLI

use std::time::Duration;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Environment is not usable: missing tool, no cluster access, no admin rights
    #[error("{message}")]
    Preflight { message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    /// An external tool exited non-zero; `message` carries its combined output
    #[error("command failed: {message}")]
    CommandFailed { message: String },

    #[error("timed out after {elapsed:?} waiting for {description}")]
    Timeout {
        description: String,
        elapsed: Duration,
    },

    #[error("Port-forwarding has unexpectedly ended ({reason}). Please restart the command via '{retry_command}'")]
    TunnelExited {
        reason: String,
        retry_command: String,
    },

    #[error("unexpected response from {url}: {detail}. Try running 'loft start --reset'")]
    BadResponse { url: String, detail: String },

    #[error("prompt error: {0}")]
    Prompt(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }

    pub fn preflight(message: impl Into<String>) -> Self {
        Error::Preflight {
            message: message.into(),
        }
    }

    pub fn bad_response(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::BadResponse {
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// True for Kubernetes API errors with a 404 status.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 404)
    }
}
