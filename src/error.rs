//! Error taxonomy for upload sessions and backend adapters

use std::path::PathBuf;

/// Errors surfaced by the upload engine.
///
/// A canceled session is reported through
/// [`SessionOutcome::Canceled`](crate::orchestrator::SessionOutcome), not here.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Backend session could not be established. Aborts the whole session.
    #[error("connection failed: {0}")]
    Connection(String),

    /// One task failed after its last attempt.
    #[error("Failed to upload {path}: {message}")]
    Transfer { path: PathBuf, message: String },

    /// Local path missing or unreadable. The task or root is skipped.
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A required setting is missing or malformed. Detected before dispatch.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
}

impl UploadError {
    pub fn config(msg: impl Into<String>) -> Self {
        UploadError::Configuration(msg.into())
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        UploadError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

/// Classification of adapter failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    Connection,
    NotConnected,
    Io,
    Protocol,
    Unsupported,
}

/// Error returned by every [`Uploader`](crate::adapter::Uploader) operation.
///
/// Backend specific error types never cross the adapter boundary; they are
/// flattened into a message here.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Connection, message)
    }

    pub fn not_connected() -> Self {
        Self::new(AdapterErrorKind::NotConnected, "Not connected")
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Protocol, message)
    }

    pub fn unsupported(operation: &str, backend: &str) -> Self {
        Self::new(
            AdapterErrorKind::Unsupported,
            format!("{operation} is not supported by the {backend} backend"),
        )
    }

    /// Wraps an I/O failure with the operation that hit it.
    pub fn io(context: &str, err: std::io::Error) -> Self {
        Self::new(AdapterErrorKind::Io, format!("{context}: {err}"))
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        AdapterError::new(AdapterErrorKind::Io, err.to_string())
    }
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_error_displays_message_only() {
        let e = AdapterError::protocol("550 Permission denied");
        assert_eq!(e.to_string(), "550 Permission denied");
        assert_eq!(e.kind, AdapterErrorKind::Protocol);
    }

    #[test]
    fn unsupported_names_operation_and_backend() {
        let e = AdapterError::unsupported("list_directory", "HTTP");
        assert!(e.to_string().contains("list_directory"));
        assert!(e.to_string().contains("HTTP"));
    }

    #[test]
    fn transfer_error_names_the_file() {
        let e = UploadError::Transfer {
            path: PathBuf::from("site/index.html"),
            message: "550 Permission denied".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "Failed to upload site/index.html: 550 Permission denied"
        );
    }

    #[test]
    fn configuration_error_message() {
        let e = UploadError::config("host is required");
        assert_eq!(e.to_string(), "configuration error: host is required");
    }
}
