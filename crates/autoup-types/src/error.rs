//! Error types and handling for autoup
//!
//! Every fallible operation in the workspace reports one of the kinds below. The kind decides how
//! the orchestrator reacts: transport failures trigger a reconnect, I/O failures wait for the next
//! scan cycle, format and path failures stop the affected project.

use std::path::PathBuf;

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorSeverity {
    /// Low severity - operation can continue
    Low,
    /// Medium severity - operation should be retried
    Medium,
    /// High severity - operation should be aborted
    High,
    /// Critical severity - entire process should be terminated
    Critical,
}

/// Main error type for autoup operations
#[derive(thiserror::Error, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    /// A path violated a structural requirement (not absolute, outside the base directory, ...)
    #[error("Path error: {path}: {message}")]
    Path {
        /// Offending path
        path: PathBuf,
        /// What was wrong with it
        message: String,
    },

    /// Local filesystem listing, open or stat failed
    #[error("I/O error: {message}")]
    Io {
        /// Error message from the I/O operation
        message: String,
    },

    /// Remote call or connectivity failed
    #[error("Transport error: {message}")]
    Transport {
        /// Error message describing the transport issue
        message: String,
    },

    /// A persisted snapshot could not be decoded or carried an illegal value
    #[error("Snapshot format error: {message}")]
    Format {
        /// Error message describing the format issue
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error with custom message
    #[error("{message}")]
    Other {
        /// Custom error message
        message: String,
    },
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Structural path errors
    Path,
    /// Local I/O errors
    Io,
    /// Remote transport errors
    Transport,
    /// Snapshot format errors
    Format,
    /// Configuration errors
    Config,
    /// Cancellation
    Cancelled,
    /// Other errors
    Other,
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Path { .. } => ErrorKind::Path,
            Self::Io { .. } => ErrorKind::Io,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Format { .. } => ErrorKind::Format,
            Self::Config { .. } => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Path { .. } => ErrorSeverity::High,
            Self::Io { .. } => ErrorSeverity::Medium,
            Self::Transport { .. } => ErrorSeverity::Medium,
            Self::Format { .. } => ErrorSeverity::High,
            Self::Config { .. } => ErrorSeverity::High,
            Self::Cancelled => ErrorSeverity::Low,
            Self::Other { .. } => ErrorSeverity::Medium,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors leave the project running; the affected work is picked up again on a
    /// later cycle.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Transport { .. } | Self::Other { .. } => true,
            Self::Path { .. } | Self::Format { .. } | Self::Config { .. } | Self::Cancelled => {
                false
            }
        }
    }

    /// Check if this error should trigger a retry
    pub fn should_retry(&self) -> bool {
        self.is_recoverable() && self.severity() <= ErrorSeverity::Medium
    }

    /// Check if the current connection should be discarded before retrying
    pub fn needs_reconnect(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Create a new path error
    pub fn path<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Path {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new snapshot format error
    pub fn format<S: Into<String>>(message: S) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: error.to_string(),
        }
    }
}
