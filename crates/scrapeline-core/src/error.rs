//! Error taxonomy for the persistence pipeline
//!
//! - [`ExtractionError`]: page-level, never aborts the run on its own
//! - [`ValidationError`]: item-level, never retried
//! - [`StoreError`]: item-level, retried while [`StoreError::is_retryable`]
//! - [`PipelineError`]: fatal setup failures surfaced to the caller

use std::time::Duration;

/// Failure to extract one page from the extraction source.
#[derive(Debug)]
pub enum ExtractionError {
    /// Page fetch exceeded the per-page timeout
    Timeout { page: u32, after: Duration },
    /// HTTP error with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// I/O error reading the page
    Io(std::io::Error),
    /// Page payload could not be decoded
    Parse(String),
}

impl std::fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { page, after } => {
                write!(f, "page {page} timed out after {}ms", after.as_millis())
            }
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
        }
    }
}

impl std::error::Error for ExtractionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ExtractionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ExtractionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

/// Entity rejected at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Raw identity absent or blank
    MissingIdentity,
    /// Raw identity present but normalizes to an empty key (e.g. `https://`)
    EmptyIdentityKey { raw: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIdentity => write!(f, "entity has no identity"),
            Self::EmptyIdentityKey { raw } => {
                write!(f, "identity {raw:?} normalizes to an empty key")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Failure of a single persistence store call.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    /// Row could not be encoded / decoded
    Serialize(String),
    /// Write lost a race with another writer for the same key
    Conflict { key: String },
    /// Update targeted an id the store does not know
    NotFound { id: u64 },
    /// Store refused the payload (constraint violation)
    Rejected(String),
    /// Store temporarily unreachable
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO: {e}"),
            Self::Serialize(msg) => write!(f, "serialization: {msg}"),
            Self::Conflict { key } => write!(f, "write conflict on {key}"),
            Self::NotFound { id } => write!(f, "row {id} not found"),
            Self::Rejected(msg) => write!(f, "rejected: {msg}"),
            Self::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e.to_string())
    }
}

impl StoreError {
    /// Whether requeueing the item can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::StorageFull | std::io::ErrorKind::PermissionDenied
            ),
            Self::Conflict { .. } | Self::Unavailable(_) => true,
            Self::Serialize(_) | Self::NotFound { .. } | Self::Rejected(_) => false,
        }
    }
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Unrecoverable pipeline setup failure.
#[derive(Debug)]
pub enum PipelineError {
    Config(ConfigError),
    StoreUnavailable(StoreError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration: {e}"),
            Self::StoreUnavailable(e) => write!(f, "persistence store unreachable: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::StoreUnavailable(e) => Some(e),
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
