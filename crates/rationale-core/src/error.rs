//! Error types for Rationale

use thiserror::Error;

/// Result type alias using Rationale's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Substrings that mark an error as transient
const RETRYABLE_MARKERS: &[&str] = &[
    "timeout",
    "connection",
    "network",
    "temporary",
    "rate limit",
    "service unavailable",
    "internal server error",
    "bad gateway",
    "gateway timeout",
];

/// Substrings that mark an error as permanent
const PERMANENT_MARKERS: &[&str] = &[
    "invalid",
    "unauthorized",
    "forbidden",
    "not found",
    "bad request",
    "parse error",
    "syntax error",
];

/// Rationale error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Entity errors (E001-E099)
    #[error("Integration '{0}' not found.")]
    IntegrationNotFound(String),

    #[error("Data source '{0}' not found.")]
    DataSourceNotFound(String),

    #[error("Project '{0}' not found.")]
    ProjectNotFound(String),

    // Ingestion lifecycle errors (E100-E199)
    #[error("Ingestion already running for integration '{0}'.")]
    IngestionAlreadyRunning(String),

    #[error("Integration '{id}' is not active (status: {status}).")]
    IntegrationNotActive { id: String, status: String },

    #[error("Data source '{0}' is inactive.")]
    DataSourceInactive(String),

    #[error("Ingestion failed to start for {} integration(s): {}", .0.len(), summarize_failures(.0))]
    ProjectStartFailed(Vec<(String, String)>),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Shutdown did not complete within {0} seconds")]
    ShutdownTimeout(u64),

    // Connector errors (E200-E299)
    #[error("Connector error: {0}")]
    ConnectorError(String),

    #[error("No connector registered for platform '{0}'.")]
    ConnectorNotFound(String),

    // Storage errors (E300-E399)
    #[error("Storage error: {0}")]
    StorageError(String),

    // Processing errors (E400-E499)
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::IntegrationNotFound(_) => "E001",
            Self::DataSourceNotFound(_) => "E002",
            Self::ProjectNotFound(_) => "E003",
            Self::IngestionAlreadyRunning(_) => "E100",
            Self::IntegrationNotActive { .. } => "E101",
            Self::DataSourceInactive(_) => "E102",
            Self::ProjectStartFailed(_) => "E103",
            Self::Cancelled => "E104",
            Self::ShutdownTimeout(_) => "E105",
            Self::ConnectorError(_) => "E200",
            Self::ConnectorNotFound(_) => "E201",
            Self::StorageError(_) => "E300",
            Self::ProcessingFailed(_) => "E400",
            Self::InvalidEvent(_) => "E401",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Serialization(_) => "E900",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::IngestionAlreadyRunning(_) => {
                Some("Wait for the current run to finish or stop the project first".to_string())
            }
            Self::IntegrationNotActive { id, .. } => {
                Some(format!("Retry the failed ingestion for integration {}", id))
            }
            Self::ConnectorNotFound(platform) => {
                Some(format!("Register a connector for platform '{}'", platform))
            }
            Self::ShutdownTimeout(_) => {
                Some("Increase ingestion.shutdown_timeout_secs".to_string())
            }
            _ => None,
        }
    }

    /// Whether retrying the failed operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled
            | Self::IngestionAlreadyRunning(_)
            | Self::IntegrationNotActive { .. }
            | Self::DataSourceInactive(_)
            | Self::InvalidEvent(_)
            | Self::InvalidInput(_)
            | Self::ConfigError(_) => false,
            other => is_retryable_message(&other.to_string()),
        }
    }
}

/// Classify an error message by substring.
///
/// Transient markers win over permanent ones; unknown messages default to
/// retryable.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    if RETRYABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    if PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return false;
    }
    true
}

fn summarize_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(id, message)| format!("{}: {}", id, message))
        .collect::<Vec<_>>()
        .join("; ")
}
