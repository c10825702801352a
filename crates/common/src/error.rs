//! Error taxonomy for the Orion orchestration engine

use thiserror::Error;

/// Main error type shared across the workspace
#[derive(Error, Debug)]
pub enum Error {
    /// A DAG failed structural validation: a cycle, a dangling edge, or a
    /// depth past the configured limit.
    #[error("invalid DAG: {0}")]
    InvalidDag(String),

    /// A task reached the ready set with no resolvable device assignment.
    #[error("unassigned task: {0}")]
    UnassignedTask(String),

    /// A named assignment strategy rejected the device pool or request.
    #[error("assignment strategy error: {0}")]
    AssignmentStrategy(String),

    /// A device-side failure surfaced while dispatching or awaiting a task.
    #[error("device error: {0}")]
    Device(String),

    /// A task exceeded its configured execution timeout.
    #[error("task timed out: {0}")]
    TaskTimeout(String),

    /// The modification synchronizer gave up waiting on a pending barrier.
    /// Non-fatal: callers log and continue rather than abort the Orion.
    #[error("modification barrier timed out: {0}")]
    BarrierTimeout(String),

    /// The planning oracle returned an invalid or unusable response.
    #[error("oracle error: {0}")]
    Oracle(String),

    /// Cooperative cancellation was observed; never logged as a failure.
    #[error("cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Metrics registration errors
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),

    /// Catch-all for errors from outside the taxonomy
    #[error("unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the operation that produced this error is safe to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Device(_) | Error::TaskTimeout(_))
    }

    /// Severity used to label the error-rate metric.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Error::InvalidDag(_) | Error::Config(_) => ErrorSeverity::Critical,
            Error::UnassignedTask(_) | Error::AssignmentStrategy(_) | Error::Oracle(_) => {
                ErrorSeverity::High
            }
            Error::Device(_) | Error::TaskTimeout(_) => ErrorSeverity::Medium,
            Error::BarrierTimeout(_) | Error::Cancelled => ErrorSeverity::Low,
            _ => ErrorSeverity::Medium,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}
