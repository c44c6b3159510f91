use thiserror::Error;

use crate::supervisor::ExitOutcome;

/// Main error type for the supervisor
#[derive(Error, Debug)]
pub enum SupervisorError {
    // Launch errors
    #[error("{program} not found: {reason}")]
    NotFound { program: String, reason: String },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    // Runtime errors
    #[error("{program} exited unsuccessfully: {outcome}")]
    RuntimeExit { program: String, outcome: ExitOutcome },

    #[error("Failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No process is running")]
    NotRunning,

    // Health check errors
    #[error("Checker reported unhealthy: {0}")]
    CheckerUnhealthy(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// True when the run never got a live process (executable missing or spawn failure).
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Spawn { .. })
    }
}

/// Result type alias for SupervisorError
pub type Result<T> = std::result::Result<T, SupervisorError>;
