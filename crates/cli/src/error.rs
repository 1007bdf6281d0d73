//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration could not be loaded or failed validation
    #[error("Invalid configuration: {0}")]
    Config(#[from] contracts::ContractError),

    /// The push layer refused an operation
    #[error("Push layer error: {0}")]
    Push(#[from] push_engine::PushError),

    /// Simulation ran but did not finish cleanly
    #[error("Simulation failed: {message}")]
    Simulation { message: String },
}

impl CliError {
    pub fn simulation(message: impl Into<String>) -> Self {
        Self::Simulation {
            message: message.into(),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
