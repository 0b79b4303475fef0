//! Custom error types for the agent.
//!
//! This module defines the primary error type, `AgentError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures the agent can
//! encounter, from configuration problems to out-of-window sequence requests.
//!
//! Most runtime failures are intentionally *not* represented here: connection
//! errors are retried and reported as adapter events, and malformed SHDR
//! input is dropped and logged by the decoder. The only failures that abort
//! startup are configuration errors that prevent buffer construction.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sequence {requested} is outside the retained window [{first}, {last}]")]
    SequenceOutOfRange {
        requested: u64,
        first: u64,
        last: u64,
    },

    #[error("Invalid observation count: {0}")]
    InvalidCountRange(i64),

    #[error("Unknown data item '{key}' for device '{device}'")]
    UnknownDataItem { device: String, key: String },
}
