//! Error types for failoverd

use crate::types::Dpid;
use thiserror::Error;

/// Errors that can occur in failoverd
///
/// Only configuration and startup errors are fatal. Everything raised while
/// handling an event is logged at the dispatch boundary and dropped.
#[derive(Debug, Error)]
pub enum FailoverError {
    /// Configuration file could not be parsed or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// A link joins a switch to itself
    #[error("Invalid link {0}-{1}: self-loops are not permitted")]
    SelfLoop(Dpid, Dpid),

    /// Flow-mod could not be handed to the switch transport
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Fault injection request body could not be decoded
    #[error("Malformed fault request: {0}")]
    MalformedRequest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Prometheus registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Result type alias for failoverd operations
pub type Result<T> = std::result::Result<T, FailoverError>;
