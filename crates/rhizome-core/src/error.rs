//! Error types for rhizome operations.
//!
//! Structural operations (adding nodes, wiring connections, loading
//! snapshots) return these to the caller. Signal delivery failures are
//! not errors: they end up in statistics and history instead.

use thiserror::Error;

/// Result type for rhizome operations.
pub type Result<T> = std::result::Result<T, RhizomeError>;

/// Errors that can occur during rhizome operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RhizomeError {
    #[error("duplicate node id: {0}")]
    DuplicateId(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("capacity exceeded: {what} (limit {limit})")]
    CapacityExceeded { what: String, limit: usize },

    #[error("connection endpoint missing: {0}")]
    EndpointMissing(String),

    #[error("duplicate connection: {from} -> {to}")]
    DuplicateConnection { from: String, to: String },

    #[error("node cannot connect to itself: {0}")]
    SelfConnection(String),

    #[error("position of {0} is not finite")]
    InvalidPosition(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for RhizomeError {
    fn from(e: std::io::Error) -> Self {
        RhizomeError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for RhizomeError {
    fn from(e: serde_json::Error) -> Self {
        RhizomeError::Serialization(e.to_string())
    }
}

// Convenience constructors
impl RhizomeError {
    pub fn node_not_found(id: impl std::fmt::Display) -> Self {
        RhizomeError::NotFound(format!("node {}", id))
    }

    pub fn connection_not_found(id: impl std::fmt::Display) -> Self {
        RhizomeError::NotFound(format!("connection {}", id))
    }

    pub fn capacity(what: impl Into<String>, limit: usize) -> Self {
        RhizomeError::CapacityExceeded {
            what: what.into(),
            limit,
        }
    }

    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        RhizomeError::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
