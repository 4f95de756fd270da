//! Error handling types for the probewire ecosystem.
//!
//! Every crate in the workspace reports failures through [`ProbeWireError`] so
//! callers can tell setup mistakes (configuration), self-healing transport
//! problems, per-sample evaluation failures and misuse of stateful entities
//! apart.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The main error type for probewire.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeWireError {
    /// Invalid names, malformed queries, invalid quantizer bounds, unsupported
    /// query combinations. Raised synchronously at construction/compile time.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connection loss or publish failure on the message bus
    #[error("Transport error: {0}")]
    Transport(String),

    /// A user supplied projection, predicate or probe argument function failed
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// An entity was used while in a state that forbids the operation
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// A probe argument did not have the type an operation requires
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ProbeWireError {
    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Self::Configuration(msg.to_string())
    }

    /// Create a new transport error
    pub fn transport<T: fmt::Display>(msg: T) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create a new evaluation error
    pub fn evaluation<T: fmt::Display>(msg: T) -> Self {
        Self::Evaluation(msg.to_string())
    }

    /// Create a new concurrency error
    pub fn concurrency<T: fmt::Display>(msg: T) -> Self {
        Self::Concurrency(msg.to_string())
    }

    /// Create a new type mismatch error
    pub fn type_mismatch<T: fmt::Display>(msg: T) -> Self {
        Self::TypeMismatch(msg.to_string())
    }

    /// Create a new serialization error
    pub fn serialization<T: fmt::Display>(msg: T) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Transport errors heal through reconnection; everything else is final.
    #[must_use] pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Errors caused by the caller's configuration or usage
    #[must_use] pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Concurrency(_) | Self::TypeMismatch(_)
        )
    }
}

/// Result type alias for probewire operations
pub type ProbeWireResult<T> = Result<T, ProbeWireError>;

impl From<serde_json::Error> for ProbeWireError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ProbeWireError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}
