//! # ProbeWire Core
//!
//! Shared building blocks for the probewire instrumentation framework.
//!
//! ## Features
//!
//! - **Error Handling**: one error enum and result alias for every crate
//! - **Configuration**: layered TOML/JSON/environment settings
//! - **Logging**: `tracing` subscriber bootstrap
//! - **Keys**: probe keys, wildcard normalisation and topic routing
//! - **Messages**: sample and control request wire types
//! - **Bus**: transport traits and an in-process broker
//! - **Timers**: restartable interval and one-shot timers on Tokio
//!
//! ## Quick Start
//!
//! ```rust
//! use probewire_core::{ProbeKey, ProbeWireResult};
//!
//! fn key() -> ProbeWireResult<ProbeKey> {
//!     ProbeKey::normalize("..cpu")
//! }
//!
//! assert_eq!(key().unwrap().to_string(), "*.*.cpu");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod key;
pub mod message;
pub mod telemetry;
pub mod timers;

// Re-export commonly used items
pub use bus::{Binding, Connection, MemoryBroker, RequestHandler, SampleHandler, Transport};
pub use config::{ConfigLoader, ConsumerSettings, LoggingSettings, ProviderSettings, Settings};
pub use error::{ProbeWireError, ProbeWireResult};
pub use key::{ProbeKey, Segment};
pub use message::{ControlRequest, RequestKind, Sample, SampleEnvelope};
pub use telemetry::init_tracing;
pub use timers::{Delay, Timer};

/// Version information for the probewire core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of the probewire core library
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "probewire-core");
    }

    #[test]
    fn test_error_result_types() {
        let success: ProbeWireResult<i32> = Ok(42);
        assert_eq!(success.unwrap(), 42);

        let error: ProbeWireResult<i32> = Err(ProbeWireError::config("test error"));
        assert!(error.is_err());
    }
}
