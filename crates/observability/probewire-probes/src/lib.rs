//! # ProbeWire Probes
//!
//! Live instrumentation over a message bus.
//!
//! - [`Probe`]: a named measurement point with a rate limit and an
//!   enable/disable lifecycle driven by consumer heartbeats
//! - [`Provider`]: owns probes, answers control requests and publishes
//!   samples
//! - [`Consumer`]: subscribes to a probe key pattern and runs a stream
//!   handler or a query over the samples it receives
//!
//! ```rust
//! use probewire_core::{MemoryBroker, ProviderSettings};
//! use probewire_probes::{Provider, ProviderConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let provider = Provider::new(
//!     ProviderConfig::new("host").probe("cpu"),
//!     Arc::new(MemoryBroker::new()),
//!     ProviderSettings::default(),
//! )
//! .unwrap();
//! provider.update("cpu", vec![json!(42)]).unwrap();
//! assert_eq!(provider.probe("cpu").unwrap().hits(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod consumer;
pub mod probe;
pub mod provider;

pub use consumer::{Consumer, Handler, StopOptions, SubscriptionTarget};
pub use probe::{ArgType, ArgsResponder, Probe, ProbeArgs, ProbeConfig, SampleListener, SampleTarget};
pub use provider::{Provider, ProviderConfig, PROBES_PROBE};

/// Version information for the probewire probes library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
