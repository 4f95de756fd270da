//! Wire messages exchanged between providers and consumers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// One emission of a probe, before it is addressed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Epoch milliseconds at emission
    pub timestamp: i64,
    /// Updates and increments of this probe so far
    pub hits: u64,
    /// Current argument values; absent when argument evaluation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
    /// Failure message from argument evaluation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sample as published on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleEnvelope {
    /// Provider name
    pub provider: String,
    /// Module name
    pub module: String,
    /// Probe name
    pub probe: String,
    /// Epoch milliseconds at emission
    pub timestamp: i64,
    /// Emission counter
    pub hits: u64,
    /// Argument values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
    /// Argument evaluation failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SampleEnvelope {
    /// Address a sample
    #[must_use] pub fn new(provider: &str, module: &str, probe: &str, sample: Sample) -> Self {
        Self {
            provider: provider.to_string(),
            module: module.to_string(),
            probe: probe.to_string(),
            timestamp: sample.timestamp,
            hits: sample.hits,
            args: sample.args,
            error: sample.error,
        }
    }

    /// JSON record handed to consumer pipelines
    #[must_use] pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Kind of a control request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Keep matching probes enabled; args `[interval_ms]`
    Enable,
    /// Emit one sample of matching instant probes now
    Sample,
    /// Consumer is going away
    Stop,
}

/// Control request broadcast by a consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    /// What to do
    pub request: RequestKind,
    /// Target key, possibly with wildcards
    pub probe_key: String,
    /// Requesting consumer
    pub consumer_id: String,
    /// Request arguments
    #[serde(default)]
    pub args: Vec<Value>,
}

impl ControlRequest {
    /// Build a request
    #[must_use] pub fn new(request: RequestKind, probe_key: impl Into<String>, consumer_id: impl Into<String>) -> Self {
        Self {
            request,
            probe_key: probe_key.into(),
            consumer_id: consumer_id.into(),
            args: Vec::new(),
        }
    }

    /// Attach arguments
    #[must_use] pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Sample interval carried by an enable request; 0 when absent.
    ///
    /// Fractional milliseconds are rounded. Negative or non-numeric values
    /// count as absent.
    #[must_use] pub fn interval_ms(&self) -> u64 {
        let Some(raw) = self.args.first() else {
            return 0;
        };
        if let Some(ms) = raw.as_u64() {
            return ms;
        }
        match raw.as_f64() {
            Some(ms) if ms >= 0.0 => ms.round() as u64,
            _ => {
                warn!(consumer = %self.consumer_id, interval = %raw, "ignoring unusable sample interval");
                0
            }
        }
    }
}
