//! Configuration management for providers and consumers.
//!
//! Settings are assembled from any number of [`ConfigSource`]s (TOML/JSON
//! files, prefixed environment variables), deep-merged in the order they were
//! added and then decoded into [`Settings`]. Every field has a default, so an
//! empty source list yields the stock timings.

use crate::{ProbeWireError, ProbeWireResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default environment variable prefix
pub const ENV_PREFIX: &str = "PROBEWIRE";

/// Provider side timings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Period of the reconnect timer
    pub reconnect_interval_ms: u64,
    /// Silence after the last enable request before a probe disables itself
    pub probe_disable_delay_ms: u64,
    /// Rate-limit floor for probes that do not declare their own
    pub default_sample_threshold_ms: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: 5_000,
            probe_disable_delay_ms: 6_000,
            default_sample_threshold_ms: 1_000,
        }
    }
}

impl ProviderSettings {
    /// Reconnect timer period
    #[must_use] pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Disable delay as a [`Duration`]
    #[must_use] pub fn probe_disable_delay(&self) -> Duration {
        Duration::from_millis(self.probe_disable_delay_ms)
    }
}

/// Consumer side timings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Period of the reconnect timer
    pub reconnect_interval_ms: u64,
    /// Period at which enable requests are re-published as a heartbeat
    pub request_enable_interval_ms: u64,
    /// Interval requested from probes when the subscription does not name one
    pub default_sample_interval_ms: u64,
    /// Grace period before an idle connection is closed after `stop`
    pub connection_end_wait_ms: u64,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: 1_000,
            request_enable_interval_ms: 5_000,
            default_sample_interval_ms: 100,
            connection_end_wait_ms: 30_000,
        }
    }
}

impl ConsumerSettings {
    /// Reconnect timer period
    #[must_use] pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Enable heartbeat period
    #[must_use] pub fn request_enable_interval(&self) -> Duration {
        Duration::from_millis(self.request_enable_interval_ms)
    }

    /// Idle connection grace period
    #[must_use] pub fn connection_end_wait(&self) -> Duration {
        Duration::from_millis(self.connection_end_wait_ms)
    }
}

/// Logging output options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    pub filter: String,
    /// Emit JSON lines instead of the human readable format
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Complete settings tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Provider timings
    pub provider: ProviderSettings,
    /// Consumer timings
    pub consumer: ConsumerSettings,
    /// Logging options
    pub logging: LoggingSettings,
}

impl Settings {
    /// Parse settings from a TOML document
    pub fn from_toml_str(content: &str) -> ProbeWireResult<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check that every period is usable as a timer interval
    pub fn validate(&self) -> ProbeWireResult<()> {
        let periods = [
            ("provider.reconnect_interval_ms", self.provider.reconnect_interval_ms),
            ("provider.probe_disable_delay_ms", self.provider.probe_disable_delay_ms),
            ("consumer.reconnect_interval_ms", self.consumer.reconnect_interval_ms),
            ("consumer.request_enable_interval_ms", self.consumer.request_enable_interval_ms),
            ("consumer.default_sample_interval_ms", self.consumer.default_sample_interval_ms),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(ProbeWireError::config(format!("{name} must be greater than 0")));
            }
        }
        Ok(())
    }
}

/// Trait for configuration sources
pub trait ConfigSource {
    /// Load this source as a JSON tree
    fn load(&self) -> ProbeWireResult<Value>;

    /// Human readable name used in error messages
    fn source_name(&self) -> String;
}

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML format
    Toml,
    /// JSON format
    Json,
}

/// File-based configuration source
pub struct FileConfigSource {
    path: PathBuf,
    format: ConfigFormat,
}

impl FileConfigSource {
    /// Create a new file config source
    pub fn new<P: AsRef<Path>>(path: P, format: ConfigFormat) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            format,
        }
    }

    /// Auto-detect format from file extension
    pub fn auto_detect<P: AsRef<Path>>(path: P) -> ProbeWireResult<Self> {
        let path = path.as_ref();
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => ConfigFormat::Toml,
            Some("json") => ConfigFormat::Json,
            _ => {
                return Err(ProbeWireError::config(
                    "Cannot detect config format from file extension",
                ))
            }
        };
        Ok(Self::new(path, format))
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> ProbeWireResult<Value> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| ProbeWireError::config(format!("Failed to read config file: {e}")))?;
        match self.format {
            ConfigFormat::Toml => {
                let value: toml::Value = toml::from_str(&content)?;
                serde_json::to_value(value).map_err(ProbeWireError::from)
            }
            ConfigFormat::Json => serde_json::from_str(&content)
                .map_err(|e| ProbeWireError::config(format!("Failed to parse JSON: {e}"))),
        }
    }

    fn source_name(&self) -> String {
        self.path.display().to_string()
    }
}

/// Environment variable configuration source.
///
/// `PROBEWIRE_CONSUMER__DEFAULT_SAMPLE_INTERVAL_MS=50` sets
/// `consumer.default_sample_interval_ms`; a double underscore separates
/// nesting levels.
pub struct EnvConfigSource {
    prefix: String,
    vars: Option<Vec<(String, String)>>,
}

impl EnvConfigSource {
    /// Read variables starting with `prefix` from the process environment
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        Self {
            prefix: prefix.into(),
            vars: None,
        }
    }

    /// Use an explicit variable list instead of the process environment
    pub fn with_vars<S: Into<String>>(prefix: S, vars: Vec<(String, String)>) -> Self {
        Self {
            prefix: prefix.into(),
            vars: Some(vars),
        }
    }
}

impl ConfigSource for EnvConfigSource {
    fn load(&self) -> ProbeWireResult<Value> {
        let vars = match &self.vars {
            Some(vars) => vars.clone(),
            None => std::env::vars().collect(),
        };
        let marker = format!("{}_", self.prefix);
        let mut root = Value::Object(Map::new());
        for (key, raw) in vars {
            let Some(stripped) = key.strip_prefix(&marker) else {
                continue;
            };
            let path: Vec<String> = stripped
                .split("__")
                .map(str::to_lowercase)
                .filter(|segment| !segment.is_empty())
                .collect();
            if path.is_empty() {
                continue;
            }
            insert_path(&mut root, &path, parse_scalar(&raw));
        }
        Ok(root)
    }

    fn source_name(&self) -> String {
        format!("environment ({}_*)", self.prefix)
    }
}

/// Combines configuration sources into [`Settings`]
#[derive(Default)]
pub struct ConfigLoader {
    sources: Vec<Box<dyn ConfigSource>>,
}

impl ConfigLoader {
    /// Create a loader without sources
    #[must_use] pub fn new() -> Self {
        Self::default()
    }

    /// Add a configuration source; later sources override earlier ones
    #[must_use] pub fn add_source<S: ConfigSource + 'static>(mut self, source: S) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Merge every source and decode the result
    pub fn load(&self) -> ProbeWireResult<Settings> {
        let mut merged = Value::Object(Map::new());
        for source in &self.sources {
            let value = source.load().map_err(|e| {
                ProbeWireError::config(format!("Failed to load from {}: {e}", source.source_name()))
            })?;
            merge_values(&mut merged, value);
        }
        let settings: Settings = serde_json::from_value(merged)
            .map_err(|e| ProbeWireError::config(format!("Invalid settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }
}

fn parse_scalar(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

fn insert_path(root: &mut Value, path: &[String], value: Value) {
    let mut current = root;
    for segment in &path[..path.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else { return };
        current = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        map.insert(path[path.len() - 1].clone(), value);
    }
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, overlay) => *slot = overlay,
    }
}
