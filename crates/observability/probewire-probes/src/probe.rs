//! Named measurement points.
//!
//! A [`Probe`] holds the current argument snapshot and decides when a
//! measurement turns into a [`Sample`] and who receives it. Consumers keep a
//! probe enabled by re-sending enable requests; once they go quiet for the
//! disable delay the probe switches itself off and drops every per-consumer
//! timer.
//!
//! Samples are handed to the listener installed by the owning provider.

use parking_lot::Mutex;
use probewire_core::config::ProviderSettings;
use probewire_core::key::{validate_name, ALL_CONSUMERS};
use probewire_core::{clock, Delay, ProbeWireError, ProbeWireResult, Sample, Timer};
use probewire_streams::expr::number_value;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

/// Advisory type of one probe argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    /// Numeric argument
    Number,
    /// Text argument
    String,
    /// Flag argument
    Boolean,
    /// Structured argument
    Object,
}

impl ArgType {
    /// Initial value of an argument of this type
    #[must_use] pub fn default_value(self) -> Value {
        match self {
            ArgType::Number => json!(0),
            _ => json!(""),
        }
    }
}

/// Computes the arguments of a sample
pub type ArgsFn = Arc<dyn Fn() -> ProbeWireResult<Value> + Send + Sync>;

/// Computes the arguments of a sample by answering through a responder,
/// possibly several times and possibly later
pub type ArgsCallback = Arc<dyn Fn(ArgsResponder) + Send + Sync>;

/// Source of a probe's arguments
#[derive(Clone)]
pub enum ProbeArgs {
    /// Fixed values, replaced by `update`
    Values(Vec<Value>),
    /// Evaluated once per sample
    Function(ArgsFn),
    /// Each response becomes one sample
    Callback(ArgsCallback),
}

impl ProbeArgs {
    /// Arguments computed by `f`
    pub fn function<F>(f: F) -> Self
    where
        F: Fn() -> ProbeWireResult<Value> + Send + Sync + 'static,
    {
        ProbeArgs::Function(Arc::new(f))
    }

    /// Arguments delivered through a responder
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(ArgsResponder) + Send + Sync + 'static,
    {
        ProbeArgs::Callback(Arc::new(f))
    }
}

impl fmt::Debug for ProbeArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeArgs::Values(values) => f.debug_tuple("Values").field(values).finish(),
            ProbeArgs::Function(_) => f.write_str("Function"),
            ProbeArgs::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// Recipient of an emitted sample
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SampleTarget {
    /// One consumer, by id
    Consumer(String),
    /// Every consumer bound to the probe
    All,
}

impl SampleTarget {
    /// Last segment of the sample routing key
    #[must_use] pub fn routing_suffix(&self) -> &str {
        match self {
            SampleTarget::Consumer(id) => id,
            SampleTarget::All => ALL_CONSUMERS,
        }
    }
}

/// Receives `(probe name, sample, target)` for every emission
pub type SampleListener = Arc<dyn Fn(&str, Sample, &SampleTarget) + Send + Sync>;

/// Handle given to an [`ArgsCallback`]; every `respond` emits one sample
#[derive(Clone)]
pub struct ArgsResponder {
    probe: Weak<ProbeInner>,
    hits: u64,
    target: SampleTarget,
}

impl ArgsResponder {
    /// Emit a sample carrying `result`. A non-array value is wrapped in a
    /// one element list; an error is attached to the sample.
    pub fn respond(&self, result: ProbeWireResult<Value>) {
        if let Some(inner) = self.probe.upgrade() {
            let sample = inner.to_sample(result, clock::now_millis(), self.hits);
            inner.emit(sample, &self.target);
        }
    }

    /// Recipient the responses go to
    #[must_use] pub fn target(&self) -> &SampleTarget {
        &self.target
    }
}

impl fmt::Debug for ArgsResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgsResponder")
            .field("hits", &self.hits)
            .field("target", &self.target)
            .finish()
    }
}

/// Declaration of a probe
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Probe name; must not contain `.`, `#` or `*`
    pub name: String,
    /// Advisory argument types
    pub types: Vec<ArgType>,
    /// Initial enabled flag
    pub enabled: bool,
    /// Emit on every update instead of on a timer
    pub instant: bool,
    /// Rate-limit floor; provider default when `None`
    pub sample_threshold_ms: Option<u64>,
    /// Argument source; defaults derived from `types` when `None`
    pub args: Option<ProbeArgs>,
}

impl ProbeConfig {
    /// Declaration with one numeric argument
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: vec![ArgType::Number],
            enabled: false,
            instant: false,
            sample_threshold_ms: None,
            args: None,
        }
    }

    /// Set the argument types
    #[must_use] pub fn types(mut self, types: Vec<ArgType>) -> Self {
        self.types = types;
        self
    }

    /// Start enabled
    #[must_use] pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Make the probe instant
    #[must_use] pub fn instant(mut self, instant: bool) -> Self {
        self.instant = instant;
        self
    }

    /// Set the rate-limit floor
    #[must_use] pub fn sample_threshold_ms(mut self, threshold: u64) -> Self {
        self.sample_threshold_ms = Some(threshold);
        self
    }

    /// Fixed initial arguments
    #[must_use] pub fn values(mut self, values: Vec<Value>) -> Self {
        self.args = Some(ProbeArgs::Values(values));
        self
    }

    /// Arguments computed on every sample
    #[must_use] pub fn function<F>(mut self, f: F) -> Self
    where
        F: Fn() -> ProbeWireResult<Value> + Send + Sync + 'static,
    {
        self.args = Some(ProbeArgs::function(f));
        self
    }

    /// Arguments answered through a responder
    #[must_use] pub fn callback<F>(mut self, f: F) -> Self
    where
        F: Fn(ArgsResponder) + Send + Sync + 'static,
    {
        self.args = Some(ProbeArgs::callback(f));
        self
    }
}

impl From<&str> for ProbeConfig {
    fn from(name: &str) -> Self {
        ProbeConfig::new(name)
    }
}

struct ProbeState {
    enabled: bool,
    args: ProbeArgs,
    hits: u64,
    last_emit: Option<i64>,
    consumer_timers: HashMap<String, Timer>,
    instant_consumers: HashSet<String>,
    disable_delay: Delay,
    listener: Option<SampleListener>,
}

struct ProbeInner {
    name: String,
    types: Vec<ArgType>,
    instant: bool,
    sample_threshold_ms: u64,
    disable_delay: Duration,
    state: Mutex<ProbeState>,
}

/// A measurement point. Cloning shares the same probe.
#[derive(Clone)]
pub struct Probe {
    inner: Arc<ProbeInner>,
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Probe")
            .field("name", &self.inner.name)
            .field("instant", &self.inner.instant)
            .field("enabled", &state.enabled)
            .field("hits", &state.hits)
            .finish()
    }
}

impl Probe {
    /// Build a probe from its declaration
    pub fn new(config: ProbeConfig, settings: &ProviderSettings) -> ProbeWireResult<Self> {
        validate_name("probe name", &config.name)?;
        let args = config.args.unwrap_or_else(|| {
            ProbeArgs::Values(config.types.iter().map(|t| t.default_value()).collect())
        });
        Ok(Self {
            inner: Arc::new(ProbeInner {
                name: config.name,
                types: config.types,
                instant: config.instant,
                sample_threshold_ms: config
                    .sample_threshold_ms
                    .unwrap_or(settings.default_sample_threshold_ms),
                disable_delay: settings.probe_disable_delay(),
                state: Mutex::new(ProbeState {
                    enabled: config.enabled,
                    args,
                    hits: 0,
                    last_emit: None,
                    consumer_timers: HashMap::new(),
                    instant_consumers: HashSet::new(),
                    disable_delay: Delay::new(),
                    listener: None,
                }),
            }),
        })
    }

    /// Install the receiver of emitted samples, replacing any previous one
    pub fn set_listener(&self, listener: SampleListener) {
        self.inner.state.lock().listener = Some(listener);
    }

    /// Replace the arguments and count a hit. An enabled instant probe
    /// samples immediately.
    pub fn update(&self, values: Vec<Value>) {
        let emit = {
            let mut state = self.inner.state.lock();
            state.args = ProbeArgs::Values(values);
            state.hits += 1;
            state.enabled && self.inner.instant
        };
        if emit {
            self.sample(None);
        }
    }

    /// Add `offset` to argument `index` and count a hit.
    ///
    /// Fails with a type mismatch, leaving the probe untouched, when the
    /// argument is missing, not a number or computed by a function.
    pub fn increment(&self, offset: f64, index: usize) -> ProbeWireResult<()> {
        let emit = {
            let mut state = self.inner.state.lock();
            let ProbeArgs::Values(args) = &mut state.args else {
                return Err(ProbeWireError::type_mismatch(format!(
                    "probe '{}' computes its arguments and cannot be incremented",
                    self.inner.name
                )));
            };
            let next = args
                .get(index)
                .and_then(|current| add_offset(current, offset))
                .ok_or_else(|| {
                    ProbeWireError::type_mismatch(format!(
                        "argument {index} of probe '{}' is not a number",
                        self.inner.name
                    ))
                })?;
            args[index] = next;
            state.hits += 1;
            state.enabled && self.inner.instant
        };
        if emit {
            self.sample(None);
        }
        Ok(())
    }

    /// Try to emit a sample for `consumer_id`, or for every consumer when
    /// the probe is instant and no id is given.
    ///
    /// Returns whether a sample was produced; the rate limit suppresses
    /// samples closer than the sample threshold to the previous one.
    pub fn sample(&self, consumer_id: Option<&str>) -> bool {
        let target = match consumer_id {
            Some(id) => SampleTarget::Consumer(id.to_string()),
            None if self.inner.instant => SampleTarget::All,
            None => return false,
        };
        let now = clock::now_millis();
        let (args, hits) = {
            let mut state = self.inner.state.lock();
            let threshold = i64::try_from(self.inner.sample_threshold_ms).unwrap_or(i64::MAX);
            let due = threshold == 0 || state.last_emit.map_or(true, |last| now - last >= threshold);
            if !due {
                return false;
            }
            state.last_emit = Some(now);
            (state.args.clone(), state.hits)
        };
        self.inner.evaluate(args, hits, now, target);
        true
    }

    /// Enable the probe for a consumer and push back the disable delay.
    ///
    /// Instant probes only register the consumer. Other probes get one
    /// recurring timer per consumer sampling every `interval_ms`; an
    /// interval of 0 starts no timer.
    pub fn enable_for_consumer(&self, consumer_id: &str, interval_ms: u64, probe_key: &str) {
        let was_enabled = {
            let mut state = self.inner.state.lock();
            let was_enabled = state.enabled;
            state.enabled = true;
            if self.inner.instant {
                state.instant_consumers.insert(consumer_id.to_string());
            } else if interval_ms > 0 && !state.consumer_timers.contains_key(consumer_id) {
                let probe = Arc::downgrade(&self.inner);
                let id = consumer_id.to_string();
                let mut timer = Timer::new();
                timer.start(Duration::from_millis(interval_ms), move || {
                    if let Some(inner) = probe.upgrade() {
                        Probe { inner }.sample(Some(id.as_str()));
                    }
                });
                state.consumer_timers.insert(consumer_id.to_string(), timer);
            }
            let probe = Arc::downgrade(&self.inner);
            state.disable_delay.start(self.inner.disable_delay, move || {
                if let Some(inner) = probe.upgrade() {
                    inner.expire();
                }
            });
            was_enabled
        };
        if !was_enabled {
            debug!(probe = %probe_key, consumer = %consumer_id, interval_ms, "probe enabled");
        }
    }

    /// Forget one consumer; other consumers keep the probe enabled
    pub fn stop(&self, consumer_id: &str) {
        let mut state = self.inner.state.lock();
        let had_timer = state.consumer_timers.remove(consumer_id).is_some();
        let was_registered = state.instant_consumers.remove(consumer_id);
        if had_timer || was_registered {
            debug!(probe = %self.inner.name, consumer = %consumer_id, "consumer stopped");
        }
    }

    /// Disable now, dropping every consumer
    pub fn disable(&self) {
        self.inner.expire();
        self.inner.state.lock().disable_delay.stop();
    }

    /// Probe name
    #[must_use] pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Declared argument types
    #[must_use] pub fn types(&self) -> &[ArgType] {
        &self.inner.types
    }

    /// Whether updates emit immediately
    #[must_use] pub fn is_instant(&self) -> bool {
        self.inner.instant
    }

    /// Rate-limit floor in ms
    #[must_use] pub fn sample_threshold_ms(&self) -> u64 {
        self.inner.sample_threshold_ms
    }

    /// Whether some consumer keeps the probe enabled
    #[must_use] pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().enabled
    }

    /// Number of updates and increments so far
    #[must_use] pub fn hits(&self) -> u64 {
        self.inner.state.lock().hits
    }

    /// Consumers with a timer or an instant registration
    #[must_use] pub fn consumer_count(&self) -> usize {
        let state = self.inner.state.lock();
        state.consumer_timers.len() + state.instant_consumers.len()
    }

    /// Metadata record published by the `_probes` probe
    #[must_use] pub fn descriptor(&self) -> Value {
        json!({
            "name": self.inner.name,
            "types": self.inner.types,
            "instant": self.inner.instant,
            "sampleThreshold": self.inner.sample_threshold_ms,
        })
    }
}

impl ProbeInner {
    fn evaluate(self: &Arc<Self>, args: ProbeArgs, hits: u64, timestamp: i64, target: SampleTarget) {
        match args {
            ProbeArgs::Values(values) => {
                let sample = Sample { timestamp, hits, args: Some(values), error: None };
                self.emit(sample, &target);
            }
            ProbeArgs::Function(f) => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| f()))
                    .unwrap_or_else(|payload| Err(panicked(payload.as_ref())));
                let sample = self.to_sample(result, timestamp, hits);
                self.emit(sample, &target);
            }
            ProbeArgs::Callback(f) => {
                let responder = ArgsResponder { probe: Arc::downgrade(self), hits, target };
                let answered = responder.clone();
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(answered))) {
                    let sample = self.to_sample(Err(panicked(payload.as_ref())), timestamp, hits);
                    self.emit(sample, &responder.target);
                }
            }
        }
    }

    fn to_sample(&self, result: ProbeWireResult<Value>, timestamp: i64, hits: u64) -> Sample {
        match result {
            Ok(Value::Array(args)) => Sample { timestamp, hits, args: Some(args), error: None },
            Ok(value) => Sample { timestamp, hits, args: Some(vec![value]), error: None },
            Err(error) => {
                warn!(probe = %self.name, "probe arguments failed: {error}");
                Sample { timestamp, hits, args: None, error: Some(error.to_string()) }
            }
        }
    }

    fn emit(&self, sample: Sample, target: &SampleTarget) {
        let listener = self.state.lock().listener.clone();
        if let Some(listener) = listener {
            listener(&self.name, sample, target);
        }
    }

    fn expire(&self) {
        let mut state = self.state.lock();
        if state.enabled {
            debug!(probe = %self.name, "probe disabled");
        }
        state.enabled = false;
        state.consumer_timers.clear();
        state.instant_consumers.clear();
    }
}

fn add_offset(current: &Value, offset: f64) -> Option<Value> {
    if let Some(n) = current.as_i64() {
        if offset.fract() == 0.0 {
            if let Some(sum) = n.checked_add(offset as i64) {
                return Some(Value::from(sum));
            }
        }
    }
    current.as_f64().map(|n| number_value(n + offset))
}

fn panicked(payload: &(dyn Any + Send)) -> ProbeWireError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    ProbeWireError::evaluation(format!("probe argument function panicked: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(config: ProbeConfig) -> Probe {
        Probe::new(config, &ProviderSettings::default()).unwrap()
    }

    fn collect(probe: &Probe) -> Arc<Mutex<Vec<(Sample, SampleTarget)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        probe.set_listener(Arc::new(move |_, sample, target| sink.lock().push((sample, target.clone()))));
        seen
    }

    #[test]
    fn test_defaults_follow_types() {
        let p = probe(ProbeConfig::new("mixed").types(vec![ArgType::Number, ArgType::String, ArgType::Boolean]));
        let seen = collect(&p);
        assert!(p.sample(Some("c")));
        assert_eq!(seen.lock()[0].0.args, Some(vec![json!(0), json!(""), json!("")]));
        assert_eq!(p.sample_threshold_ms(), 1_000);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let settings = ProviderSettings::default();
        assert!(Probe::new(ProbeConfig::new(""), &settings).is_err());
        assert!(Probe::new(ProbeConfig::new("a.b"), &settings).is_err());
        assert!(Probe::new(ProbeConfig::new("a*"), &settings).is_err());
    }

    #[test]
    fn test_increment_keeps_integers() {
        let p = probe(ProbeConfig::new("calls").values(vec![json!(1), json!(1.5)]));
        let seen = collect(&p);
        p.increment(2.0, 0).unwrap();
        p.increment(1.0, 1).unwrap();
        assert_eq!(p.hits(), 2);
        p.sample(Some("c"));
        assert_eq!(seen.lock()[0].0.args, Some(vec![json!(3), json!(2.5)]));
    }

    #[test]
    fn test_increment_type_mismatch_mutates_nothing() {
        let p = probe(ProbeConfig::new("msg").values(vec![json!("text")]));
        let err = p.increment(1.0, 0).unwrap_err();
        assert!(matches!(err, ProbeWireError::TypeMismatch(_)));
        assert!(p.increment(1.0, 3).is_err());
        assert_eq!(p.hits(), 0);

        let computed = probe(ProbeConfig::new("up").function(|| Ok(json!(1))));
        assert!(matches!(computed.increment(1.0, 0), Err(ProbeWireError::TypeMismatch(_))));
    }

    #[test]
    fn test_function_results_are_wrapped() {
        let p = probe(ProbeConfig::new("up").function(|| Ok(json!(42))));
        let seen = collect(&p);
        p.sample(Some("c"));
        let p2 = probe(ProbeConfig::new("pair").function(|| Ok(json!([1, 2]))));
        let seen2 = collect(&p2);
        p2.sample(Some("c"));
        assert_eq!(seen.lock()[0].0.args, Some(vec![json!(42)]));
        assert_eq!(seen2.lock()[0].0.args, Some(vec![json!(1), json!(2)]));
    }

    #[test]
    fn test_function_failures_become_sample_errors() {
        let failing = probe(ProbeConfig::new("bad").function(|| Err(ProbeWireError::evaluation("disk gone"))));
        let seen = collect(&failing);
        failing.sample(Some("c"));
        let (sample, _) = seen.lock()[0].clone();
        assert_eq!(sample.args, None);
        assert!(sample.error.unwrap().contains("disk gone"));

        let panicking = probe(ProbeConfig::new("boom").function(|| panic!("kaboom")));
        let seen = collect(&panicking);
        assert!(panicking.sample(Some("c")));
        assert!(seen.lock()[0].0.error.as_deref().unwrap().contains("kaboom"));
    }

    #[test]
    fn test_callback_may_respond_many_times() {
        let p = probe(ProbeConfig::new("files").callback(|responder| {
            responder.respond(Ok(json!(1)));
            responder.respond(Ok(json!(2)));
        }));
        let seen = collect(&p);
        p.sample(Some("c"));
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].0.args, Some(vec![json!(2)]));
        assert_eq!(seen[1].1, SampleTarget::Consumer("c".to_string()));
    }

    #[test]
    fn test_non_instant_needs_a_consumer() {
        let p = probe(ProbeConfig::new("cpu").sample_threshold_ms(0));
        let seen = collect(&p);
        assert!(!p.sample(None));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_descriptor() {
        let p = probe(ProbeConfig::new("cpu").instant(true).sample_threshold_ms(0));
        assert_eq!(
            p.descriptor(),
            json!({"name": "cpu", "types": ["number"], "instant": true, "sampleThreshold": 0})
        );
    }
}
