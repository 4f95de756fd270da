//! Consumers subscribe to probes and feed their samples into a stream.
//!
//! A consumer runs at most one subscription at a time. While it runs, the
//! consumer keeps the matching probes enabled by re-publishing enable
//! requests, and pushes every received sample into a [`Subject`] that feeds
//! either a caller supplied pipeline or a compiled query.

use parking_lot::Mutex;
use probewire_core::config::ConsumerSettings;
use probewire_core::key::ALL_CONSUMERS;
use probewire_core::{
    Binding, Connection, ControlRequest, Delay, ProbeKey, ProbeWireError, ProbeWireResult, RequestKind,
    SampleHandler, Timer, Transport,
};
use probewire_streams::{Observable, Observer, QueryCompiler, QueryConfig, Subject, Subscription};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a consumer subscribes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionTarget {
    /// Probe key pattern; elided segments become wildcards
    pub probe_key: String,
    /// Interval requested from timer driven probes; consumer default when `None`
    pub sample_interval_ms: Option<u64>,
}

impl SubscriptionTarget {
    /// Target with the default interval
    pub fn new(probe_key: impl Into<String>) -> Self {
        Self { probe_key: probe_key.into(), sample_interval_ms: None }
    }

    /// Request samples every `interval_ms`
    #[must_use] pub fn with_sample_interval(mut self, interval_ms: u64) -> Self {
        self.sample_interval_ms = Some(interval_ms);
        self
    }
}

impl From<&str> for SubscriptionTarget {
    fn from(probe_key: &str) -> Self {
        SubscriptionTarget::new(probe_key)
    }
}

impl From<String> for SubscriptionTarget {
    fn from(probe_key: String) -> Self {
        SubscriptionTarget::new(probe_key)
    }
}

type Attach = Box<dyn FnOnce(Observable<Value>) -> Subscription + Send>;

/// What to do with the sample stream
pub enum Handler {
    /// Receive the raw stream of sample records and subscribe to it
    Stream(Attach),
    /// Run a query; results go to its callback
    Query(QueryConfig),
}

impl Handler {
    /// Stream handler from a closure
    pub fn stream<F>(attach: F) -> Self
    where
        F: FnOnce(Observable<Value>) -> Subscription + Send + 'static,
    {
        Handler::Stream(Box::new(attach))
    }
}

impl From<QueryConfig> for Handler {
    fn from(config: QueryConfig) -> Self {
        Handler::Query(config)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Stream(_) => f.write_str("Stream"),
            Handler::Query(config) => f.debug_tuple("Query").field(config).finish(),
        }
    }
}

/// How to stop a consumer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopOptions {
    /// Defer the stop
    pub wait: Option<Duration>,
    /// Close the connection now instead of after the grace period
    pub disconnect: bool,
}

impl StopOptions {
    /// Stop after `wait`
    #[must_use] pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    /// Close the connection immediately
    #[must_use] pub fn with_disconnect(mut self, disconnect: bool) -> Self {
        self.disconnect = disconnect;
        self
    }
}

struct Active {
    key: ProbeKey,
    interval_ms: u64,
    subject: Subject<Value>,
    pipeline: Subscription,
}

#[derive(Default)]
struct ConsumerState {
    active: Option<Active>,
    connection: Option<Arc<dyn Connection>>,
    samples: Option<Binding>,
    reconnect: Timer,
    request_enable: Timer,
    connection_end: Delay,
    deferred_stop: Delay,
}

struct ConsumerInner {
    id: String,
    transport: Arc<dyn Transport>,
    settings: ConsumerSettings,
    state: Mutex<ConsumerState>,
}

/// Remote reader of probe samples. Cloning shares the same consumer.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.inner.id)
            .field("busy", &self.is_busy())
            .finish()
    }
}

fn busy() -> ProbeWireError {
    ProbeWireError::concurrency("Consumer is busy. It must stop first.")
}

impl Consumer {
    /// Idle consumer with a fresh id
    pub fn new(transport: Arc<dyn Transport>, settings: ConsumerSettings) -> Self {
        Self {
            inner: Arc::new(ConsumerInner {
                id: Uuid::new_v4().to_string(),
                transport,
                settings,
                state: Mutex::new(ConsumerState::default()),
            }),
        }
    }

    /// Unique consumer id
    #[must_use] pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Whether a subscription is running
    #[must_use] pub fn is_busy(&self) -> bool {
        self.inner.state.lock().active.is_some()
    }

    /// Pattern of the running subscription
    #[must_use] pub fn probe_key(&self) -> Option<ProbeKey> {
        self.inner.state.lock().active.as_ref().map(|active| active.key.clone())
    }

    /// Subscribe to `target` and hand the samples to `handler`.
    ///
    /// The key is normalised and a query handler compiled before anything
    /// changes, so a rejected call leaves the consumer idle.
    pub fn start(&self, target: impl Into<SubscriptionTarget>, handler: impl Into<Handler>) -> ProbeWireResult<()> {
        if self.is_busy() {
            return Err(busy());
        }
        let target = target.into();
        let key = ProbeKey::normalize(&target.probe_key)?;
        let interval_ms = target
            .sample_interval_ms
            .unwrap_or(self.inner.settings.default_sample_interval_ms);
        let attach: Attach = match handler.into() {
            Handler::Stream(attach) => attach,
            Handler::Query(config) => {
                let query = QueryCompiler::compile(&config)?;
                Box::new(move |source: Observable<Value>| query.subscribe(&source))
            }
        };

        let subject = Subject::new();
        let pipeline = attach(subject.as_observable());
        {
            let mut state = self.inner.state.lock();
            if state.active.is_some() {
                drop(state);
                pipeline.unsubscribe();
                return Err(busy());
            }
            state.active = Some(Active { key: key.clone(), interval_ms, subject, pipeline });
        }
        info!(consumer = %self.inner.id, probe_key = %key, interval_ms, "consumer started");

        self.inner.connect();
        let consumer = Arc::downgrade(&self.inner);
        self.inner.state.lock().reconnect.start(self.inner.settings.reconnect_interval(), move || {
            if let Some(inner) = consumer.upgrade() {
                inner.reconnect_if_needed();
            }
        });
        Ok(())
    }

    /// Stop the running subscription.
    ///
    /// Pending aggregates are flushed to the handler before the pipeline is
    /// disposed. Without `disconnect` the connection stays open for the
    /// grace period so a following `start` can reuse it. Stopping an idle
    /// consumer does nothing.
    pub fn stop(&self, options: StopOptions) {
        if let Some(wait) = options.wait {
            let consumer = Arc::downgrade(&self.inner);
            let disconnect = options.disconnect;
            self.inner.state.lock().deferred_stop.start(wait, move || {
                if let Some(inner) = consumer.upgrade() {
                    inner.stop_now(disconnect);
                }
            });
            return;
        }
        self.inner.state.lock().deferred_stop.stop();
        self.inner.stop_now(options.disconnect);
    }

    /// Deliver the first sample matching `target` to `callback`, then stop
    pub fn sample<F>(&self, target: impl Into<SubscriptionTarget>, callback: F) -> ProbeWireResult<()>
    where
        F: FnOnce(Value) + Send + 'static,
    {
        let consumer = Arc::downgrade(&self.inner);
        let callback = Mutex::new(Some(callback));
        self.start(
            target,
            Handler::stream(move |source: Observable<Value>| {
                source.take(1).subscribe_next(move |record| {
                    if let Some(callback) = callback.lock().take() {
                        callback(record);
                    }
                    if let Some(inner) = consumer.upgrade() {
                        inner.stop_now(false);
                    }
                })
            }),
        )
    }
}

impl ConsumerInner {
    fn connect(self: &Arc<Self>) {
        let existing = {
            let mut state = self.state.lock();
            state.connection_end.stop();
            state.connection.clone().filter(|c| c.is_open())
        };
        let connection = match existing {
            Some(connection) => connection,
            None => match self.transport.connect() {
                Ok(connection) => {
                    self.state.lock().connection = Some(connection.clone());
                    info!(consumer = %self.id, "consumer connected");
                    connection
                }
                Err(error) => {
                    warn!(consumer = %self.id, "connect failed: {error}");
                    return;
                }
            },
        };
        self.open(&connection);
    }

    fn open(self: &Arc<Self>, connection: &Arc<dyn Connection>) {
        let Some((key, interval_ms)) = self.subscription() else {
            return;
        };
        if !self.request(connection, RequestKind::Enable, &key, vec![json!(interval_ms)]) {
            return;
        }
        let consumer = Arc::downgrade(self);
        self.state.lock().request_enable.start(self.settings.request_enable_interval(), move || {
            if let Some(inner) = consumer.upgrade() {
                inner.refresh_enable();
            }
        });

        let patterns = vec![key.routing_pattern(&self.id), key.routing_pattern(ALL_CONSUMERS)];
        let consumer = Arc::downgrade(self);
        let handler: SampleHandler = Arc::new(move |envelope| {
            if let Some(inner) = consumer.upgrade() {
                inner.deliver(envelope.to_value());
            }
        });
        match connection.bind_samples(&patterns, handler) {
            Ok(binding) => self.state.lock().samples = Some(binding),
            Err(error) => {
                warn!(consumer = %self.id, "sample binding failed: {error}");
                self.drop_connection();
                return;
            }
        }
        self.request(connection, RequestKind::Sample, &key, Vec::new());
    }

    fn subscription(&self) -> Option<(ProbeKey, u64)> {
        let state = self.state.lock();
        state.active.as_ref().map(|active| (active.key.clone(), active.interval_ms))
    }

    fn open_connection(&self) -> Option<Arc<dyn Connection>> {
        self.state.lock().connection.clone().filter(|c| c.is_open())
    }

    /// Publish a control request; a failure drops the connection
    fn request(&self, connection: &Arc<dyn Connection>, kind: RequestKind, key: &ProbeKey, args: Vec<Value>) -> bool {
        let request = ControlRequest::new(kind, key.to_string(), self.id.as_str()).with_args(args);
        match connection.publish_request(&request) {
            Ok(()) => true,
            Err(error) => {
                warn!(consumer = %self.id, request = ?kind, "request failed, dropping connection: {error}");
                self.drop_connection();
                false
            }
        }
    }

    fn refresh_enable(&self) {
        let (Some((key, interval_ms)), Some(connection)) = (self.subscription(), self.open_connection()) else {
            return;
        };
        self.request(&connection, RequestKind::Enable, &key, vec![json!(interval_ms)]);
    }

    fn deliver(&self, record: Value) {
        let subject = self.state.lock().active.as_ref().map(|active| active.subject.clone());
        if let Some(subject) = subject {
            subject.on_next(record);
        }
    }

    fn reconnect_if_needed(self: &Arc<Self>) {
        let stale = {
            let state = self.state.lock();
            state.active.is_some() && !state.connection.as_ref().is_some_and(|c| c.is_open())
        };
        if stale {
            debug!(consumer = %self.id, "reconnecting");
            self.drop_connection();
            self.connect();
        }
    }

    fn drop_connection(&self) {
        let (samples, connection) = {
            let mut state = self.state.lock();
            state.request_enable.stop();
            (state.samples.take(), state.connection.take())
        };
        drop(samples);
        if let Some(connection) = connection {
            connection.close();
        }
    }

    fn stop_now(self: &Arc<Self>, disconnect: bool) {
        let (active, samples) = {
            let mut state = self.state.lock();
            state.reconnect.stop();
            state.request_enable.stop();
            (state.active.take(), state.samples.take())
        };
        if let Some(active) = active {
            if let Some(connection) = self.open_connection() {
                self.request(&connection, RequestKind::Stop, &active.key, Vec::new());
            }
            active.subject.on_completed();
            active.pipeline.unsubscribe();
            info!(consumer = %self.id, probe_key = %active.key, "consumer stopped");
        }
        drop(samples);
        self.disconnect(disconnect);
    }

    fn disconnect(self: &Arc<Self>, immediate: bool) {
        let mut state = self.state.lock();
        state.connection_end.stop();
        if immediate {
            if let Some(connection) = state.connection.take() {
                connection.close();
                info!(consumer = %self.id, "consumer disconnected");
            }
        } else if state.connection.is_some() {
            let consumer = Arc::downgrade(self);
            state.connection_end.start(self.settings.connection_end_wait(), move || {
                if let Some(inner) = consumer.upgrade() {
                    inner.disconnect(true);
                }
            });
        }
    }
}

impl Drop for ConsumerInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        drop(state.samples.take());
        if let Some(connection) = state.connection.take() {
            connection.close();
        }
    }
}
