//! Message bus abstraction and the in-process broker.
//!
//! Two channels connect providers and consumers:
//!
//! - a fanout *requests* channel every provider listens on;
//! - a topic *samples* channel routed by `provider.module.probe.target`.
//!
//! The broker behind a [`Transport`] is pluggable. [`MemoryBroker`] keeps
//! everything in process and is what the tests and the demo use.

use crate::key::topic_matches;
use crate::message::{ControlRequest, SampleEnvelope};
use crate::{ProbeWireError, ProbeWireResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Callback for incoming control requests
pub type RequestHandler = Arc<dyn Fn(ControlRequest) + Send + Sync>;
/// Callback for incoming samples
pub type SampleHandler = Arc<dyn Fn(SampleEnvelope) + Send + Sync>;

/// Opens connections to a broker
pub trait Transport: Send + Sync {
    /// Open a new connection
    fn connect(&self) -> ProbeWireResult<Arc<dyn Connection>>;
}

/// An open broker connection
pub trait Connection: Send + Sync {
    /// Broadcast a control request to every provider
    fn publish_request(&self, request: &ControlRequest) -> ProbeWireResult<()>;

    /// Receive every control request until the binding is dropped
    fn subscribe_requests(&self, handler: RequestHandler) -> ProbeWireResult<Binding>;

    /// Publish a sample under `routing_key`
    fn publish_sample(&self, routing_key: &str, envelope: &SampleEnvelope) -> ProbeWireResult<()>;

    /// Receive samples whose routing key matches any pattern; a sample
    /// matching several patterns is delivered once
    fn bind_samples(&self, patterns: &[String], handler: SampleHandler) -> ProbeWireResult<Binding>;

    /// Close the connection and drop its queues
    fn close(&self);

    /// Whether the connection is usable
    fn is_open(&self) -> bool;
}

/// Active subscription on a connection; dropping it unbinds
pub struct Binding {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Binding {
    /// Binding that runs `cancel` when released
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self { cancel: Some(Box::new(cancel)) }
    }

    /// Release now
    pub fn unbind(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding").field("bound", &self.cancel.is_some()).finish()
    }
}

struct RequestQueue {
    connection: u64,
    tx: mpsc::UnboundedSender<ControlRequest>,
}

struct SampleQueue {
    connection: u64,
    patterns: Vec<String>,
    tx: mpsc::UnboundedSender<SampleEnvelope>,
}

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    connections: HashMap<u64, Arc<AtomicBool>>,
    request_queues: HashMap<u64, RequestQueue>,
    sample_queues: HashMap<u64, SampleQueue>,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn drop_connection(&mut self, connection: u64) {
        if let Some(open) = self.connections.remove(&connection) {
            open.store(false, Ordering::SeqCst);
        }
        self.request_queues.retain(|_, q| q.connection != connection);
        self.sample_queues.retain(|_, q| q.connection != connection);
    }
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    available: AtomicBool,
}

/// In-process broker. Cloning shares the same broker.
///
/// Every binding owns an unbounded queue drained by its own Tokio task, so
/// handlers never run on the publisher's stack.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("connections", &self.connection_count())
            .field("available", &self.is_available())
            .finish()
    }
}

impl MemoryBroker {
    /// Create an empty, reachable broker
    #[must_use] pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Toggle reachability; while unavailable `connect` fails
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Whether `connect` currently succeeds
    #[must_use] pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Close every open connection, as a broker restart would
    pub fn sever(&self) {
        let mut state = self.inner.state.lock();
        let ids: Vec<u64> = state.connections.keys().copied().collect();
        for id in ids {
            state.drop_connection(id);
        }
        debug!("memory broker severed all connections");
    }

    /// Number of open connections
    #[must_use] pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }
}

impl Transport for MemoryBroker {
    fn connect(&self) -> ProbeWireResult<Arc<dyn Connection>> {
        if !self.is_available() {
            return Err(ProbeWireError::transport("memory broker is unavailable"));
        }
        let open = Arc::new(AtomicBool::new(true));
        let id = {
            let mut state = self.inner.state.lock();
            let id = state.next_id();
            state.connections.insert(id, open.clone());
            id
        };
        trace!(connection = id, "memory broker connection opened");
        Ok(Arc::new(MemoryConnection { id, open, broker: self.inner.clone() }))
    }
}

struct MemoryConnection {
    id: u64,
    open: Arc<AtomicBool>,
    broker: Arc<BrokerInner>,
}

impl MemoryConnection {
    fn ensure_open(&self) -> ProbeWireResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ProbeWireError::transport("connection is closed"))
        }
    }

    fn unbind_on_drop(&self, queue: u64) -> Binding {
        let broker = Arc::downgrade(&self.broker);
        Binding::new(move || {
            if let Some(broker) = broker.upgrade() {
                let mut state = broker.state.lock();
                state.request_queues.remove(&queue);
                state.sample_queues.remove(&queue);
            }
        })
    }
}

impl Connection for MemoryConnection {
    fn publish_request(&self, request: &ControlRequest) -> ProbeWireResult<()> {
        self.ensure_open()?;
        let state = self.broker.state.lock();
        for queue in state.request_queues.values() {
            let _ = queue.tx.send(request.clone());
        }
        Ok(())
    }

    fn subscribe_requests(&self, handler: RequestHandler) -> ProbeWireResult<Binding> {
        self.ensure_open()?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = {
            let mut state = self.broker.state.lock();
            let queue = state.next_id();
            state.request_queues.insert(queue, RequestQueue { connection: self.id, tx });
            queue
        };
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                handler(request);
            }
        });
        Ok(self.unbind_on_drop(queue))
    }

    fn publish_sample(&self, routing_key: &str, envelope: &SampleEnvelope) -> ProbeWireResult<()> {
        self.ensure_open()?;
        let state = self.broker.state.lock();
        for queue in state.sample_queues.values() {
            if queue.patterns.iter().any(|p| topic_matches(p, routing_key)) {
                let _ = queue.tx.send(envelope.clone());
            }
        }
        Ok(())
    }

    fn bind_samples(&self, patterns: &[String], handler: SampleHandler) -> ProbeWireResult<Binding> {
        self.ensure_open()?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = {
            let mut state = self.broker.state.lock();
            let queue = state.next_id();
            state.sample_queues.insert(
                queue,
                SampleQueue { connection: self.id, patterns: patterns.to_vec(), tx },
            );
            queue
        };
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                handler(envelope);
            }
        });
        Ok(self.unbind_on_drop(queue))
    }

    fn close(&self) {
        self.broker.state.lock().drop_connection(self.id);
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
