//! Providers own a set of probes and connect them to the bus.
//!
//! A provider listens on the request channel, routes enable/sample/stop
//! requests to the probes they address and publishes every emitted sample
//! under `<provider>.<module>.<probe>.<consumer id | all>`.

use crate::probe::{ArgType, Probe, ProbeConfig, SampleTarget};
use parking_lot::Mutex;
use probewire_core::config::ProviderSettings;
use probewire_core::key::{routing_key, validate_name, Segment};
use probewire_core::{
    Binding, Connection, ControlRequest, ProbeKey, ProbeWireResult, RequestHandler, RequestKind, Sample,
    SampleEnvelope, Timer, Transport,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the built-in probe describing every probe of a provider
pub const PROBES_PROBE: &str = "_probes";

/// Provider declaration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider name; must not contain `.`, `#` or `*`
    pub name: String,
    /// Probes declared up front
    pub probes: Vec<ProbeConfig>,
}

impl ProviderConfig {
    /// Declaration without probes
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), probes: Vec::new() }
    }

    /// Declare a probe
    #[must_use] pub fn probe(mut self, probe: impl Into<ProbeConfig>) -> Self {
        self.probes.push(probe.into());
        self
    }
}

#[derive(Default)]
struct Link {
    module: Option<String>,
    connection: Option<Arc<dyn Connection>>,
    requests: Option<Binding>,
    reconnect: Timer,
}

struct ProviderInner {
    name: String,
    transport: Arc<dyn Transport>,
    settings: ProviderSettings,
    probes: Mutex<BTreeMap<String, Probe>>,
    link: Mutex<Link>,
}

/// Container of probes. Cloning shares the same provider.
#[derive(Clone)]
pub struct Provider {
    inner: Arc<ProviderInner>,
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.inner.name)
            .field("module", &self.module())
            .field("probes", &self.probe_names())
            .finish()
    }
}

impl Provider {
    /// Create a provider with its declared probes and the `_probes` probe
    pub fn new(
        config: ProviderConfig,
        transport: Arc<dyn Transport>,
        settings: ProviderSettings,
    ) -> ProbeWireResult<Self> {
        validate_name("provider name", &config.name)?;
        let provider = Self {
            inner: Arc::new(ProviderInner {
                name: config.name,
                transport,
                settings,
                probes: Mutex::new(BTreeMap::new()),
                link: Mutex::new(Link::default()),
            }),
        };
        for probe in config.probes {
            provider.add_probe(probe)?;
        }

        let weak = Arc::downgrade(&provider.inner);
        let introspection = ProbeConfig::new(PROBES_PROBE)
            .types(vec![ArgType::Object])
            .instant(true)
            .sample_threshold_ms(0)
            .callback(move |responder| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let probes: Vec<Probe> = inner.probes.lock().values().cloned().collect();
                for probe in probes {
                    responder.respond(Ok(probe.descriptor()));
                }
            });
        provider.add_probe(introspection)?;
        Ok(provider)
    }

    /// Declare a probe, replacing any probe with the same name
    pub fn add_probe(&self, config: impl Into<ProbeConfig>) -> ProbeWireResult<Probe> {
        let probe = Probe::new(config.into(), &self.inner.settings)?;
        let provider = Arc::downgrade(&self.inner);
        probe.set_listener(Arc::new(move |name: &str, sample: Sample, target: &SampleTarget| {
            if let Some(inner) = provider.upgrade() {
                inner.publish(name, sample, target);
            }
        }));
        self.inner.probes.lock().insert(probe.name().to_string(), probe.clone());
        Ok(probe)
    }

    /// Probe by name
    #[must_use] pub fn probe(&self, name: &str) -> Option<Probe> {
        self.inner.probes.lock().get(name).cloned()
    }

    /// Names of every probe, sorted
    #[must_use] pub fn probe_names(&self) -> Vec<String> {
        self.inner.probes.lock().keys().cloned().collect()
    }

    /// Update a probe, declaring it on first use
    pub fn update(&self, name: &str, values: Vec<Value>) -> ProbeWireResult<()> {
        self.probe_or_declare(name, |name| ProbeConfig::new(name))?.update(values);
        Ok(())
    }

    /// Increment a probe argument, declaring the probe on first use
    pub fn increment(&self, name: &str, offset: f64, index: usize) -> ProbeWireResult<()> {
        self.probe_or_declare(name, |name| ProbeConfig::new(name))?.increment(offset, index)
    }

    /// Update a probe that emits on every call. A probe declared here is
    /// instant with no rate limit; an existing probe keeps its declaration.
    pub fn sample(&self, name: &str, values: Vec<Value>) -> ProbeWireResult<()> {
        let probe = self.probe_or_declare(name, |name| {
            ProbeConfig::new(name).instant(true).sample_threshold_ms(0)
        })?;
        probe.update(values);
        Ok(())
    }

    fn probe_or_declare<F>(&self, name: &str, declare: F) -> ProbeWireResult<Probe>
    where
        F: FnOnce(&str) -> ProbeConfig,
    {
        match self.probe(name) {
            Some(probe) => Ok(probe),
            None => self.add_probe(declare(name)),
        }
    }

    /// Attach to the bus as `module` and keep reconnecting while started
    pub fn start(&self, module: &str) -> ProbeWireResult<()> {
        validate_name("module name", module)?;
        self.inner.link.lock().module = Some(module.to_string());
        info!(provider = %self.inner.name, module, "provider starting");

        self.inner.connect();
        let provider = Arc::downgrade(&self.inner);
        self.inner.link.lock().reconnect.start(self.inner.settings.reconnect_interval(), move || {
            if let Some(inner) = provider.upgrade() {
                if !inner.is_connected() {
                    inner.connect();
                }
            }
        });
        Ok(())
    }

    /// Stop reconnecting and leave the bus
    pub fn stop(&self) {
        self.inner.link.lock().reconnect.stop();
        self.inner.disconnect();
        info!(provider = %self.inner.name, "provider stopped");
    }

    /// Provider name
    #[must_use] pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Module given to the last `start`
    #[must_use] pub fn module(&self) -> Option<String> {
        self.inner.link.lock().module.clone()
    }

    /// Whether the bus connection is up
    #[must_use] pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
}

impl ProviderInner {
    fn is_connected(&self) -> bool {
        self.link.lock().connection.as_ref().is_some_and(|c| c.is_open())
    }

    fn connect(self: &Arc<Self>) {
        let connection = match self.transport.connect() {
            Ok(connection) => connection,
            Err(error) => {
                warn!(provider = %self.name, "connect failed: {error}");
                return;
            }
        };
        let provider = Arc::downgrade(self);
        let handler: RequestHandler = Arc::new(move |request| {
            if let Some(inner) = provider.upgrade() {
                inner.handle_request(&request);
            }
        });
        match connection.subscribe_requests(handler) {
            Ok(binding) => {
                let mut link = self.link.lock();
                link.requests = Some(binding);
                if let Some(stale) = link.connection.replace(connection) {
                    stale.close();
                }
                info!(provider = %self.name, "provider connected");
            }
            Err(error) => {
                warn!(provider = %self.name, "request subscription failed: {error}");
                connection.close();
            }
        }
    }

    fn disconnect(&self) {
        let (requests, connection) = {
            let mut link = self.link.lock();
            (link.requests.take(), link.connection.take())
        };
        drop(requests);
        if let Some(connection) = connection {
            connection.close();
            info!(provider = %self.name, "provider disconnected");
        }
    }

    fn handle_request(&self, request: &ControlRequest) {
        if request.consumer_id.is_empty() {
            return;
        }
        let Ok(key) = ProbeKey::parse(&request.probe_key) else {
            debug!(provider = %self.name, probe_key = %request.probe_key, "ignoring malformed probe key");
            return;
        };
        let Some(module) = self.link.lock().module.clone() else {
            return;
        };
        if !key.provider.matches(&self.name) || !key.module.matches(&module) {
            return;
        }

        let probes: Vec<Probe> = {
            let probes = self.probes.lock();
            match &key.probe {
                Segment::Any => probes.values().cloned().collect(),
                Segment::Literal(name) => probes.get(name).cloned().into_iter().collect(),
            }
        };
        for probe in probes {
            let probe_key = format!("{}.{module}.{}", self.name, probe.name());
            debug!(probe = %probe_key, consumer = %request.consumer_id, request = ?request.request, "control request");
            match request.request {
                RequestKind::Sample => {
                    probe.sample(Some(request.consumer_id.as_str()));
                }
                RequestKind::Enable => {
                    probe.enable_for_consumer(&request.consumer_id, request.interval_ms(), &probe_key);
                }
                RequestKind::Stop => probe.stop(&request.consumer_id),
            }
        }
    }

    fn publish(&self, probe: &str, sample: Sample, target: &SampleTarget) {
        let (module, connection) = {
            let link = self.link.lock();
            match (&link.module, &link.connection) {
                (Some(module), Some(connection)) => (module.clone(), connection.clone()),
                _ => return,
            }
        };
        let key = routing_key(&self.name, &module, probe, target.routing_suffix());
        let envelope = SampleEnvelope::new(&self.name, &module, probe, sample);
        if let Err(error) = connection.publish_sample(&key, &envelope) {
            warn!(provider = %self.name, routing_key = %key, "publish failed, dropping connection: {error}");
            self.disconnect();
        }
    }
}

impl Drop for ProviderInner {
    fn drop(&mut self) {
        let link = self.link.get_mut();
        link.reconnect.stop();
        drop(link.requests.take());
        if let Some(connection) = link.connection.take() {
            connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probewire_core::MemoryBroker;

    fn provider(config: ProviderConfig) -> ProbeWireResult<Provider> {
        Provider::new(config, Arc::new(MemoryBroker::new()), ProviderSettings::default())
    }

    #[test]
    fn test_declared_probes_and_introspection() {
        let p = provider(ProviderConfig::new("host").probe("cpu").probe("mem")).unwrap();
        assert_eq!(p.probe_names(), vec!["_probes", "cpu", "mem"]);
        assert!(p.probe(PROBES_PROBE).unwrap().is_instant());
    }

    #[test]
    fn test_invalid_names() {
        assert!(provider(ProviderConfig::new("my.host")).is_err());
        assert!(provider(ProviderConfig::new("host").probe("a#b")).is_err());
    }

    #[test]
    fn test_lazy_declaration() {
        let p = provider(ProviderConfig::new("host")).unwrap();
        p.increment("calls", 1.0, 0).unwrap();
        p.increment("calls", 1.0, 0).unwrap();
        assert_eq!(p.probe("calls").unwrap().hits(), 2);

        p.sample("event", vec![Value::from("boot")]).unwrap();
        let event = p.probe("event").unwrap();
        assert!(event.is_instant());
        assert_eq!(event.sample_threshold_ms(), 0);
    }

    #[tokio::test]
    async fn test_start_rejects_bad_module() {
        let p = provider(ProviderConfig::new("host")).unwrap();
        assert!(p.start("a.b").is_err());
        assert!(!p.is_connected());
        p.start("os").unwrap();
        assert!(p.is_connected());
        assert_eq!(p.module().as_deref(), Some("os"));
        p.stop();
        assert!(!p.is_connected());
    }
}
