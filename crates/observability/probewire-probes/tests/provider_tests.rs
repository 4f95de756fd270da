use parking_lot::Mutex;
use probewire_core::{
    Binding, Connection, ControlRequest, MemoryBroker, ProviderSettings, RequestKind, SampleEnvelope, Transport,
};
use probewire_probes::{ProbeConfig, Provider, ProviderConfig};
use serde_json::json;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

type Received = Arc<Mutex<Vec<SampleEnvelope>>>;

struct Harness {
    broker: MemoryBroker,
    provider: Provider,
    client: Arc<dyn Connection>,
}

impl Harness {
    fn new() -> Self {
        let broker = MemoryBroker::new();
        let settings = ProviderSettings { reconnect_interval_ms: 500, ..ProviderSettings::default() };
        let provider = Provider::new(
            ProviderConfig::new("host")
                .probe(ProbeConfig::new("cpu").values(vec![json!(10)]).sample_threshold_ms(0))
                .probe(ProbeConfig::new("mem").values(vec![json!(512)]).sample_threshold_ms(0))
                .probe(ProbeConfig::new("event").instant(true).sample_threshold_ms(0)),
            Arc::new(broker.clone()),
            settings,
        )
        .unwrap();
        provider.start("os").unwrap();
        let client = broker.connect().unwrap();
        Self { broker, provider, client }
    }

    fn bind(&self, pattern: &str) -> (Binding, Received) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let binding = self
            .client
            .bind_samples(&[pattern.to_string()], Arc::new(move |e| sink.lock().push(e)))
            .unwrap();
        (binding, received)
    }

    async fn request(&self, kind: RequestKind, key: &str, args: Vec<serde_json::Value>) {
        let request = ControlRequest::new(kind, key, "c1").with_args(args);
        self.client.publish_request(&request).unwrap();
        sleep(Duration::from_millis(1)).await;
    }
}

fn probes(received: &Received) -> Vec<String> {
    let mut names: Vec<String> = received.lock().iter().map(|e| e.probe.clone()).collect();
    names.sort();
    names
}

#[tokio::test(start_paused = true)]
async fn test_sample_request_routing() {
    let h = Harness::new();
    let (_binding, received) = h.bind("host.os.*.c1");

    h.request(RequestKind::Sample, "host.os.cpu", vec![]).await;
    assert_eq!(probes(&received), vec!["cpu"]);
    let envelope = received.lock()[0].clone();
    assert_eq!((envelope.provider.as_str(), envelope.module.as_str()), ("host", "os"));
    assert_eq!(envelope.args, Some(vec![json!(10)]));

    received.lock().clear();
    h.request(RequestKind::Sample, "*.os.mem", vec![]).await;
    h.request(RequestKind::Sample, "host.web.cpu", vec![]).await;
    h.request(RequestKind::Sample, "db.*.cpu", vec![]).await;
    h.request(RequestKind::Sample, "host.os.disk", vec![]).await;
    h.request(RequestKind::Sample, "host.os", vec![]).await;
    assert_eq!(probes(&received), vec!["mem"]);
}

#[tokio::test(start_paused = true)]
async fn test_wildcard_probe_expands_to_every_probe() {
    let h = Harness::new();
    let (_binding, received) = h.bind("host.os.#");

    h.request(RequestKind::Sample, "*.*.*", vec![]).await;
    let names = probes(&received);
    // `_probes` answers once per declared probe, itself included
    assert_eq!(names.iter().filter(|n| *n == "_probes").count(), 4);
    assert!(names.contains(&"cpu".to_string()));
    assert!(names.contains(&"mem".to_string()));
    assert!(names.contains(&"event".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_probes_probe_describes_probes() {
    let h = Harness::new();
    let (_binding, received) = h.bind("host.os._probes.c1");

    h.request(RequestKind::Sample, "host.os._probes", vec![]).await;
    let descriptors: Vec<serde_json::Value> = received
        .lock()
        .iter()
        .map(|e| e.args.clone().unwrap()[0].clone())
        .collect();
    assert_eq!(descriptors.len(), 4);
    let cpu = descriptors.iter().find(|d| d["name"] == "cpu").unwrap();
    assert_eq!(cpu, &json!({"name": "cpu", "types": ["number"], "instant": false, "sampleThreshold": 0}));
    let event = descriptors.iter().find(|d| d["name"] == "event").unwrap();
    assert_eq!(event["instant"], json!(true));
}

#[tokio::test(start_paused = true)]
async fn test_enable_and_stop_requests() {
    let h = Harness::new();
    let (_binding, received) = h.bind("host.os.cpu.c1");

    h.request(RequestKind::Enable, "host.os.cpu", vec![json!(100)]).await;
    assert!(h.provider.probe("cpu").unwrap().is_enabled());
    sleep(Duration::from_millis(350)).await;
    assert_eq!(received.lock().len(), 3);

    h.request(RequestKind::Stop, "host.os.cpu", vec![]).await;
    sleep(Duration::from_millis(500)).await;
    assert_eq!(received.lock().len(), 3);
    assert_eq!(h.provider.probe("cpu").unwrap().consumer_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_instant_updates_are_broadcast() {
    let h = Harness::new();
    let (_all, broadcast) = h.bind("host.os.event.all");
    let (_own, direct) = h.bind("host.os.event.c1");

    h.provider.update("event", vec![json!("ignored")]).unwrap();
    h.request(RequestKind::Enable, "host.os.event", vec![json!(100)]).await;
    h.provider.update("event", vec![json!("boot")]).unwrap();
    h.provider.update("event", vec![json!("ready")]).unwrap();
    sleep(Duration::from_millis(1)).await;

    let args: Vec<_> = broadcast.lock().iter().map(|e| e.args.clone().unwrap()[0].clone()).collect();
    assert_eq!(args, vec![json!("boot"), json!("ready")]);
    assert!(direct.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_connection_loss() {
    let mut h = Harness::new();
    assert!(h.provider.is_connected());

    h.broker.sever();
    assert!(!h.provider.is_connected());
    h.client = h.broker.connect().unwrap();
    let (_binding, received) = h.bind("host.os.cpu.c1");
    h.request(RequestKind::Sample, "host.os.cpu", vec![]).await;
    assert!(received.lock().is_empty());

    sleep(Duration::from_millis(600)).await;
    assert!(h.provider.is_connected());
    h.request(RequestKind::Sample, "host.os.cpu", vec![]).await;
    assert_eq!(received.lock().len(), 1);

    h.provider.stop();
    sleep(Duration::from_millis(1_000)).await;
    assert!(!h.provider.is_connected());
    assert_eq!(h.broker.connection_count(), 1);
}
