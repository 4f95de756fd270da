use parking_lot::Mutex;
use probewire_core::key::{routing_key, ALL_CONSUMERS};
use probewire_core::{
    Connection, ControlRequest, MemoryBroker, ProbeKey, RequestKind, Sample, SampleEnvelope, Transport,
};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

#[tokio::test(start_paused = true)]
async fn test_request_and_sample_round_trip() {
    let broker = MemoryBroker::new();
    let provider = broker.connect().unwrap();
    let consumer = broker.connect().unwrap();

    let requests = Arc::new(Mutex::new(Vec::new()));
    let sink = requests.clone();
    let _requests = provider
        .subscribe_requests(Arc::new(move |r: ControlRequest| sink.lock().push(r)))
        .unwrap();

    let key = ProbeKey::normalize("..cpu").unwrap();
    let samples = Arc::new(Mutex::new(Vec::new()));
    let sink = samples.clone();
    let _samples = consumer
        .bind_samples(
            &[key.routing_pattern("c1"), key.routing_pattern(ALL_CONSUMERS)],
            Arc::new(move |e: SampleEnvelope| sink.lock().push(e)),
        )
        .unwrap();

    consumer
        .publish_request(&ControlRequest::new(RequestKind::Enable, key.to_string(), "c1"))
        .unwrap();
    sleep(Duration::from_millis(1)).await;
    assert_eq!(requests.lock().len(), 1);
    assert_eq!(requests.lock()[0].probe_key, "*.*.cpu");

    let sample = Sample { timestamp: 10, hits: 1, args: Some(vec![serde_json::json!(0.5)]), error: None };
    let envelope = SampleEnvelope::new("host", "os", "cpu", sample);
    provider.publish_sample(&routing_key("host", "os", "cpu", "c1"), &envelope).unwrap();
    provider.publish_sample(&routing_key("host", "os", "cpu", "c2"), &envelope).unwrap();
    provider.publish_sample(&routing_key("host", "os", "cpu", ALL_CONSUMERS), &envelope).unwrap();
    sleep(Duration::from_millis(1)).await;

    assert_eq!(samples.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_closed_connection_stops_delivery() {
    let broker = MemoryBroker::new();
    let provider = broker.connect().unwrap();
    let count = Arc::new(Mutex::new(0usize));
    let sink = count.clone();
    let _binding = provider
        .subscribe_requests(Arc::new(move |_| *sink.lock() += 1))
        .unwrap();

    provider.close();
    assert!(!provider.is_open());

    let consumer = broker.connect().unwrap();
    consumer
        .publish_request(&ControlRequest::new(RequestKind::Sample, "a.b.c", "c"))
        .unwrap();
    sleep(Duration::from_millis(1)).await;
    assert_eq!(*count.lock(), 0);
    assert_eq!(broker.connection_count(), 1);
}
