//! Demo: a provider publishing a wandering load figure and a request counter,
//! and a consumer averaging both per one second window, over an in-process
//! broker.
//!
//! Usage: `probewire-demo [settings.toml|settings.json]`

use anyhow::Context;
use probewire_core::config::{EnvConfigSource, FileConfigSource, ENV_PREFIX};
use probewire_core::{init_tracing, ConfigLoader, MemoryBroker};
use probewire_probes::{Consumer, ProbeConfig, Provider, ProviderConfig, StopOptions, SubscriptionTarget};
use probewire_streams::QueryConfig;
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = std::env::args().nth(1) {
        loader = loader.add_source(FileConfigSource::auto_detect(&path)?);
    }
    let settings = loader
        .add_source(EnvConfigSource::new(ENV_PREFIX))
        .load()
        .context("loading settings")?;
    init_tracing(&settings.logging)?;

    let broker = Arc::new(MemoryBroker::new());
    let load = Arc::new(AtomicI64::new(50));
    let reading = load.clone();
    let provider = Provider::new(
        ProviderConfig::new("host")
            .probe(
                ProbeConfig::new("load")
                    .sample_threshold_ms(0)
                    .function(move || Ok(json!(reading.load(Ordering::Relaxed)))),
            )
            .probe(ProbeConfig::new("requests").instant(true).sample_threshold_ms(0)),
        broker.clone(),
        settings.provider.clone(),
    )?;
    provider.start("demo")?;

    let consumer = Consumer::new(broker.clone(), settings.consumer.clone());
    let query = QueryConfig::new()
        .window("1000")?
        .group("probe")?
        .aggregate("average(args[0])")
        .with_callback(|result| info!(%result, "window"));
    consumer.start(SubscriptionTarget::new("host.demo.*").with_sample_interval(200), query)?;
    info!(consumer = consumer.id(), "demo running for 5 seconds");

    for tick in 0..25_i64 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let step = (tick * 7_919) % 11 - 5;
        let next = (load.load(Ordering::Relaxed) + step).clamp(0, 100);
        load.store(next, Ordering::Relaxed);
        provider.increment("requests", 1.0, 0)?;
    }

    consumer.stop(StopOptions::default().with_disconnect(true));
    provider.stop();
    Ok(())
}
