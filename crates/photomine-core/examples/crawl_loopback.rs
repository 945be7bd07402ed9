//! Loopback demo - discover two scripted media servers and index their photos.
//!
//! Pass a database path to keep the index, or run without arguments to use an
//! in-memory one. Set `--debug` for verbose logging.

use photomine_core::transport::memory::{MemoryDaemon, MemoryDevice, MemoryTransport};
use photomine_core::{
    CancellationToken, ContentCrawler, DeviceRegistry, MediaServerMiner, RawRecord, Reconciler,
    RegistryEvent, RegistryState, SqliteIndexStore,
};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn photo(path: &str, name: &str) -> RawRecord {
    RawRecord::photo(
        path,
        name,
        "image/jpeg",
        format!("http://192.168.1.20:8200/MediaItems/{name}"),
    )
}

fn scripted_devices() -> (MemoryDevice, MemoryDevice) {
    let nas_udn = "uuid:4d696e69-444c-164e-9d41-0011320f2c4d";
    let nas = MemoryDevice::new("/server/0", nas_udn, "Attic NAS")
        .child("/server/0", RawRecord::container("/server/0/2024"))
        .child("/server/0", RawRecord::container("/server/0/2025"))
        .child("/server/0/2024", photo("/server/0/2024/41", "harbour.jpg"))
        .child("/server/0/2024", photo("/server/0/2024/42", "market.jpg"))
        .child("/server/0/2025", photo("/server/0/2025/7", "snow.jpg"))
        .child("/server/0/2025", RawRecord::container("/server/0/2024"));

    let tv_udn = "uuid:5f9ec1b3-ed59-79bc-4530-745e1d5ad8a2";
    let tv = MemoryDevice::new("/server/1", tv_udn, "Living Room TV")
        .searchable(true)
        .content_root("/server/1/0")
        .child("/server/1/0", photo("/server/1/0/a9", "birthday.jpg"));

    (nas, tv)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let debug = std::env::args().any(|arg| arg == "--debug");
    let db_path = std::env::args().skip(1).find(|arg| !arg.starts_with("--"));

    FmtSubscriber::builder()
        .with_max_level(if debug { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .compact()
        .init();

    let (nas, tv) = scripted_devices();
    let transport = Arc::new(MemoryTransport::new());
    let daemon = Arc::new(MemoryDaemon::with_devices([nas.path().to_string()]));
    transport.insert(nas);
    let tv_path = tv.path().to_string();
    transport.insert(tv);

    let cancel = CancellationToken::new();
    let registry = DeviceRegistry::initialize(daemon.clone(), transport, cancel.clone());
    if let RegistryState::Unavailable(reason) = registry.wait_ready().await {
        anyhow::bail!("discovery unavailable: {reason}");
    }

    // The second server shows up after startup.
    let mut events = registry.subscribe();
    daemon.announce(tv_path).await;
    if let Ok(RegistryEvent::Found(device)) = events.recv().await {
        info!("{} joined the network", device.friendly_name());
    }

    let store = match db_path {
        Some(path) => SqliteIndexStore::open(path)?,
        None => SqliteIndexStore::open_in_memory()?,
    };

    let miner = MediaServerMiner::new(registry, ContentCrawler::default(), Reconciler::default());
    for report in miner.refresh_all(&store, &cancel).await? {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
