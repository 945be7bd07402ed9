//! photomine - discovers media servers on the local network and indexes their photos.
//!
//! The crate has no wire protocol of its own. A host supplies a
//! [`transport::DiscoveryDaemon`] and a [`transport::DeviceTransport`]; the
//! in-process [`transport::memory`] implementations cover tests and demos.
//!
//! # Example
//!
//! ```rust,ignore
//! use photomine_core::{
//!     CancellationToken, ContentCrawler, DeviceRegistry, MediaServerMiner, Reconciler,
//!     SqliteIndexStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> photomine_core::Result<()> {
//!     let registry = DeviceRegistry::initialize(daemon, transport, CancellationToken::new());
//!     registry.wait_ready().await;
//!
//!     let miner =
//!         MediaServerMiner::new(registry, ContentCrawler::default(), Reconciler::default());
//!     let store = SqliteIndexStore::open("/path/to/photos.db")?;
//!     for report in miner.refresh_all(&store, &CancellationToken::new()).await? {
//!         println!("{}: {} photos", report.udn, report.photos_found);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod crawler;
pub mod device;
pub mod error;
pub mod miner;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use cancel::{CancelCheck, CancellationToken, CancelledError};
pub use config::{CrawlConfig, CrawlOptions, DiscoveryConfig, MinerConfig};
pub use crawler::{ContentCrawler, CrawlDiagnostic, CrawlOutcome, CrawlStrategy};
pub use device::Device;
pub use error::{MinerError, Result};
pub use miner::{datasource_urn, MediaServerMiner, RefreshReport};
pub use model::{derive_identifier, ContainerItem, ItemRecord, PhotoItem, RawRecord, RecordKind};
pub use reconcile::{IndexStore, PhotoAttributes, ReconcileFailure, ReconcileReport, Reconciler};
pub use registry::{DeviceRegistry, RegistryEvent, RegistrySlot, RegistryState};
pub use store::{ResourceRecord, SqliteIndexStore};
pub use transport::{
    DeviceIdentity, DeviceTransport, DiscoveryDaemon, DiscoveryEvent, DynDeviceTransport,
    DynDiscoveryDaemon,
};
