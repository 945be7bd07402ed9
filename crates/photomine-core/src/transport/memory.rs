//! In-process loopback implementations of the collaborator traits.
//!
//! `MemoryDaemon` and `MemoryTransport` hold scripted devices and content
//! trees. They count every remote call and can be told to fail specific calls,
//! which makes them suitable for tests and offline demos.

use super::{DeviceIdentity, DeviceTransport, DiscoveryDaemon, DiscoveryEvent};
use crate::config::{CrawlConfig, DiscoveryConfig};
use crate::error::{MinerError, Result};
use crate::model::{RawRecord, RecordKind};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ========================================
// Discovery daemon
// ========================================

/// A scripted discovery daemon.
#[derive(Default)]
pub struct MemoryDaemon {
    devices: Mutex<Vec<String>>,
    sender: Mutex<Option<mpsc::Sender<DiscoveryEvent>>>,
    unavailable: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
}

impl MemoryDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    /// A daemon that reports the given handles on enumeration.
    pub fn with_devices<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let daemon = Self::new();
        *lock(&daemon.devices) = paths.into_iter().map(Into::into).collect();
        daemon
    }

    /// A daemon whose `subscribe` always fails.
    pub fn unavailable() -> Self {
        let daemon = Self::new();
        daemon.unavailable.store(true, Ordering::SeqCst);
        daemon
    }

    /// Delay `subscribe` by `delay`, to exercise cancellation.
    pub fn set_connect_delay(&self, delay: Duration) {
        *lock(&self.connect_delay) = Some(delay);
    }

    /// Add a device and notify the subscriber, if any.
    pub async fn announce(&self, path: impl Into<String>) {
        let path = path.into();
        {
            let mut devices = lock(&self.devices);
            if !devices.contains(&path) {
                devices.push(path.clone());
            }
        }
        self.notify(DiscoveryEvent::Found(path)).await;
    }

    /// Remove a device and notify the subscriber, if any.
    pub async fn withdraw(&self, path: impl Into<String>) {
        let path = path.into();
        lock(&self.devices).retain(|p| p != &path);
        self.notify(DiscoveryEvent::Lost(path)).await;
    }

    /// Drop the subscriber's channel, closing its notification stream.
    pub fn disconnect(&self) {
        lock(&self.sender).take();
    }

    /// Deliver a raw notification without touching the device list.
    ///
    /// Lets tests replay duplicate or out-of-order notifications.
    pub async fn notify(&self, event: DiscoveryEvent) {
        let sender = lock(&self.sender).clone();
        if let Some(sender) = sender {
            if sender.send(event).await.is_err() {
                debug!("Discovery subscriber has gone away");
            }
        }
    }
}

#[async_trait]
impl DiscoveryDaemon for MemoryDaemon {
    async fn subscribe(&self) -> Result<mpsc::Receiver<DiscoveryEvent>> {
        let delay = *lock(&self.connect_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MinerError::ConnectionUnavailable {
                message: "loopback daemon is not running".to_string(),
            });
        }
        let (tx, rx) = mpsc::channel(DiscoveryConfig::NOTIFICATION_QUEUE_CAPACITY);
        *lock(&self.sender) = Some(tx);
        Ok(rx)
    }

    async fn list_devices(&self) -> Result<Vec<String>> {
        Ok(lock(&self.devices).clone())
    }
}

// ========================================
// Devices
// ========================================

/// A scripted media server: identity plus a content tree.
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    path: String,
    identity: DeviceIdentity,
    children: HashMap<String, Vec<RawRecord>>,
    failing_containers: HashSet<String>,
    fail_search: bool,
    unreachable: bool,
    identity_delay: Option<Duration>,
}

impl MemoryDevice {
    /// A non-searchable device whose content root is its own path.
    pub fn new(
        path: impl Into<String>,
        udn: impl Into<String>,
        friendly_name: impl Into<String>,
    ) -> Self {
        let path = path.into();
        Self {
            identity: DeviceIdentity {
                udn: udn.into(),
                friendly_name: friendly_name.into(),
                searchable: false,
                content_root: path.clone(),
            },
            path,
            children: HashMap::new(),
            failing_containers: HashSet::new(),
            fail_search: false,
            unreachable: false,
            identity_delay: None,
        }
    }

    pub fn searchable(mut self, searchable: bool) -> Self {
        self.identity.searchable = searchable;
        self
    }

    pub fn content_root(mut self, root: impl Into<String>) -> Self {
        self.identity.content_root = root.into();
        self
    }

    /// Append one child record under `container`.
    pub fn child(mut self, container: impl Into<String>, record: RawRecord) -> Self {
        self.children.entry(container.into()).or_default().push(record);
        self
    }

    /// Make `list_children(container)` fail.
    pub fn fail_listing(mut self, container: impl Into<String>) -> Self {
        self.failing_containers.insert(container.into());
        self
    }

    /// Make `search` fail.
    pub fn fail_search(mut self) -> Self {
        self.fail_search = true;
        self
    }

    /// Make identity resolution fail.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Delay identity resolution by `delay`.
    pub fn identity_delay(mut self, delay: Duration) -> Self {
        self.identity_delay = Some(delay);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn owns_container(&self, container: &str) -> bool {
        container == self.identity.content_root || self.children.contains_key(container)
    }

    /// Every photo-tagged record in the tree, each path once.
    fn photos(&self) -> Vec<RawRecord> {
        let mut seen = HashSet::new();
        self.children
            .values()
            .flatten()
            .filter(|record| record.record_kind() == Some(RecordKind::Photo))
            .filter(|record| seen.insert(record.path.clone()))
            .cloned()
            .collect()
    }
}

/// Keep only the projected fields of a record.
fn project(record: &RawRecord, projection: &[String]) -> RawRecord {
    let wants = |field: &str| projection.iter().any(|p| p == field || p == "*");
    RawRecord {
        display_name: record
            .display_name
            .clone()
            .filter(|_| wants(CrawlConfig::FIELD_DISPLAY_NAME)),
        mime_type: record
            .mime_type
            .clone()
            .filter(|_| wants(CrawlConfig::FIELD_MIME_TYPE)),
        path: record.path.clone().filter(|_| wants(CrawlConfig::FIELD_PATH)),
        urls: if wants(CrawlConfig::FIELD_URLS) {
            record.urls.clone()
        } else {
            Vec::new()
        },
        kind: record.kind.clone().filter(|_| wants(CrawlConfig::FIELD_TYPE)),
    }
}

// ========================================
// Transport
// ========================================

/// A scripted transport serving any number of [`MemoryDevice`]s.
#[derive(Default)]
pub struct MemoryTransport {
    devices: RwLock<HashMap<String, MemoryDevice>>,
    identity_calls: AtomicUsize,
    search_calls: AtomicUsize,
    list_calls: AtomicUsize,
    listed: Mutex<Vec<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a device.
    pub fn insert(&self, device: MemoryDevice) {
        self.devices
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(device.path.clone(), device);
    }

    /// Remove a device; later calls against it fail as unreachable.
    pub fn remove(&self, path: &str) -> Option<MemoryDevice> {
        self.devices
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(path)
    }

    pub fn identity_calls(&self) -> usize {
        self.identity_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Containers passed to `list_children`, in call order.
    pub fn listed_containers(&self) -> Vec<String> {
        lock(&self.listed).clone()
    }

    fn with_device<T>(&self, path: &str, f: impl FnOnce(&MemoryDevice) -> T) -> Option<T> {
        let devices = self
            .devices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        devices.get(path).map(f)
    }

    fn with_container_owner<T>(
        &self,
        container: &str,
        f: impl FnOnce(&MemoryDevice) -> T,
    ) -> Option<T> {
        let devices = self
            .devices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        devices.values().find(|d| d.owns_container(container)).map(f)
    }
}

#[async_trait]
impl DeviceTransport for MemoryTransport {
    async fn identity(&self, path: &str) -> Result<DeviceIdentity> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);

        let (identity, unreachable, delay) = self
            .with_device(path, |d| (d.identity.clone(), d.unreachable, d.identity_delay))
            .ok_or_else(|| MinerError::Transport {
                message: format!("no device at {path}"),
            })?;

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if unreachable {
            return Err(MinerError::Transport {
                message: format!("device at {path} did not answer"),
            });
        }
        Ok(identity)
    }

    async fn search(
        &self,
        container: &str,
        _query: &str,
        projection: &[String],
    ) -> Result<Vec<RawRecord>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);

        let (fail, photos) = self
            .with_container_owner(container, |d| (d.fail_search, d.photos()))
            .ok_or_else(|| MinerError::Transport {
                message: format!("no device owns {container}"),
            })?;

        if fail {
            return Err(MinerError::Transport {
                message: "search not supported by peer".to_string(),
            });
        }
        Ok(photos.iter().map(|r| project(r, projection)).collect())
    }

    async fn list_children(
        &self,
        container: &str,
        projection: &[String],
    ) -> Result<Vec<RawRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.listed).push(container.to_string());

        let (fail, children) = self
            .with_container_owner(container, |d| {
                (
                    d.failing_containers.contains(container),
                    d.children.get(container).cloned().unwrap_or_default(),
                )
            })
            .ok_or_else(|| MinerError::Transport {
                message: format!("no device owns {container}"),
            })?;

        if fail {
            return Err(MinerError::Transport {
                message: format!("browse of {container} timed out"),
            });
        }
        Ok(children.iter().map(|r| project(r, projection)).collect())
    }
}
