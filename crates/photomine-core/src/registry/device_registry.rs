//! Live registry of reachable media servers.

use crate::cancel::CancellationToken;
use crate::config::DiscoveryConfig;
use crate::device::Device;
use crate::error::MinerError;
use crate::transport::{DiscoveryEvent, DynDeviceTransport, DynDiscoveryDaemon};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Notification emitted after the registry has changed.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// The device has been inserted and is visible through every lookup.
    Found(Arc<Device>),
    /// The device has already been removed from every lookup.
    Lost(Arc<Device>),
}

impl RegistryEvent {
    pub fn device(&self) -> &Arc<Device> {
        match self {
            RegistryEvent::Found(device) | RegistryEvent::Lost(device) => device,
        }
    }
}

/// Connection state of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryState {
    /// Connecting to the daemon or running the initial enumeration.
    Connecting,
    /// Initial enumeration done; notifications are being applied.
    Ready,
    /// The daemon could not be reached, or discovery stopped (cancelled or
    /// notification stream closed). Terminal; not retried.
    Unavailable(String),
}

/// Both lookup indices. Always locked together.
#[derive(Default)]
struct Indices {
    by_path: HashMap<String, Arc<Device>>,
    by_udn: HashMap<String, Arc<Device>>,
}

impl Indices {
    /// Remove `device` from both maps, leaving any other entry alone.
    fn remove(&mut self, device: &Arc<Device>) {
        if self
            .by_path
            .get(device.path())
            .is_some_and(|d| Arc::ptr_eq(d, device))
        {
            self.by_path.remove(device.path());
        }
        if self
            .by_udn
            .get(device.udn())
            .is_some_and(|d| Arc::ptr_eq(d, device))
        {
            self.by_udn.remove(device.udn());
        }
    }
}

/// The set of currently reachable devices, keyed by daemon path and by UDN.
///
/// The registry holds the only long-lived strong reference to each device.
/// Lookups hand out clones of that `Arc`, so a caller can keep using a device
/// after it has been lost. Insert and remove update both indices under one
/// lock, so the indices never disagree.
pub struct DeviceRegistry {
    transport: DynDeviceTransport,
    indices: Mutex<Indices>,
    events: broadcast::Sender<RegistryEvent>,
    state: watch::Sender<RegistryState>,
    cancel: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceRegistry {
    /// Connect to the discovery daemon and start tracking devices.
    ///
    /// Returns immediately; connection, initial enumeration and notification
    /// handling run on a background task. Use [`wait_ready`](Self::wait_ready)
    /// to wait for the initial enumeration. Must be called from within a
    /// tokio runtime.
    pub fn initialize(
        daemon: DynDiscoveryDaemon,
        transport: DynDeviceTransport,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(DiscoveryConfig::EVENT_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(RegistryState::Connecting);

        let registry = Arc::new(Self {
            transport,
            indices: Mutex::new(Indices::default()),
            events,
            state,
            cancel: cancel.clone(),
            event_loop: Mutex::new(None),
        });

        let handle = tokio::spawn(run_discovery(Arc::downgrade(&registry), daemon, cancel));
        *registry
            .event_loop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);

        registry
    }

    fn indices(&self) -> MutexGuard<'_, Indices> {
        self.indices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================
    // Notification handling
    // ========================================

    /// Construct and register the device at `path`.
    ///
    /// Returns the device if this call registered it. A path that is already
    /// registered is a no-op. A device that cannot be resolved is logged and
    /// dropped without touching either index.
    ///
    /// If another live device already claims the same UDN (the device came
    /// back under a new path before its loss was reported), the older entry
    /// is evicted and reported lost first.
    pub async fn on_found(&self, path: &str) -> Option<Arc<Device>> {
        if self.indices().by_path.contains_key(path) {
            debug!(path = %path, "Device already registered");
            return None;
        }

        let device = match Device::connect(path, self.transport.clone(), &self.cancel).await {
            Ok(device) => Arc::new(device),
            Err(MinerError::Cancelled) => {
                debug!(path = %path, "Device construction cancelled");
                return None;
            }
            Err(e) => {
                warn!(path = %path, "Error initializing new device: {}", e);
                return None;
            }
        };

        let evicted = {
            let mut indices = self.indices();
            if indices.by_path.contains_key(path) {
                debug!(path = %path, "Device registered concurrently");
                return None;
            }
            let evicted = indices.by_udn.get(device.udn()).cloned();
            if let Some(old) = &evicted {
                indices.remove(old);
            }
            indices
                .by_path
                .insert(device.path().to_string(), device.clone());
            indices
                .by_udn
                .insert(device.udn().to_string(), device.clone());
            evicted
        };

        if let Some(old) = evicted {
            info!(
                udn = %old.udn(),
                old_path = %old.path(),
                new_path = %device.path(),
                "Device reappeared under a new path"
            );
            let _ = self.events.send(RegistryEvent::Lost(old));
        }

        info!(
            path = %device.path(),
            udn = %device.udn(),
            "Found media server {}",
            device.friendly_name()
        );
        let _ = self.events.send(RegistryEvent::Found(device.clone()));
        Some(device)
    }

    /// Remove the device at `path`.
    ///
    /// Unknown paths are ignored. Returns true if a device was removed. The
    /// device is gone from both indices before the lost event is sent.
    pub fn on_lost(&self, path: &str) -> bool {
        let device = {
            let mut indices = self.indices();
            let Some(device) = indices.by_path.get(path).cloned() else {
                debug!(path = %path, "Lost notification for unknown device");
                return false;
            };
            indices.remove(&device);
            device
        };

        info!(
            path = %device.path(),
            udn = %device.udn(),
            "Lost media server {}",
            device.friendly_name()
        );
        let _ = self.events.send(RegistryEvent::Lost(device));
        true
    }

    // ========================================
    // Queries
    // ========================================

    pub fn get_by_udn(&self, udn: &str) -> Option<Arc<Device>> {
        self.indices().by_udn.get(udn).cloned()
    }

    pub fn get_by_path(&self, path: &str) -> Option<Arc<Device>> {
        self.indices().by_path.get(path).cloned()
    }

    /// Snapshot of every live device.
    pub fn dup_all(&self) -> Vec<Arc<Device>> {
        self.indices().by_path.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.indices().by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to found/lost events. Events sent before subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> RegistryState {
        self.state.borrow().clone()
    }

    /// False once discovery has failed or stopped.
    pub fn is_available(&self) -> bool {
        !matches!(*self.state.borrow(), RegistryState::Unavailable(_))
    }

    /// Wait until the registry has left the `Connecting` state.
    pub async fn wait_ready(&self) -> RegistryState {
        let mut rx = self.state.subscribe();
        let state = match rx
            .wait_for(|state| !matches!(state, RegistryState::Connecting))
            .await
        {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
    }

    fn set_state(&self, state: RegistryState) {
        self.state.send_replace(state);
    }

    fn mark_unavailable(&self, message: String) {
        warn!("Discovery daemon unavailable: {}", message);
        self.set_state(RegistryState::Unavailable(message));
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        let handle = self
            .event_loop
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Background task: connect, enumerate, then apply notifications in order.
///
/// The task only holds a weak reference between steps, so dropping the last
/// registry handle ends it.
async fn run_discovery(
    registry: Weak<DeviceRegistry>,
    daemon: DynDiscoveryDaemon,
    cancel: CancellationToken,
) {
    let connect = tokio::time::timeout(DiscoveryConfig::CONNECT_TIMEOUT, daemon.subscribe());
    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err("connection cancelled".to_string()),
        result = connect => match result {
            Ok(Ok(rx)) => Ok(rx),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "timed out after {:?}",
                DiscoveryConfig::CONNECT_TIMEOUT
            )),
        },
    };

    let mut notifications = match connected {
        Ok(rx) => rx,
        Err(message) => {
            if let Some(registry) = registry.upgrade() {
                registry.mark_unavailable(message);
            }
            return;
        }
    };
    debug!("Discovery daemon connected");

    // Subscribing first means a device announced during enumeration is seen
    // twice at worst; on_found ignores the repeat.
    let listed = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err("enumeration cancelled".to_string()),
        result = daemon.list_devices() => result.map_err(|e| e.to_string()),
    };

    let paths = match listed {
        Ok(paths) => paths,
        Err(message) => {
            if let Some(registry) = registry.upgrade() {
                registry.mark_unavailable(format!("unable to list devices: {message}"));
            }
            return;
        }
    };

    for path in paths {
        let Some(registry) = registry.upgrade() else {
            return;
        };
        registry.on_found(&path).await;
    }

    let Some(ready) = registry.upgrade() else {
        return;
    };
    // A cancel during device construction is absorbed by on_found.
    if cancel.is_cancelled() {
        ready.mark_unavailable("enumeration cancelled".to_string());
        return;
    }
    info!("Device registry ready with {} device(s)", ready.len());
    ready.set_state(RegistryState::Ready);
    drop(ready);

    let reason = loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break "discovery cancelled",
            event = notifications.recv() => event,
        };
        let Some(event) = event else {
            break "notification stream closed";
        };
        let Some(registry) = registry.upgrade() else {
            return;
        };
        match event {
            DiscoveryEvent::Found(path) => {
                registry.on_found(&path).await;
            }
            DiscoveryEvent::Lost(path) => {
                registry.on_lost(&path);
            }
        }
    };

    if let Some(registry) = registry.upgrade() {
        registry.mark_unavailable(reason.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryDaemon, MemoryDevice, MemoryTransport};
    use std::time::Duration;

    fn server(n: u32) -> MemoryDevice {
        MemoryDevice::new(
            format!("/server/{n}"),
            format!("uuid:{n}"),
            format!("Server {n}"),
        )
    }

    async fn ready_registry(
        daemon: Arc<MemoryDaemon>,
        transport: Arc<MemoryTransport>,
    ) -> Arc<DeviceRegistry> {
        let registry = DeviceRegistry::initialize(daemon, transport, CancellationToken::new());
        assert_eq!(registry.wait_ready().await, RegistryState::Ready);
        registry
    }

    #[tokio::test]
    async fn test_initial_enumeration() {
        let transport = Arc::new(MemoryTransport::new());
        transport.insert(server(0));
        transport.insert(server(1));
        let daemon = Arc::new(MemoryDaemon::with_devices(["/server/0", "/server/1"]));

        let registry = ready_registry(daemon, transport).await;

        assert!(registry.is_available());
        assert_eq!(registry.len(), 2);
        for device in registry.dup_all() {
            let by_udn = registry.get_by_udn(device.udn()).unwrap();
            let by_path = registry.get_by_path(device.path()).unwrap();
            assert!(Arc::ptr_eq(&by_udn, &by_path));
            assert!(Arc::ptr_eq(&by_udn, &device));
        }
    }

    #[tokio::test]
    async fn test_found_is_idempotent() {
        let transport = Arc::new(MemoryTransport::new());
        transport.insert(server(0));
        let registry = ready_registry(Arc::new(MemoryDaemon::new()), transport.clone()).await;

        assert!(registry.on_found("/server/0").await.is_some());
        assert!(registry.on_found("/server/0").await.is_none());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.dup_all().len(), 1);
        // The second found never reached the device.
        assert_eq!(transport.identity_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_construction_registers_nothing() {
        let transport = Arc::new(MemoryTransport::new());
        transport.insert(server(2).unreachable());
        let registry = ready_registry(Arc::new(MemoryDaemon::new()), transport).await;

        assert!(registry.on_found("/server/2").await.is_none());
        assert!(registry.get_by_path("/server/2").is_none());
        assert!(registry.get_by_udn("uuid:2").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_lost_unknown_is_noop() {
        let registry = ready_registry(
            Arc::new(MemoryDaemon::new()),
            Arc::new(MemoryTransport::new()),
        )
        .await;
        let mut events = registry.subscribe();

        assert!(!registry.on_lost("/server/404"));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lost_removes_before_event() {
        let transport = Arc::new(MemoryTransport::new());
        transport.insert(server(0));
        let registry = ready_registry(Arc::new(MemoryDaemon::new()), transport).await;
        registry.on_found("/server/0").await.unwrap();

        let mut events = registry.subscribe();
        let held = registry.get_by_udn("uuid:0").unwrap();
        assert!(registry.on_lost("/server/0"));

        match events.recv().await.unwrap() {
            RegistryEvent::Lost(device) => {
                assert!(Arc::ptr_eq(&device, &held));
                assert!(registry.get_by_path(device.path()).is_none());
                assert!(registry.get_by_udn(device.udn()).is_none());
            }
            other => panic!("expected lost event, got {:?}", other),
        }

        // A held reference stays usable after the loss.
        assert_eq!(held.friendly_name(), "Server 0");
    }

    #[tokio::test]
    async fn test_same_udn_new_path_evicts_old_entry() {
        let transport = Arc::new(MemoryTransport::new());
        transport.insert(server(0));
        transport.insert(MemoryDevice::new("/server/9", "uuid:0", "Server 0 again"));
        let registry = ready_registry(Arc::new(MemoryDaemon::new()), transport).await;

        registry.on_found("/server/0").await.unwrap();
        let mut events = registry.subscribe();
        registry.on_found("/server/9").await.unwrap();

        assert!(registry.get_by_path("/server/0").is_none());
        assert_eq!(registry.get_by_udn("uuid:0").unwrap().path(), "/server/9");
        assert_eq!(registry.len(), 1);

        assert!(matches!(
            events.recv().await.unwrap(),
            RegistryEvent::Lost(d) if d.path() == "/server/0"
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            RegistryEvent::Found(d) if d.path() == "/server/9"
        ));

        // The stale lost notification for the old path is harmless.
        assert!(!registry.on_lost("/server/0"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_independent() {
        let transport = Arc::new(MemoryTransport::new());
        transport.insert(server(0));
        transport.insert(server(1));
        let registry = ready_registry(
            Arc::new(MemoryDaemon::with_devices(["/server/0", "/server/1"])),
            transport,
        )
        .await;

        let snapshot = registry.dup_all();
        registry.on_lost("/server/0");

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.dup_all().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_daemon() {
        let registry = DeviceRegistry::initialize(
            Arc::new(MemoryDaemon::unavailable()),
            Arc::new(MemoryTransport::new()),
            CancellationToken::new(),
        );

        assert!(matches!(registry.wait_ready().await, RegistryState::Unavailable(_)));
        assert!(!registry.is_available());
        assert!(registry.dup_all().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_construction_leaves_no_entry() {
        let transport = Arc::new(MemoryTransport::new());
        transport.insert(server(0).identity_delay(Duration::from_secs(30)));
        let cancel = CancellationToken::new();
        let registry = DeviceRegistry::initialize(
            Arc::new(MemoryDaemon::with_devices(["/server/0"])),
            transport.clone(),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(registry.state(), RegistryState::Connecting);
        assert_eq!(transport.identity_calls(), 1);
        cancel.cancel();

        let state = registry.wait_ready().await;
        assert_eq!(
            state,
            RegistryState::Unavailable("enumeration cancelled".to_string())
        );
        assert!(!registry.is_available());
        assert!(registry.is_empty());
        assert!(registry.get_by_udn("uuid:0").is_none());
    }

    #[tokio::test]
    async fn test_cancel_after_ready_stops_discovery() {
        let transport = Arc::new(MemoryTransport::new());
        transport.insert(server(0));
        let daemon = Arc::new(MemoryDaemon::new());
        let cancel = CancellationToken::new();
        let registry = DeviceRegistry::initialize(daemon.clone(), transport, cancel.clone());
        assert_eq!(registry.wait_ready().await, RegistryState::Ready);

        let mut state = registry.state.subscribe();
        cancel.cancel();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| matches!(s, RegistryState::Unavailable(_))),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!registry.is_available());

        daemon.announce("/server/0").await;
        tokio::task::yield_now().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_closed_notification_stream_marks_unavailable() {
        let daemon = Arc::new(MemoryDaemon::new());
        let registry = ready_registry(daemon.clone(), Arc::new(MemoryTransport::new())).await;

        let mut state = registry.state.subscribe();
        daemon.disconnect();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| matches!(s, RegistryState::Unavailable(_))),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(
            registry.state(),
            RegistryState::Unavailable("notification stream closed".to_string())
        );
    }

    #[tokio::test]
    async fn test_notifications_applied_in_order() {
        let transport = Arc::new(MemoryTransport::new());
        transport.insert(server(0));
        transport.insert(server(1));
        let daemon = Arc::new(MemoryDaemon::new());
        let registry = ready_registry(daemon.clone(), transport).await;
        let mut events = registry.subscribe();

        daemon.announce("/server/0").await;
        daemon.announce("/server/1").await;
        daemon.withdraw("/server/0").await;

        let mut seen = Vec::new();
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(match event {
                RegistryEvent::Found(d) => format!("found {}", d.path()),
                RegistryEvent::Lost(d) => format!("lost {}", d.path()),
            });
        }
        assert_eq!(seen, vec!["found /server/0", "found /server/1", "lost /server/0"]);
        assert_eq!(registry.len(), 1);
    }
}
