//! Shared registry handle for a process context.

use super::DeviceRegistry;
use crate::cancel::CancellationToken;
use crate::transport::{DynDeviceTransport, DynDiscoveryDaemon};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// Holds a weak reference to the context's registry.
///
/// Every caller of [`get_or_initialize`](Self::get_or_initialize) gets the
/// same registry while any of them keeps it alive. Once the last handle is
/// dropped, the next call starts a fresh one.
#[derive(Default)]
pub struct RegistrySlot {
    current: Mutex<Weak<DeviceRegistry>>,
}

impl RegistrySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live registry, if one exists.
    pub fn get(&self) -> Option<Arc<DeviceRegistry>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .upgrade()
    }

    /// Return the live registry or initialize a new one.
    ///
    /// The collaborators are only used when a new registry is created.
    pub fn get_or_initialize(
        &self,
        daemon: DynDiscoveryDaemon,
        transport: DynDeviceTransport,
        cancel: CancellationToken,
    ) -> Arc<DeviceRegistry> {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(registry) = current.upgrade() {
            return registry;
        }

        debug!("Initializing device registry");
        let registry = DeviceRegistry::initialize(daemon, transport, cancel);
        *current = Arc::downgrade(&registry);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryDaemon, MemoryTransport};

    fn collaborators() -> (Arc<MemoryDaemon>, Arc<MemoryTransport>) {
        (Arc::new(MemoryDaemon::new()), Arc::new(MemoryTransport::new()))
    }

    #[tokio::test]
    async fn test_same_registry_while_alive() {
        let slot = RegistrySlot::new();
        let (daemon, transport) = collaborators();

        let first =
            slot.get_or_initialize(daemon.clone(), transport.clone(), CancellationToken::new());
        let second = slot.get_or_initialize(daemon, transport, CancellationToken::new());

        assert!(Arc::ptr_eq(&first, &second));
        assert!(slot.get().is_some());
    }

    #[tokio::test]
    async fn test_fresh_registry_after_release() {
        let slot = RegistrySlot::new();
        let (daemon, transport) = collaborators();

        let first =
            slot.get_or_initialize(daemon.clone(), transport.clone(), CancellationToken::new());
        drop(first);
        assert!(slot.get().is_none());

        let second = slot.get_or_initialize(daemon, transport, CancellationToken::new());
        second.wait_ready().await;
        assert!(slot.get().is_some());
    }
}
