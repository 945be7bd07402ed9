//! Collaborator interfaces for the discovery daemon and device transport.
//!
//! photomine never speaks a wire protocol itself. A host application plugs in
//! implementations of [`DiscoveryDaemon`] (device list plus found/lost
//! notifications) and [`DeviceTransport`] (identity, search, child listing).
//! [`memory`] provides an in-process loopback implementation of both.

pub mod memory;

use crate::error::Result;
use crate::model::RawRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A notification from the discovery daemon, carrying the device handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Found(String),
    Lost(String),
}

impl DiscoveryEvent {
    pub fn path(&self) -> &str {
        match self {
            DiscoveryEvent::Found(path) | DiscoveryEvent::Lost(path) => path,
        }
    }
}

/// Identity and capabilities resolved once per device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub udn: String,
    pub friendly_name: String,
    /// Whether the device supports a one-shot filtered search.
    pub searchable: bool,
    /// Root container to walk when the device is not searchable.
    pub content_root: String,
}

/// The daemon that advertises devices on the network.
#[async_trait]
pub trait DiscoveryDaemon: Send + Sync {
    /// Connect and start receiving found/lost notifications.
    ///
    /// An error here means the daemon is unreachable.
    async fn subscribe(&self) -> Result<mpsc::Receiver<DiscoveryEvent>>;

    /// Handles of every device the daemon currently knows about.
    async fn list_devices(&self) -> Result<Vec<String>>;
}

/// Remote calls against individual devices.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Resolve identity and capabilities of the device at `path`.
    async fn identity(&self, path: &str) -> Result<DeviceIdentity>;

    /// Run a server-side search below `container`.
    async fn search(
        &self,
        container: &str,
        query: &str,
        projection: &[String],
    ) -> Result<Vec<RawRecord>>;

    /// Immediate children of `container`.
    async fn list_children(&self, container: &str, projection: &[String])
        -> Result<Vec<RawRecord>>;
}

pub type DynDiscoveryDaemon = Arc<dyn DiscoveryDaemon>;
pub type DynDeviceTransport = Arc<dyn DeviceTransport>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_path() {
        assert_eq!(DiscoveryEvent::Found("/a".into()).path(), "/a");
        assert_eq!(DiscoveryEvent::Lost("/b".into()).path(), "/b");
    }

    #[test]
    fn test_identity_serde() {
        let identity = DeviceIdentity {
            udn: "uuid:1234".to_string(),
            friendly_name: "Living Room NAS".to_string(),
            searchable: true,
            content_root: "/server/0".to_string(),
        };
        let json = serde_json::to_string(&identity).unwrap();
        assert!(json.contains("friendlyName"));
        let back: DeviceIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, identity);
    }
}
