//! A remote media server.
//!
//! Identity and capabilities are resolved once, when the device is connected,
//! and cached. Accessors never make remote calls. The device keeps a handle to
//! the transport so a crawl can outlive the device's presence in the registry.

use crate::cancel::{CancelCheck, CancellationToken};
use crate::error::{MinerError, Result};
use crate::model::RawRecord;
use crate::transport::{DeviceIdentity, DynDeviceTransport};
use std::fmt;
use tracing::debug;

pub struct Device {
    path: String,
    identity: DeviceIdentity,
    transport: DynDeviceTransport,
}

impl Device {
    /// Resolve the device at `path`.
    ///
    /// Any failure, including an identity with an empty UDN, is reported as
    /// [`MinerError::DeviceUnreachable`]. Cancellation wins over a pending
    /// identity call and yields [`MinerError::Cancelled`].
    pub async fn connect(
        path: impl Into<String>,
        transport: DynDeviceTransport,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let path = path.into();
        cancel.check()?;

        let identity = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MinerError::Cancelled),
            identity = transport.identity(&path) => identity,
        };

        let identity = identity.map_err(|e| MinerError::DeviceUnreachable {
            path: path.clone(),
            message: e.to_string(),
        })?;

        if identity.udn.trim().is_empty() {
            return Err(MinerError::DeviceUnreachable {
                path,
                message: "device reported an empty UDN".to_string(),
            });
        }

        debug!(
            path = %path,
            udn = %identity.udn,
            searchable = identity.searchable,
            "Resolved device {}",
            identity.friendly_name
        );

        Ok(Self {
            path,
            identity,
            transport,
        })
    }

    /// Handle assigned by the discovery daemon.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn udn(&self) -> &str {
        &self.identity.udn
    }

    pub fn friendly_name(&self) -> &str {
        &self.identity.friendly_name
    }

    pub fn searchable(&self) -> bool {
        self.identity.searchable
    }

    /// Root container of the content tree.
    pub fn content_root(&self) -> &str {
        &self.identity.content_root
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Server-side search from the content root.
    pub async fn search(&self, query: &str, projection: &[String]) -> Result<Vec<RawRecord>> {
        self.transport
            .search(self.content_root(), query, projection)
            .await
            .map_err(|e| MinerError::SearchFailed {
                device: self.udn().to_string(),
                message: e.to_string(),
            })
    }

    /// Immediate children of `container`.
    pub async fn list_children(
        &self,
        container: &str,
        projection: &[String],
    ) -> Result<Vec<RawRecord>> {
        self.transport
            .list_children(container, projection)
            .await
            .map_err(|e| MinerError::ListChildrenFailed {
                container: container.to_string(),
                message: e.to_string(),
            })
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("path", &self.path)
            .field("udn", &self.identity.udn)
            .field("friendly_name", &self.identity.friendly_name)
            .field("searchable", &self.identity.searchable)
            .field("content_root", &self.identity.content_root)
            .finish()
    }
}
