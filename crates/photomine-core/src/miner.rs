//! Per-device refresh: crawl, reconcile, purge.

use crate::cancel::{CancelCheck, CancellationToken};
use crate::config::MinerConfig;
use crate::crawler::{ContentCrawler, CrawlStrategy};
use crate::error::{MinerError, Result};
use crate::reconcile::{IndexStore, Reconciler};
use crate::registry::DeviceRegistry;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Datasource URN under which a device's photos are indexed.
pub fn datasource_urn(udn: &str) -> String {
    format!("{}:{}", MinerConfig::DATASOURCE_PREFIX, udn)
}

/// Summary of one device refresh.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub udn: String,
    pub datasource: String,
    /// False when the device was not in the registry. Nothing else is filled in then.
    pub device_online: bool,
    pub strategy: Option<CrawlStrategy>,
    pub photos_found: usize,
    pub upserted: usize,
    pub failed: usize,
    /// Previously indexed photos the crawl did not see.
    pub stale: usize,
    pub deleted: usize,
    /// Crawl diagnostics, one line each.
    pub diagnostics: Vec<String>,
    pub complete: bool,
}

impl RefreshReport {
    fn offline(udn: &str) -> Self {
        Self {
            udn: udn.to_string(),
            datasource: datasource_urn(udn),
            device_online: false,
            strategy: None,
            photos_found: 0,
            upserted: 0,
            failed: 0,
            stale: 0,
            deleted: 0,
            diagnostics: Vec::new(),
            complete: false,
        }
    }
}

/// Indexes the photos of every media server in a registry.
pub struct MediaServerMiner {
    registry: Arc<DeviceRegistry>,
    crawler: ContentCrawler,
    reconciler: Reconciler,
    /// Serializes refreshes so one device is never crawled twice at once.
    refresh_lock: Mutex<()>,
}

impl MediaServerMiner {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        crawler: ContentCrawler,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            registry,
            crawler,
            reconciler,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Refresh the index for the device with `udn`.
    ///
    /// An offline device is skipped without touching the store. A cancelled
    /// crawl returns [`MinerError::Cancelled`], also without writing. Stale
    /// resources are only deleted after a complete crawl.
    pub async fn refresh_device<S>(
        &self,
        udn: &str,
        store: &S,
        cancel: &CancellationToken,
    ) -> Result<RefreshReport>
    where
        S: IndexStore + ?Sized,
    {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked(udn, store, cancel).await
    }

    /// Refresh every device currently in the registry, ordered by UDN.
    ///
    /// A store failure on one device is logged and the others still run.
    /// Cancellation stops the pass.
    pub async fn refresh_all<S>(
        &self,
        store: &S,
        cancel: &CancellationToken,
    ) -> Result<Vec<RefreshReport>>
    where
        S: IndexStore + ?Sized,
    {
        let _guard = self.refresh_lock.lock().await;

        let mut udns: Vec<String> = self
            .registry
            .dup_all()
            .iter()
            .map(|device| device.udn().to_string())
            .collect();
        udns.sort();

        let mut reports = Vec::with_capacity(udns.len());
        for udn in udns {
            cancel.check()?;
            match self.refresh_locked(&udn, store, cancel).await {
                Ok(report) => reports.push(report),
                Err(MinerError::Cancelled) => return Err(MinerError::Cancelled),
                Err(e) => error!(udn = %udn, "Failed to refresh device: {}", e),
            }
        }
        Ok(reports)
    }

    async fn refresh_locked<S>(
        &self,
        udn: &str,
        store: &S,
        cancel: &CancellationToken,
    ) -> Result<RefreshReport>
    where
        S: IndexStore + ?Sized,
    {
        let Some(device) = self.registry.get_by_udn(udn) else {
            info!(udn = %udn, "Device is offline, skipping");
            return Ok(RefreshReport::offline(udn));
        };

        let outcome = self.crawler.crawl(&device, cancel).await;
        if outcome.cancelled {
            return Err(MinerError::Cancelled);
        }

        let datasource = datasource_urn(udn);
        let previous = store.previous_resources(&datasource)?;
        let reconciled = self
            .reconciler
            .reconcile(store, &datasource, &outcome.items, previous);

        let complete = outcome.is_complete();
        let deleted = if complete {
            store.delete_resources(&datasource, &reconciled.stale)?
        } else {
            if !reconciled.stale.is_empty() {
                warn!(
                    udn = %udn,
                    "Crawl incomplete, keeping {} unseen resource(s)",
                    reconciled.stale.len()
                );
            }
            0
        };

        let report = RefreshReport {
            udn: udn.to_string(),
            datasource,
            device_online: true,
            strategy: Some(outcome.strategy),
            photos_found: outcome.items.len(),
            upserted: reconciled.upserted.len(),
            failed: reconciled.failed.len(),
            stale: reconciled.stale.len(),
            deleted,
            diagnostics: outcome
                .diagnostics
                .iter()
                .map(|d| format!("{}: {}", d.path, d.error))
                .collect(),
            complete,
        };

        info!(
            udn = %udn,
            upserted = report.upserted,
            deleted = report.deleted,
            "Refreshed {}",
            device.friendly_name()
        );
        Ok(report)
    }
}
