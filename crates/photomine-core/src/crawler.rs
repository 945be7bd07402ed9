//! Photo enumeration on a single device.
//!
//! A searchable device gets one filtered search. Any other device is walked
//! breadth-first from its content root. Failures are scoped to the call that
//! produced them and end up in [`CrawlOutcome::diagnostics`]; nothing short of
//! cancellation stops a crawl early.

use crate::cancel::CancellationToken;
use crate::config::CrawlOptions;
use crate::device::Device;
use crate::error::{MinerError, Result};
use crate::model::{ItemRecord, PhotoItem, RawRecord};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// How a crawl enumerated content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStrategy {
    Search,
    Walk,
}

/// A failure that was absorbed during a crawl.
#[derive(Debug)]
pub struct CrawlDiagnostic {
    /// Container, record or content root the failure is about.
    pub path: String,
    pub error: MinerError,
}

/// Result of crawling one device.
#[derive(Debug)]
pub struct CrawlOutcome {
    /// Every photo found, each object path once. Order is not meaningful.
    pub items: Vec<PhotoItem>,
    pub diagnostics: Vec<CrawlDiagnostic>,
    pub strategy: CrawlStrategy,
    /// Containers whose listing was attempted.
    pub containers_visited: usize,
    pub cancelled: bool,
}

impl CrawlOutcome {
    fn new(strategy: CrawlStrategy) -> Self {
        Self {
            items: Vec::new(),
            diagnostics: Vec::new(),
            strategy,
            containers_visited: 0,
            cancelled: false,
        }
    }

    /// True if the crawl saw all of the device's content.
    ///
    /// Malformed records do not count against completeness.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && !self.diagnostics.iter().any(|d| d.error.loses_content())
    }

    fn diagnose(&mut self, path: impl Into<String>, error: MinerError) {
        let path = path.into();
        debug!(path = %path, "Crawl diagnostic: {}", error);
        self.diagnostics.push(CrawlDiagnostic { path, error });
    }
}

/// Accumulates photos, dropping repeats of the same object path.
#[derive(Default)]
struct PhotoSet {
    seen: HashSet<String>,
    items: Vec<PhotoItem>,
}

impl PhotoSet {
    fn insert(&mut self, photo: PhotoItem) {
        if self.seen.insert(photo.path.clone()) {
            self.items.push(photo);
        }
    }
}

/// Enumerates the photos on a device.
#[derive(Debug, Clone, Default)]
pub struct ContentCrawler {
    options: CrawlOptions,
}

impl ContentCrawler {
    pub fn new(options: CrawlOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &CrawlOptions {
        &self.options
    }

    /// Crawl `device`, choosing search or walk from its capabilities.
    pub async fn crawl(&self, device: &Device, cancel: &CancellationToken) -> CrawlOutcome {
        let strategy = if device.searchable() {
            CrawlStrategy::Search
        } else {
            CrawlStrategy::Walk
        };
        info!(
            udn = %device.udn(),
            strategy = ?strategy,
            "Crawling {}",
            device.friendly_name()
        );

        let outcome = match strategy {
            CrawlStrategy::Search => self.crawl_search(device, cancel).await,
            CrawlStrategy::Walk => self.crawl_walk(device, cancel).await,
        };

        info!(
            udn = %device.udn(),
            items = outcome.items.len(),
            diagnostics = outcome.diagnostics.len(),
            containers = outcome.containers_visited,
            cancelled = outcome.cancelled,
            "Crawl finished"
        );
        outcome
    }

    async fn crawl_search(&self, device: &Device, cancel: &CancellationToken) -> CrawlOutcome {
        let mut outcome = CrawlOutcome::new(CrawlStrategy::Search);
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            return outcome;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                outcome.cancelled = true;
                return outcome;
            }
            result = device.search(&self.options.search_query, &self.options.projection) => result,
        };

        let records = match result {
            Ok(records) => records,
            Err(e) => {
                warn!(udn = %device.udn(), "Search failed: {}", e);
                outcome.diagnose(device.content_root(), e);
                return outcome;
            }
        };

        let mut photos = PhotoSet::default();
        for raw in &records {
            match ItemRecord::classify_search_result(raw) {
                Ok(Some(photo)) => photos.insert(photo),
                Ok(None) => {}
                Err(e) => outcome.diagnose(raw.path_or_unknown(), e),
            }
        }
        outcome.items = photos.items;
        outcome
    }

    async fn crawl_walk(&self, device: &Device, cancel: &CancellationToken) -> CrawlOutcome {
        let mut outcome = CrawlOutcome::new(CrawlStrategy::Walk);
        let mut photos = PhotoSet::default();

        let root = device.content_root().to_string();
        let mut visited = HashSet::from([root.clone()]);
        let mut frontier = vec![root];
        let mut depth = 0usize;

        while !frontier.is_empty() {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let listings = self.list_level(device, frontier, cancel).await;
            let mut next = Vec::new();

            for (container, listing) in listings {
                let records = match listing {
                    Ok(records) => records,
                    Err(MinerError::Cancelled) => {
                        outcome.cancelled = true;
                        continue;
                    }
                    Err(e) => {
                        outcome.containers_visited += 1;
                        warn!(
                            udn = %device.udn(),
                            container = %container,
                            "Skipping subtree: {}",
                            e
                        );
                        outcome.diagnose(container, e);
                        continue;
                    }
                };
                outcome.containers_visited += 1;

                for raw in &records {
                    match ItemRecord::classify(raw) {
                        Ok(Some(ItemRecord::Photo(photo))) => photos.insert(photo),
                        Ok(Some(ItemRecord::Container(child))) => {
                            if !visited.insert(child.path.clone()) {
                                debug!(container = %child.path, "Container already visited");
                                continue;
                            }
                            match self.options.max_depth {
                                Some(max_depth) if depth + 1 > max_depth => {
                                    outcome.diagnose(
                                        child.path.clone(),
                                        MinerError::DepthExceeded {
                                            container: child.path,
                                            max_depth,
                                        },
                                    );
                                }
                                _ => next.push(child.path),
                            }
                        }
                        Ok(None) => {}
                        Err(e) => outcome.diagnose(raw.path_or_unknown(), e),
                    }
                }
            }

            frontier = next;
            depth += 1;
        }

        outcome.items = photos.items;
        outcome
    }

    /// List one level of containers, at most `max_concurrent_listings` at a time.
    async fn list_level(
        &self,
        device: &Device,
        containers: Vec<String>,
        cancel: &CancellationToken,
    ) -> Vec<(String, Result<Vec<RawRecord>>)> {
        let projection = &self.options.projection;
        stream::iter(containers)
            .map(|container| async move {
                if cancel.is_cancelled() {
                    return (container, Err(MinerError::Cancelled));
                }
                let listing = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(MinerError::Cancelled),
                    listing = device.list_children(&container, projection) => listing,
                };
                (container, listing)
            })
            .buffer_unordered(self.options.max_concurrent_listings)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryDevice, MemoryTransport};
    use std::sync::Arc;

    const ROOT: &str = "/server/0";

    fn photo(path: &str) -> RawRecord {
        let name = path.rsplit('/').next().unwrap_or(path);
        RawRecord::photo(
            path,
            format!("{name}.jpg"),
            "image/jpeg",
            format!("http://10.0.0.2:8200/MediaItems/{name}.jpg"),
        )
    }

    async fn connect(device: MemoryDevice) -> (Device, Arc<MemoryTransport>) {
        let path = device.path().to_string();
        let transport = Arc::new(MemoryTransport::new());
        transport.insert(device);
        let device = Device::connect(path, transport.clone(), &CancellationToken::new())
            .await
            .unwrap();
        (device, transport)
    }

    fn paths(outcome: &CrawlOutcome) -> Vec<String> {
        let mut paths: Vec<String> = outcome.items.iter().map(|p| p.path.clone()).collect();
        paths.sort();
        paths
    }

    fn album_tree() -> MemoryDevice {
        MemoryDevice::new(ROOT, "uuid:0", "NAS")
            .child(ROOT, RawRecord::container("/server/0/a"))
            .child(ROOT, RawRecord::container("/server/0/b"))
            .child(ROOT, RawRecord::container("/server/0/c"))
            .child(ROOT, photo("/server/0/top"))
            .child("/server/0/a", photo("/server/0/a1"))
            .child("/server/0/a", photo("/server/0/a2"))
            .child("/server/0/b", photo("/server/0/b1"))
            .child("/server/0/c", photo("/server/0/c1"))
    }

    #[tokio::test]
    async fn test_searchable_device_uses_one_search() {
        let (device, transport) = connect(album_tree().searchable(true)).await;
        let outcome = ContentCrawler::default()
            .crawl(&device, &CancellationToken::new())
            .await;

        assert_eq!(outcome.strategy, CrawlStrategy::Search);
        assert_eq!(transport.search_calls(), 1);
        assert_eq!(transport.list_calls(), 0);
        assert_eq!(outcome.items.len(), 5);
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_non_searchable_device_is_walked() {
        let (device, transport) = connect(album_tree()).await;
        let outcome = ContentCrawler::default()
            .crawl(&device, &CancellationToken::new())
            .await;

        assert_eq!(outcome.strategy, CrawlStrategy::Walk);
        assert_eq!(transport.search_calls(), 0);
        assert_eq!(transport.list_calls(), 4);
        assert_eq!(outcome.containers_visited, 4);
        assert_eq!(
            paths(&outcome),
            vec![
                "/server/0/a1",
                "/server/0/a2",
                "/server/0/b1",
                "/server/0/c1",
                "/server/0/top"
            ]
        );
        assert!(outcome.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_failed_sibling_only_loses_its_subtree() {
        let (device, _) = connect(album_tree().fail_listing("/server/0/b")).await;
        let outcome = ContentCrawler::default()
            .crawl(&device, &CancellationToken::new())
            .await;

        assert_eq!(
            paths(&outcome),
            vec!["/server/0/a1", "/server/0/a2", "/server/0/c1", "/server/0/top"]
        );
        assert_eq!(outcome.diagnostics.len(), 1);
        let diagnostic = &outcome.diagnostics[0];
        assert_eq!(diagnostic.path, "/server/0/b");
        assert!(matches!(diagnostic.error, MinerError::ListChildrenFailed { .. }));
        assert!(!outcome.is_complete());
    }

    #[tokio::test]
    async fn test_cycle_terminates_without_relisting() {
        let device = MemoryDevice::new(ROOT, "uuid:0", "Loopy")
            .child(ROOT, RawRecord::container("/server/0/x"))
            .child("/server/0/x", RawRecord::container("/server/0/y"))
            .child("/server/0/x", photo("/server/0/x1"))
            .child("/server/0/y", RawRecord::container("/server/0/x"))
            .child("/server/0/y", RawRecord::container(ROOT))
            .child("/server/0/y", photo("/server/0/y1"));
        let (device, transport) = connect(device).await;

        let outcome = ContentCrawler::default()
            .crawl(&device, &CancellationToken::new())
            .await;

        let listed = transport.listed_containers();
        let unique: HashSet<&String> = listed.iter().collect();
        assert_eq!(listed.len(), unique.len());
        assert_eq!(listed.len(), 3);
        assert_eq!(paths(&outcome), vec!["/server/0/x1", "/server/0/y1"]);
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_photo_in_two_albums_reported_once() {
        let device = MemoryDevice::new(ROOT, "uuid:0", "NAS")
            .child(ROOT, RawRecord::container("/server/0/by-date"))
            .child(ROOT, RawRecord::container("/server/0/by-place"))
            .child("/server/0/by-date", photo("/server/0/p9"))
            .child("/server/0/by-place", photo("/server/0/p9"));
        let (device, _) = connect(device).await;

        let outcome = ContentCrawler::default()
            .crawl(&device, &CancellationToken::new())
            .await;
        assert_eq!(paths(&outcome), vec!["/server/0/p9"]);
    }

    #[tokio::test]
    async fn test_identifiers_stable_across_crawls() {
        let (device, _) = connect(album_tree()).await;
        let crawler = ContentCrawler::default();

        let identifiers = |outcome: CrawlOutcome| -> HashSet<String> {
            outcome
                .items
                .iter()
                .map(|p| p.identifier().unwrap())
                .collect()
        };
        let first = identifiers(crawler.crawl(&device, &CancellationToken::new()).await);
        let second = identifiers(crawler.crawl(&device, &CancellationToken::new()).await);

        assert_eq!(first, second);
        assert!(first.contains("media-server:a1"));
    }

    #[tokio::test]
    async fn test_search_failure_is_diagnostic() {
        let (device, _) = connect(album_tree().searchable(true).fail_search()).await;
        let outcome = ContentCrawler::default()
            .crawl(&device, &CancellationToken::new())
            .await;

        assert!(outcome.items.is_empty());
        assert_eq!(outcome.diagnostics.len(), 1);
        assert!(matches!(
            outcome.diagnostics[0].error,
            MinerError::SearchFailed { .. }
        ));
        assert!(!outcome.is_complete());
    }

    #[tokio::test]
    async fn test_malformed_record_skipped() {
        let mut broken = photo("/server/0/bad");
        broken.urls.clear();
        let device = MemoryDevice::new(ROOT, "uuid:0", "NAS")
            .child(ROOT, broken)
            .child(ROOT, photo("/server/0/good"));
        let (device, _) = connect(device).await;

        let outcome = ContentCrawler::default()
            .crawl(&device, &CancellationToken::new())
            .await;

        assert_eq!(paths(&outcome), vec!["/server/0/good"]);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].path, "/server/0/bad");
        // The rest of the listing was read, so nothing was lost.
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn test_depth_cap() {
        let device = MemoryDevice::new(ROOT, "uuid:0", "Deep")
            .child(ROOT, RawRecord::container("/server/0/l1"))
            .child("/server/0/l1", RawRecord::container("/server/0/l2"))
            .child("/server/0/l2", RawRecord::container("/server/0/l3"))
            .child("/server/0/l2", photo("/server/0/p2"))
            .child("/server/0/l3", photo("/server/0/p3"));
        let (device, transport) = connect(device).await;

        let crawler = ContentCrawler::new(CrawlOptions {
            max_depth: Some(2),
            ..Default::default()
        })
        .unwrap();
        let outcome = crawler.crawl(&device, &CancellationToken::new()).await;

        assert_eq!(paths(&outcome), vec!["/server/0/p2"]);
        assert!(!transport
            .listed_containers()
            .contains(&"/server/0/l3".to_string()));
        assert_eq!(outcome.diagnostics.len(), 1);
        assert!(matches!(
            outcome.diagnostics[0].error,
            MinerError::DepthExceeded { max_depth: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_listing() {
        let (device, transport) = connect(album_tree()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = ContentCrawler::default().crawl(&device, &cancel).await;

        assert!(outcome.cancelled);
        assert!(!outcome.is_complete());
        assert_eq!(transport.list_calls(), 0);
        assert!(outcome.items.is_empty());
    }

    #[test]
    fn test_invalid_options_rejected() {
        let options = CrawlOptions {
            max_concurrent_listings: 0,
            ..Default::default()
        };
        assert!(ContentCrawler::new(options).is_err());
    }
}
