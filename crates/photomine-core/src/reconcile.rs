//! Diffing a fresh crawl against what the index already holds.

use crate::config::MinerConfig;
use crate::error::{MinerError, Result};
use crate::model::PhotoItem;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Attributes written for one photo resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoAttributes {
    pub title: String,
    pub url: String,
    pub mime_type: String,
    pub creator: String,
    pub class: String,
}

/// Persistence used by reconciliation.
///
/// Implementations must be thread-safe. Calls are synchronous; a remote
/// store should buffer or block internally.
pub trait IndexStore: Send + Sync {
    /// Identifiers currently indexed for `datasource`.
    fn previous_resources(&self, datasource: &str) -> Result<HashSet<String>>;

    /// Insert or update the resource keyed by `identifier` within `datasource`.
    ///
    /// The same identifier under two datasources names two resources.
    fn upsert_photo(
        &self,
        datasource: &str,
        identifier: &str,
        attributes: &PhotoAttributes,
    ) -> Result<()>;

    /// Delete resources of `datasource` by identifier. Returns how many were removed.
    fn delete_resources(&self, datasource: &str, identifiers: &[String]) -> Result<usize>;
}

/// A photo that could not be written.
#[derive(Debug)]
pub struct ReconcileFailure {
    pub path: String,
    pub error: MinerError,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Identifiers written during this pass.
    pub upserted: Vec<String>,
    pub failed: Vec<ReconcileFailure>,
    /// Previously indexed identifiers not seen in the crawl, sorted.
    pub stale: Vec<String>,
}

/// Writes crawled photos to an [`IndexStore`] and computes stale entries.
#[derive(Debug, Clone)]
pub struct Reconciler {
    creator: String,
    class: String,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(MinerConfig::CREATOR)
    }
}

impl Reconciler {
    pub fn new(creator: impl Into<String>) -> Self {
        Self {
            creator: creator.into(),
            class: MinerConfig::PHOTO_CLASS.to_string(),
        }
    }

    pub fn creator(&self) -> &str {
        &self.creator
    }

    fn attributes(&self, photo: &PhotoItem) -> PhotoAttributes {
        PhotoAttributes {
            title: photo.display_name.clone(),
            url: photo.url.clone(),
            mime_type: photo.mime_type.clone(),
            creator: self.creator.clone(),
            class: self.class.clone(),
        }
    }

    /// Upsert every item and report what was left over from `previous`.
    ///
    /// A failed upsert is recorded and the pass continues. Its identifier is
    /// still taken out of the stale set, so an existing entry is kept rather
    /// than deleted. Deleting the stale set is left to the caller.
    pub fn reconcile<S>(
        &self,
        store: &S,
        datasource: &str,
        items: &[PhotoItem],
        mut previous: HashSet<String>,
    ) -> ReconcileReport
    where
        S: IndexStore + ?Sized,
    {
        let mut report = ReconcileReport::default();

        for photo in items {
            let identifier = match photo.identifier() {
                Ok(identifier) => identifier,
                Err(e) => {
                    warn!(path = %photo.path, "Cannot index photo: {}", e);
                    report.failed.push(ReconcileFailure {
                        path: photo.path.clone(),
                        error: e,
                    });
                    continue;
                }
            };
            previous.remove(&identifier);

            match store.upsert_photo(datasource, &identifier, &self.attributes(photo)) {
                Ok(()) => report.upserted.push(identifier),
                Err(e) => {
                    warn!(
                        path = %photo.path,
                        identifier = %identifier,
                        "Failed to index photo: {}",
                        e
                    );
                    report.failed.push(ReconcileFailure {
                        path: photo.path.clone(),
                        error: e,
                    });
                }
            }
        }

        let mut stale: Vec<String> = previous.into_iter().collect();
        stale.sort();
        report.stale = stale;

        debug!(
            datasource = %datasource,
            upserted = report.upserted.len(),
            failed = report.failed.len(),
            stale = report.stale.len(),
            "Reconciled crawl"
        );
        report
    }
}
