//! Centralized configuration for photomine.
//!
//! Constants for discovery, crawling and indexing live on zero-sized config
//! structs. Values that callers may tune per crawl are gathered in
//! [`CrawlOptions`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Miner-level identity and indexing constants.
pub struct MinerConfig;

impl MinerConfig {
    pub const MINER_IDENTIFIER: &'static str =
        "gd:media-server:miner:a4a47a3e-eb55-11e3-b983-14feb59cfa0e";
    pub const VERSION: u32 = 3;
    /// Namespace tag prefixed to every derived item identifier.
    pub const IDENTIFIER_NAMESPACE: &'static str = "media-server";
    /// Attribution recorded as the creator of every indexed photo.
    pub const CREATOR: &'static str = "media_server";
    pub const PHOTO_CLASS: &'static str = "nmm:Photo";
    pub const DATASOURCE_PREFIX: &'static str = "gd:media-server:datasource";
}

/// Discovery daemon constants.
pub struct DiscoveryConfig;

impl DiscoveryConfig {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Capacity of the found/lost broadcast channel handed to subscribers.
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;
    /// Capacity of the daemon notification queue feeding the registry loop.
    pub const NOTIFICATION_QUEUE_CAPACITY: usize = 128;
}

/// Content crawl constants.
pub struct CrawlConfig;

impl CrawlConfig {
    pub const SEARCH_QUERY: &'static str = "Type = \"image.photo\"";
    pub const FIELD_DISPLAY_NAME: &'static str = "DisplayName";
    pub const FIELD_URLS: &'static str = "URLs";
    pub const FIELD_PATH: &'static str = "Path";
    pub const FIELD_MIME_TYPE: &'static str = "MIMEType";
    pub const FIELD_TYPE: &'static str = "Type";
    pub const MAX_CONCURRENT_LISTINGS: usize = 4;
    pub const MAX_DEPTH: usize = 32;

    /// The fixed result-field projection used by both search and listing.
    pub fn projection() -> Vec<String> {
        [
            Self::FIELD_DISPLAY_NAME,
            Self::FIELD_URLS,
            Self::FIELD_PATH,
            Self::FIELD_MIME_TYPE,
            Self::FIELD_TYPE,
        ]
        .iter()
        .map(|field| field.to_string())
        .collect()
    }
}

/// Tunable crawl behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct CrawlOptions {
    /// Sibling containers listed concurrently during a tree walk.
    pub max_concurrent_listings: usize,
    /// Containers deeper than this are not descended into. `None` disables the cap.
    pub max_depth: Option<usize>,
    /// Filter sent with a server-side search.
    pub search_query: String,
    /// Fields requested for every record.
    pub projection: Vec<String>,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_concurrent_listings: CrawlConfig::MAX_CONCURRENT_LISTINGS,
            max_depth: Some(CrawlConfig::MAX_DEPTH),
            search_query: CrawlConfig::SEARCH_QUERY.to_string(),
            projection: CrawlConfig::projection(),
        }
    }
}

impl CrawlOptions {
    /// Reject option combinations the crawler cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_concurrent_listings == 0 {
            return Err(crate::MinerError::Config {
                message: "max_concurrent_listings must be at least 1".to_string(),
            });
        }
        if self.projection.is_empty() {
            return Err(crate::MinerError::Config {
                message: "projection must name at least one field".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        let options = CrawlOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.projection.len(), 5);
        assert!(options.projection.contains(&"URLs".to_string()));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let options = CrawlOptions {
            max_concurrent_listings: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: CrawlOptions =
            serde_json::from_str(r#"{"max_depth": null, "max_concurrent_listings": 2}"#).unwrap();
        assert_eq!(options.max_depth, None);
        assert_eq!(options.max_concurrent_listings, 2);
        assert_eq!(options.search_query, CrawlConfig::SEARCH_QUERY);
    }
}
