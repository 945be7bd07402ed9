//! Stable identifiers for crawled content.
//!
//! A device assigns each object a path whose last segment is an opaque,
//! server-stable id. The identifier used as the store key is that segment
//! prefixed by the miner's namespace, so the same unchanged item maps to the
//! same key on every crawl.

use crate::config::MinerConfig;
use crate::error::{MinerError, Result};

/// Derive the store identifier for an object path.
///
/// Trailing slashes are ignored. A path without any non-empty segment is
/// rejected as malformed.
pub fn derive_identifier(path: &str) -> Result<String> {
    let segment = last_segment(path)
        .ok_or_else(|| MinerError::malformed(path, "path has no usable segment"))?;
    Ok(format!("{}:{}", MinerConfig::IDENTIFIER_NAMESPACE, segment))
}

/// Last non-empty `/`-separated segment of a path.
pub fn last_segment(path: &str) -> Option<&str> {
    path.rsplit('/').find(|segment| !segment.is_empty())
}
