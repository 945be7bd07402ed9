//! Content records as delivered by a device, and their classified form.

use super::identifier::derive_identifier;
use crate::error::{MinerError, Result};
use serde::{Deserialize, Serialize};

/// Placeholder used in diagnostics for records that carry no path at all.
const UNKNOWN_PATH: &str = "<unknown>";

/// An unclassified record as returned by `search` or `list_children`.
///
/// Field names follow the media server object properties requested in the
/// projection. Every field is optional on the wire; classification decides
/// which ones a given kind requires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "DisplayName", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "MIMEType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(rename = "Path", default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(rename = "URLs", default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl RawRecord {
    /// A fully populated photo record.
    pub fn photo(
        path: impl Into<String>,
        display_name: impl Into<String>,
        mime_type: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            display_name: Some(display_name.into()),
            mime_type: Some(mime_type.into()),
            path: Some(path.into()),
            urls: vec![url.into()],
            kind: Some("image.photo".to_string()),
        }
    }

    /// A container record.
    pub fn container(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            kind: Some("container".to_string()),
            ..Default::default()
        }
    }

    /// Path for diagnostics, falling back to a placeholder.
    pub fn path_or_unknown(&self) -> &str {
        self.path.as_deref().unwrap_or(UNKNOWN_PATH)
    }

    /// Parsed kind tag, if present.
    pub fn record_kind(&self) -> Option<RecordKind> {
        self.kind.as_deref().map(RecordKind::parse)
    }
}

/// The kind tag of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Photo,
    Container,
    /// Any kind this miner does not index (audio, video, future kinds).
    Other(String),
}

impl RecordKind {
    /// Parse a `Type` tag.
    ///
    /// `container` and its subtypes (`container.album.photo`, ...) are
    /// containers; `image` and `image.photo` are photos.
    pub fn parse(tag: &str) -> Self {
        let tag = tag.trim();
        if tag == "container" || tag.starts_with("container.") {
            RecordKind::Container
        } else if tag == "image.photo" || tag == "image" {
            RecordKind::Photo
        } else {
            RecordKind::Other(tag.to_string())
        }
    }
}

/// A leaf photo ready to be indexed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoItem {
    pub display_name: String,
    pub mime_type: String,
    /// Server-relative object path.
    pub path: String,
    /// First content URL advertised for the object.
    pub url: String,
}

impl PhotoItem {
    /// Build a photo from a raw record, ignoring its kind tag.
    ///
    /// Requires path, display name, MIME type and at least one parseable URL.
    pub fn from_raw(raw: &RawRecord) -> Result<Self> {
        let path = raw
            .path
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| MinerError::malformed(UNKNOWN_PATH, "photo has no Path"))?;

        // Identifier derivation must succeed for the item to be indexable.
        derive_identifier(path)?;

        let display_name = raw
            .display_name
            .clone()
            .ok_or_else(|| MinerError::malformed(path, "photo has no DisplayName"))?;
        let mime_type = raw
            .mime_type
            .clone()
            .ok_or_else(|| MinerError::malformed(path, "photo has no MIMEType"))?;
        let url = raw
            .urls
            .first()
            .ok_or_else(|| MinerError::malformed(path, "photo has an empty URL list"))?;

        url::Url::parse(url)
            .map_err(|e| MinerError::malformed(path, format!("invalid URL {url}: {e}")))?;

        Ok(Self {
            display_name,
            mime_type,
            path: path.to_string(),
            url: url.clone(),
        })
    }

    /// Store identifier for this photo.
    pub fn identifier(&self) -> Result<String> {
        derive_identifier(&self.path)
    }
}

/// A container node. Only its path is kept, for recursion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerItem {
    pub path: String,
}

/// A classified content node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemRecord {
    Photo(PhotoItem),
    Container(ContainerItem),
}

impl ItemRecord {
    /// Classify a record returned by `list_children`.
    ///
    /// Returns `Ok(None)` for kinds this miner does not handle. A record with
    /// no kind tag, or one missing the fields its kind requires, is malformed.
    pub fn classify(raw: &RawRecord) -> Result<Option<ItemRecord>> {
        match raw.record_kind() {
            None => Err(MinerError::malformed(
                raw.path_or_unknown(),
                "record has no Type",
            )),
            Some(RecordKind::Photo) => PhotoItem::from_raw(raw).map(ItemRecord::Photo).map(Some),
            Some(RecordKind::Container) => {
                let path = raw
                    .path
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| MinerError::malformed(UNKNOWN_PATH, "container has no Path"))?;
                Ok(Some(ItemRecord::Container(ContainerItem {
                    path: path.to_string(),
                })))
            }
            Some(RecordKind::Other(_)) => Ok(None),
        }
    }

    /// Classify a record returned by a server-side search.
    ///
    /// Search results are photos unless tagged otherwise. Containers are
    /// skipped; any other explicit kind does not belong in an images-only
    /// result set and is rejected as malformed.
    pub fn classify_search_result(raw: &RawRecord) -> Result<Option<PhotoItem>> {
        match raw.record_kind() {
            None | Some(RecordKind::Photo) => PhotoItem::from_raw(raw).map(Some),
            Some(RecordKind::Container) => Ok(None),
            Some(RecordKind::Other(tag)) => Err(MinerError::malformed(
                raw.path_or_unknown(),
                format!("unexpected kind {tag} in search results"),
            )),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            ItemRecord::Photo(photo) => &photo.path,
            ItemRecord::Container(container) => &container.path,
        }
    }
}
