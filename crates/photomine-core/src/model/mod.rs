//! Content model: raw device records, their classified form, and identifiers.

pub mod identifier;
pub mod record;

pub use identifier::derive_identifier;
pub use record::{ContainerItem, ItemRecord, PhotoItem, RawRecord, RecordKind};
