//! Discovery of media servers.
//!
//! [`DeviceRegistry`] tracks the devices the discovery daemon reports, and
//! [`RegistrySlot`] hands out one shared registry per process context.

mod device_registry;
mod slot;

pub use device_registry::{DeviceRegistry, RegistryEvent, RegistryState};
pub use slot::RegistrySlot;
