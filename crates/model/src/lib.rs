//! Device model for usb-sentry
//!
//! This crate defines the value types shared by the discovery engine and its
//! consumers: the stable device identity key, the per-scan device snapshot,
//! derived human-readable labels (speed tier, USB version), and the persisted
//! overlay record types (rename, camouflage, heritage, history, connection
//! log).
//!
//! Everything here is a plain value. Snapshots are rebuilt wholesale on every
//! scan and never mutated in place; overlay records survive restarts and are
//! keyed by [`DeviceKey`].

pub mod error;
pub mod labels;
pub mod overlay;
pub mod types;

pub use error::{RegistryError, StoreError};
pub use labels::{speed_label, version_label};
pub use overlay::{
    CamouflagedDevice, ConnectionEvent, HeritageDevice, RenamedDevice, StoredDevice,
};
pub use types::{DeviceKey, DeviceListView, DeviceSnapshot, DisplayDevice};
