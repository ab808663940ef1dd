//! Persisted overlay record types
//!
//! Each record type belongs to one independently persisted relation, keyed by
//! the device's [`DeviceKey`]. Records are created and removed by explicit
//! user or event-driven operations and survive across scans and restarts.

use crate::DeviceKey;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// User-assigned name overriding the raw device name. At most one per device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamedDevice {
    pub device: DeviceKey,
    pub name: String,
}

/// Presence hides the device from the visible list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CamouflagedDevice {
    pub device: DeviceKey,
}

/// Directed inheritance edge: `device` inherits from `inherits_from`.
///
/// A device has at most one outgoing edge and the edge set must never
/// contain a cycle; the store enforces both before inserting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeritageDevice {
    pub device: DeviceKey,
    pub inherits_from: DeviceKey,
}

/// History entry for a device that has been seen at least once, independent
/// of whether it is currently attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDevice {
    pub device: DeviceKey,
    pub name: String,
}

/// One retained connect/disconnect event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    /// Freshly generated unique token for this entry
    pub id: u64,
    pub device: DeviceKey,
    pub time: SystemTime,
    /// `false` for a connect, `true` for a disconnect
    pub disconnect: bool,
}
