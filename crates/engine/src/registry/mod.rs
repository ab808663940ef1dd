//! Platform device registry abstraction
//!
//! The engine never talks to an OS registry API directly. It depends on the
//! narrow contract below: query a match class for entries, read an entry's
//! properties as a typed optional-field struct, and walk one parent link at a
//! time. The rusb-backed implementation lives in [`usb`]; [`mock`] provides a
//! scripted registry for tests and embedding.

pub mod mock;
pub mod usb;

use model::RegistryError;
use std::time::Duration;

/// Registry match classes known to surface USB devices.
///
/// Neither class is guaranteed complete on every platform version, so a scan
/// queries both and deduplicates the union.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchClass {
    /// The host-controller device class
    HostDevice,
    /// The legacy device class
    LegacyDevice,
}

impl MatchClass {
    /// All match classes, in the deterministic order scans query them.
    pub const ALL: [MatchClass; 2] = [MatchClass::HostDevice, MatchClass::LegacyDevice];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchClass::HostDevice => "host-device",
            MatchClass::LegacyDevice => "legacy-device",
        }
    }
}

/// Raw properties of one registry entry.
///
/// Every field is independently optional: a missing property is a typed
/// `None`, never an error, and never aborts processing of the entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryProperties {
    /// Registry class name of this node (used for storage classification)
    pub class_name: Option<String>,
    /// Product name string
    pub name: Option<String>,
    /// Manufacturer string
    pub vendor: Option<String>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub serial_number: Option<String>,
    pub location_id: Option<u32>,
    /// Platform speed code (0=low, 1=full, 2=high, 3=super, 4=super+)
    pub speed_code: Option<u8>,
    /// Raw negotiated bit rate in Mbps, when the platform reports one instead
    /// of a speed code
    pub bit_rate_mbps: Option<u32>,
    /// Binary-coded-decimal USB version from the device descriptor
    pub usb_version_bcd: Option<u16>,
    /// Numeric port capability, present on hub/port nodes
    pub port_max_speed_mbps: Option<u32>,
    /// Port link description string ("SuperSpeed", "SuperSpeedPlus"), the
    /// fallback when no numeric capability is reported
    pub port_link_kind: Option<String>,
}

/// One live handle into the registry tree.
///
/// Implementations own whatever OS handle backs the entry and must release it
/// when the value is dropped; the scanner holds entries only for the duration
/// of a scan.
pub trait RegistryEntry: Sized {
    /// Read this entry's properties. Total: individual absences become `None`.
    fn properties(&self) -> EntryProperties;

    /// Open the entry one level up the registry tree, if any.
    fn parent(&self) -> Option<Self>;
}

/// A queryable platform device registry.
pub trait DeviceRegistry: Send + 'static {
    type Entry: RegistryEntry;

    /// Return entries matching the given class. A failure here is transient:
    /// the scanner skips the class and continues with the others.
    fn query(&self, class: MatchClass) -> Result<Vec<Self::Entry>, RegistryError>;

    /// Give the backend a chance to run its event plumbing for up to
    /// `timeout`. Backends without an event loop just sleep.
    fn pump(&self, timeout: Duration) {
        std::thread::sleep(timeout);
    }
}
