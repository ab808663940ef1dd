//! Device identity and snapshot types

use crate::labels;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identity of one physical USB attachment point.
///
/// The `(vendor_id, product_id, location_id)` triple identifies a device for
/// the lifetime of its attachment: two scans of the same plugged-in device
/// always produce the same key, and two distinct devices attached at the same
/// time never collide (the location disambiguates identical vendor/product
/// pairs). Every overlay relation joins against this key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DeviceKey {
    pub vendor_id: u16,
    pub product_id: u16,
    pub location_id: Option<u32>,
}

impl DeviceKey {
    pub fn new(vendor_id: u16, product_id: u16, location_id: Option<u32>) -> Self {
        Self {
            vendor_id,
            product_id,
            location_id,
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location_id {
            Some(loc) => write!(
                f,
                "{:04x}:{:04x}@{:08x}",
                self.vendor_id, self.product_id, loc
            ),
            None => write!(f, "{:04x}:{:04x}@-", self.vendor_id, self.product_id),
        }
    }
}

impl FromStr for DeviceKey {
    type Err = String;

    /// Parse `vvvv:pppp@llllllll` (hex). The location part may be `-` or
    /// omitted entirely for devices that never exposed one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ids, location) = match s.split_once('@') {
            Some((ids, loc)) => (ids, Some(loc)),
            None => (s, None),
        };
        let (vid, pid) = ids
            .split_once(':')
            .ok_or_else(|| format!("invalid device key '{}', expected vvvv:pppp[@loc]", s))?;
        let vendor_id = u16::from_str_radix(vid, 16)
            .map_err(|_| format!("invalid vendor id '{}' in device key", vid))?;
        let product_id = u16::from_str_radix(pid, 16)
            .map_err(|_| format!("invalid product id '{}' in device key", pid))?;
        let location_id = match location {
            None | Some("-") => None,
            Some(loc) => Some(
                u32::from_str_radix(loc, 16)
                    .map_err(|_| format!("invalid location '{}' in device key", loc))?,
            ),
        };
        Ok(Self {
            vendor_id,
            product_id,
            location_id,
        })
    }
}

/// One attached USB device as observed by a single registry scan.
///
/// Snapshots are ephemeral: every scan rebuilds the full set and the new set
/// supersedes the old one atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Product name reported by the device, or a synthesized fallback
    pub name: String,
    /// Manufacturer string, if the device exposes one
    pub vendor: Option<String>,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Serial number string, if available
    pub serial_number: Option<String>,
    /// Topology location of the attachment point
    pub location_id: Option<u32>,
    /// Negotiated link speed in Mbps
    pub speed_mbps: Option<u32>,
    /// Maximum speed the upstream port supports, in Mbps
    pub port_max_speed_mbps: Option<u32>,
    /// Raw binary-coded-decimal USB version (e.g. 0x0320)
    pub usb_version_bcd: Option<u16>,
    /// Whether the registry lineage includes a mass-storage interface
    pub is_external_storage: bool,
}

impl DeviceSnapshot {
    /// Identity key joining this snapshot against the overlay relations.
    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(self.vendor_id, self.product_id, self.location_id)
    }

    /// Human label for the negotiated link speed.
    pub fn speed_label(&self) -> String {
        labels::speed_label(self.speed_mbps)
    }

    /// Human label for the device's USB protocol version.
    pub fn version_label(&self) -> String {
        labels::version_label(self.usb_version_bcd)
    }

    /// Speed label, annotated with the port capability when the port can do
    /// more than the device negotiated.
    pub fn speed_description(&self) -> String {
        let base = self.speed_label();
        match (self.speed_mbps, self.port_max_speed_mbps) {
            (Some(speed), Some(port)) if port > speed => format!(
                "{} (port supports up to {})",
                base,
                labels::speed_label(Some(port))
            ),
            _ => base,
        }
    }
}

/// A device row as presented to the UI after overlay reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayDevice {
    /// Effective name: the rename overlay if one exists, the raw name otherwise
    pub name: String,
    /// Whether `name` came from a rename overlay
    pub renamed: bool,
    /// The underlying snapshot, unmodified
    pub device: DeviceSnapshot,
}

impl DisplayDevice {
    pub fn key(&self) -> DeviceKey {
        self.device.key()
    }
}

/// The externally visible result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceListView {
    /// Visible devices, camouflaged entries excluded, sorted by (vendor, name)
    pub devices: Vec<DisplayDevice>,
    /// Count of camouflaged devices that are currently attached
    pub hidden_connected: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(vendor_id: u16, product_id: u16, location_id: Option<u32>) -> DeviceSnapshot {
        DeviceSnapshot {
            name: "Test Device".into(),
            vendor: Some("Test Vendor".into()),
            vendor_id,
            product_id,
            serial_number: None,
            location_id,
            speed_mbps: Some(480),
            port_max_speed_mbps: None,
            usb_version_bcd: Some(0x0200),
            is_external_storage: false,
        }
    }

    #[test]
    fn test_key_stability() {
        let a = snapshot(0x1234, 0x5678, Some(0x00100000));
        let b = snapshot(0x1234, 0x5678, Some(0x00100000));
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_key_distinguishes_location() {
        let a = snapshot(0x1234, 0x5678, Some(1));
        let b = snapshot(0x1234, 0x5678, Some(2));
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_key_display_roundtrip() {
        let key = DeviceKey::new(0x1234, 0x5678, Some(0x00100000));
        let parsed: DeviceKey = key.to_string().parse().unwrap();
        assert_eq!(key, parsed);

        let key = DeviceKey::new(0xabcd, 0x0001, None);
        assert_eq!(key.to_string(), "abcd:0001@-");
        let parsed: DeviceKey = key.to_string().parse().unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn test_key_parse_without_location() {
        let parsed: DeviceKey = "1234:5678".parse().unwrap();
        assert_eq!(parsed, DeviceKey::new(0x1234, 0x5678, None));
    }

    #[test]
    fn test_key_parse_rejects_garbage() {
        assert!("not-a-key".parse::<DeviceKey>().is_err());
        assert!("12345678".parse::<DeviceKey>().is_err());
        assert!("zzzz:0001".parse::<DeviceKey>().is_err());
        assert!("1234:5678@xyz".parse::<DeviceKey>().is_err());
    }

    #[test]
    fn test_speed_description_annotates_faster_port() {
        let mut snap = snapshot(0x1234, 0x5678, Some(1));
        snap.speed_mbps = Some(480);
        snap.port_max_speed_mbps = Some(10000);
        let desc = snap.speed_description();
        assert!(desc.contains("High Speed"));
        assert!(desc.contains("port supports up to"));
        assert!(desc.contains("SuperSpeed+"));
    }

    #[test]
    fn test_speed_description_plain_when_port_not_faster() {
        let mut snap = snapshot(0x1234, 0x5678, Some(1));
        snap.speed_mbps = Some(5000);
        snap.port_max_speed_mbps = Some(5000);
        assert_eq!(snap.speed_description(), "SuperSpeed");

        snap.port_max_speed_mbps = None;
        assert_eq!(snap.speed_description(), "SuperSpeed");
    }
}
