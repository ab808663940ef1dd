//! Registry scanning, classification, and snapshot building
//!
//! A scan queries every match class, classifies each raw entry into a
//! [`DeviceSnapshot`], then deduplicates across classes and sorts. Individual
//! property absences and whole-class query failures degrade to less data,
//! never to a failed scan.

use crate::registry::{DeviceRegistry, MatchClass, RegistryEntry};
use model::DeviceSnapshot;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Registry class names that mark a node as storage-related.
const STORAGE_CLASS_NAMES: [&str; 3] = ["MassStorage", "BlockStorage", "Media"];

/// Upper bound on ancestor walks, so corrupted trees still terminate.
const MAX_ANCESTOR_DEPTH: usize = 32;

/// One-shot synchronous scanner over a platform registry.
///
/// Runs on the engine's worker thread; registry calls may block on the
/// kernel and must never execute on the primary context.
pub struct Scanner<R: DeviceRegistry> {
    registry: R,
}

impl<R: DeviceRegistry> Scanner<R> {
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Walk every match class and build the canonical snapshot list.
    ///
    /// A failed class query is skipped; results from the remaining classes
    /// still form a snapshot. Entry handles are dropped before this returns,
    /// on every path.
    pub fn scan_once(&self) -> Vec<DeviceSnapshot> {
        let mut raw = Vec::new();
        for class in MatchClass::ALL {
            match self.registry.query(class) {
                Ok(entries) => {
                    debug!(class = class.as_str(), count = entries.len(), "query done");
                    raw.extend(entries.iter().filter_map(classify));
                }
                Err(err) => {
                    warn!(class = class.as_str(), %err, "registry query failed, skipping class");
                }
            }
        }
        dedupe(raw)
    }
}

/// Classify one raw registry entry into a device snapshot.
///
/// Entries lacking both vendor and product ids are not USB device nodes we
/// can identify and are skipped. Every other absence degrades to `None`.
fn classify<E: RegistryEntry>(entry: &E) -> Option<DeviceSnapshot> {
    let props = entry.properties();
    let (vendor_id, product_id) = match (props.vendor_id, props.product_id) {
        (Some(v), Some(p)) => (v, p),
        _ => return None,
    };

    let name = props
        .name
        .unwrap_or_else(|| format!("USB device {:04x}:{:04x}", vendor_id, product_id));

    Some(DeviceSnapshot {
        name,
        vendor: props.vendor,
        vendor_id,
        product_id,
        serial_number: props.serial_number,
        location_id: props.location_id,
        speed_mbps: derive_speed(props.speed_code, props.bit_rate_mbps),
        port_max_speed_mbps: port_max_speed(entry),
        usb_version_bcd: props.usb_version_bcd,
        is_external_storage: has_storage_lineage(entry),
    })
}

/// Negotiated speed: the platform speed code wins, the raw bit-rate property
/// is the fallback. An unrecognized code yields `None`.
fn derive_speed(speed_code: Option<u8>, bit_rate_mbps: Option<u32>) -> Option<u32> {
    speed_code.and_then(speed_code_mbps).or(bit_rate_mbps)
}

/// Platform speed code to Mbps.
pub fn speed_code_mbps(code: u8) -> Option<u32> {
    match code {
        0 => Some(2),
        1 => Some(12),
        2 => Some(480),
        3 => Some(5000),
        4 => Some(10000),
        _ => None,
    }
}

/// Resolve the upstream port's maximum speed from exactly one parent level.
///
/// Numeric port capability first, then the link-kind string heuristic.
/// Unresolvable is `None`, not an error.
fn port_max_speed<E: RegistryEntry>(entry: &E) -> Option<u32> {
    let parent = entry.parent()?;
    let props = parent.properties();
    if let Some(mbps) = props.port_max_speed_mbps {
        return Some(mbps);
    }
    let kind = props.port_link_kind?;
    if kind.contains("SuperSpeedPlus") {
        Some(10000)
    } else if kind.contains("SuperSpeed") {
        Some(5000)
    } else {
        None
    }
}

/// Whether the entry or any ancestor carries a storage-related class name.
///
/// The walk is bounded by [`MAX_ANCESTOR_DEPTH`] so it terminates even on a
/// malformed tree.
fn has_storage_lineage<E: RegistryEntry>(entry: &E) -> bool {
    if is_storage_class(entry.properties().class_name.as_deref()) {
        return true;
    }
    let mut current = entry.parent();
    let mut depth = 0;
    while let Some(node) = current {
        if is_storage_class(node.properties().class_name.as_deref()) {
            return true;
        }
        depth += 1;
        if depth >= MAX_ANCESTOR_DEPTH {
            warn!("ancestor walk hit depth bound, stopping");
            break;
        }
        current = node.parent();
    }
    false
}

fn is_storage_class(class_name: Option<&str>) -> bool {
    match class_name {
        Some(name) => STORAGE_CLASS_NAMES.iter().any(|m| name.contains(m)),
        None => false,
    }
}

/// Merge raw results from all match classes into the canonical list.
///
/// The first-seen entry for each identity key wins; later duplicates from
/// other match classes are discarded. Output is sorted ascending by
/// `(vendor, name)`, vendor-less devices sorting as the empty string.
pub fn dedupe(raw: Vec<DeviceSnapshot>) -> Vec<DeviceSnapshot> {
    let mut seen = HashSet::new();
    let mut devices: Vec<DeviceSnapshot> = raw
        .into_iter()
        .filter(|snap| seen.insert(snap.key()))
        .collect();
    devices.sort_by(|a, b| {
        let ka = (a.vendor.as_deref().unwrap_or(""), a.name.as_str());
        let kb = (b.vendor.as_deref().unwrap_or(""), b.name.as_str());
        ka.cmp(&kb)
    });
    devices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::mock::{MockNode, MockRegistry};
    use common::test_utils::{mock_named_snapshot, mock_snapshot};

    #[test]
    fn test_speed_code_table() {
        assert_eq!(speed_code_mbps(0), Some(2));
        assert_eq!(speed_code_mbps(1), Some(12));
        assert_eq!(speed_code_mbps(2), Some(480));
        assert_eq!(speed_code_mbps(3), Some(5000));
        assert_eq!(speed_code_mbps(4), Some(10000));
        assert_eq!(speed_code_mbps(9), None);
    }

    #[test]
    fn test_dedupe_equal_keys_keep_first() {
        let mut a = mock_snapshot(0x1234, 0x5678, 1);
        a.serial_number = Some("first".into());
        let mut b = mock_snapshot(0x1234, 0x5678, 1);
        b.serial_number = Some("second".into());

        let devices = dedupe(vec![a, b]);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial_number.as_deref(), Some("first"));
    }

    #[test]
    fn test_dedupe_keeps_entries_differing_in_any_field() {
        let devices = dedupe(vec![
            mock_snapshot(0x1234, 0x5678, 1),
            mock_snapshot(0x1234, 0x5678, 2),
            mock_snapshot(0x1234, 0x5679, 1),
            mock_snapshot(0x1235, 0x5678, 1),
        ]);
        assert_eq!(devices.len(), 4);
    }

    #[test]
    fn test_ordering_by_vendor_then_name() {
        let devices = dedupe(vec![
            mock_named_snapshot(1, 1, 1, Some("Zeta"), "Drive"),
            mock_named_snapshot(2, 2, 2, Some("Acme"), "Mouse"),
            mock_named_snapshot(3, 3, 3, Some("Acme"), "Keyboard"),
            mock_named_snapshot(4, 4, 4, None, "Anonymous Widget"),
        ]);
        // Vendor-less sorts first as the empty string
        assert_eq!(devices[0].name, "Anonymous Widget");
        assert_eq!(devices[1].name, "Keyboard");
        assert_eq!(devices[2].name, "Mouse");
        assert_eq!(devices[3].name, "Drive");
    }

    #[test]
    fn test_ordering_stable_under_arrival_permutation() {
        let items = vec![
            mock_named_snapshot(1, 1, 1, Some("Acme"), "Keyboard"),
            mock_named_snapshot(2, 2, 2, Some("Acme"), "Mouse"),
            mock_named_snapshot(3, 3, 3, Some("Zeta"), "Drive"),
        ];
        let mut reversed = items.clone();
        reversed.reverse();

        assert_eq!(dedupe(items), dedupe(reversed));
    }

    #[test]
    fn test_scan_classifies_and_dedupes_across_classes() {
        let registry = MockRegistry::new();
        registry.set_all(vec![
            MockNode::device(0x1234, 0x5678, 1)
                .named("Acme", "Widget")
                .speed_code(2)
                .usb_version(0x0200),
        ]);

        let scanner = Scanner::new(registry.clone());
        let devices = scanner.scan_once();

        // One device despite being discoverable through both match classes
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Widget");
        assert_eq!(devices[0].speed_mbps, Some(480));
        assert_eq!(registry.live_handles(), 0);
    }

    #[test]
    fn test_scan_survives_failed_class() {
        let registry = MockRegistry::new();
        registry.set_all(vec![MockNode::device(0x1234, 0x5678, 1)]);
        registry.fail_class(MatchClass::HostDevice);

        let scanner = Scanner::new(registry.clone());
        let devices = scanner.scan_once();

        assert_eq!(devices.len(), 1);
        assert_eq!(registry.live_handles(), 0);
    }

    #[test]
    fn test_entries_without_ids_are_skipped() {
        let registry = MockRegistry::new();
        registry.set_all(vec![
            MockNode::class("UsbHub"),
            MockNode::device(0x1234, 0x5678, 1),
        ]);

        let scanner = Scanner::new(registry.clone());
        let devices = scanner.scan_once();

        assert_eq!(devices.len(), 1);
        assert_eq!(registry.live_handles(), 0);
    }

    #[test]
    fn test_missing_name_synthesized_from_ids() {
        let registry = MockRegistry::new();
        registry.set_all(vec![MockNode::device(0x1234, 0x5678, 1)]);

        let scanner = Scanner::new(registry);
        let devices = scanner.scan_once();
        assert_eq!(devices[0].name, "USB device 1234:5678");
        assert_eq!(devices[0].vendor, None);
    }

    #[test]
    fn test_bit_rate_fallback_when_no_speed_code() {
        let registry = MockRegistry::new();
        registry.set_all(vec![MockNode::device(0x1234, 0x5678, 1).bit_rate(480)]);

        let scanner = Scanner::new(registry);
        assert_eq!(scanner.scan_once()[0].speed_mbps, Some(480));
    }

    #[test]
    fn test_port_max_speed_numeric_capability() {
        let registry = MockRegistry::new();
        registry.set_all(vec![
            MockNode::device(0x1234, 0x5678, 1)
                .speed_code(2)
                .with_parent(MockNode::class("UsbHub").port_capability(10000)),
        ]);

        let scanner = Scanner::new(registry.clone());
        let devices = scanner.scan_once();
        assert_eq!(devices[0].port_max_speed_mbps, Some(10000));
        assert_eq!(registry.live_handles(), 0);
    }

    #[test]
    fn test_port_max_speed_string_fallback() {
        let registry = MockRegistry::new();
        registry.set_all(vec![
            MockNode::device(1, 1, 1)
                .with_parent(MockNode::class("UsbHub").port_link("SuperSpeedPlus")),
            MockNode::device(2, 2, 2)
                .with_parent(MockNode::class("UsbHub").port_link("SuperSpeed")),
            MockNode::device(3, 3, 3).with_parent(MockNode::class("UsbHub")),
        ]);

        let scanner = Scanner::new(registry.clone());
        let devices = scanner.scan_once();
        let by_vid = |vid: u16| {
            devices
                .iter()
                .find(|d| d.vendor_id == vid)
                .unwrap()
                .port_max_speed_mbps
        };
        assert_eq!(by_vid(1), Some(10000));
        assert_eq!(by_vid(2), Some(5000));
        assert_eq!(by_vid(3), None);
        assert_eq!(registry.live_handles(), 0);
    }

    #[test]
    fn test_storage_lineage_detected() {
        let registry = MockRegistry::new();
        registry.set_all(vec![
            MockNode::device(0x1234, 0x5678, 1).with_parent(
                MockNode::class("UsbHub").with_parent(MockNode::class("BlockStorageDriver")),
            ),
            MockNode::device(0xaaaa, 0xbbbb, 2).with_parent(MockNode::class("UsbHub")),
        ]);

        let scanner = Scanner::new(registry.clone());
        let devices = scanner.scan_once();
        let storage = devices.iter().find(|d| d.vendor_id == 0x1234).unwrap();
        let plain = devices.iter().find(|d| d.vendor_id == 0xaaaa).unwrap();
        assert!(storage.is_external_storage);
        assert!(!plain.is_external_storage);
        assert_eq!(registry.live_handles(), 0);
    }

    #[test]
    fn test_storage_walk_terminates_on_deep_tree() {
        let registry = MockRegistry::new();
        registry.set_all(vec![
            MockNode::device(0x1234, 0x5678, 1).with_ancestor_chain(200, "UsbHub"),
        ]);

        let scanner = Scanner::new(registry.clone());
        let devices = scanner.scan_once();
        assert_eq!(devices.len(), 1);
        assert!(!devices[0].is_external_storage);
        assert_eq!(registry.live_handles(), 0);
    }
}
