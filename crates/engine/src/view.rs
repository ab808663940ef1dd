//! Reconciliation of the live snapshot against the overlay relations
//!
//! Pure functions of their inputs: no hidden state, so overlay edits are
//! reflected immediately by re-running reconciliation against the cached
//! snapshot, without a new registry scan.

use crate::overlay::OverlayStore;
use model::{CamouflagedDevice, DeviceKey, DeviceListView, DeviceSnapshot, DisplayDevice, RenamedDevice};
use std::collections::{HashMap, HashSet};

/// Join the snapshot against the rename and camouflage relations.
///
/// Camouflaged devices are excluded; renamed devices carry the overlay name
/// with every other attribute passed through unchanged.
pub fn visible_devices(
    snapshot: &[DeviceSnapshot],
    renamed: &[RenamedDevice],
    camouflaged: &[CamouflagedDevice],
) -> Vec<DisplayDevice> {
    let hidden: HashSet<DeviceKey> = camouflaged.iter().map(|c| c.device).collect();
    let renames: HashMap<DeviceKey, &str> = renamed
        .iter()
        .map(|r| (r.device, r.name.as_str()))
        .collect();

    snapshot
        .iter()
        .filter(|device| !hidden.contains(&device.key()))
        .map(|device| match renames.get(&device.key()) {
            Some(name) => DisplayDevice {
                name: (*name).to_string(),
                renamed: true,
                device: device.clone(),
            },
            None => DisplayDevice {
                name: device.name.clone(),
                renamed: false,
                device: device.clone(),
            },
        })
        .collect()
}

/// Count camouflaged devices that are currently attached.
///
/// A diagnostic counter, independent of the exclusion performed by
/// [`visible_devices`].
pub fn hidden_connected_count(
    snapshot: &[DeviceSnapshot],
    camouflaged: &[CamouflagedDevice],
) -> usize {
    let hidden: HashSet<DeviceKey> = camouflaged.iter().map(|c| c.device).collect();
    snapshot
        .iter()
        .filter(|device| hidden.contains(&device.key()))
        .count()
}

/// Build the externally visible view from a snapshot and the current overlay
/// contents.
pub fn reconcile(snapshot: &[DeviceSnapshot], store: &OverlayStore) -> DeviceListView {
    let renamed = store.renamed();
    let camouflaged = store.camouflaged();
    DeviceListView {
        devices: visible_devices(snapshot, &renamed, &camouflaged),
        hidden_connected: hidden_connected_count(snapshot, &camouflaged),
    }
}
