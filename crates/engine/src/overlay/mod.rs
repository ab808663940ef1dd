//! Identity overlay store
//!
//! Five independently persisted relations keyed by [`DeviceKey`]: renames,
//! camouflaged devices, heritage edges, seen-device history, and the
//! connection-event log. Each relation serializes on its own lock;
//! cross-relation atomicity is deliberately not provided.
//!
//! Failure semantics: a read or decode failure falls back to an empty
//! relation with a warning; a write failure is reported to the caller while
//! the in-memory relation keeps the attempted value, so retrying the same
//! mutation is always safe.

mod persist;

pub use persist::{FileBackend, MemoryBackend, OverlayBackend};

use model::{
    CamouflagedDevice, ConnectionEvent, DeviceKey, HeritageDevice, RenamedDevice, StoreError,
    StoredDevice,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::warn;

const RENAMED_RELATION: &str = "renamed";
const CAMOUFLAGED_RELATION: &str = "camouflaged";
const HERITAGE_RELATION: &str = "heritage";
const STORED_RELATION: &str = "stored";
const CONNECTION_LOG_RELATION: &str = "connection_log";

/// One persisted relation: an ordered record collection behind a lock.
struct Relation<T> {
    name: &'static str,
    records: Mutex<Vec<T>>,
}

impl<T: Serialize + DeserializeOwned + Clone> Relation<T> {
    /// Load the relation from the backend. Missing or undecodable data
    /// becomes an empty relation.
    fn open(name: &'static str, backend: &dyn OverlayBackend) -> Self {
        let records = match backend.load(name) {
            Ok(Some(bytes)) => match postcard::from_bytes::<Vec<T>>(&bytes) {
                Ok(records) => records,
                Err(err) => {
                    warn!(relation = name, %err, "failed to decode relation, starting empty");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(relation = name, %err, "failed to read relation, starting empty");
                Vec::new()
            }
        };
        Self {
            name,
            records: Mutex::new(records),
        }
    }

    fn list(&self) -> Vec<T> {
        self.records.lock().unwrap().clone()
    }

    /// Apply `mutate` under the relation lock and persist the result.
    ///
    /// When the closure rejects the mutation nothing is changed or written.
    /// When persistence fails the in-memory records keep the new value and
    /// the caller receives the error.
    fn mutate<F>(&self, backend: &dyn OverlayBackend, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Vec<T>) -> Result<(), StoreError>,
    {
        let mut records = self.records.lock().unwrap();
        apply(&mut records)?;
        let bytes = postcard::to_allocvec(&*records).map_err(|err| StoreError::Persist {
            relation: self.name.to_string(),
            reason: err.to_string(),
        })?;
        backend
            .store(self.name, &bytes)
            .map_err(|err| StoreError::Persist {
                relation: self.name.to_string(),
                reason: err.to_string(),
            })
    }
}

/// The identity overlay store.
///
/// Safe to call from the primary context; each relation serializes its own
/// reads and writes.
pub struct OverlayStore {
    backend: Arc<dyn OverlayBackend>,
    renamed: Relation<RenamedDevice>,
    camouflaged: Relation<CamouflagedDevice>,
    heritage: Relation<HeritageDevice>,
    stored: Relation<StoredDevice>,
    log: Relation<ConnectionEvent>,
}

impl OverlayStore {
    /// Open all relations from the backend. Never fails: unreadable
    /// relations start empty.
    pub fn open(backend: Arc<dyn OverlayBackend>) -> Self {
        Self {
            renamed: Relation::open(RENAMED_RELATION, backend.as_ref()),
            camouflaged: Relation::open(CAMOUFLAGED_RELATION, backend.as_ref()),
            heritage: Relation::open(HERITAGE_RELATION, backend.as_ref()),
            stored: Relation::open(STORED_RELATION, backend.as_ref()),
            log: Relation::open(CONNECTION_LOG_RELATION, backend.as_ref()),
            backend,
        }
    }

    // --- renamed -----------------------------------------------------------

    /// Set or replace the user-assigned name for a device.
    pub fn rename(&self, device: DeviceKey, name: impl Into<String>) -> Result<(), StoreError> {
        let name = name.into();
        self.renamed.mutate(self.backend.as_ref(), |records| {
            records.retain(|r| r.device != device);
            records.push(RenamedDevice { device, name });
            Ok(())
        })
    }

    pub fn remove_rename(&self, device: DeviceKey) -> Result<(), StoreError> {
        self.renamed.mutate(self.backend.as_ref(), |records| {
            records.retain(|r| r.device != device);
            Ok(())
        })
    }

    pub fn renamed(&self) -> Vec<RenamedDevice> {
        self.renamed.list()
    }

    pub fn clear_renamed(&self) -> Result<(), StoreError> {
        self.renamed.mutate(self.backend.as_ref(), |records| {
            records.clear();
            Ok(())
        })
    }

    // --- camouflaged -------------------------------------------------------

    /// Hide a device from the visible list.
    pub fn camouflage(&self, device: DeviceKey) -> Result<(), StoreError> {
        self.camouflaged.mutate(self.backend.as_ref(), |records| {
            records.retain(|r| r.device != device);
            records.push(CamouflagedDevice { device });
            Ok(())
        })
    }

    /// Make a hidden device visible again.
    pub fn reveal(&self, device: DeviceKey) -> Result<(), StoreError> {
        self.camouflaged.mutate(self.backend.as_ref(), |records| {
            records.retain(|r| r.device != device);
            Ok(())
        })
    }

    pub fn camouflaged(&self) -> Vec<CamouflagedDevice> {
        self.camouflaged.list()
    }

    pub fn clear_camouflaged(&self) -> Result<(), StoreError> {
        self.camouflaged.mutate(self.backend.as_ref(), |records| {
            records.clear();
            Ok(())
        })
    }

    // --- heritage ----------------------------------------------------------

    /// Insert or replace the inheritance edge `device -> inherits_from`.
    ///
    /// Rejected with [`StoreError::InvalidRelation`] when the edge would
    /// self-parent or close a cycle; the edge set is left untouched.
    pub fn inherit(&self, device: DeviceKey, inherits_from: DeviceKey) -> Result<(), StoreError> {
        if device == inherits_from {
            return Err(StoreError::InvalidRelation(
                "device cannot inherit from itself".to_string(),
            ));
        }
        self.heritage.mutate(self.backend.as_ref(), |records| {
            // Fast path: the parent already inherits directly from the child
            if records
                .iter()
                .any(|e| e.device == inherits_from && e.inherits_from == device)
            {
                return Err(StoreError::InvalidRelation(format!(
                    "{} and {} would inherit from each other",
                    device, inherits_from
                )));
            }
            if chain_reaches(records, inherits_from, device) {
                return Err(StoreError::InvalidRelation(format!(
                    "inheriting from {} would create a cycle",
                    inherits_from
                )));
            }
            records.retain(|e| e.device != device);
            records.push(HeritageDevice {
                device,
                inherits_from,
            });
            Ok(())
        })
    }

    /// Remove the device's outgoing inheritance edge, if any.
    pub fn disinherit(&self, device: DeviceKey) -> Result<(), StoreError> {
        self.heritage.mutate(self.backend.as_ref(), |records| {
            records.retain(|e| e.device != device);
            Ok(())
        })
    }

    pub fn heritage(&self) -> Vec<HeritageDevice> {
        self.heritage.list()
    }

    /// The parent a device inherits from, if an edge exists.
    pub fn inherits_from(&self, device: DeviceKey) -> Option<DeviceKey> {
        self.heritage
            .list()
            .into_iter()
            .find(|e| e.device == device)
            .map(|e| e.inherits_from)
    }

    pub fn clear_heritage(&self) -> Result<(), StoreError> {
        self.heritage.mutate(self.backend.as_ref(), |records| {
            records.clear();
            Ok(())
        })
    }

    // --- stored history ----------------------------------------------------

    /// Record that a device has been seen, replacing any previous entry.
    pub fn remember(&self, device: DeviceKey, name: impl Into<String>) -> Result<(), StoreError> {
        let name = name.into();
        self.stored.mutate(self.backend.as_ref(), |records| {
            records.retain(|r| r.device != device);
            records.push(StoredDevice { device, name });
            Ok(())
        })
    }

    pub fn forget(&self, device: DeviceKey) -> Result<(), StoreError> {
        self.stored.mutate(self.backend.as_ref(), |records| {
            records.retain(|r| r.device != device);
            Ok(())
        })
    }

    pub fn stored(&self) -> Vec<StoredDevice> {
        self.stored.list()
    }

    pub fn clear_stored(&self) -> Result<(), StoreError> {
        self.stored.mutate(self.backend.as_ref(), |records| {
            records.clear();
            Ok(())
        })
    }

    // --- connection log ----------------------------------------------------

    /// Append one connect/disconnect event with a fresh token.
    pub fn record_event(&self, device: DeviceKey, disconnect: bool) -> Result<(), StoreError> {
        let event = ConnectionEvent {
            id: rand::random::<u64>(),
            device,
            time: SystemTime::now(),
            disconnect,
        };
        self.log.mutate(self.backend.as_ref(), |records| {
            records.push(event);
            Ok(())
        })
    }

    /// Connection events in append order.
    pub fn connection_log(&self) -> Vec<ConnectionEvent> {
        self.log.list()
    }

    /// Retain only the `last` most recently appended events, in their
    /// original relative order.
    pub fn keep_only(&self, last: usize) -> Result<(), StoreError> {
        self.log.mutate(self.backend.as_ref(), |records| {
            let len = records.len();
            if len > last {
                records.drain(..len - last);
            }
            Ok(())
        })
    }

    pub fn clear_log(&self) -> Result<(), StoreError> {
        self.log.mutate(self.backend.as_ref(), |records| {
            records.clear();
            Ok(())
        })
    }
}

/// Whether following `inherits_from` edges from `start` ever reaches
/// `target`.
///
/// The walk is bounded by the edge count, so it terminates even when
/// persisted data already contains a cycle.
fn chain_reaches(edges: &[HeritageDevice], start: DeviceKey, target: DeviceKey) -> bool {
    let mut current = Some(start);
    let mut hops = 0;
    while let Some(node) = current {
        if node == target {
            return true;
        }
        if hops >= edges.len() {
            break;
        }
        hops += 1;
        current = edges
            .iter()
            .find(|e| e.device == node)
            .map(|e| e.inherits_from);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u16) -> DeviceKey {
        DeviceKey::new(n, n, Some(u32::from(n)))
    }

    fn store() -> OverlayStore {
        OverlayStore::open(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_rename_idempotent() {
        let store = store();
        store.rename(key(1), "Foo").unwrap();
        store.rename(key(1), "Foo").unwrap();

        let renamed = store.renamed();
        assert_eq!(renamed.len(), 1);
        assert_eq!(renamed[0].name, "Foo");
    }

    #[test]
    fn test_rename_replaces() {
        let store = store();
        store.rename(key(1), "Foo").unwrap();
        store.rename(key(1), "Bar").unwrap();

        let renamed = store.renamed();
        assert_eq!(renamed.len(), 1);
        assert_eq!(renamed[0].name, "Bar");
    }

    #[test]
    fn test_camouflage_roundtrip() {
        let store = store();
        store.camouflage(key(1)).unwrap();
        store.camouflage(key(1)).unwrap();
        assert_eq!(store.camouflaged().len(), 1);

        store.reveal(key(1)).unwrap();
        assert!(store.camouflaged().is_empty());
    }

    #[test]
    fn test_heritage_self_loop_rejected() {
        let store = store();
        let err = store.inherit(key(1), key(1)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRelation(_)));
        assert!(store.heritage().is_empty());
    }

    #[test]
    fn test_heritage_direct_cycle_rejected() {
        let store = store();
        store.inherit(key(1), key(2)).unwrap();
        let err = store.inherit(key(2), key(1)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRelation(_)));
        assert_eq!(store.heritage().len(), 1);
    }

    #[test]
    fn test_heritage_transitive_cycle_rejected() {
        let store = store();
        store.inherit(key(1), key(2)).unwrap();
        store.inherit(key(2), key(3)).unwrap();

        let err = store.inherit(key(3), key(1)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRelation(_)));

        // The edge set is unchanged
        let edges = store.heritage();
        assert_eq!(edges.len(), 2);
        assert_eq!(store.inherits_from(key(1)), Some(key(2)));
        assert_eq!(store.inherits_from(key(2)), Some(key(3)));
        assert_eq!(store.inherits_from(key(3)), None);
    }

    #[test]
    fn test_heritage_readd_replaces_edge() {
        let store = store();
        store.inherit(key(1), key(2)).unwrap();
        store.inherit(key(1), key(3)).unwrap();

        let edges = store.heritage();
        assert_eq!(edges.len(), 1);
        assert_eq!(store.inherits_from(key(1)), Some(key(3)));
    }

    #[test]
    fn test_heritage_diamond_free_chain_allowed() {
        let store = store();
        store.inherit(key(2), key(1)).unwrap();
        store.inherit(key(3), key(2)).unwrap();
        store.inherit(key(4), key(2)).unwrap();
        assert_eq!(store.heritage().len(), 3);
    }

    #[test]
    fn test_chain_walk_terminates_on_corrupted_data() {
        // A pre-existing cycle that validation would normally prevent
        let edges = vec![
            HeritageDevice {
                device: key(1),
                inherits_from: key(2),
            },
            HeritageDevice {
                device: key(2),
                inherits_from: key(1),
            },
        ];
        assert!(!chain_reaches(&edges, key(1), key(9)));
        assert!(chain_reaches(&edges, key(1), key(2)));
    }

    #[test]
    fn test_log_retention() {
        let store = store();
        for n in 0..50u16 {
            store.record_event(key(n), false).unwrap();
        }
        store.keep_only(10).unwrap();

        let log = store.connection_log();
        assert_eq!(log.len(), 10);
        // The ten most recently appended, original relative order preserved
        let devices: Vec<u16> = log.iter().map(|e| e.device.vendor_id).collect();
        assert_eq!(devices, (40..50).collect::<Vec<u16>>());
    }

    #[test]
    fn test_keep_only_larger_than_len_is_noop() {
        let store = store();
        store.record_event(key(1), false).unwrap();
        store.keep_only(10).unwrap();
        assert_eq!(store.connection_log().len(), 1);
    }

    #[test]
    fn test_log_clear() {
        let store = store();
        store.record_event(key(1), false).unwrap();
        store.record_event(key(1), true).unwrap();
        store.clear_log().unwrap();
        assert!(store.connection_log().is_empty());
    }

    #[test]
    fn test_event_tokens_are_fresh() {
        let store = store();
        store.record_event(key(1), false).unwrap();
        store.record_event(key(1), false).unwrap();
        let log = store.connection_log();
        assert_ne!(log[0].id, log[1].id);
    }

    #[test]
    fn test_write_failure_keeps_memory_value() {
        let backend = Arc::new(MemoryBackend::new());
        let store = OverlayStore::open(backend.clone());

        backend.fail_writes(true);
        let err = store.rename(key(1), "Foo").unwrap_err();
        assert!(matches!(err, StoreError::Persist { .. }));

        // Last-write-wins from the caller's perspective
        assert_eq!(store.renamed()[0].name, "Foo");

        // A retry after the backend recovers persists the same value
        backend.fail_writes(false);
        store.rename(key(1), "Foo").unwrap();
        assert_eq!(store.renamed().len(), 1);
    }

    #[test]
    fn test_stored_history_upserts() {
        let store = store();
        store.remember(key(1), "Widget").unwrap();
        store.remember(key(1), "Widget Mk2").unwrap();

        let stored = store.stored();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].name, "Widget Mk2");

        store.forget(key(1)).unwrap();
        assert!(store.stored().is_empty());
    }
}
