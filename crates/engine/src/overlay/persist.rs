//! Overlay persistence backends
//!
//! The store serializes each relation as one postcard-encoded collection
//! under a fixed name. Backends are an opaque name→bytes contract: a missing
//! name is an empty relation, and the engine never assumes anything about
//! how or where the bytes live.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Opaque name→bytes store behind the overlay relations.
pub trait OverlayBackend: Send + Sync + 'static {
    /// Load the encoded collection for `relation`. `Ok(None)` means the
    /// relation has never been written.
    fn load(&self, relation: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replace the encoded collection for `relation`.
    fn store(&self, relation: &str, bytes: &[u8]) -> io::Result<()>;
}

/// File-per-relation backend under a data directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, relation: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", relation))
    }
}

impl OverlayBackend for FileBackend {
    fn load(&self, relation: &str) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(relation)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn store(&self, relation: &str, bytes: &[u8]) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(relation);
        std::fs::write(&path, bytes)?;
        debug!(relation, path = %path.display(), "relation persisted");
        Ok(())
    }
}

/// In-memory backend for tests and ephemeral sessions.
///
/// Writes can be made to fail on demand to exercise the store's
/// write-failure contract.
#[derive(Default)]
pub struct MemoryBackend {
    map: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl OverlayBackend for MemoryBackend {
    fn load(&self, relation: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.map.lock().unwrap().get(relation).cloned())
    }

    fn store(&self, relation: &str, bytes: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected write failure"));
        }
        self.map
            .lock()
            .unwrap()
            .insert(relation.to_string(), bytes.to_vec());
        Ok(())
    }
}
