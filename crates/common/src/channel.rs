//! Async channel bridge between the engine's primary loop and the registry
//! worker thread
//!
//! Registry queries are synchronous kernel calls and run on a dedicated
//! worker thread; hotplug callbacks arrive on platform-owned threads. Both
//! communicate with the primary loop exclusively through these channels, so
//! no shared mutable state is ever touched off the primary context.

use async_channel::{Receiver, Sender, bounded};
use model::DeviceSnapshot;

/// Requests from the primary loop to the registry worker thread
#[derive(Debug)]
pub enum ScanRequest {
    /// Run one full registry scan. `seq` is echoed back in the outcome so the
    /// primary loop can discard completions that arrive out of order.
    Scan { seq: u64 },

    /// Shut down the worker thread gracefully
    Shutdown,
}

/// Completed scan sent back from the worker thread
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Sequence number of the request that produced this snapshot
    pub seq: u64,
    /// Deduplicated, sorted snapshot of attached devices
    pub devices: Vec<DeviceSnapshot>,
}

/// Which topology transition a hotplug notification describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HotplugKind {
    Added,
    Removed,
}

/// One hotplug notification after name resolution
#[derive(Debug, Clone)]
pub struct HotplugEvent {
    pub kind: HotplugKind,
    /// Human-readable names of the affected devices; empty when none of them
    /// exposed a vendor or product string
    pub names: Vec<String>,
}

/// Handle for the primary loop (async)
#[derive(Clone)]
pub struct EngineBridge {
    request_tx: Sender<ScanRequest>,
    outcome_rx: Receiver<ScanOutcome>,
}

impl EngineBridge {
    /// Send a scan request to the worker thread
    pub async fn send_request(&self, request: ScanRequest) -> crate::Result<()> {
        self.request_tx
            .send(request)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive the next completed scan from the worker thread
    pub async fn next_outcome(&self) -> crate::Result<ScanOutcome> {
        self.outcome_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive a completed scan without blocking
    pub fn try_next_outcome(&self) -> Option<ScanOutcome> {
        self.outcome_rx.try_recv().ok()
    }
}

/// Handle for the registry worker thread (blocking)
pub struct RegistryWorker {
    pub(crate) request_rx: Receiver<ScanRequest>,
    /// Outcome sender (public for the worker thread to access)
    pub outcome_tx: Sender<ScanOutcome>,
}

impl RegistryWorker {
    /// Receive a request from the primary loop (blocking)
    pub fn recv_request(&self) -> crate::Result<ScanRequest> {
        self.request_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a request without blocking
    pub fn try_recv_request(&self) -> Option<ScanRequest> {
        self.request_rx.try_recv().ok()
    }

    /// Send a completed scan to the primary loop (blocking)
    pub fn send_outcome(&self, outcome: ScanOutcome) -> crate::Result<()> {
        self.outcome_tx
            .send_blocking(outcome)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between the primary loop and the worker thread
///
/// Returns (EngineBridge for the primary loop, RegistryWorker for the worker
/// thread). Both channels are bounded so a wedged worker cannot accumulate an
/// unbounded request backlog.
pub fn create_registry_bridge() -> (EngineBridge, RegistryWorker) {
    let (request_tx, request_rx) = bounded(64);
    let (outcome_tx, outcome_rx) = bounded(64);

    (
        EngineBridge {
            request_tx,
            outcome_rx,
        },
        RegistryWorker {
            request_rx,
            outcome_tx,
        },
    )
}
