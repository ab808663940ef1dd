//! Engine orchestration
//!
//! `DeviceEngine` ties the pieces together: a dedicated worker thread runs
//! registry scans behind a bounded channel, the hotplug monitor feeds events
//! into the primary loop, and every completed scan is reconciled against the
//! overlay store and published on a watch channel for the UI layer.
//!
//! Scans carry a sequence number. A completion is applied only when its
//! sequence exceeds the last published one, so an out-of-order completion can
//! never overwrite a newer snapshot with an older one.

use crate::config::EngineConfig;
use crate::monitor::{
    AlertGate, AlertSink, HotplugMonitor, LogAlertSink, NotificationSource, alert_message,
};
use crate::overlay::OverlayStore;
use crate::registry::DeviceRegistry;
use crate::scan::Scanner;
use crate::view;
use common::{
    EngineBridge, HotplugEvent, RegistryWorker, ScanOutcome, ScanRequest, create_registry_bridge,
};
use model::{DeviceKey, DeviceListView, DeviceSnapshot, RegistryError, StoreError};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Spawn the registry worker thread.
///
/// One bounded worker, not a thread per scan: concurrent triggers queue on
/// the request channel and run to completion one after another.
pub fn spawn_registry_worker<R: DeviceRegistry>(
    scanner: Scanner<R>,
    worker: RegistryWorker,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("registry-worker".to_string())
        .spawn(move || run_worker(scanner, worker))
        .expect("failed to spawn registry worker thread")
}

fn run_worker<R: DeviceRegistry>(scanner: Scanner<R>, worker: RegistryWorker) {
    info!("registry worker started");
    loop {
        match worker.try_recv_request() {
            Some(ScanRequest::Shutdown) => break,
            Some(ScanRequest::Scan { seq }) => {
                let devices = scanner.scan_once();
                debug!(seq, count = devices.len(), "scan complete");
                if worker.send_outcome(ScanOutcome { seq, devices }).is_err() {
                    break;
                }
            }
            None => scanner.registry().pump(Duration::from_millis(100)),
        }
    }
    info!("registry worker stopped");
}

enum Step {
    Scan(ScanOutcome),
    Hotplug(HotplugEvent),
    Closed,
}

/// The discovery engine.
pub struct DeviceEngine<S: NotificationSource> {
    config: EngineConfig,
    store: Arc<OverlayStore>,
    monitor: HotplugMonitor<S>,
    alerts: Arc<dyn AlertSink>,
    gate: AlertGate,
    bridge: EngineBridge,
    worker: Option<JoinHandle<()>>,
    view_tx: watch::Sender<DeviceListView>,
    /// Most recently completed snapshot
    snapshot: Vec<DeviceSnapshot>,
    next_seq: u64,
    published_seq: u64,
}

impl<S: NotificationSource> DeviceEngine<S> {
    /// Create an engine with the default alert sink (tracing output).
    pub fn new<R: DeviceRegistry>(
        registry: R,
        source: S,
        store: OverlayStore,
        config: EngineConfig,
    ) -> Self {
        Self::with_alert_sink(registry, source, store, config, Arc::new(LogAlertSink))
    }

    pub fn with_alert_sink<R: DeviceRegistry>(
        registry: R,
        source: S,
        store: OverlayStore,
        config: EngineConfig,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let (bridge, worker_side) = create_registry_bridge();
        let worker = spawn_registry_worker(Scanner::new(registry), worker_side);
        let gate = AlertGate::new(
            Duration::from_secs(config.notifications.cooldown_secs),
            config.notifications.disable_cooldown,
        );
        let (view_tx, _view_rx) = watch::channel(DeviceListView::default());

        Self {
            config,
            store: Arc::new(store),
            monitor: HotplugMonitor::new(source),
            alerts,
            gate,
            bridge,
            worker: Some(worker),
            view_tx,
            snapshot: Vec::new(),
            next_seq: 1,
            published_seq: 0,
        }
    }

    /// The overlay store, for direct relation access.
    pub fn store(&self) -> &OverlayStore {
        &self.store
    }

    /// Subscribe to published device-list views.
    pub fn subscribe(&self) -> watch::Receiver<DeviceListView> {
        self.view_tx.subscribe()
    }

    /// The most recently published view.
    pub fn current_view(&self) -> DeviceListView {
        self.view_tx.borrow().clone()
    }

    /// Start monitoring and trigger the initial scan.
    pub async fn start(&mut self) -> Result<(), RegistryError> {
        self.monitor.start()?;
        self.refresh().await;
        Ok(())
    }

    /// Force a scan. Returns the scan's sequence number.
    pub async fn refresh(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Err(err) = self.bridge.send_request(ScanRequest::Scan { seq }).await {
            warn!(%err, "failed to request scan");
        }
        seq
    }

    /// Process events until the scan and outcome channels close.
    pub async fn run(&mut self) {
        loop {
            let step = tokio::select! {
                outcome = self.bridge.next_outcome() => match outcome {
                    Ok(outcome) => Step::Scan(outcome),
                    Err(_) => Step::Closed,
                },
                event = self.monitor.next_event() => Step::Hotplug(event),
            };
            match step {
                Step::Scan(outcome) => self.apply_scan(outcome),
                Step::Hotplug(event) => self.handle_hotplug(event).await,
                Step::Closed => break,
            }
        }
    }

    /// Apply scan completions until the scan with sequence `seq` (or a newer
    /// one) has been published, then return the current view.
    pub async fn wait_for_scan(&mut self, seq: u64) -> DeviceListView {
        while self.published_seq < seq {
            match self.bridge.next_outcome().await {
                Ok(outcome) => self.apply_scan(outcome),
                Err(_) => break,
            }
        }
        self.current_view()
    }

    /// Convenience: trigger a scan and wait for its result.
    pub async fn refresh_and_wait(&mut self) -> DeviceListView {
        let seq = self.refresh().await;
        self.wait_for_scan(seq).await
    }

    /// Stop monitoring and shut down the worker thread.
    ///
    /// Does not abort a scan already dispatched; its completion is simply
    /// never applied.
    pub async fn stop(&mut self) {
        self.monitor.stop();
        let _ = self.bridge.send_request(ScanRequest::Shutdown).await;
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    // --- overlay mutations -------------------------------------------------
    //
    // Each mutation re-runs reconciliation against the cached snapshot, so
    // edits are visible immediately without a registry scan.

    pub fn rename_device(
        &self,
        device: DeviceKey,
        name: impl Into<String>,
    ) -> Result<(), StoreError> {
        self.store.rename(device, name)?;
        self.publish();
        Ok(())
    }

    pub fn remove_rename(&self, device: DeviceKey) -> Result<(), StoreError> {
        self.store.remove_rename(device)?;
        self.publish();
        Ok(())
    }

    pub fn hide_device(&self, device: DeviceKey) -> Result<(), StoreError> {
        self.store.camouflage(device)?;
        self.publish();
        Ok(())
    }

    pub fn reveal_device(&self, device: DeviceKey) -> Result<(), StoreError> {
        self.store.reveal(device)?;
        self.publish();
        Ok(())
    }

    pub fn inherit_device(
        &self,
        device: DeviceKey,
        inherits_from: DeviceKey,
    ) -> Result<(), StoreError> {
        self.store.inherit(device, inherits_from)?;
        self.publish();
        Ok(())
    }

    pub fn disinherit_device(&self, device: DeviceKey) -> Result<(), StoreError> {
        self.store.disinherit(device)?;
        self.publish();
        Ok(())
    }

    pub fn clear_connection_log(&self) -> Result<(), StoreError> {
        self.store.clear_log()
    }

    pub fn trim_connection_log(&self, last: usize) -> Result<(), StoreError> {
        self.store.keep_only(last)
    }

    // --- internals ---------------------------------------------------------

    pub(crate) fn apply_scan(&mut self, outcome: ScanOutcome) {
        if outcome.seq <= self.published_seq {
            debug!(
                seq = outcome.seq,
                published = self.published_seq,
                "discarding stale scan completion"
            );
            return;
        }

        // The first completed scan establishes the baseline; transitions are
        // only recorded from the second scan on.
        if self.published_seq > 0 {
            self.record_transitions(&outcome.devices);
        }
        for device in &outcome.devices {
            if let Err(err) = self.store.remember(device.key(), device.name.clone()) {
                warn!(%err, "failed to update device history");
            }
        }

        self.snapshot = outcome.devices;
        self.published_seq = outcome.seq;
        self.publish();
    }

    fn record_transitions(&self, new: &[DeviceSnapshot]) {
        let previous: HashSet<DeviceKey> = self.snapshot.iter().map(|d| d.key()).collect();
        let current: HashSet<DeviceKey> = new.iter().map(|d| d.key()).collect();

        for device in new {
            if !previous.contains(&device.key())
                && let Err(err) = self.store.record_event(device.key(), false)
            {
                warn!(%err, "failed to record connect event");
            }
        }
        for device in &self.snapshot {
            if !current.contains(&device.key())
                && let Err(err) = self.store.record_event(device.key(), true)
            {
                warn!(%err, "failed to record disconnect event");
            }
        }

        if let Err(err) = self.store.keep_only(self.config.log.retained_events) {
            warn!(%err, "failed to trim connection log");
        }
    }

    fn publish(&self) {
        let view = view::reconcile(&self.snapshot, &self.store);
        self.view_tx.send_replace(view);
    }

    pub(crate) async fn handle_hotplug(&mut self, event: HotplugEvent) {
        debug!(kind = ?event.kind, names = event.names.len(), "hotplug event");
        self.refresh().await;

        if self.config.notifications.enabled && self.gate.permits(Instant::now()) {
            let (title, body) = alert_message(event.kind, &event.names);
            self.alerts.alert(&title, &body);
        }
    }
}
