//! Hotplug monitoring and debounced alerts
//!
//! The monitor owns two platform subscriptions (device added, device
//! removed). Platform callbacks run on threads outside our control, so they
//! only push payloads onto a channel; the primary loop consumes events via
//! [`HotplugMonitor::next_event`] and reacts by re-scanning and alerting.

use async_channel::Receiver;
use common::{HotplugEvent, HotplugKind};
use model::RegistryError;
use std::time::{Duration, Instant};
use tracing::debug;

/// Raw payload delivered by a platform subscription.
#[derive(Debug, Clone)]
pub struct HotplugPayload {
    /// Resolved names of the affected devices (vendor and product strings
    /// joined; devices exposing neither are skipped)
    pub names: Vec<String>,
}

/// A live platform subscription.
///
/// Dropping the subscription releases the underlying registration and any
/// notification-port resources.
pub struct HotplugSubscription {
    /// Payload stream fed by the platform callback
    pub events: Receiver<HotplugPayload>,
    /// Opaque registration guard, released on drop
    pub registration: Box<dyn std::any::Any>,
}

/// Source of asynchronous hotplug notifications.
pub trait NotificationSource: Send + 'static {
    fn subscribe(&self, kind: HotplugKind) -> Result<HotplugSubscription, RegistryError>;
}

/// Receives user-facing alerts; the engine does not know how they are shown.
pub trait AlertSink: Send + Sync {
    fn alert(&self, title: &str, body: &str);
}

/// Default sink that routes alerts into the tracing output.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, title: &str, body: &str) {
        tracing::info!(title, body, "device alert");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Monitoring,
}

/// Hotplug monitor state machine.
///
/// `start()` registers both subscriptions and drains anything already
/// pending, so a burst of notifications queued before registration never
/// triggers a spurious refresh. `stop()` is idempotent and only prevents
/// future events; it does not abort a scan already dispatched.
pub struct HotplugMonitor<S: NotificationSource> {
    source: S,
    state: MonitorState,
    added: Option<HotplugSubscription>,
    removed: Option<HotplugSubscription>,
}

impl<S: NotificationSource> HotplugMonitor<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: MonitorState::Stopped,
            added: None,
            removed: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Stopped -> Monitoring. Registers both subscriptions; drains pending
    /// notifications without acting on them.
    pub fn start(&mut self) -> Result<(), RegistryError> {
        if self.state == MonitorState::Monitoring {
            debug!("monitor already running");
            return Ok(());
        }

        let added = self.source.subscribe(HotplugKind::Added)?;
        let removed = self.source.subscribe(HotplugKind::Removed)?;

        let mut drained = 0usize;
        while added.events.try_recv().is_ok() {
            drained += 1;
        }
        while removed.events.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            debug!(drained, "discarded notifications pending at registration");
        }

        self.added = Some(added);
        self.removed = Some(removed);
        self.state = MonitorState::Monitoring;
        debug!("hotplug monitor started");
        Ok(())
    }

    /// Monitoring -> Stopped. Releases both subscriptions. No-op when
    /// already stopped.
    pub fn stop(&mut self) {
        if self.state == MonitorState::Stopped {
            return;
        }
        self.added = None;
        self.removed = None;
        self.state = MonitorState::Stopped;
        debug!("hotplug monitor stopped");
    }

    /// Wait for the next hotplug event.
    ///
    /// Pends forever while the monitor is stopped or after the subscription
    /// streams close, so it composes safely inside a `select!`.
    pub async fn next_event(&self) -> HotplugEvent {
        let (added, removed) = match (&self.added, &self.removed) {
            (Some(a), Some(r)) => (a, r),
            _ => return std::future::pending().await,
        };

        tokio::select! {
            payload = added.events.recv() => match payload {
                Ok(p) => HotplugEvent { kind: HotplugKind::Added, names: p.names },
                Err(_) => std::future::pending().await,
            },
            payload = removed.events.recv() => match payload {
                Ok(p) => HotplugEvent { kind: HotplugKind::Removed, names: p.names },
                Err(_) => std::future::pending().await,
            },
        }
    }
}

/// Debounce gate for user alerts.
///
/// One shared last-alert time, not per-device: an alert is suppressed when
/// the previous one fired within the cooldown window, unless the user
/// disabled the cooldown.
#[derive(Debug)]
pub struct AlertGate {
    cooldown: Duration,
    cooldown_disabled: bool,
    last_alert: Option<Instant>,
}

impl AlertGate {
    pub fn new(cooldown: Duration, cooldown_disabled: bool) -> Self {
        Self {
            cooldown,
            cooldown_disabled,
            last_alert: None,
        }
    }

    /// Whether an alert may fire at `now`; records the alert time when it may.
    pub fn permits(&mut self, now: Instant) -> bool {
        if self.cooldown_disabled {
            self.last_alert = Some(now);
            return true;
        }
        match self.last_alert {
            Some(previous) if now.duration_since(previous) < self.cooldown => false,
            _ => {
                self.last_alert = Some(now);
                true
            }
        }
    }
}

/// Compose the `(title, body)` pair for a hotplug alert.
///
/// Generic body when no device names were resolved, otherwise the
/// comma-joined name list.
pub fn alert_message(kind: HotplugKind, names: &[String]) -> (String, String) {
    let title = match kind {
        HotplugKind::Added => "USB device connected",
        HotplugKind::Removed => "USB device disconnected",
    };
    let body = if names.is_empty() {
        match kind {
            HotplugKind::Added => "A device was connected.".to_string(),
            HotplugKind::Removed => "A device was disconnected.".to_string(),
        }
    } else {
        names.join(", ")
    };
    (title.to_string(), body)
}

/// Join vendor and product strings into one display name.
///
/// Returns `None` when the device exposes neither, so callers can skip it.
pub fn joined_name(vendor: Option<&str>, product: Option<&str>) -> Option<String> {
    match (vendor, product) {
        (Some(v), Some(p)) => Some(format!("{} {}", v, p)),
        (Some(v), None) => Some(v.to_string()),
        (None, Some(p)) => Some(p.to_string()),
        (None, None) => None,
    }
}
