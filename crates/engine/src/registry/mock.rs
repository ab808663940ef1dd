//! Scripted registry and notification source for tests and embedding
//!
//! `MockRegistry` serves preconfigured entry trees per match class and counts
//! live entry handles, so tests can assert that every handle a scan opens is
//! released on every exit path. `MockNotificationSource` lets tests queue
//! pending notifications and emit hotplug payloads on demand.

use crate::monitor::{HotplugPayload, HotplugSubscription, NotificationSource};
use crate::registry::{DeviceRegistry, EntryProperties, MatchClass, RegistryEntry};
use async_channel::{Sender, bounded};
use common::HotplugKind;
use model::RegistryError;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted node in a mock registry tree.
#[derive(Debug, Clone, Default)]
pub struct MockNode {
    props: EntryProperties,
    parent: Option<Box<MockNode>>,
}

impl MockNode {
    /// A bare node with the given registry class name.
    pub fn class(name: &str) -> Self {
        Self {
            props: EntryProperties {
                class_name: Some(name.to_string()),
                ..EntryProperties::default()
            },
            parent: None,
        }
    }

    /// A device node with identity fields populated.
    pub fn device(vendor_id: u16, product_id: u16, location_id: u32) -> Self {
        Self {
            props: EntryProperties {
                vendor_id: Some(vendor_id),
                product_id: Some(product_id),
                location_id: Some(location_id),
                ..EntryProperties::default()
            },
            parent: None,
        }
    }

    pub fn named(mut self, vendor: &str, product: &str) -> Self {
        self.props.vendor = Some(vendor.to_string());
        self.props.name = Some(product.to_string());
        self
    }

    pub fn serial(mut self, serial: &str) -> Self {
        self.props.serial_number = Some(serial.to_string());
        self
    }

    pub fn speed_code(mut self, code: u8) -> Self {
        self.props.speed_code = Some(code);
        self
    }

    pub fn bit_rate(mut self, mbps: u32) -> Self {
        self.props.bit_rate_mbps = Some(mbps);
        self
    }

    pub fn usb_version(mut self, bcd: u16) -> Self {
        self.props.usb_version_bcd = Some(bcd);
        self
    }

    pub fn port_capability(mut self, mbps: u32) -> Self {
        self.props.port_max_speed_mbps = Some(mbps);
        self
    }

    pub fn port_link(mut self, kind: &str) -> Self {
        self.props.port_link_kind = Some(kind.to_string());
        self
    }

    pub fn with_parent(mut self, parent: MockNode) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// Chain `depth` anonymous ancestors above this node, for walk-bound tests.
    pub fn with_ancestor_chain(mut self, depth: usize, class_name: &str) -> Self {
        let mut top: Option<Box<MockNode>> = None;
        for _ in 0..depth {
            let mut node = MockNode::class(class_name);
            node.parent = top;
            top = Some(Box::new(node));
        }
        self.parent = top;
        self
    }
}

/// A live mock entry; the registry counts it until dropped.
pub struct MockEntry {
    node: MockNode,
    live: Arc<AtomicUsize>,
}

impl MockEntry {
    fn open(node: MockNode, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self { node, live }
    }
}

impl Drop for MockEntry {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RegistryEntry for MockEntry {
    fn properties(&self) -> EntryProperties {
        self.node.props.clone()
    }

    fn parent(&self) -> Option<Self> {
        self.node
            .parent
            .as_deref()
            .cloned()
            .map(|node| MockEntry::open(node, self.live.clone()))
    }
}

#[derive(Default)]
struct RegistryState {
    classes: HashMap<MatchClass, Vec<MockNode>>,
    failing: HashSet<MatchClass>,
}

/// Scripted in-memory registry.
#[derive(Clone, Default)]
pub struct MockRegistry {
    state: Arc<Mutex<RegistryState>>,
    live: Arc<AtomicUsize>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the entries returned for one match class.
    pub fn set_devices(&self, class: MatchClass, nodes: Vec<MockNode>) {
        self.state
            .lock()
            .unwrap()
            .classes
            .insert(class, nodes);
    }

    /// Script identical entries for every match class, the common case when
    /// both classes surface the same tree.
    pub fn set_all(&self, nodes: Vec<MockNode>) {
        let mut state = self.state.lock().unwrap();
        for class in MatchClass::ALL {
            state.classes.insert(class, nodes.clone());
        }
    }

    /// Make queries for `class` fail until cleared.
    pub fn fail_class(&self, class: MatchClass) {
        self.state.lock().unwrap().failing.insert(class);
    }

    pub fn clear_failure(&self, class: MatchClass) {
        self.state.lock().unwrap().failing.remove(&class);
    }

    /// Number of entry handles currently open. Zero after every scan.
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl DeviceRegistry for MockRegistry {
    type Entry = MockEntry;

    fn query(&self, class: MatchClass) -> Result<Vec<MockEntry>, RegistryError> {
        let state = self.state.lock().unwrap();
        if state.failing.contains(&class) {
            return Err(RegistryError::Query(format!(
                "injected failure for {}",
                class.as_str()
            )));
        }
        Ok(state
            .classes
            .get(&class)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|node| MockEntry::open(node, self.live.clone()))
            .collect())
    }

    fn pump(&self, _timeout: Duration) {
        // No event plumbing; keep the worker loop responsive in tests.
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[derive(Default)]
struct SourceState {
    pending: HashMap<HotplugKind, Vec<HotplugPayload>>,
    senders: HashMap<HotplugKind, Sender<HotplugPayload>>,
}

/// Scripted notification source.
#[derive(Clone, Default)]
pub struct MockNotificationSource {
    state: Arc<Mutex<SourceState>>,
}

impl MockNotificationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a payload that will already be pending when a subscription for
    /// `kind` is registered.
    pub fn set_pending(&self, kind: HotplugKind, names: Vec<String>) {
        self.state
            .lock()
            .unwrap()
            .pending
            .entry(kind)
            .or_default()
            .push(HotplugPayload { names });
    }

    /// Deliver a payload to the live subscription for `kind`.
    ///
    /// Returns false when nothing is subscribed.
    pub fn emit(&self, kind: HotplugKind, names: Vec<String>) -> bool {
        let state = self.state.lock().unwrap();
        match state.senders.get(&kind) {
            Some(tx) => tx.send_blocking(HotplugPayload { names }).is_ok(),
            None => false,
        }
    }
}

impl NotificationSource for MockNotificationSource {
    fn subscribe(&self, kind: HotplugKind) -> Result<HotplugSubscription, RegistryError> {
        let (tx, rx) = bounded(64);
        let mut state = self.state.lock().unwrap();
        for payload in state.pending.remove(&kind).unwrap_or_default() {
            let _ = tx.send_blocking(payload);
        }
        state.senders.insert(kind, tx);
        Ok(HotplugSubscription {
            events: rx,
            registration: Box::new(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_counted_and_released() {
        let registry = MockRegistry::new();
        registry.set_all(vec![MockNode::device(0x1234, 0x5678, 1)]);

        let entries = registry.query(MatchClass::HostDevice).unwrap();
        assert_eq!(registry.live_handles(), 1);

        let parent = entries[0].parent();
        assert!(parent.is_none());

        drop(entries);
        assert_eq!(registry.live_handles(), 0);
    }

    #[test]
    fn test_parent_opens_new_handle() {
        let registry = MockRegistry::new();
        registry.set_all(vec![
            MockNode::device(0x1234, 0x5678, 1).with_parent(MockNode::class("UsbHub")),
        ]);

        let entries = registry.query(MatchClass::LegacyDevice).unwrap();
        let parent = entries[0].parent().expect("parent should exist");
        assert_eq!(registry.live_handles(), 2);
        assert_eq!(parent.properties().class_name.as_deref(), Some("UsbHub"));

        drop(parent);
        drop(entries);
        assert_eq!(registry.live_handles(), 0);
    }

    #[test]
    fn test_injected_failure() {
        let registry = MockRegistry::new();
        registry.fail_class(MatchClass::HostDevice);
        assert!(registry.query(MatchClass::HostDevice).is_err());
        assert!(registry.query(MatchClass::LegacyDevice).is_ok());

        registry.clear_failure(MatchClass::HostDevice);
        assert!(registry.query(MatchClass::HostDevice).is_ok());
    }
}
