//! usb-sentry discovery engine
//!
//! The engine walks an abstracted platform device registry to build a
//! canonical snapshot of attached USB devices, reacts to hotplug
//! notifications, and joins the live snapshot against persisted identity
//! overlays (rename, camouflage, heritage, history, connection log) to
//! produce the device list consumed by the UI layer.
//!
//! Architecture: registry queries run on a dedicated worker thread behind a
//! bounded channel; hotplug callbacks forward payloads onto channels consumed
//! by the primary loop; the published device list always reflects the most
//! recently completed scan.

pub mod config;
pub mod engine;
pub mod monitor;
pub mod overlay;
pub mod registry;
pub mod scan;
pub mod view;

pub use config::EngineConfig;
pub use engine::DeviceEngine;
pub use monitor::{AlertSink, HotplugMonitor, LogAlertSink, NotificationSource};
pub use overlay::{FileBackend, MemoryBackend, OverlayBackend, OverlayStore};
pub use registry::usb::UsbRegistry;
pub use registry::{DeviceRegistry, EntryProperties, MatchClass, RegistryEntry};
pub use scan::Scanner;
pub use view::reconcile;
