//! Common utilities for usb-sentry
//!
//! This crate provides the shared plumbing between the discovery engine and
//! its worker thread: the async channel bridge for registry scans and hotplug
//! payloads, error handling, logging setup, and test utilities.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{
    EngineBridge, HotplugEvent, HotplugKind, RegistryWorker, ScanOutcome, ScanRequest,
    create_registry_bridge,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
