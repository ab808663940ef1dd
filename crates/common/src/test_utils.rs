//! Test utilities for usb-sentry
//!
//! Provides mock snapshot builders and helper functions for testing across
//! crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::mock_snapshot;
//!
//! let device = mock_snapshot(0x1234, 0x5678, 1);
//! assert_eq!(device.vendor_id, 0x1234);
//! ```

use model::DeviceSnapshot;
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock DeviceSnapshot for testing
///
/// The name and vendor strings are derived from the ids so sorted output is
/// deterministic across tests.
pub fn mock_snapshot(vendor_id: u16, product_id: u16, location_id: u32) -> DeviceSnapshot {
    DeviceSnapshot {
        name: format!("Device {:04x}", product_id),
        vendor: Some(format!("Vendor {:04x}", vendor_id)),
        vendor_id,
        product_id,
        serial_number: Some(format!("SN{:04x}{:04x}", vendor_id, product_id)),
        location_id: Some(location_id),
        speed_mbps: Some(480),
        port_max_speed_mbps: None,
        usb_version_bcd: Some(0x0200),
        is_external_storage: false,
    }
}

/// Create a mock snapshot with explicit name and vendor strings
pub fn mock_named_snapshot(
    vendor_id: u16,
    product_id: u16,
    location_id: u32,
    vendor: Option<&str>,
    name: &str,
) -> DeviceSnapshot {
    DeviceSnapshot {
        name: name.to_string(),
        vendor: vendor.map(str::to_string),
        vendor_id,
        product_id,
        serial_number: None,
        location_id: Some(location_id),
        speed_mbps: Some(480),
        port_max_speed_mbps: None,
        usb_version_bcd: Some(0x0200),
        is_external_storage: false,
    }
}

/// Run a future with a timeout, panicking if it does not complete in time
pub async fn with_timeout<F, T>(timeout: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(timeout, future)
        .await
        .expect("test future timed out")
}
