//! rusb-backed registry and notification source
//!
//! libusb exposes one device tree; both match classes view it and the
//! scanner deduplicates the union. Hotplug callbacks fire from
//! `handle_events` on the worker thread and only forward payloads onto the
//! subscription channel.

use crate::monitor::{HotplugPayload, HotplugSubscription, NotificationSource, joined_name};
use crate::registry::{DeviceRegistry, EntryProperties, MatchClass, RegistryEntry};
use crate::scan::speed_code_mbps;
use common::HotplugKind;
use model::RegistryError;
use rusb::{Context, Device, DeviceDescriptor, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::time::Duration;
use tracing::{debug, warn};

const CLASS_MASS_STORAGE: u8 = 0x08;
const CLASS_HUB: u8 = 0x09;

/// Registry over the host's libusb context.
#[derive(Clone)]
pub struct UsbRegistry {
    context: Context,
}

impl UsbRegistry {
    pub fn new() -> Result<Self, RegistryError> {
        let context = Context::new().map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        Ok(Self { context })
    }
}

/// One device node in the libusb tree.
pub struct UsbEntry {
    device: Device<Context>,
}

impl RegistryEntry for UsbEntry {
    fn properties(&self) -> EntryProperties {
        let mut props = EntryProperties::default();

        let descriptor = match self.device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(err) => {
                debug!(%err, "failed to read device descriptor");
                return props;
            }
        };

        props.vendor_id = Some(descriptor.vendor_id());
        props.product_id = Some(descriptor.product_id());
        props.location_id = Some(location_id(&self.device));
        props.speed_code = speed_code(self.device.speed());
        props.usb_version_bcd = Some(version_bcd(descriptor.usb_version()));
        props.class_name = class_name(&self.device, &descriptor);

        // Hubs describe the port capability their downstream devices see
        if descriptor.class_code() == CLASS_HUB {
            props.port_max_speed_mbps = props.speed_code.and_then(speed_code_mbps);
            props.port_link_kind = match self.device.speed() {
                rusb::Speed::Super => Some("SuperSpeed".to_string()),
                rusb::Speed::SuperPlus => Some("SuperSpeedPlus".to_string()),
                _ => None,
            };
        }

        // String descriptors need a temporary open; devices we cannot open
        // simply stay nameless.
        if let Ok(handle) = self.device.open() {
            props.vendor = descriptor
                .manufacturer_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
            props.name = descriptor
                .product_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
            props.serial_number = descriptor
                .serial_number_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
        }

        props
    }

    fn parent(&self) -> Option<Self> {
        self.device.get_parent().map(|device| UsbEntry { device })
    }
}

impl DeviceRegistry for UsbRegistry {
    type Entry = UsbEntry;

    fn query(&self, class: MatchClass) -> Result<Vec<UsbEntry>, RegistryError> {
        let devices = self
            .context
            .devices()
            .map_err(|e| RegistryError::Query(format!("{} ({})", e, class.as_str())))?;
        Ok(devices
            .iter()
            .map(|device| UsbEntry { device })
            .collect())
    }

    fn pump(&self, timeout: Duration) {
        match self.context.handle_events(Some(timeout)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => {
                debug!("usb event handling interrupted");
            }
            Err(err) => {
                warn!(%err, "error handling usb events");
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

impl NotificationSource for UsbRegistry {
    fn subscribe(&self, kind: HotplugKind) -> Result<HotplugSubscription, RegistryError> {
        let (tx, rx) = async_channel::bounded(64);
        let callback = ForwardingCallback { kind, payloads: tx };
        let registration: Registration<Context> = HotplugBuilder::new()
            .enumerate(false)
            .register(&self.context, Box::new(callback))
            .map_err(|e| RegistryError::Subscription(e.to_string()))?;
        Ok(HotplugSubscription {
            events: rx,
            registration: Box::new(registration),
        })
    }
}

/// Forwards one event kind from the libusb callback thread onto the
/// subscription channel.
struct ForwardingCallback {
    kind: HotplugKind,
    payloads: async_channel::Sender<HotplugPayload>,
}

impl ForwardingCallback {
    fn forward<T: UsbContext>(&self, device: &Device<T>) {
        let names = resolve_names(device);
        if self.payloads.try_send(HotplugPayload { names }).is_err() {
            warn!("hotplug channel full or closed, dropping event");
        }
    }
}

impl<T: UsbContext> Hotplug<T> for ForwardingCallback {
    fn device_arrived(&mut self, device: Device<T>) {
        if self.kind == HotplugKind::Added {
            self.forward(&device);
        }
    }

    fn device_left(&mut self, device: Device<T>) {
        if self.kind == HotplugKind::Removed {
            self.forward(&device);
        }
    }
}

/// Resolve display names for an affected device, skipping it entirely when
/// it exposes neither vendor nor product string.
fn resolve_names<T: UsbContext>(device: &Device<T>) -> Vec<String> {
    let Ok(descriptor) = device.device_descriptor() else {
        return Vec::new();
    };
    let strings = device.open().ok().map(|handle| {
        (
            descriptor
                .manufacturer_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok()),
            descriptor
                .product_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok()),
        )
    });
    let (vendor, product) = strings.unwrap_or((None, None));
    joined_name(vendor.as_deref(), product.as_deref())
        .into_iter()
        .collect()
}

/// Compose a stable location from the bus number and port chain, one nibble
/// per hub level.
fn location_id(device: &Device<Context>) -> u32 {
    let mut location = u32::from(device.bus_number()) << 24;
    let ports = device.port_numbers().unwrap_or_default();
    let mut shift = 20i32;
    for port in ports {
        if shift < 0 {
            break;
        }
        location |= u32::from(port & 0x0f) << shift;
        shift -= 4;
    }
    location
}

fn speed_code(speed: rusb::Speed) -> Option<u8> {
    match speed {
        rusb::Speed::Low => Some(0),
        rusb::Speed::Full => Some(1),
        rusb::Speed::High => Some(2),
        rusb::Speed::Super => Some(3),
        rusb::Speed::SuperPlus => Some(4),
        _ => None,
    }
}

/// Reconstruct the descriptor's binary-coded-decimal version field.
fn version_bcd(version: rusb::Version) -> u16 {
    let major = u16::from(version.major());
    let minor = u16::from(version.minor());
    let sub = u16::from(version.sub_minor());
    ((major / 10) << 12) | ((major % 10) << 8) | ((minor & 0xf) << 4) | (sub & 0xf)
}

fn class_name(device: &Device<Context>, descriptor: &DeviceDescriptor) -> Option<String> {
    match descriptor.class_code() {
        CLASS_MASS_STORAGE => Some("MassStorage".to_string()),
        CLASS_HUB => Some("Hub".to_string()),
        // Class 0 defers to the interfaces
        0x00 => {
            let config = device.active_config_descriptor().ok()?;
            let has_storage = config.interfaces().any(|interface| {
                interface
                    .descriptors()
                    .any(|desc| desc.class_code() == CLASS_MASS_STORAGE)
            });
            has_storage.then(|| "MassStorage".to_string())
        }
        _ => None,
    }
}
