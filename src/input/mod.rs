mod reader;
#[cfg(target_os = "linux")]
pub mod evdev_grab;

pub use reader::*;

use crate::protocol::GenericReport;
use std::fmt;
use std::sync::Arc;

/// Stable identity of one attached physical controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceGuid(pub [u8; 16]);

impl fmt::Display for DeviceGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

/// USB vendor/product pair of a controller model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProductGuid {
    pub vendor: u16,
    pub product: u16,
}

/// The pad the virtual bus itself emulates. Never claimed, so the engine
/// doesn't read back its own output.
pub const LOOPBACK_PRODUCT: ProductGuid = ProductGuid {
    vendor: 0x045e,
    product: 0x028e,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Identity of this physical pad. Unique among attached devices.
    pub guid: DeviceGuid,
    /// Identity of the controller model. Shared by identical pads and used
    /// to key mapping files.
    pub model: DeviceGuid,
    pub product: ProductGuid,
    pub name: String,
    pub button_count: u32,
    pub axis_count: u32,
}

impl DeviceInfo {
    pub fn is_loopback(&self) -> bool {
        self.product == LOOPBACK_PRODUCT
    }

    pub fn has_controls(&self) -> bool {
        self.button_count > 0 || self.axis_count > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooperativeLevel {
    /// Other applications keep receiving the device's input.
    Shared,
    /// This process is the only reader.
    Exclusive,
}

/// A claimed controller. Invalid for good once `is_attached` turns false;
/// a reattached controller comes back as a new reference.
pub trait PhysicalDevice: Send + Sync {
    fn guid(&self) -> DeviceGuid;
    fn name(&self) -> &str;
    fn is_attached(&self) -> bool;
    /// Current remapped state, or `None` when nothing is available yet.
    /// Must not block.
    fn poll(&self) -> Option<GenericReport>;
    fn set_cooperative_level(&self, level: CooperativeLevel) -> anyhow::Result<()>;
}

/// Enumerates attached controllers and hands out references to them.
pub trait InputSource: Send + Sync {
    fn attached_devices(&self) -> Vec<DeviceInfo>;
    fn acquire(&self, info: &DeviceInfo) -> anyhow::Result<Arc<dyn PhysicalDevice>>;
}

/// Hot-plug notification from an input backend. Hosts react by reconciling.
#[derive(Debug, Clone)]
pub enum HotplugEvent {
    Connected { guid: DeviceGuid, name: String },
    Disconnected { guid: DeviceGuid },
}

/// Direction of a hat switch, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HatState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

/// Unmapped controller state with 0-based, backend-ordered controls.
///
/// Axes and sliders are normalized to -1.0..=1.0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawInputState {
    pub buttons: Vec<bool>,
    pub axes: Vec<f32>,
    pub sliders: Vec<f32>,
    pub hats: Vec<HatState>,
}
