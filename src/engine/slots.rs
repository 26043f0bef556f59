use super::worker::{SlotBuffers, SlotWorker};
use crate::input::{DeviceGuid, DeviceInfo, InputSource, PhysicalDevice};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A claimed slot. Empty slots are `None` in the table.
pub struct Slot {
    pub device: Arc<dyn PhysicalDevice>,
    pub enabled: Arc<AtomicBool>,
    pub failures: Arc<AtomicU64>,
    /// Guards the slot's report cycle and owns its frame buffer.
    pub buffers: Arc<Mutex<SlotBuffers>>,
    pub worker: Option<SlotWorker>,
}

impl Slot {
    fn new(device: Arc<dyn PhysicalDevice>) -> Self {
        Self {
            device,
            enabled: Arc::new(AtomicBool::new(true)),
            failures: Arc::new(AtomicU64::new(0)),
            buffers: Arc::new(Mutex::new(SlotBuffers::default())),
            worker: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Slot indices double as the one-byte bus serial.
pub const MAX_SLOTS: usize = u8::MAX as usize;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClaimOutcome {
    /// 1-based indices claimed in this pass, in claim order.
    pub claimed: Vec<usize>,
    pub skipped: usize,
}

/// Slot index -> claimed device. Indices are 1-based everywhere outside
/// this type.
#[derive(Default)]
pub struct SlotTable {
    slots: Vec<Option<Slot>>,
}

impl SlotTable {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Slot> {
        index.checked_sub(1).and_then(|i| self.slots.get(i)).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Slot> {
        index
            .checked_sub(1)
            .and_then(|i| self.slots.get_mut(i))
            .and_then(Option::as_mut)
    }

    pub fn contains(&self, guid: &DeviceGuid) -> bool {
        self.occupied().any(|(_, slot)| slot.device.guid() == *guid)
    }

    pub fn occupied(&self) -> impl Iterator<Item = (usize, &Slot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i + 1, s)))
    }

    pub fn occupied_mut(&mut self) -> impl Iterator<Item = (usize, &mut Slot)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|s| (i + 1, s)))
    }

    /// Each slot as (index, device guid) for comparisons and display.
    pub fn layout(&self) -> Vec<(usize, Option<DeviceGuid>)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, s)| (i + 1, s.as_ref().map(|s| s.device.guid())))
            .collect()
    }

    /// Empties every slot whose device is no longer attached and hands the
    /// old state back so the caller can tear its worker down.
    pub fn vacate_detached(&mut self) -> Vec<(usize, Slot)> {
        let mut vacated = Vec::new();
        for (i, entry) in self.slots.iter_mut().enumerate() {
            if entry.as_ref().is_some_and(|s| !s.device.is_attached()) {
                if let Some(slot) = entry.take() {
                    vacated.push((i + 1, slot));
                }
            }
        }
        vacated
    }

    /// Sizes the table to `count`, capped at [`MAX_SLOTS`]. Occupied slots
    /// are never dropped, so the table can stay longer than `count` until
    /// they are vacated.
    pub fn resize(&mut self, count: usize) {
        let highest = self
            .slots
            .iter()
            .rposition(Option::is_some)
            .map(|i| i + 1)
            .unwrap_or(0);
        let len = count.min(MAX_SLOTS).max(highest);
        if len < self.slots.len() {
            self.slots.truncate(len);
        } else {
            self.slots.resize_with(len, || None);
        }
    }

    /// Assigns each newly seen device to the lowest empty slot.
    ///
    /// Skips the bus's own loopback pads, devices with no buttons or axes,
    /// and devices that already own a slot.
    pub fn claim(&mut self, attached: &[DeviceInfo], source: &dyn InputSource) -> ClaimOutcome {
        let mut outcome = ClaimOutcome::default();

        for info in attached {
            if info.is_loopback() {
                log::debug!("Skipping emulated pad {} ({})", info.name, info.guid);
                outcome.skipped += 1;
                continue;
            }
            if !info.has_controls() {
                log::debug!("Skipping {} ({}): no buttons or axes", info.name, info.guid);
                outcome.skipped += 1;
                continue;
            }
            if let Some((index, _)) = self.occupied().find(|(_, s)| s.device.guid() == info.guid) {
                log::debug!("Device {} in slot {} already acquired", info.name, index);
                continue;
            }

            let Some(free) = self.slots.iter().position(Option::is_none) else {
                log::warn!("No free slot for {} ({})", info.name, info.guid);
                continue;
            };

            match source.acquire(info) {
                Ok(device) => {
                    log::info!("Device {} assigned to slot {}", info.name, free + 1);
                    self.slots[free] = Some(Slot::new(device));
                    outcome.claimed.push(free + 1);
                }
                Err(e) => {
                    log::warn!("Failed to acquire {} ({}): {}", info.name, info.guid, e);
                }
            }
        }

        outcome
    }
}
