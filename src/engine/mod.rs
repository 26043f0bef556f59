//! Slot lifecycle and the polling engine.
//!
//! The engine owns the slot table. Reconciliation is the only thing that
//! claims or vacates slots; `start`/`stop` plug and unplug the claimed ones
//! and manage one worker thread per active slot.

mod slots;
mod worker;

pub use slots::{ClaimOutcome, Slot, SlotTable, MAX_SLOTS};
pub use worker::{SlotBuffers, SlotWorker, WorkerContext};

use crate::bus::{BusTransport, CommandChannel};
use crate::error::{EngineError, Result};
use crate::input::{CooperativeLevel, DeviceGuid, InputSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Initial exclusive-mode setting.
    pub exclusive_mode: bool,
    /// Sleep between two poll cycles of a worker.
    pub poll_interval: Duration,
    /// How long `stop` waits for each worker to exit.
    pub join_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            exclusive_mode: false,
            poll_interval: Duration::from_millis(1),
            join_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotStatus {
    pub index: usize,
    pub name: String,
    pub guid: DeviceGuid,
    pub enabled: bool,
    /// A worker is currently forwarding this slot.
    pub active: bool,
    pub report_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub running: bool,
    pub exclusive_mode: bool,
    pub plugged_count: i64,
    pub channel_failures: u64,
    /// Table length, including empty slots.
    pub slot_count: usize,
    /// Occupied slots only.
    pub slots: Vec<SlotStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub attached: usize,
    pub vacated: Vec<usize>,
    pub claimed: Vec<usize>,
    pub skipped: usize,
}

struct EngineState {
    table: SlotTable,
    running: bool,
    /// Exclusive mode as it was when the current run started.
    exclusive_at_start: bool,
}

pub struct Engine {
    source: Arc<dyn InputSource>,
    channel: Arc<CommandChannel>,
    state: Mutex<EngineState>,
    /// Workers that outlived their join timeout, most likely stuck in a bus
    /// call. The channel stays open until they are gone.
    detached: Mutex<Vec<SlotWorker>>,
    exclusive: AtomicBool,
    options: EngineOptions,
}

impl Engine {
    pub fn new(
        source: Arc<dyn InputSource>,
        transport: Arc<dyn BusTransport>,
        options: EngineOptions,
    ) -> Self {
        Self {
            source,
            channel: Arc::new(CommandChannel::new(transport)),
            state: Mutex::new(EngineState {
                table: SlotTable::default(),
                running: false,
                exclusive_at_start: false,
            }),
            detached: Mutex::new(Vec::new()),
            exclusive: AtomicBool::new(options.exclusive_mode),
            options,
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Opens the bus, reconciles, then plugs in and starts a worker for
    /// every claimed and enabled slot.
    pub fn start(&self) -> Result<()> {
        let mut state = self.lock();
        if state.running {
            return Err(EngineError::AlreadyRunning);
        }

        self.channel.open()?;
        state.exclusive_at_start = self.exclusive.load(Ordering::SeqCst);
        self.reconcile_locked(&mut state);

        let exclusive = state.exclusive_at_start;
        for (index, slot) in state.table.occupied_mut() {
            if slot.is_enabled() {
                self.activate(index, slot, exclusive);
            }
        }

        state.running = true;
        log::info!("Engine started, {} virtual pad(s) plugged", self.channel.plugged_count());
        Ok(())
    }

    /// Stops every worker, unplugs its slot, returns its device to shared
    /// access and closes the bus.
    ///
    /// Bounded by the join timeout per worker. If a worker is still inside a
    /// bus call afterwards the bus is left open; a later `stop` closes it.
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = self.lock();
            if state.running {
                state.running = false;
                for (index, slot) in state.table.occupied_mut() {
                    self.deactivate(index, slot);
                }
                log::info!("Engine stopped");
            }
        }

        let mut detached = self.detached.lock().unwrap_or_else(|e| e.into_inner());
        detached.retain(|w| !w.is_finished());
        if detached.is_empty() {
            self.channel.close();
        } else {
            log::warn!(
                "{} worker(s) still inside a bus call, leaving the command channel open",
                detached.len()
            );
        }
        Ok(())
    }

    fn stop_worker(&self, worker: SlotWorker) {
        if let Some(stuck) = worker.stop(self.options.join_timeout) {
            self.detached
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(stuck);
        }
    }

    /// Matches the slot table against the currently attached devices.
    pub fn reconcile(&self) -> ReconcileSummary {
        let mut state = self.lock();
        self.reconcile_locked(&mut state)
    }

    fn reconcile_locked(&self, state: &mut EngineState) -> ReconcileSummary {
        let attached = self.source.attached_devices();
        log::info!("Detected {} attached controller(s)", attached.len());

        let mut summary = ReconcileSummary {
            attached: attached.len(),
            ..Default::default()
        };

        for (index, mut slot) in state.table.vacate_detached() {
            log::info!("{} removed from slot {}", slot.device.name(), index);
            if let Some(worker) = slot.worker.take() {
                self.stop_worker(worker);
                if let Err(e) = self.channel.unplug(index as u32) {
                    log::warn!("Failed to unplug slot {}: {}", index, e);
                }
            }
            summary.vacated.push(index);
        }

        state.table.resize(attached.len());
        let ClaimOutcome { claimed, skipped } = state.table.claim(&attached, self.source.as_ref());
        log::info!("Skipped {} device(s)", skipped);

        if state.running {
            let exclusive = state.exclusive_at_start;
            for index in &claimed {
                if let Some(slot) = state.table.get_mut(*index) {
                    if slot.is_enabled() {
                        self.activate(*index, slot, exclusive);
                    }
                }
            }
        }

        summary.claimed = claimed;
        summary.skipped = skipped;
        summary
    }

    fn activate(&self, index: usize, slot: &mut Slot, exclusive: bool) {
        // The table never exceeds MAX_SLOTS.
        let serial = index as u8;

        match self.channel.plugin(serial as u32) {
            Ok(()) => log::info!("Plugged in device {} at slot {}", slot.device.name(), index),
            Err(e) => log::warn!("Failed to plug in slot {}: {}", index, e),
        }

        // Fresh frame for every run.
        *slot.buffers.lock().unwrap_or_else(|e| e.into_inner()) = SlotBuffers::default();

        let ctx = WorkerContext {
            slot: serial,
            device: Arc::clone(&slot.device),
            enabled: Arc::clone(&slot.enabled),
            failures: Arc::clone(&slot.failures),
            buffers: Arc::clone(&slot.buffers),
            channel: Arc::clone(&self.channel),
            interval: self.options.poll_interval,
        };
        match SlotWorker::spawn(ctx) {
            Ok(worker) => slot.worker = Some(worker),
            Err(e) => log::error!("Failed to start worker for slot {}: {}", index, e),
        }

        if exclusive {
            match slot.device.set_cooperative_level(CooperativeLevel::Exclusive) {
                Ok(()) => log::info!("Device {}'s cooperative level set to exclusive", slot.device.name()),
                Err(e) => log::warn!("Failed to set {} exclusive: {}", slot.device.name(), e),
            }
        }
    }

    fn deactivate(&self, index: usize, slot: &mut Slot) {
        let Some(worker) = slot.worker.take() else {
            return;
        };
        self.stop_worker(worker);

        match self.channel.unplug(index as u32) {
            Ok(()) => log::info!("Unplugged device {} at slot {}", slot.device.name(), index),
            Err(e) => log::warn!("Failed to unplug slot {}: {}", index, e),
        }

        match slot.device.set_cooperative_level(CooperativeLevel::Shared) {
            Ok(()) => log::debug!("Device {}'s cooperative level set to shared", slot.device.name()),
            Err(e) => log::warn!("Failed to release {}: {}", slot.device.name(), e),
        }
    }

    /// Flips a slot's enabled flag. Takes effect on the next poll cycle;
    /// a slot disabled at `start` stays without a worker until restart.
    pub fn set_slot_enabled(&self, index: usize, enabled: bool) -> Result<()> {
        let state = self.lock();
        if index == 0 || index > state.table.len() {
            return Err(EngineError::SlotOutOfRange(index));
        }
        let slot = state.table.get(index).ok_or(EngineError::SlotEmpty(index))?;
        slot.enabled.store(enabled, Ordering::SeqCst);
        log::info!("Controller {} enabled: {}", index, enabled);
        Ok(())
    }

    /// Exclusive mode is read once per `start`; changing it while running
    /// only affects the next run.
    pub fn set_exclusive(&self, exclusive: bool) {
        self.exclusive.store(exclusive, Ordering::SeqCst);
        if self.is_running() {
            log::info!("Exclusive mode set to {}, applies from the next start", exclusive);
        }
    }

    pub fn exclusive_mode(&self) -> bool {
        self.exclusive.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.lock();
        let slots = state
            .table
            .occupied()
            .map(|(index, slot)| SlotStatus {
                index,
                name: slot.device.name().to_string(),
                guid: slot.device.guid(),
                enabled: slot.is_enabled(),
                active: slot.worker.as_ref().is_some_and(|w| !w.is_finished()),
                report_failures: slot.failures.load(Ordering::SeqCst),
            })
            .collect();

        EngineStatus {
            running: state.running,
            exclusive_mode: self.exclusive_mode(),
            plugged_count: self.channel.plugged_count(),
            channel_failures: self.channel.failure_count(),
            slot_count: state.table.len(),
            slots,
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
