use crate::bus::{CommandChannel, ACK_LEN};
use crate::error::{EngineError, Result};
use crate::input::PhysicalDevice;
use crate::protocol::{transcode_into, WireFrame};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Per-slot buffers, reused every cycle.
#[derive(Debug, Default)]
pub struct SlotBuffers {
    pub frame: WireFrame,
    pub ack: [u8; ACK_LEN],
}

/// Everything one worker needs, cloned out of its slot.
pub struct WorkerContext {
    pub slot: u8,
    pub device: Arc<dyn PhysicalDevice>,
    pub enabled: Arc<AtomicBool>,
    pub failures: Arc<AtomicU64>,
    pub buffers: Arc<Mutex<SlotBuffers>>,
    pub channel: Arc<CommandChannel>,
    pub interval: Duration,
}

/// Handle to a running slot worker. Stopping is cooperative.
pub struct SlotWorker {
    keep_running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    slot: u8,
}

impl SlotWorker {
    pub fn spawn(ctx: WorkerContext) -> std::io::Result<Self> {
        let keep_running = Arc::new(AtomicBool::new(true));
        let slot = ctx.slot;
        let handle = {
            let keep_running = Arc::clone(&keep_running);
            thread::Builder::new()
                .name(format!("slot-{}", slot))
                .spawn(move || run(ctx, keep_running))?
        };
        Ok(Self {
            keep_running,
            handle,
            slot,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Clears the run flag and waits up to `timeout` for the loop to exit.
    /// A worker still busy after that is handed back, already told to stop.
    pub fn stop(self, timeout: Duration) -> Option<SlotWorker> {
        self.keep_running.store(false, Ordering::SeqCst);
        let deadline = Instant::now() + timeout;
        while !self.handle.is_finished() {
            if Instant::now() >= deadline {
                log::warn!(
                    "Worker for slot {} did not stop within {:?}, detaching it",
                    self.slot,
                    timeout
                );
                return Some(self);
            }
            thread::sleep(Duration::from_millis(1));
        }
        if let Err(e) = self.handle.join() {
            log::error!("Worker for slot {} panicked: {:?}", self.slot, e);
        }
        None
    }
}

fn run(ctx: WorkerContext, keep_running: Arc<AtomicBool>) {
    log::info!("Worker for slot {} started ({})", ctx.slot, ctx.device.name());

    while keep_running.load(Ordering::SeqCst) {
        match cycle(&ctx) {
            Ok(()) => {}
            Err(e @ EngineError::DeviceVanished(_)) => {
                log::info!("Worker for slot {} exiting: {}", ctx.slot, e);
                break;
            }
            Err(e) => {
                let failures = ctx.failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures == 1 {
                    log::warn!("Slot {}: {}", ctx.slot, e);
                } else {
                    log::debug!("Slot {}: {} ({} failures)", ctx.slot, e, failures);
                }
            }
        }

        thread::sleep(ctx.interval);
    }

    log::info!("Worker for slot {} stopped", ctx.slot);
}

/// One poll, transcode and report under the slot's lock.
fn cycle(ctx: &WorkerContext) -> Result<()> {
    if !ctx.device.is_attached() {
        return Err(EngineError::DeviceVanished(ctx.device.guid()));
    }

    let mut buffers = ctx.buffers.lock().unwrap_or_else(|e| e.into_inner());
    let Some(mut report) = ctx.device.poll() else {
        return Ok(());
    };
    if !ctx.enabled.load(Ordering::SeqCst) {
        return Ok(());
    }

    report.set_origin(ctx.slot);
    let SlotBuffers { frame, ack } = &mut *buffers;
    transcode_into(&report, ctx.slot, frame);
    ctx.channel.report(frame, ack)
}
