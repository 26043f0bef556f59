#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use self::unix::{DeviceNodeTransport, DEFAULT_BUS_PATH};
#[cfg(windows)]
pub use self::windows::{DeviceNodeTransport, DEFAULT_BUS_PATH};

use crate::error::{EngineError, Result};
use crate::protocol::{WireFrame, REPORT_LEN};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

pub const IOCTL_BUSENUM_PLUGIN_HARDWARE: u32 = 0x2A4000;
pub const IOCTL_BUSENUM_UNPLUG_HARDWARE: u32 = 0x2A4004;
pub const IOCTL_BUSENUM_REPORT_HARDWARE: u32 = 0x2A400C;

/// Size of the plugin/unplug control block.
pub const CONTROL_BLOCK_LEN: usize = 16;
/// Size of the acknowledgement the driver writes back for a report.
pub const ACK_LEN: usize = 8;

/// Raw device-control access to the virtual bus driver.
///
/// Implementations must accept concurrent `device_io_control` calls from
/// several slot workers.
pub trait BusTransport: Send + Sync {
    fn open(&self) -> std::io::Result<()>;
    fn close(&self);
    /// Issues `code` with `input`, filling `output`. Returns bytes written
    /// to `output`.
    fn device_io_control(&self, code: u32, input: &[u8], output: &mut [u8]) -> std::io::Result<usize>;
}

/// Plugin/unplug control block: size tag, then the little-endian serial.
pub fn control_block(serial: u32) -> [u8; CONTROL_BLOCK_LEN] {
    let mut block = [0u8; CONTROL_BLOCK_LEN];
    block[0] = 0x10;
    block[4..8].copy_from_slice(&serial.to_le_bytes());
    block
}

/// Plug/unplug/report client over a shared [`BusTransport`].
///
/// Opened once per engine run and shared by every slot worker.
pub struct CommandChannel {
    transport: Arc<dyn BusTransport>,
    open: AtomicBool,
    plugged: AtomicI64,
    failures: AtomicU64,
}

impl CommandChannel {
    pub fn new(transport: Arc<dyn BusTransport>) -> Self {
        Self {
            transport,
            open: AtomicBool::new(false),
            plugged: AtomicI64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn open(&self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        self.transport.open().map_err(EngineError::ChannelOpen)?;
        self.open.store(true, Ordering::SeqCst);
        log::info!("Command channel opened");
        Ok(())
    }

    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.transport.close();
            log::info!("Command channel closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Virtual pads currently plugged through this channel.
    pub fn plugged_count(&self) -> i64 {
        self.plugged.load(Ordering::SeqCst)
    }

    /// Control and report calls the driver rejected so far.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    fn control(&self, op: &'static str, code: u32, serial: u32) -> Result<()> {
        if !self.is_open() {
            return Err(EngineError::ChannelUnavailable);
        }
        let block = control_block(serial);
        self.transport
            .device_io_control(code, &block, &mut [])
            .map(|_| ())
            .map_err(|e| {
                self.failures.fetch_add(1, Ordering::SeqCst);
                EngineError::ChannelWriteFailed { op, source: Some(e) }
            })
    }

    pub fn plugin(&self, serial: u32) -> Result<()> {
        self.control("plugin", IOCTL_BUSENUM_PLUGIN_HARDWARE, serial)?;
        self.plugged.fetch_add(1, Ordering::SeqCst);
        log::debug!("Plugged in virtual pad {}", serial);
        Ok(())
    }

    pub fn unplug(&self, serial: u32) -> Result<()> {
        self.control("unplug", IOCTL_BUSENUM_UNPLUG_HARDWARE, serial)?;
        self.plugged.fetch_sub(1, Ordering::SeqCst);
        log::debug!("Unplugged virtual pad {}", serial);
        Ok(())
    }

    /// Sends one report frame. Succeeds only if the driver accepted it and
    /// wrote back at least one byte.
    pub fn report(&self, frame: &WireFrame, ack: &mut [u8; ACK_LEN]) -> Result<()> {
        if !self.is_open() {
            return Err(EngineError::ChannelUnavailable);
        }
        let input: &[u8; REPORT_LEN] = frame.as_bytes();
        match self
            .transport
            .device_io_control(IOCTL_BUSENUM_REPORT_HARDWARE, input, ack)
        {
            Ok(n) if n > 0 => Ok(()),
            Ok(_) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::ChannelWriteFailed { op: "report", source: None })
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::ChannelWriteFailed { op: "report", source: Some(e) })
            }
        }
    }
}
