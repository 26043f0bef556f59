//! Fakes shared by the engine integration tests.

#![allow(dead_code)]

use padbus::bus::{BusTransport, IOCTL_BUSENUM_PLUGIN_HARDWARE, IOCTL_BUSENUM_REPORT_HARDWARE, IOCTL_BUSENUM_UNPLUG_HARDWARE};
use padbus::input::{
    CooperativeLevel, DeviceGuid, DeviceInfo, InputSource, PhysicalDevice, ProductGuid,
};
use padbus::protocol::GenericReport;
use padbus::{Engine, EngineOptions};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

pub fn guid(n: u8) -> DeviceGuid {
    DeviceGuid([n; 16])
}

pub struct FakeDevice {
    pub info: DeviceInfo,
    pub attached: AtomicBool,
    pub report: Mutex<Option<GenericReport>>,
    pub levels: Mutex<Vec<CooperativeLevel>>,
    pub polls: AtomicUsize,
}

impl FakeDevice {
    pub fn new(n: u8) -> Arc<Self> {
        Self::with_info(DeviceInfo {
            guid: guid(n),
            model: DeviceGuid([0x42; 16]),
            product: ProductGuid { vendor: 0x046d, product: 0xc216 },
            name: format!("Pad {}", n),
            button_count: 12,
            axis_count: 4,
        })
    }

    pub fn with_info(info: DeviceInfo) -> Arc<Self> {
        Arc::new(Self {
            info,
            attached: AtomicBool::new(true),
            report: Mutex::new(Some(GenericReport::default())),
            levels: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
        })
    }

    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    pub fn set_report(&self, report: GenericReport) {
        *self.report.lock().unwrap() = Some(report);
    }

    pub fn levels(&self) -> Vec<CooperativeLevel> {
        self.levels.lock().unwrap().clone()
    }
}

impl PhysicalDevice for FakeDevice {
    fn guid(&self) -> DeviceGuid {
        self.info.guid
    }

    fn name(&self) -> &str {
        &self.info.name
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    fn poll(&self) -> Option<GenericReport> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        *self.report.lock().unwrap()
    }

    fn set_cooperative_level(&self, level: CooperativeLevel) -> anyhow::Result<()> {
        self.levels.lock().unwrap().push(level);
        Ok(())
    }
}

/// Devices in enumeration order. Detached devices drop out of
/// `attached_devices` but keep their handle alive for assertions.
#[derive(Default)]
pub struct FakeSource {
    devices: Mutex<Vec<Arc<FakeDevice>>>,
    pub acquires: AtomicUsize,
}

impl FakeSource {
    pub fn with(devices: &[Arc<FakeDevice>]) -> Arc<Self> {
        let source = Arc::new(Self::default());
        for device in devices {
            source.attach(device.clone());
        }
        source
    }

    pub fn attach(&self, device: Arc<FakeDevice>) {
        self.devices.lock().unwrap().push(device);
    }
}

impl InputSource for FakeSource {
    fn attached_devices(&self) -> Vec<DeviceInfo> {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.is_attached())
            .map(|d| d.info.clone())
            .collect()
    }

    fn acquire(&self, info: &DeviceInfo) -> anyhow::Result<Arc<dyn PhysicalDevice>> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        let device = self
            .devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.info.guid == info.guid && d.is_attached())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{} is gone", info.guid))?;
        Ok(device)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    Plugin(u32),
    Unplug(u32),
    Report(Vec<u8>),
}

/// Records every request and acknowledges reports with a full buffer.
///
/// Like the real transports, calls share a read lock on the handle and
/// `close` takes the write lock.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<BusCall>>,
    handle: RwLock<()>,
    pub fail_open: AtomicBool,
    pub reject_reports: AtomicBool,
    /// Reports block inside the call while set.
    pub stall_reports: AtomicBool,
    /// Report calls currently blocked.
    pub stalled: AtomicUsize,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<BusCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Plug and unplug calls only, in order.
    pub fn control_calls(&self) -> Vec<BusCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, BusCall::Report(_)))
            .collect()
    }

    pub fn reports(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BusCall::Report(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    pub fn reports_for(&self, serial: u8) -> Vec<Vec<u8>> {
        self.reports().into_iter().filter(|f| f[4] == serial).collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

fn serial_of(input: &[u8]) -> u32 {
    u32::from_le_bytes([input[4], input[5], input[6], input[7]])
}

impl BusTransport for RecordingTransport {
    fn open(&self) -> std::io::Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no bus driver"));
        }
        Ok(())
    }

    fn close(&self) {
        let _handle = self.handle.write().unwrap();
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn device_io_control(&self, code: u32, input: &[u8], output: &mut [u8]) -> std::io::Result<usize> {
        let _handle = self.handle.read().unwrap();
        let call = match code {
            IOCTL_BUSENUM_PLUGIN_HARDWARE => BusCall::Plugin(serial_of(input)),
            IOCTL_BUSENUM_UNPLUG_HARDWARE => BusCall::Unplug(serial_of(input)),
            IOCTL_BUSENUM_REPORT_HARDWARE => BusCall::Report(input.to_vec()),
            other => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("unexpected code {:#x}", other),
                ))
            }
        };
        let is_report = matches!(call, BusCall::Report(_));
        self.calls.lock().unwrap().push(call);

        if is_report {
            if self.stall_reports.load(Ordering::SeqCst) {
                self.stalled.fetch_add(1, Ordering::SeqCst);
                while self.stall_reports.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                self.stalled.fetch_sub(1, Ordering::SeqCst);
            }
            if self.reject_reports.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("report rejected"));
            }
            output.fill(0);
            return Ok(output.len());
        }
        Ok(0)
    }
}

pub fn fast_options() -> EngineOptions {
    EngineOptions {
        exclusive_mode: false,
        poll_interval: Duration::from_millis(1),
        join_timeout: Duration::from_secs(2),
    }
}

pub fn engine(source: &Arc<FakeSource>, transport: &Arc<RecordingTransport>) -> Engine {
    Engine::new(source.clone(), transport.clone(), fast_options())
}

/// Polls `condition` until it holds or two seconds pass.
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
