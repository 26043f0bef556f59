use super::{
    CooperativeLevel, DeviceGuid, DeviceInfo, HatState, HotplugEvent, InputSource, PhysicalDevice,
    ProductGuid, RawInputState,
};
use crate::mapping::ControlMap;
use crate::protocol::GenericReport;
use crossbeam_channel::{Receiver, Sender};
use gilrs::{Axis, Button, EventType, Gamepad, GamepadId, Gilrs};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[cfg(target_os = "linux")]
use super::evdev_grab::{self, ExclusiveGrab};

/// Numbering of `btnN` in mapping files for this backend.
const BUTTON_ORDER: [Button; 11] = [
    Button::South,
    Button::East,
    Button::West,
    Button::North,
    Button::LeftTrigger,
    Button::RightTrigger,
    Button::Select,
    Button::Start,
    Button::Mode,
    Button::LeftThumb,
    Button::RightThumb,
];

const AXIS_ORDER: [Axis; 4] = [
    Axis::LeftStickX,
    Axis::LeftStickY,
    Axis::RightStickX,
    Axis::RightStickY,
];

/// Analog triggers are exposed as sliders.
const SLIDER_ORDER: [Button; 2] = [Button::LeftTrigger2, Button::RightTrigger2];

/// What the input thread knows about one connected pad.
struct PadEntry {
    info: DeviceInfo,
    /// Token folded into `info.guid`; unique among pads of one model.
    instance: String,
    attached: AtomicBool,
    state: Arc<Mutex<Option<RawInputState>>>,
    /// Set while an exclusive grab feeds `state` instead of gilrs.
    grabbed: AtomicBool,
    #[cfg(target_os = "linux")]
    node: Option<PathBuf>,
}

impl PadEntry {
    /// Stores a gilrs snapshot unless a grab owns the state.
    fn refresh(&self, snapshot: RawInputState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !self.grabbed.load(Ordering::SeqCst) {
            *state = Some(snapshot);
        }
    }

    fn set_grabbed(&self, grabbed: bool) {
        let _state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.grabbed.store(grabbed, Ordering::SeqCst);
    }
}

type PadList = Arc<Mutex<Vec<Arc<PadEntry>>>>;

/// Generic input source backed by gilrs.
///
/// A dedicated thread owns the `Gilrs` context, refreshes a raw snapshot of
/// every connected pad and reports hot-plug changes on a channel.
pub struct GilrsSource {
    pads: PadList,
    hotplug: Receiver<HotplugEvent>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    mapping_dir: PathBuf,
    #[cfg(target_os = "linux")]
    poll_interval: Duration,
}

impl GilrsSource {
    pub fn start(mapping_dir: PathBuf, poll_interval: Duration) -> anyhow::Result<Self> {
        let pads: PadList = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));
        let (hotplug_tx, hotplug) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let thread = {
            let pads = Arc::clone(&pads);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("gilrs-input".into())
                .spawn(move || input_thread(pads, running, hotplug_tx, ready_tx, poll_interval))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(anyhow::anyhow!("Failed to initialize gilrs: {}", e));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(anyhow::anyhow!("Input thread exited during start-up"));
            }
        }

        Ok(Self {
            pads,
            hotplug,
            running,
            thread: Some(thread),
            mapping_dir,
            #[cfg(target_os = "linux")]
            poll_interval,
        })
    }

    pub fn hotplug_events(&self) -> &Receiver<HotplugEvent> {
        &self.hotplug
    }
}

impl Drop for GilrsSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if let Err(e) = thread.join() {
                log::error!("Input thread panicked: {:?}", e);
            }
        }
    }
}

impl InputSource for GilrsSource {
    fn attached_devices(&self) -> Vec<DeviceInfo> {
        let pads = self.pads.lock().unwrap_or_else(|e| e.into_inner());
        pads.iter()
            .filter(|p| p.attached.load(Ordering::SeqCst))
            .map(|p| p.info.clone())
            .collect()
    }

    fn acquire(&self, info: &DeviceInfo) -> anyhow::Result<Arc<dyn PhysicalDevice>> {
        let entry = {
            let pads = self.pads.lock().unwrap_or_else(|e| e.into_inner());
            pads.iter()
                .find(|p| p.info.guid == info.guid && p.attached.load(Ordering::SeqCst))
                .cloned()
        }
        .ok_or_else(|| anyhow::anyhow!("Device {} is not attached", info.guid))?;

        let map = load_map(&self.mapping_dir, info);

        Ok(Arc::new(GilrsDevice {
            entry,
            map,
            #[cfg(target_os = "linux")]
            grab: Mutex::new(None),
            #[cfg(target_os = "linux")]
            poll_interval: self.poll_interval,
        }))
    }
}

/// Mapping for a pad, keyed by its model so it doesn't depend on the
/// order pads were connected in.
fn load_map(dir: &Path, info: &DeviceInfo) -> ControlMap {
    match ControlMap::load(dir, &info.model) {
        Ok(map) => map,
        Err(e) => {
            log::warn!("Using default mapping for {}: {}", info.name, e);
            ControlMap::default()
        }
    }
}

/// A claimed gilrs pad with its mapping applied on every poll.
pub struct GilrsDevice {
    entry: Arc<PadEntry>,
    map: ControlMap,
    #[cfg(target_os = "linux")]
    grab: Mutex<Option<ExclusiveGrab>>,
    #[cfg(target_os = "linux")]
    poll_interval: Duration,
}

impl PhysicalDevice for GilrsDevice {
    fn guid(&self) -> DeviceGuid {
        self.entry.info.guid
    }

    fn name(&self) -> &str {
        &self.entry.info.name
    }

    fn is_attached(&self) -> bool {
        self.entry.attached.load(Ordering::SeqCst)
    }

    fn poll(&self) -> Option<GenericReport> {
        if !self.is_attached() {
            return None;
        }
        let state = self.entry.state.lock().unwrap_or_else(|e| e.into_inner());
        state.as_ref().map(|raw| self.map.apply(raw))
    }

    #[cfg(target_os = "linux")]
    fn set_cooperative_level(&self, level: CooperativeLevel) -> anyhow::Result<()> {
        let mut grab = self.grab.lock().unwrap_or_else(|e| e.into_inner());
        match level {
            CooperativeLevel::Exclusive => {
                if grab.is_some() {
                    return Ok(());
                }
                let node = self.entry.node.as_ref().ok_or_else(|| {
                    anyhow::anyhow!("No evdev node known for {}", self.entry.info.name)
                })?;
                let held = ExclusiveGrab::acquire(
                    node,
                    Arc::clone(&self.entry.state),
                    self.poll_interval,
                )?;
                self.entry.set_grabbed(true);
                *grab = Some(held);
            }
            CooperativeLevel::Shared => {
                if let Some(held) = grab.take() {
                    let released = held.release();
                    self.entry.set_grabbed(false);
                    released?;
                }
            }
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn set_cooperative_level(&self, level: CooperativeLevel) -> anyhow::Result<()> {
        if level == CooperativeLevel::Exclusive {
            log::warn!(
                "Exclusive access is not supported for {} on this platform",
                self.entry.info.name
            );
        }
        Ok(())
    }
}

/// Identity of one physical pad: the model UUID with a hash of its
/// instance token folded into the last four bytes.
pub fn device_identity(model: &DeviceGuid, instance: &str) -> DeviceGuid {
    // FNV-1a; stable across runs and toolchains.
    let hash = instance
        .bytes()
        .fold(0x811c_9dc5u32, |h, b| (h ^ b as u32).wrapping_mul(0x0100_0193));
    let mut guid = model.0;
    for (byte, h) in guid[12..].iter_mut().zip(hash.to_le_bytes()) {
        *byte ^= h;
    }
    DeviceGuid(guid)
}

/// Chooses the instance token of a newly connected pad.
///
/// The device's own token (serial or port path) is used when it has one that
/// no other pad of the same model holds; otherwise the lowest free `#n`.
fn pick_instance(used: &[&str], preferred: Option<String>) -> String {
    if let Some(token) = preferred.filter(|t| !used.contains(&t.as_str())) {
        return token;
    }
    (0u32..)
        .map(|n| format!("#{}", n))
        .find(|t| !used.contains(&t.as_str()))
        .unwrap_or_default()
}

fn describe(gamepad: &Gamepad<'_>, model: DeviceGuid, instance: &str) -> DeviceInfo {
    let button_count = BUTTON_ORDER
        .iter()
        .chain(SLIDER_ORDER.iter())
        .filter(|b| gamepad.button_code(**b).is_some())
        .count();
    let axis_count = AXIS_ORDER
        .iter()
        .filter(|a| gamepad.axis_code(**a).is_some())
        .count();

    DeviceInfo {
        guid: device_identity(&model, instance),
        model,
        product: ProductGuid {
            vendor: gamepad.vendor_id().unwrap_or(0),
            product: gamepad.product_id().unwrap_or(0),
        },
        name: gamepad.name().to_string(),
        button_count: button_count as u32,
        axis_count: axis_count as u32,
    }
}

fn snapshot(gamepad: &Gamepad<'_>) -> RawInputState {
    RawInputState {
        buttons: BUTTON_ORDER.iter().map(|b| gamepad.is_pressed(*b)).collect(),
        axes: AXIS_ORDER.iter().map(|a| gamepad.value(*a)).collect(),
        sliders: SLIDER_ORDER
            .iter()
            .map(|b| {
                gamepad
                    .button_data(*b)
                    .map(|d| d.value() * 2.0 - 1.0)
                    .unwrap_or(-1.0)
            })
            .collect(),
        hats: vec![HatState {
            up: gamepad.is_pressed(Button::DPadUp),
            down: gamepad.is_pressed(Button::DPadDown),
            left: gamepad.is_pressed(Button::DPadLeft),
            right: gamepad.is_pressed(Button::DPadRight),
        }],
    }
}

struct Registry {
    pads: PadList,
    by_id: HashMap<GamepadId, Arc<PadEntry>>,
    hotplug: Sender<HotplugEvent>,
    #[cfg(target_os = "linux")]
    udev: Option<libudev::Context>,
}

impl Registry {
    fn connect(&mut self, id: GamepadId, gamepad: &Gamepad<'_>) {
        if self.by_id.contains_key(&id) {
            return;
        }
        let model = DeviceGuid(gamepad.uuid());

        #[cfg(target_os = "linux")]
        let node = self.udev.as_ref().and_then(|udev| {
            let taken: Vec<PathBuf> = self.by_id.values().filter_map(|e| e.node.clone()).collect();
            evdev_grab::select_node(
                &evdev_grab::scan_nodes(udev),
                gamepad.vendor_id(),
                gamepad.product_id(),
                gamepad.os_name(),
                &taken,
            )
            .cloned()
        });
        #[cfg(target_os = "linux")]
        let preferred = node.as_ref().and_then(|n| n.instance.clone());
        #[cfg(not(target_os = "linux"))]
        let preferred: Option<String> = None;

        let used: Vec<&str> = self
            .by_id
            .values()
            .filter(|e| e.info.model == model)
            .map(|e| e.instance.as_str())
            .collect();
        let instance = pick_instance(&used, preferred);
        let info = describe(gamepad, model, &instance);
        log::info!(
            "Found device: {} ({}) - {} buttons, {} axes",
            info.name,
            info.guid,
            info.button_count,
            info.axis_count
        );

        let entry = Arc::new(PadEntry {
            info: info.clone(),
            instance,
            attached: AtomicBool::new(true),
            state: Arc::new(Mutex::new(Some(snapshot(gamepad)))),
            grabbed: AtomicBool::new(false),
            #[cfg(target_os = "linux")]
            node: node.map(|n| n.devnode),
        });
        self.by_id.insert(id, Arc::clone(&entry));
        self.pads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);

        let _ = self.hotplug.send(HotplugEvent::Connected {
            guid: info.guid,
            name: info.name,
        });
    }

    fn disconnect(&mut self, id: GamepadId) {
        let Some(entry) = self.by_id.remove(&id) else {
            return;
        };
        entry.attached.store(false, Ordering::SeqCst);
        self.pads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|p| !Arc::ptr_eq(p, &entry));
        log::info!("{} removed", entry.info.name);

        let _ = self.hotplug.send(HotplugEvent::Disconnected {
            guid: entry.info.guid,
        });
    }

    fn detach_all(&mut self) {
        for (_, entry) in self.by_id.drain() {
            entry.attached.store(false, Ordering::SeqCst);
        }
        self.pads.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

fn input_thread(
    pads: PadList,
    running: Arc<AtomicBool>,
    hotplug: Sender<HotplugEvent>,
    ready: Sender<Result<(), String>>,
    poll_interval: Duration,
) {
    let mut gilrs = match Gilrs::new() {
        Ok(gilrs) => gilrs,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };

    let mut registry = Registry {
        pads,
        by_id: HashMap::new(),
        hotplug,
        #[cfg(target_os = "linux")]
        udev: match libudev::Context::new() {
            Ok(udev) => Some(udev),
            Err(e) => {
                log::warn!("udev unavailable, exclusive mode disabled: {}", e);
                None
            }
        },
    };

    let initial: Vec<GamepadId> = gilrs.gamepads().map(|(id, _)| id).collect();
    for id in initial {
        registry.connect(id, &gilrs.gamepad(id));
    }
    let _ = ready.send(Ok(()));
    log::info!("Input thread started with {} device(s)", registry.by_id.len());

    while running.load(Ordering::SeqCst) {
        while let Some(event) = gilrs.next_event() {
            match event.event {
                EventType::Connected => registry.connect(event.id, &gilrs.gamepad(event.id)),
                EventType::Disconnected => registry.disconnect(event.id),
                _ => {}
            }
        }

        for (id, entry) in &registry.by_id {
            if let Some(gamepad) = gilrs.connected_gamepad(*id) {
                entry.refresh(snapshot(&gamepad));
            }
        }

        thread::sleep(poll_interval);
    }

    registry.detach_all();
    log::info!("Input thread stopped");
}
