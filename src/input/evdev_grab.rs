#![cfg(target_os = "linux")]
//! Exclusive access on Linux.
//!
//! An `EVIOCGRAB` on a pad's event node cuts every other reader off, gilrs
//! included. While the grab is held, the grabbing fd is the only source of
//! events, so it also becomes the source of the pad's raw state.

use super::RawInputState;
use evdev::{AbsoluteAxisCode, Device, EventType, InputEvent, KeyCode};
use std::collections::HashMap;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One udev input node that may belong to a gilrs pad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCandidate {
    pub devnode: PathBuf,
    pub vendor: Option<u16>,
    pub product: Option<u16>,
    /// udev tagged the node `ID_INPUT_JOYSTICK=1`.
    pub joystick: bool,
    /// Kernel name of the input device, as gilrs reports it in `os_name`.
    pub name: Option<String>,
    /// Serial number, or the physical port path when the pad has none.
    pub instance: Option<String>,
}

impl NodeCandidate {
    fn is_event_node(&self) -> bool {
        self.devnode
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with("event"))
    }
}

/// Lists every input node udev knows about.
pub fn scan_nodes(udev: &libudev::Context) -> Vec<NodeCandidate> {
    let Ok(mut enumerator) = libudev::Enumerator::new(udev) else {
        return Vec::new();
    };
    if enumerator.match_subsystem("input").is_err() {
        return Vec::new();
    }
    let Ok(devices) = enumerator.scan_devices() else {
        return Vec::new();
    };

    devices
        .filter_map(|device| {
            let devnode = device.devnode()?.to_path_buf();
            let text = |key: &str| {
                device
                    .property_value(key)
                    .and_then(|s| s.to_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            let hex = |key: &str| text(key).and_then(|s| u16::from_str_radix(&s, 16).ok());
            let name = device.parent().and_then(|parent| {
                parent
                    .attribute_value("name")
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            });

            Some(NodeCandidate {
                devnode,
                vendor: hex("ID_VENDOR_ID"),
                product: hex("ID_PRODUCT_ID").or_else(|| hex("ID_MODEL_ID")),
                joystick: text("ID_INPUT_JOYSTICK").as_deref() == Some("1"),
                name,
                instance: text("ID_SERIAL_SHORT").or_else(|| text("ID_PATH")),
            })
        })
        .collect()
}

/// Picks the event node of one pad.
///
/// Only joystick event nodes with the pad's USB ids qualify; nodes another
/// pad already owns are skipped. A node whose kernel name matches `name` wins
/// over the first remaining one.
pub fn select_node<'a>(
    candidates: &'a [NodeCandidate],
    vendor: Option<u16>,
    product: Option<u16>,
    name: &str,
    taken: &[PathBuf],
) -> Option<&'a NodeCandidate> {
    let mut fallback = None;
    for candidate in candidates.iter().filter(|c| {
        c.joystick
            && c.is_event_node()
            && c.vendor == vendor
            && c.product == product
            && !taken.contains(&c.devnode)
    }) {
        if candidate.name.as_deref() == Some(name) {
            return Some(candidate);
        }
        fallback.get_or_insert(candidate);
    }
    if fallback.is_none() {
        log::warn!("Device node not found for: {}", name);
    }
    fallback
}

/// Gilrs button order, as evdev key codes.
const KEY_ORDER: [KeyCode; 11] = [
    KeyCode::BTN_SOUTH,
    KeyCode::BTN_EAST,
    KeyCode::BTN_WEST,
    KeyCode::BTN_NORTH,
    KeyCode::BTN_TL,
    KeyCode::BTN_TR,
    KeyCode::BTN_SELECT,
    KeyCode::BTN_START,
    KeyCode::BTN_MODE,
    KeyCode::BTN_THUMBL,
    KeyCode::BTN_THUMBR,
];

/// Gilrs stick order. Vertical axes are flipped: gilrs reports up as positive.
const STICK_AXES: [(AbsoluteAxisCode, bool); 4] = [
    (AbsoluteAxisCode::ABS_X, false),
    (AbsoluteAxisCode::ABS_Y, true),
    (AbsoluteAxisCode::ABS_RX, false),
    (AbsoluteAxisCode::ABS_RY, true),
];

const SLIDER_AXES: [AbsoluteAxisCode; 2] = [AbsoluteAxisCode::ABS_Z, AbsoluteAxisCode::ABS_RZ];

fn set<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

/// Folds raw evdev events into the layout the gilrs backend produces.
#[derive(Debug, Clone)]
pub struct EventState {
    state: RawInputState,
    /// Absolute axis code -> (minimum, maximum).
    ranges: HashMap<u16, (i32, i32)>,
}

impl EventState {
    pub fn new(seed: RawInputState, ranges: HashMap<u16, (i32, i32)>) -> Self {
        let mut state = seed;
        state.buttons.resize(KEY_ORDER.len(), false);
        state.axes.resize(STICK_AXES.len(), 0.0);
        state.sliders.resize(SLIDER_AXES.len(), -1.0);
        if state.hats.is_empty() {
            state.hats.push(Default::default());
        }
        Self { state, ranges }
    }

    pub fn state(&self) -> &RawInputState {
        &self.state
    }

    /// Returns true when the event changed the state.
    pub fn apply(&mut self, event: &InputEvent) -> bool {
        match event.event_type() {
            EventType::KEY => self.apply_key(event.code(), event.value() != 0),
            EventType::ABSOLUTE => self.apply_abs(event.code(), event.value()),
            _ => false,
        }
    }

    fn apply_key(&mut self, code: u16, pressed: bool) -> bool {
        if let Some(i) = KEY_ORDER.iter().position(|k| k.0 == code) {
            return set(&mut self.state.buttons[i], pressed);
        }
        let hat = &mut self.state.hats[0];
        let target = if code == KeyCode::BTN_DPAD_UP.0 {
            &mut hat.up
        } else if code == KeyCode::BTN_DPAD_DOWN.0 {
            &mut hat.down
        } else if code == KeyCode::BTN_DPAD_LEFT.0 {
            &mut hat.left
        } else if code == KeyCode::BTN_DPAD_RIGHT.0 {
            &mut hat.right
        } else {
            return false;
        };
        set(target, pressed)
    }

    fn apply_abs(&mut self, code: u16, raw: i32) -> bool {
        if let Some(i) = STICK_AXES.iter().position(|(axis, _)| axis.0 == code) {
            let value = self.normalize(code, raw);
            let value = if STICK_AXES[i].1 { -value } else { value };
            return set(&mut self.state.axes[i], value);
        }
        if let Some(i) = SLIDER_AXES.iter().position(|axis| axis.0 == code) {
            let value = self.normalize(code, raw);
            return set(&mut self.state.sliders[i], value);
        }

        let hat = &mut self.state.hats[0];
        if code == AbsoluteAxisCode::ABS_HAT0X.0 {
            set(&mut hat.left, raw < 0) | set(&mut hat.right, raw > 0)
        } else if code == AbsoluteAxisCode::ABS_HAT0Y.0 {
            set(&mut hat.up, raw < 0) | set(&mut hat.down, raw > 0)
        } else {
            false
        }
    }

    /// Scales to -1.0..=1.0 over the axis's reported range.
    fn normalize(&self, code: u16, raw: i32) -> f32 {
        match self.ranges.get(&code) {
            Some(&(min, max)) if max != min => {
                ((2.0 * (raw - min) as f32 / (max - min) as f32) - 1.0).clamp(-1.0, 1.0)
            }
            _ => 0.0,
        }
    }
}

fn set_nonblocking(device: &Device) -> std::io::Result<()> {
    let fd = device.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// An `EVIOCGRAB` held on a device node, with a reader thread that keeps
/// the pad's shared state current while it is held.
pub struct ExclusiveGrab {
    keep_running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    path: PathBuf,
}

impl ExclusiveGrab {
    pub fn acquire(
        path: &Path,
        state: Arc<Mutex<Option<RawInputState>>>,
        interval: Duration,
    ) -> anyhow::Result<Self> {
        let mut device = Device::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", path.display(), e))?;
        set_nonblocking(&device)?;

        let ranges: HashMap<u16, (i32, i32)> = match device.get_absinfo() {
            Ok(info) => info
                .map(|(axis, info)| (axis.0, (info.minimum(), info.maximum())))
                .collect(),
            Err(_) => HashMap::new(),
        };

        device
            .grab()
            .map_err(|e| anyhow::anyhow!("Failed to grab {}: {}", path.display(), e))?;

        let seed = state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_default();
        let events = EventState::new(seed, ranges);

        let keep_running = Arc::new(AtomicBool::new(true));
        let thread = {
            let keep_running = Arc::clone(&keep_running);
            let path = path.to_path_buf();
            thread::Builder::new()
                .name("evdev-grab".into())
                .spawn(move || read_grabbed(device, events, state, keep_running, interval, path))?
        };

        log::info!("Exclusive access to {}", path.display());
        Ok(Self {
            keep_running,
            thread: Some(thread),
            path: path.to_path_buf(),
        })
    }

    /// Stops the reader, which ungrabs the node on its way out.
    pub fn release(mut self) -> anyhow::Result<()> {
        self.shutdown()?;
        log::info!("Shared access to {}", self.path.display());
        Ok(())
    }

    fn shutdown(&mut self) -> anyhow::Result<()> {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow::anyhow!("Reader for {} panicked", self.path.display()))?;
        }
        Ok(())
    }
}

impl Drop for ExclusiveGrab {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("{}", e);
        }
    }
}

fn read_grabbed(
    mut device: Device,
    mut events: EventState,
    state: Arc<Mutex<Option<RawInputState>>>,
    keep_running: Arc<AtomicBool>,
    interval: Duration,
    path: PathBuf,
) {
    while keep_running.load(Ordering::SeqCst) {
        match device.fetch_events() {
            Ok(batch) => {
                let mut changed = false;
                for event in batch {
                    changed |= events.apply(&event);
                }
                if changed {
                    *state.lock().unwrap_or_else(|e| e.into_inner()) = Some(events.state().clone());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => thread::sleep(interval),
            Err(e) => {
                // Unplugged; gilrs reports the disconnect.
                log::info!("Stopped reading {}: {}", path.display(), e);
                return;
            }
        }
    }

    if let Err(e) = device.ungrab() {
        log::warn!("Failed to release {}: {}", path.display(), e);
    }
}
