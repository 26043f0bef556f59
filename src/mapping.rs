//! Per-device button/axis mapping files.
//!
//! Each controller gets `<dir>/<guid>.ini` with one `property=value` line per
//! logical control. Applying a map to a [`RawInputState`] yields the
//! [`GenericReport`] the engine consumes.

use crate::input::{DeviceGuid, HatState, RawInputState};
use crate::protocol::{buttons, GenericReport, Stick, STICK_CENTER};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    ButtonA,
    ButtonB,
    ButtonX,
    ButtonY,
    Home,
    Start,
    Back,
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
    LeftTrigger,
    RightTrigger,
    LeftBumper,
    RightBumper,
    LeftStickButton,
    LeftYUp,
    LeftYDown,
    LeftXUp,
    LeftXDown,
    RightStickButton,
    RightYUp,
    RightYDown,
    RightXUp,
    RightXDown,
}

impl Control {
    pub const ALL: [Control; 25] = [
        Control::ButtonA,
        Control::ButtonB,
        Control::ButtonX,
        Control::ButtonY,
        Control::Home,
        Control::Start,
        Control::Back,
        Control::DpadUp,
        Control::DpadDown,
        Control::DpadLeft,
        Control::DpadRight,
        Control::LeftTrigger,
        Control::RightTrigger,
        Control::LeftBumper,
        Control::RightBumper,
        Control::LeftStickButton,
        Control::LeftYUp,
        Control::LeftYDown,
        Control::LeftXUp,
        Control::LeftXDown,
        Control::RightStickButton,
        Control::RightYUp,
        Control::RightYDown,
        Control::RightXUp,
        Control::RightXDown,
    ];

    pub fn property(self) -> &'static str {
        match self {
            Control::ButtonA => "button_a",
            Control::ButtonB => "button_b",
            Control::ButtonX => "button_x",
            Control::ButtonY => "button_y",
            Control::Home => "home",
            Control::Start => "start",
            Control::Back => "back",
            Control::DpadUp => "dpad_up",
            Control::DpadDown => "dpad_down",
            Control::DpadLeft => "dpad_left",
            Control::DpadRight => "dpad_right",
            Control::LeftTrigger => "left_trigger",
            Control::RightTrigger => "right_trigger",
            Control::LeftBumper => "left_bumper",
            Control::RightBumper => "right_bumper",
            Control::LeftStickButton => "left_axebutton",
            Control::LeftYUp => "left_y_up",
            Control::LeftYDown => "left_y_down",
            Control::LeftXUp => "left_x_up",
            Control::LeftXDown => "left_x_down",
            Control::RightStickButton => "right_axebutton",
            Control::RightYUp => "right_y_up",
            Control::RightYDown => "right_y_down",
            Control::RightXUp => "right_x_up",
            Control::RightXDown => "right_x_down",
        }
    }

    pub fn from_property(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.property() == name)
    }

    fn index(self) -> usize {
        self as usize
    }

    /// Generic-report button bit driven by this control, if it is a button.
    fn button_bit(self) -> Option<u32> {
        Some(match self {
            Control::ButtonA => buttons::A,
            Control::ButtonB => buttons::B,
            Control::ButtonX => buttons::X,
            Control::ButtonY => buttons::Y,
            Control::Home => buttons::GUIDE,
            Control::Start => buttons::START,
            Control::Back => buttons::BACK,
            Control::DpadUp => buttons::DPAD_UP,
            Control::DpadDown => buttons::DPAD_DOWN,
            Control::DpadLeft => buttons::DPAD_LEFT,
            Control::DpadRight => buttons::DPAD_RIGHT,
            Control::LeftBumper => buttons::LEFT_SHOULDER,
            Control::RightBumper => buttons::RIGHT_SHOULDER,
            Control::LeftStickButton => buttons::LEFT_THUMB,
            Control::RightStickButton => buttons::RIGHT_THUMB,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HatDirection {
    Up,
    Down,
    Left,
    Right,
}

impl HatDirection {
    fn suffix(self) -> &'static str {
        match self {
            HatDirection::Up => "up",
            HatDirection::Down => "down",
            HatDirection::Left => "left",
            HatDirection::Right => "right",
        }
    }

    fn read(self, hat: &HatState) -> bool {
        match self {
            HatDirection::Up => hat.up,
            HatDirection::Down => hat.down,
            HatDirection::Left => hat.left,
            HatDirection::Right => hat.right,
        }
    }
}

/// Where a logical control reads from. Indices are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Binding {
    #[default]
    Disabled,
    Button(u8),
    Axis { index: u8, inverted: bool },
    Dpad { index: u8, direction: HatDirection },
    Slider { index: u8, inverted: bool },
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = |inverted: bool| if inverted { '-' } else { '+' };
        match *self {
            Binding::Disabled => write!(f, "disabled"),
            Binding::Button(index) => write!(f, "btn{}", index as u16 + 1),
            Binding::Axis { index, inverted } => {
                write!(f, "{}axis{}", sign(inverted), index as u16 + 1)
            }
            Binding::Dpad { index, direction } => {
                write!(f, "dpad{}{}", index as u16 + 1, direction.suffix())
            }
            Binding::Slider { index, inverted } => {
                write!(f, "{}slider{}", sign(inverted), index as u16 + 1)
            }
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("could not identify property in {0:?}")]
    UnknownProperty(String),
    #[error("no assignment for {}", .0.property())]
    MissingAssignment(Control),
    #[error("could not identify value {value:?} for {}", .control.property())]
    UnknownValue { control: Control, value: String },
    #[error("bad control number in {value:?} for {}", .control.property())]
    BadNumber { control: Control, value: String },
}

impl MappingError {
    /// The control the bad line was meant for, when it could be identified.
    pub fn control(&self) -> Option<Control> {
        match self {
            MappingError::UnknownProperty(_) => None,
            MappingError::MissingAssignment(control)
            | MappingError::UnknownValue { control, .. }
            | MappingError::BadNumber { control, .. } => Some(*control),
        }
    }
}

/// Parses one `property=value` line.
pub fn parse_line(line: &str) -> Result<(Control, Binding), MappingError> {
    let line = line.trim();
    let (name, value) = match line.split_once('=') {
        Some((name, value)) => (name.trim(), Some(value.trim())),
        None => (line, None),
    };
    let control =
        Control::from_property(name).ok_or_else(|| MappingError::UnknownProperty(line.to_string()))?;
    let value = match value {
        Some(value) if !value.is_empty() => value,
        _ => return Err(MappingError::MissingAssignment(control)),
    };

    let number = |digits: &str| -> Result<u8, MappingError> {
        match digits.parse::<u16>() {
            Ok(n) if (1..=256).contains(&n) => Ok((n - 1) as u8),
            _ => Err(MappingError::BadNumber {
                control,
                value: value.to_string(),
            }),
        }
    };
    let signed = |rest: &str, keyword: &str| -> Option<(bool, String)> {
        let (inverted, rest) = match rest.as_bytes().first() {
            Some(b'-') => (true, &rest[1..]),
            Some(b'+') => (false, &rest[1..]),
            _ => (false, rest),
        };
        rest.strip_prefix(keyword).map(|digits| (inverted, digits.to_string()))
    };

    let binding = if value == "disabled" {
        Binding::Disabled
    } else if let Some(digits) = value.strip_prefix("btn") {
        Binding::Button(number(digits)?)
    } else if let Some((inverted, digits)) = signed(value, "axis") {
        Binding::Axis { index: number(&digits)?, inverted }
    } else if let Some((inverted, digits)) = signed(value, "slider") {
        Binding::Slider { index: number(&digits)?, inverted }
    } else if let Some(rest) = value.strip_prefix("dpad") {
        let direction = [
            HatDirection::Up,
            HatDirection::Down,
            HatDirection::Left,
            HatDirection::Right,
        ]
        .into_iter()
        .find(|d| rest.ends_with(d.suffix()))
        .ok_or_else(|| MappingError::UnknownValue {
            control,
            value: value.to_string(),
        })?;
        let digits = &rest[..rest.len() - direction.suffix().len()];
        Binding::Dpad { index: number(digits)?, direction }
    } else {
        return Err(MappingError::UnknownValue {
            control,
            value: value.to_string(),
        });
    };

    Ok((control, binding))
}

/// A source's current reading before it is fitted to a control.
#[derive(Debug, Clone, Copy)]
enum Reading {
    Digital(bool),
    Analog(f32),
}

impl Reading {
    fn pressed(self) -> bool {
        match self {
            Reading::Digital(pressed) => pressed,
            Reading::Analog(value) => value > 0.5,
        }
    }

    /// Full source travel as 0-255.
    fn level(self) -> u8 {
        match self {
            Reading::Digital(true) => 0xFF,
            Reading::Digital(false) => 0x00,
            Reading::Analog(value) => {
                (((value.clamp(-1.0, 1.0) + 1.0) / 2.0) * 255.0).round() as u8
            }
        }
    }
}

/// Bindings for all 25 logical controls of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMap {
    bindings: [Binding; 25],
}

impl Default for ControlMap {
    /// Layout matching the gilrs backend's control order.
    fn default() -> Self {
        let mut map = Self::disabled();
        let defaults = [
            (Control::ButtonA, Binding::Button(0)),
            (Control::ButtonB, Binding::Button(1)),
            (Control::ButtonX, Binding::Button(2)),
            (Control::ButtonY, Binding::Button(3)),
            (Control::LeftBumper, Binding::Button(4)),
            (Control::RightBumper, Binding::Button(5)),
            (Control::Back, Binding::Button(6)),
            (Control::Start, Binding::Button(7)),
            (Control::Home, Binding::Button(8)),
            (Control::LeftStickButton, Binding::Button(9)),
            (Control::RightStickButton, Binding::Button(10)),
            (Control::DpadUp, Binding::Dpad { index: 0, direction: HatDirection::Up }),
            (Control::DpadDown, Binding::Dpad { index: 0, direction: HatDirection::Down }),
            (Control::DpadLeft, Binding::Dpad { index: 0, direction: HatDirection::Left }),
            (Control::DpadRight, Binding::Dpad { index: 0, direction: HatDirection::Right }),
            (Control::LeftTrigger, Binding::Slider { index: 0, inverted: false }),
            (Control::RightTrigger, Binding::Slider { index: 1, inverted: false }),
            (Control::LeftXUp, Binding::Axis { index: 0, inverted: false }),
            (Control::LeftYUp, Binding::Axis { index: 1, inverted: true }),
            (Control::RightXUp, Binding::Axis { index: 2, inverted: false }),
            (Control::RightYUp, Binding::Axis { index: 3, inverted: true }),
        ];
        for (control, binding) in defaults {
            map.set(control, binding);
        }
        map
    }
}

impl ControlMap {
    pub fn disabled() -> Self {
        Self {
            bindings: [Binding::Disabled; 25],
        }
    }

    pub fn get(&self, control: Control) -> Binding {
        self.bindings[control.index()]
    }

    pub fn set(&mut self, control: Control, binding: Binding) {
        self.bindings[control.index()] = binding;
    }

    /// Builds a map from file contents. Bad lines are logged and skipped;
    /// a control whose line is bad stays disabled. Contents without a single
    /// line fall back to the default layout.
    pub fn parse(contents: &str) -> Self {
        let lines: Vec<&str> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with(';'))
            .collect();
        if lines.is_empty() {
            return Self::default();
        }

        let mut map = Self::disabled();
        for line in lines {
            match parse_line(line) {
                Ok((control, binding)) => map.set(control, binding),
                Err(e) => {
                    log::warn!("Skipping mapping line: {}", e);
                    if let Some(control) = e.control() {
                        map.set(control, Binding::Disabled);
                    }
                }
            }
        }
        map
    }

    /// Canonical file contents, one line per control.
    pub fn to_config_string(&self) -> String {
        Control::ALL
            .iter()
            .map(|c| format!("{}={}\n", c.property(), self.get(*c)))
            .collect()
    }

    pub fn file_path(dir: &Path, guid: &DeviceGuid) -> PathBuf {
        dir.join(format!("{}.ini", guid))
    }

    /// Loads the map for `guid`, creating the directory and an empty file
    /// when they don't exist yet.
    pub fn load(dir: &Path, guid: &DeviceGuid) -> anyhow::Result<Self> {
        let path = Self::file_path(dir, guid);
        if !path.exists() {
            std::fs::create_dir_all(dir)?;
            std::fs::write(&path, "")?;
            log::info!("Created empty mapping file {:?}", path);
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path)?;
        log::debug!("Loaded mapping from {:?}", path);
        Ok(Self::parse(&contents))
    }

    pub fn save(&self, dir: &Path, guid: &DeviceGuid) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir)?;
        let path = Self::file_path(dir, guid);
        std::fs::write(&path, self.to_config_string())?;
        log::info!("Saved mapping to {:?}", path);
        Ok(())
    }

    fn read(&self, control: Control, state: &RawInputState) -> Option<Reading> {
        let sign = |inverted: bool, v: f32| if inverted { -v } else { v };
        match self.get(control) {
            Binding::Disabled => None,
            Binding::Button(index) => state.buttons.get(index as usize).copied().map(Reading::Digital),
            Binding::Axis { index, inverted } => state
                .axes
                .get(index as usize)
                .map(|v| Reading::Analog(sign(inverted, *v))),
            Binding::Slider { index, inverted } => state
                .sliders
                .get(index as usize)
                .map(|v| Reading::Analog(sign(inverted, *v))),
            Binding::Dpad { index, direction } => state
                .hats
                .get(index as usize)
                .map(|hat| Reading::Digital(direction.read(hat))),
        }
    }

    fn stick(&self, state: &RawInputState, up: Control, down: Control, vertical: bool) -> u8 {
        if let Some(Reading::Analog(value)) = self.read(up, state) {
            return Reading::Analog(value).level();
        }
        let up = self.read(up, state).map(Reading::pressed).unwrap_or(false);
        let down = self.read(down, state).map(Reading::pressed).unwrap_or(false);
        // Y is inverted again by the transcoder.
        let (toward_up, toward_down) = if vertical { (0x00, 0xFF) } else { (0xFF, 0x00) };
        match (up, down) {
            (true, false) => toward_up,
            (false, true) => toward_down,
            _ => STICK_CENTER,
        }
    }

    /// Produces the generic report for `state`. The origin byte is left 0.
    pub fn apply(&self, state: &RawInputState) -> GenericReport {
        let mut report = GenericReport::default();

        let mut mask = 0;
        for control in Control::ALL {
            if let Some(bit) = control.button_bit() {
                if self.read(control, state).map(Reading::pressed).unwrap_or(false) {
                    mask |= bit;
                }
            }
        }
        report.set_buttons(mask);

        let trigger = |control| self.read(control, state).map(Reading::level).unwrap_or(0);
        report.set_triggers(trigger(Control::LeftTrigger), trigger(Control::RightTrigger));

        report.set_stick(Stick::LeftX, self.stick(state, Control::LeftXUp, Control::LeftXDown, false));
        report.set_stick(Stick::LeftY, self.stick(state, Control::LeftYUp, Control::LeftYDown, true));
        report.set_stick(Stick::RightX, self.stick(state, Control::RightXUp, Control::RightXDown, false));
        report.set_stick(Stick::RightY, self.stick(state, Control::RightYUp, Control::RightYDown, true));

        report
    }
}
