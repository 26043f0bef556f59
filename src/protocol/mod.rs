mod transcode;

pub use transcode::*;

/// Size of both the generic report and the bus report frame.
pub const REPORT_LEN: usize = 28;

// Generic report layout
const ORIGIN_OFFSET: usize = 0;
const BUTTONS_OFFSET: usize = 10;
const STICKS_OFFSET: usize = 14;
const LEFT_TRIGGER_OFFSET: usize = 26;
const RIGHT_TRIGGER_OFFSET: usize = 27;

/// Stick center value in a generic report.
pub const STICK_CENTER: u8 = 0x80;

/// Logical button bits of a generic report's 32-bit mask.
pub mod buttons {
    pub const BACK: u32 = 1 << 0;
    pub const LEFT_THUMB: u32 = 1 << 1;
    pub const RIGHT_THUMB: u32 = 1 << 2;
    pub const START: u32 = 1 << 3;
    pub const DPAD_UP: u32 = 1 << 4;
    pub const DPAD_DOWN: u32 = 1 << 5;
    pub const DPAD_RIGHT: u32 = 1 << 6;
    pub const DPAD_LEFT: u32 = 1 << 7;
    pub const LEFT_SHOULDER: u32 = 1 << 10;
    pub const RIGHT_SHOULDER: u32 = 1 << 11;
    pub const Y: u32 = 1 << 12;
    pub const B: u32 = 1 << 13;
    pub const A: u32 = 1 << 14;
    pub const X: u32 = 1 << 15;
    pub const GUIDE: u32 = 1 << 16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stick {
    LeftX,
    LeftY,
    RightX,
    RightY,
}

impl Stick {
    pub const ALL: [Stick; 4] = [Stick::LeftX, Stick::LeftY, Stick::RightX, Stick::RightY];

    fn offset(self) -> usize {
        STICKS_OFFSET
            + match self {
                Stick::LeftX => 0,
                Stick::LeftY => 1,
                Stick::RightX => 2,
                Stick::RightY => 3,
            }
    }

    pub fn is_vertical(self) -> bool {
        matches!(self, Stick::LeftY | Stick::RightY)
    }
}

/// One remapped snapshot of a physical controller, in logical gamepad layout.
///
/// Sticks are unsigned bytes centered on 0x80, triggers are 0-255.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericReport([u8; REPORT_LEN]);

impl Default for GenericReport {
    fn default() -> Self {
        let mut report = Self([0; REPORT_LEN]);
        for stick in Stick::ALL {
            report.set_stick(stick, STICK_CENTER);
        }
        report
    }
}

impl GenericReport {
    pub fn from_bytes(bytes: [u8; REPORT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; REPORT_LEN] {
        &self.0
    }

    /// Slot the report was produced for.
    pub fn origin(&self) -> u8 {
        self.0[ORIGIN_OFFSET]
    }

    pub fn set_origin(&mut self, slot: u8) {
        self.0[ORIGIN_OFFSET] = slot;
    }

    pub fn buttons(&self) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.0[BUTTONS_OFFSET..BUTTONS_OFFSET + 4]);
        u32::from_le_bytes(raw)
    }

    pub fn set_buttons(&mut self, mask: u32) {
        self.0[BUTTONS_OFFSET..BUTTONS_OFFSET + 4].copy_from_slice(&mask.to_le_bytes());
    }

    pub fn set_button(&mut self, bit: u32, pressed: bool) {
        let mask = self.buttons();
        self.set_buttons(if pressed { mask | bit } else { mask & !bit });
    }

    pub fn stick(&self, stick: Stick) -> u8 {
        self.0[stick.offset()]
    }

    pub fn set_stick(&mut self, stick: Stick, value: u8) {
        self.0[stick.offset()] = value;
    }

    pub fn left_trigger(&self) -> u8 {
        self.0[LEFT_TRIGGER_OFFSET]
    }

    pub fn right_trigger(&self) -> u8 {
        self.0[RIGHT_TRIGGER_OFFSET]
    }

    pub fn set_triggers(&mut self, left: u8, right: u8) {
        self.0[LEFT_TRIGGER_OFFSET] = left;
        self.0[RIGHT_TRIGGER_OFFSET] = right;
    }
}

/// Report frame in the layout the bus driver expects. Owned per slot and
/// overwritten every poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFrame(pub(crate) [u8; REPORT_LEN]);

impl Default for WireFrame {
    fn default() -> Self {
        Self([0; REPORT_LEN])
    }
}

impl WireFrame {
    pub fn as_bytes(&self) -> &[u8; REPORT_LEN] {
        &self.0
    }

    pub fn serial(&self) -> u8 {
        self.0[wire::SERIAL]
    }

    pub fn button_bytes(&self) -> [u8; 2] {
        [self.0[wire::BUTTONS_LOW], self.0[wire::BUTTONS_HIGH]]
    }

    pub fn triggers(&self) -> (u8, u8) {
        (self.0[wire::LEFT_TRIGGER], self.0[wire::RIGHT_TRIGGER])
    }

    pub fn stick(&self, stick: Stick) -> i16 {
        let offset = wire::stick_offset(stick);
        i16::from_le_bytes([self.0[offset], self.0[offset + 1]])
    }
}

/// Byte offsets and fixed values of the bus report frame.
pub mod wire {
    use super::Stick;

    pub const LENGTH: usize = 0;
    pub const SERIAL: usize = 4;
    pub const LAYOUT: usize = 9;
    pub const BUTTONS_LOW: usize = 10;
    pub const BUTTONS_HIGH: usize = 11;
    pub const LEFT_TRIGGER: usize = 12;
    pub const RIGHT_TRIGGER: usize = 13;

    /// Header value: the frame length.
    pub const LENGTH_VALUE: u8 = 0x1C;
    /// Bitmask layout tag the driver expects for an Xbox 360 report.
    pub const LAYOUT_VALUE: u8 = 0x14;

    pub fn stick_offset(stick: Stick) -> usize {
        match stick {
            Stick::LeftX => 14,
            Stick::LeftY => 16,
            Stick::RightX => 18,
            Stick::RightY => 20,
        }
    }
}
