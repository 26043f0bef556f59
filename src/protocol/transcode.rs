use super::{buttons, wire, GenericReport, Stick, WireFrame, REPORT_LEN};

/// Converts the 254 usable stick steps (-127..=127) to nearly the full i16 range.
pub const STICK_SCALE: f32 = 65535.0 / 254.0;

/// Source bit -> (destination byte, destination bit).
const BUTTON_TABLE: [(u32, usize, u8); 14] = [
    (buttons::BACK, wire::BUTTONS_LOW, 5),
    (buttons::LEFT_THUMB, wire::BUTTONS_LOW, 6),
    (buttons::RIGHT_THUMB, wire::BUTTONS_LOW, 7),
    (buttons::START, wire::BUTTONS_LOW, 4),
    (buttons::DPAD_UP, wire::BUTTONS_LOW, 0),
    (buttons::DPAD_DOWN, wire::BUTTONS_LOW, 3),
    (buttons::DPAD_RIGHT, wire::BUTTONS_LOW, 1),
    (buttons::DPAD_LEFT, wire::BUTTONS_LOW, 2),
    (buttons::LEFT_SHOULDER, wire::BUTTONS_HIGH, 0),
    (buttons::RIGHT_SHOULDER, wire::BUTTONS_HIGH, 1),
    (buttons::Y, wire::BUTTONS_HIGH, 7),
    (buttons::B, wire::BUTTONS_HIGH, 5),
    (buttons::A, wire::BUTTONS_HIGH, 4),
    (buttons::X, wire::BUTTONS_HIGH, 6),
];

/// Destination of the guide button.
const GUIDE_BIT: (usize, u8) = (wire::BUTTONS_HIGH, 2);

/// Scales a raw stick byte (center 0x80) to the bus's signed 16-bit range.
///
/// Raw 0 is clamped to -127 so both directions reach the same magnitude.
/// The product is truncated toward zero.
pub fn scale_axis(raw: u8, flip: bool) -> i16 {
    let mut value = raw as i32 - 0x80;
    if value == -128 {
        value = -127;
    }
    if flip {
        value = -value;
    }
    (value as f32 * STICK_SCALE) as i16
}

/// Builds a fresh frame for `slot` from `report`.
pub fn transcode(report: &GenericReport, slot: u8) -> WireFrame {
    let mut frame = WireFrame::default();
    transcode_into(report, slot, &mut frame);
    frame
}

/// Overwrites `frame` in place. Used on the polling hot path.
pub fn transcode_into(report: &GenericReport, slot: u8, frame: &mut WireFrame) {
    let out = &mut frame.0;
    *out = [0; REPORT_LEN];

    out[wire::LENGTH] = wire::LENGTH_VALUE;
    out[wire::SERIAL] = slot;
    out[wire::LAYOUT] = wire::LAYOUT_VALUE;

    let mask = report.buttons();
    for (bit, byte, dest) in BUTTON_TABLE {
        if mask & bit != 0 {
            out[byte] |= 1 << dest;
        }
    }
    // Bit 16 on its own is 0x10000, so this fires whenever guide is held.
    if (mask & buttons::GUIDE) > 16 {
        out[GUIDE_BIT.0] |= 1 << GUIDE_BIT.1;
    }

    out[wire::LEFT_TRIGGER] = report.left_trigger();
    out[wire::RIGHT_TRIGGER] = report.right_trigger();

    for stick in Stick::ALL {
        let value = scale_axis(report.stick(stick), stick.is_vertical());
        let offset = wire::stick_offset(stick);
        out[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }
}
