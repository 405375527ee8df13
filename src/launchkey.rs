//! Launchkey MK3 device protocol: wire constants, model identification and
//! the DAW-mode handshake state machine.
//!
//! Byte values follow the Launchkey MK3 programmer's reference. All channel
//! constants are 0-based; the device documentation numbers them from 1.

use tracing::{debug, trace};

pub mod handshake;

/// Channel carrying session-layout pad notes and pressure.
pub const CHANNEL_SESSION_PADS: u8 = 0;
/// Channel carrying drum-layout pad notes and pressure.
pub const CHANNEL_DRUM_PADS: u8 = 9;
/// Channel carrying pot and fader touch events (wire channel 15).
pub const CHANNEL_TOUCH: u8 = 14;
/// Channel carrying control values, mode switches and buttons (wire channel 16).
pub const CHANNEL_CONTROL: u8 = 15;

/// First pot value CC; pot N is `POT_BASE_CC + N`.
pub const POT_BASE_CC: u8 = 0x15;
/// First fader value CC; fader N is `FADER_BASE_CC + N`.
pub const FADER_BASE_CC: u8 = 0x35;
/// Pot mode announcements arrive on this CC.
pub const POT_MODE_CC: u8 = 0x09;
/// Fader mode announcements arrive on this CC.
pub const FADER_MODE_CC: u8 = 0x0A;
/// Pad mode announcements arrive on this CC.
pub const PAD_MODE_CC: u8 = 0x03;

/// Number of pots on every model.
pub const POT_COUNT: usize = 8;
/// Number of faders on the fader-equipped models, master included.
pub const FADER_COUNT: usize = 9;

/// Control values at or above this are a press or touch; below, a release.
pub const PRESS_THRESHOLD: u8 = 64;

/// MIDI Universal Device Inquiry, broadcast to all device ids.
pub const DEVICE_INQUIRY: [u8; 6] = [0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7];

/// Note pair switching the device into DAW mode.
pub const DAW_MODE_ON: [[u8; 3]; 2] = [[0x9F, 0x0C, 0x7F], [0x9F, 0x0A, 0x7F]];
/// Note pair returning the device to standalone operation.
pub const DAW_MODE_OFF: [[u8; 3]; 2] = [[0x8F, 0x0C, 0x00], [0x8F, 0x0A, 0x00]];

/// Keyboard size, reported in the inquiry reply.
///
/// The 25 and 37 key models have no fader bank; their fader CCs never
/// arrive, but the driver keeps the fader map wired regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceModel {
    Launchkey25,
    Launchkey37,
    Launchkey49,
    Launchkey61,
    Launchkey88,
    /// Reply carried a size byte this driver does not know. DAW mode still
    /// works; fader support is assumed absent.
    Unknown(u8),
}

impl DeviceModel {
    pub fn from_size_byte(byte: u8) -> Self {
        match byte {
            0x34 => DeviceModel::Launchkey25,
            0x35 => DeviceModel::Launchkey37,
            0x36 => DeviceModel::Launchkey49,
            0x37 => DeviceModel::Launchkey61,
            0x40 => DeviceModel::Launchkey88,
            other => DeviceModel::Unknown(other),
        }
    }

    pub fn has_faders(&self) -> bool {
        matches!(
            self,
            DeviceModel::Launchkey49 | DeviceModel::Launchkey61 | DeviceModel::Launchkey88
        )
    }
}

impl std::fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceModel::Launchkey25 => write!(f, "Launchkey 25"),
            DeviceModel::Launchkey37 => write!(f, "Launchkey 37"),
            DeviceModel::Launchkey49 => write!(f, "Launchkey 49"),
            DeviceModel::Launchkey61 => write!(f, "Launchkey 61"),
            DeviceModel::Launchkey88 => write!(f, "Launchkey 88"),
            DeviceModel::Unknown(byte) => write!(f, "Launchkey (unknown size {:#04X})", byte),
        }
    }
}

/// Whether the device booted into its application or is stuck in the
/// bootloader (firmware update mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareMode {
    Application,
    Bootloader,
}

/// Identity extracted from a Universal Device Inquiry reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub model: DeviceModel,
    pub firmware_mode: FirmwareMode,
    pub firmware_version: String,
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} fw {}", self.model, self.firmware_version)?;
        if self.firmware_mode == FirmwareMode::Bootloader {
            write!(f, " (bootloader)")?;
        }
        Ok(())
    }
}

/// Parse a SysEx frame as a Launchkey inquiry reply.
///
/// The frame must carry its `F0`/`F7` framing bytes. Returns `None` both for
/// frames that are not inquiry replies at all (ignored silently) and for
/// replies from other manufacturers (logged at debug). Every offset is
/// bounds-checked and the version decode wraps, so malformed frames cannot
/// panic.
///
/// Reply layout, after the 5-byte inquiry-reply header:
/// bytes 5-7 manufacturer (Novation is `00 20 29`), byte 8 keyboard size,
/// byte 9 firmware mode, bytes 12-15 firmware version digits, byte 16 `F7`.
pub fn parse_inquiry_reply(frame: &[u8]) -> Option<DeviceIdentity> {
    // Universal inquiry reply header: F0 7E <dev> 06 02.
    if frame.len() < 5
        || frame[0] != 0xF0
        || frame[1] != 0x7E
        || frame[3] != 0x06
        || frame[4] != 0x02
    {
        trace!("SysEx is not an inquiry reply, ignoring");
        return None;
    }

    if frame.len() < 17
        || frame[5] != 0x00
        || frame[6] != 0x20
        || frame[7] != 0x29
        || frame[10] != 0x00
        || frame[11] != 0x00
        || frame[16] != 0xF7
    {
        debug!("Inquiry reply is not from a Launchkey MK3");
        return None;
    }

    let model = DeviceModel::from_size_byte(frame[8]);
    let firmware_mode = if frame[9] == 0x01 {
        FirmwareMode::Application
    } else {
        FirmwareMode::Bootloader
    };
    // Version digits are raw 0-9; out-of-range bytes render as garbage
    // characters, never an error.
    let firmware_version: String = frame[12..16]
        .iter()
        .map(|b| char::from(b.wrapping_add(0x30)))
        .collect();

    Some(DeviceIdentity {
        model,
        firmware_mode,
        firmware_version,
    })
}

/// Pad grid layout, announced by the device on [`PAD_MODE_CC`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PadMode {
    Drum,
    #[default]
    Session,
    ScaleChords,
    UserChords,
    Custom0,
    Custom1,
    Custom2,
    Custom3,
    DeviceSelect,
    Navigation,
}

impl PadMode {
    /// Decode a pad mode announcement value. Unknown values return `None`.
    pub fn from_cc_value(value: u8) -> Option<Self> {
        match value {
            0x00 | 0x05 => Some(PadMode::Custom0),
            0x01 => Some(PadMode::Drum),
            0x02 => Some(PadMode::Session),
            0x03 => Some(PadMode::ScaleChords),
            0x04 => Some(PadMode::UserChords),
            0x06 => Some(PadMode::Custom1),
            0x07 => Some(PadMode::Custom2),
            0x08 => Some(PadMode::Custom3),
            0x09 => Some(PadMode::DeviceSelect),
            0x0A => Some(PadMode::Navigation),
            _ => None,
        }
    }
}
