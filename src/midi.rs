//! MIDI message types and parsing.
//!
//! Everything the driver receives from or sends to the device goes through
//! [`MidiMessage`]. Channels are 0-based throughout (wire channel 16 is 15);
//! data bytes are masked to 7 bits on both parse and encode.

use std::fmt;

pub mod dispatcher;

/// Parsed MIDI message.
///
/// System Exclusive frames keep their full wire form including the `0xF0`
/// leader and the `0xF7` terminator, so device-identity parsing can check
/// absolute byte offsets against the frame exactly as captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (1-127).
    /// A wire Note On with velocity 0 parses as [`MidiMessage::NoteOff`].
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Polyphonic Key Pressure: channel (0-15), note (0-127), pressure (0-127).
    /// The pad grid sends these for per-pad aftertouch.
    PolyPressure { channel: u8, note: u8, pressure: u8 },

    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    /// Program Change: channel (0-15), program (0-127)
    ProgramChange { channel: u8, program: u8 },

    /// Channel Pressure: channel (0-15), pressure (0-127)
    ChannelPressure { channel: u8, pressure: u8 },

    /// Pitch Bend: channel (0-15), value (0-16383, 14-bit)
    PitchBend { channel: u8, value: u16 },

    /// Complete System Exclusive frame, `F0 .. F7` inclusive
    SysEx { data: Vec<u8> },

    /// Anything else: realtime traffic, unterminated SysEx, unknown statuses
    Other { data: Vec<u8> },
}

impl MidiMessage {
    /// Parse a MIDI message from raw bytes.
    ///
    /// Returns `None` for empty input, running-status data (no status byte)
    /// and channel messages missing their data bytes. Well-formed but
    /// unsupported traffic comes back as [`MidiMessage::Other`] so callers
    /// can still log it.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.is_empty() {
            return None;
        }

        let status = data[0];

        // Running status (data byte first) is not maintained here.
        if status < 0x80 {
            return None;
        }

        if status < 0xF0 {
            let message_type = status & 0xF0;
            let channel = status & 0x0F;

            match message_type {
                0x80 => {
                    if data.len() < 3 { return None; }
                    Some(MidiMessage::NoteOff {
                        channel,
                        note: data[1] & 0x7F,
                        velocity: data[2] & 0x7F,
                    })
                }
                0x90 => {
                    if data.len() < 3 { return None; }
                    let note = data[1] & 0x7F;
                    let velocity = data[2] & 0x7F;

                    // Note On with velocity 0 is a release.
                    if velocity == 0 {
                        Some(MidiMessage::NoteOff { channel, note, velocity: 0 })
                    } else {
                        Some(MidiMessage::NoteOn { channel, note, velocity })
                    }
                }
                0xA0 => {
                    if data.len() < 3 { return None; }
                    Some(MidiMessage::PolyPressure {
                        channel,
                        note: data[1] & 0x7F,
                        pressure: data[2] & 0x7F,
                    })
                }
                0xB0 => {
                    if data.len() < 3 { return None; }
                    Some(MidiMessage::ControlChange {
                        channel,
                        cc: data[1] & 0x7F,
                        value: data[2] & 0x7F,
                    })
                }
                0xC0 => {
                    if data.len() < 2 { return None; }
                    Some(MidiMessage::ProgramChange {
                        channel,
                        program: data[1] & 0x7F,
                    })
                }
                0xD0 => {
                    if data.len() < 2 { return None; }
                    Some(MidiMessage::ChannelPressure {
                        channel,
                        pressure: data[1] & 0x7F,
                    })
                }
                0xE0 => {
                    if data.len() < 3 { return None; }
                    let lsb = (data[1] & 0x7F) as u16;
                    let msb = (data[2] & 0x7F) as u16;
                    Some(MidiMessage::PitchBend { channel, value: (msb << 7) | lsb })
                }
                _ => Some(MidiMessage::Other { data: data.to_vec() }),
            }
        } else if status == 0xF0 {
            // Only complete frames are classified as SysEx; a frame without
            // its terminator is surfaced as Other for logging.
            if data.len() >= 2 && data[data.len() - 1] == 0xF7 {
                Some(MidiMessage::SysEx { data: data.to_vec() })
            } else {
                Some(MidiMessage::Other { data: data.to_vec() })
            }
        } else {
            Some(MidiMessage::Other { data: data.to_vec() })
        }
    }

    /// Encode the message to MIDI bytes.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                vec![0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::PolyPressure { channel, note, pressure } => {
                vec![0xA0 | (channel & 0x0F), note & 0x7F, pressure & 0x7F]
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                vec![0xB0 | (channel & 0x0F), cc & 0x7F, value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                vec![0xD0 | (channel & 0x0F), pressure & 0x7F]
            }
            MidiMessage::PitchBend { channel, value } => {
                let lsb = (value & 0x7F) as u8;
                let msb = ((value >> 7) & 0x7F) as u8;
                vec![0xE0 | (channel & 0x0F), lsb, msb]
            }
            // SysEx frames already carry their framing bytes.
            MidiMessage::SysEx { ref data } => data.clone(),
            MidiMessage::Other { ref data } => data.clone(),
        }
    }

    /// Get the channel for channel messages (0-15), None for system messages
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOff { channel, .. }
            | MidiMessage::NoteOn { channel, .. }
            | MidiMessage::PolyPressure { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => Some(channel),
            _ => None,
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                write!(f, "NoteOff ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::PolyPressure { channel, note, pressure } => {
                write!(f, "PolyPressure ch:{} n:{} p:{}", channel + 1, note, pressure)
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "ProgramChange ch:{} p:{}", channel + 1, program)
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                write!(f, "ChannelPressure ch:{} p:{}", channel + 1, pressure)
            }
            MidiMessage::PitchBend { channel, value } => {
                write!(f, "PitchBend ch:{} v:{}", channel + 1, value)
            }
            MidiMessage::SysEx { ref data } => {
                write!(f, "SysEx {} bytes", data.len())
            }
            MidiMessage::Other { ref data } => {
                write!(f, "Other {}", format_hex(data))
            }
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_change_parsing() {
        let data = vec![0xBF, 0x15, 0x42]; // Pot 1 value on wire channel 16
        let msg = MidiMessage::parse(&data).unwrap();

        assert_eq!(msg, MidiMessage::ControlChange {
            channel: 15,
            cc: 0x15,
            value: 0x42,
        });
    }

    #[test]
    fn test_note_on_parsing() {
        let data = vec![0x90, 0x60, 100]; // Session pad press
        let msg = MidiMessage::parse(&data).unwrap();

        assert_eq!(msg, MidiMessage::NoteOn {
            channel: 0,
            note: 0x60,
            velocity: 100,
        });
    }

    #[test]
    fn test_note_on_velocity_zero() {
        let data = vec![0x99, 0x24, 0]; // Drum pad release as Note On v0
        let msg = MidiMessage::parse(&data).unwrap();

        assert_eq!(msg, MidiMessage::NoteOff {
            channel: 9,
            note: 0x24,
            velocity: 0,
        });
    }

    #[test]
    fn test_poly_pressure_parsing() {
        let data = vec![0xA9, 0x24, 0x51]; // Drum pad aftertouch
        let msg = MidiMessage::parse(&data).unwrap();

        assert_eq!(msg, MidiMessage::PolyPressure {
            channel: 9,
            note: 0x24,
            pressure: 0x51,
        });
    }

    #[test]
    fn test_sysex_keeps_frame() {
        let frame = vec![0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7]; // device inquiry
        let msg = MidiMessage::parse(&frame).unwrap();

        assert_eq!(msg, MidiMessage::SysEx { data: frame.clone() });
        assert_eq!(msg.encode(), frame);
    }

    #[test]
    fn test_unterminated_sysex_is_other() {
        let msg = MidiMessage::parse(&[0xF0, 0x7E, 0x7F, 0x06]).unwrap();
        assert!(matches!(msg, MidiMessage::Other { .. }));
    }

    #[test]
    fn test_truncated_messages() {
        assert_eq!(MidiMessage::parse(&[]), None);
        assert_eq!(MidiMessage::parse(&[0xBF]), None);
        assert_eq!(MidiMessage::parse(&[0xBF, 0x15]), None);
        assert_eq!(MidiMessage::parse(&[0xC0]), None);
        // Data byte without status (running status) is rejected too.
        assert_eq!(MidiMessage::parse(&[0x15, 0x42]), None);
    }

    #[test]
    fn test_pitch_bend() {
        let data = vec![0xE0, 0x00, 0x40]; // center
        let msg = MidiMessage::parse(&data).unwrap();

        assert_eq!(msg, MidiMessage::PitchBend {
            channel: 0,
            value: 8192,
        });
    }

    #[test]
    fn test_encode_parse_roundtrip() {
        let messages = vec![
            MidiMessage::NoteOn { channel: 15, note: 0x0C, velocity: 0x7F },
            MidiMessage::NoteOff { channel: 15, note: 0x0C, velocity: 0 },
            MidiMessage::ControlChange { channel: 14, cc: 0x35, value: 0x7F },
            MidiMessage::PolyPressure { channel: 0, note: 0x60, pressure: 0x33 },
            MidiMessage::ProgramChange { channel: 4, program: 12 },
            MidiMessage::PitchBend { channel: 2, value: 12345 },
        ];

        for msg in messages {
            assert_eq!(MidiMessage::parse(&msg.encode()), Some(msg));
        }
    }

    #[test]
    fn test_encode_masks_out_of_range() {
        let msg = MidiMessage::ControlChange {
            channel: 15,
            cc: 0x95,
            value: 0xFF,
        };
        assert_eq!(msg.encode(), vec![0xBF, 0x15, 0x7F]);
    }

    #[test]
    fn test_channel_extraction() {
        let msg = MidiMessage::parse(&[0x9F, 0x0C, 0x7F]).unwrap();
        assert_eq!(msg.channel(), Some(15));

        let sysex = MidiMessage::parse(&[0xF0, 0x00, 0x20, 0x29, 0xF7]).unwrap();
        assert_eq!(sysex.channel(), None);
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0xF0, 0x7E, 0x7F]), "F0 7E 7F");
        assert_eq!(format_hex(&[]), "");
    }
}
