//! Button row and pad grid handling.
//!
//! Buttons are press-triggered only: the device reports releases too, but
//! every wired behavior fires on the press edge and releases are dropped.
//! Buttons the driver recognizes without having an action wired yet are
//! kept in the table as stubs so traffic on them is identifiable in trace
//! logs.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tracing::{debug, trace};

use crate::launchkey::{PadMode, CHANNEL_DRUM_PADS, PRESS_THRESHOLD};
use crate::session::ActionInvoker;

/// What a button press does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonTarget {
    /// Invoke a named host action.
    Action {
        group: &'static str,
        name: &'static str,
    },
    /// Recognized button with nothing wired yet.
    Stub { label: &'static str },
}

/// Static map from `(channel, cc)` to button behavior.
fn button_table() -> &'static HashMap<(u8, u8), ButtonTarget> {
    static TABLE: OnceLock<HashMap<(u8, u8), ButtonTarget>> = OnceLock::new();
    TABLE.get_or_init(|| {
        use ButtonTarget::{Action, Stub};

        let mut table = HashMap::new();

        // Wire channel 16: transport and editor row.
        // The track arrows send swapped codes relative to the printed
        // documentation; this mapping follows the hardware.
        table.insert((15, 0x67), Action { group: "Editor", name: "step-tracks-up" }); // left arrow
        table.insert((15, 0x66), Action { group: "Editor", name: "step-tracks-down" }); // right arrow
        table.insert((15, 0x6A), Stub { label: "arrow up" });
        table.insert((15, 0x6B), Stub { label: "arrow down" });
        table.insert((15, 0x33), Stub { label: "device select" });
        table.insert((15, 0x34), Stub { label: "device lock" });
        table.insert((15, 0x4A), Stub { label: "capture midi" });
        table.insert((15, 0x4B), Action { group: "Editor", name: "quantize" });
        table.insert((15, 0x4C), Action { group: "Transport", name: "ToggleClick" });
        table.insert((15, 0x4D), Action { group: "Editor", name: "Undo" });
        table.insert((15, 0x73), Action { group: "Transport", name: "Roll" }); // play
        table.insert((15, 0x74), Action { group: "Transport", name: "Stop" });
        table.insert((15, 0x75), Action { group: "Transport", name: "Record" });
        table.insert((15, 0x76), Action { group: "Transport", name: "Loop" });

        // Fader-strip buttons, present on the 49/61/88 models only.
        for cc in 0x25..=0x2D {
            table.insert((15, cc), Stub { label: "fader button" });
        }

        // Wire channel 1: shift and the pad-row buttons.
        table.insert((0, 0x6C), Stub { label: "shift" });
        table.insert((0, 0x68), Stub { label: "right arrow" });
        table.insert((0, 0x69), Stub { label: "stop/solo/mute" });

        table
    })
}

/// Routes button presses to host actions.
pub struct ButtonDispatcher {
    invoker: Arc<dyn ActionInvoker>,
}

impl ButtonDispatcher {
    pub fn new(invoker: Arc<dyn ActionInvoker>) -> Self {
        Self { invoker }
    }

    /// Handle a CC from one of the button channels. Values below the press
    /// threshold are releases and do nothing.
    pub fn handle_cc(&self, channel: u8, cc: u8, value: u8) {
        if value < PRESS_THRESHOLD {
            return;
        }

        match button_table().get(&(channel, cc)) {
            Some(ButtonTarget::Action { group, name }) => {
                debug!("Button {:#04X} invokes {}/{}", cc, group, name);
                self.invoker.invoke(group, name);
            }
            Some(ButtonTarget::Stub { label }) => {
                trace!("Button '{}' ({:#04X}) has no action wired", label, cc);
            }
            None => {
                // Value and mode CCs share the control channel; they land
                // here when loud enough to look like presses. Harmless.
                trace!("No button at CC {:#04X} on channel {}", cc, channel + 1);
            }
        }
    }
}

/// Tracks which layout the pad grid is in and logs pad activity.
///
/// Pads do not drive the session yet; the grid follows the device's mode
/// announcements so pad traffic is interpreted under the right layout.
#[derive(Default)]
pub struct PadGrid {
    mode: PadMode,
}

impl PadGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> PadMode {
        self.mode
    }

    /// Pad mode announcement from the device.
    pub fn handle_mode_cc(&mut self, value: u8) {
        match PadMode::from_cc_value(value) {
            Some(mode) => {
                if mode != self.mode {
                    debug!("Pad mode switched to {:?}", mode);
                    self.mode = mode;
                }
            }
            None => trace!("Unknown pad mode value {}", value),
        }
    }

    /// The device selects the session layout after the handshake.
    pub fn reset_to_default(&mut self) {
        self.mode = PadMode::default();
    }

    pub fn handle_pad_on(&self, channel: u8, note: u8, velocity: u8) {
        trace!(
            "{} pad {:#04X} pressed (velocity {}, {:?} mode)",
            Self::layout_label(channel),
            note,
            velocity,
            self.mode
        );
    }

    pub fn handle_pad_off(&self, channel: u8, note: u8) {
        trace!("{} pad {:#04X} released", Self::layout_label(channel), note);
    }

    pub fn handle_pad_pressure(&self, channel: u8, note: u8, pressure: u8) {
        trace!(
            "{} pad {:#04X} pressure {}",
            Self::layout_label(channel),
            note,
            pressure
        );
    }

    fn layout_label(channel: u8) -> &'static str {
        if channel == CHANNEL_DRUM_PADS {
            "drum"
        } else {
            "session"
        }
    }
}
