//! DAW-mode connection state machine.
//!
//! [`Handshake`] tracks the path from "nothing plugged in" to "device in DAW
//! mode" as a pure state machine: every event method mutates state and
//! returns the [`HandshakeEffect`]s the caller must perform (connect a port,
//! arm the settle timer, write bytes). Nothing here touches MIDI or timers
//! directly, which keeps the whole ladder testable without hardware.
//!
//! The driver task owns the machine and is its only writer. Event sources
//! (port registry scans, connection notifications, inbound SysEx, timer
//! expiry) are serialized through that task, so no interior locking is
//! needed.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::ports::{probe, PortDescriptor, ProbeSpec};

use super::{
    parse_inquiry_reply, DeviceIdentity, FirmwareMode, DAW_MODE_OFF, DAW_MODE_ON, DEVICE_INQUIRY,
};

/// Delay between both ports coming up and the identity inquiry. The device
/// drops SysEx sent during this window, so the wait is mandatory.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Two-bit record of which of our endpoints is wired to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionState(u8);

impl ConnectionState {
    const INPUT: u8 = 0x1;
    const OUTPUT: u8 = 0x2;

    pub fn set_input(&mut self, connected: bool) {
        if connected {
            self.0 |= Self::INPUT;
        } else {
            self.0 &= !Self::INPUT;
        }
    }

    pub fn set_output(&mut self, connected: bool) {
        if connected {
            self.0 |= Self::OUTPUT;
        } else {
            self.0 &= !Self::OUTPUT;
        }
    }

    pub fn input_connected(&self) -> bool {
        self.0 & Self::INPUT != 0
    }

    pub fn output_connected(&self) -> bool {
        self.0 & Self::OUTPUT != 0
    }

    /// Both directions wired.
    pub fn is_fully_connected(&self) -> bool {
        self.0 == Self::INPUT | Self::OUTPUT
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// Where the connection ladder currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakePhase {
    /// No matching hardware seen yet. The expected steady state when no
    /// Launchkey is plugged in.
    #[default]
    Unprobed,
    /// A scan matched the device's DAW port pair.
    ProbeSucceeded,
    /// Connections have been requested, not all confirmed yet.
    PortsConnecting,
    /// Both directions confirmed; settle timer running.
    FullyConnected,
    /// Inquiry sent, waiting for the identity reply.
    Identifying,
    /// Identity verified and DAW mode switched on.
    DawModeActive,
    /// A previously active device lost one of its connections.
    Disconnected,
}

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEffect {
    /// Connect our input endpoint to this source port.
    ConnectInput(String),
    /// Connect our output endpoint to this sink port.
    ConnectOutput(String),
    /// Arm the settle timer; deliver [`Handshake::on_settle_elapsed`] after
    /// [`SETTLE_DELAY`].
    StartSettleTimer,
    /// Write these bytes to the device.
    Send(Vec<u8>),
    /// Reset pads, pots and faders to their post-handshake default modes.
    ResetControlModes,
}

/// Connection and handshake ladder for one device.
pub struct Handshake {
    own_input: String,
    own_output: String,
    probe_spec: ProbeSpec,
    phase: HandshakePhase,
    connection: ConnectionState,
    device_active: bool,
    in_daw_mode: bool,
    identity: Option<DeviceIdentity>,
}

impl Handshake {
    /// `own_input` / `own_output` are the canonical names of our two
    /// endpoints; connection events are matched against them.
    pub fn new(own_input: String, own_output: String, probe_spec: ProbeSpec) -> Self {
        Self {
            own_input,
            own_output,
            probe_spec,
            phase: HandshakePhase::Unprobed,
            connection: ConnectionState::default(),
            device_active: false,
            in_daw_mode: false,
            identity: None,
        }
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// True while both connections are up, independent of whether the
    /// identity exchange has finished.
    pub fn device_active(&self) -> bool {
        self.device_active
    }

    pub fn in_daw_mode(&self) -> bool {
        self.in_daw_mode
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// The set of hardware ports changed. Probes for the device's DAW port
    /// pair and requests connections for whichever direction is still down.
    /// A probe miss is the normal steady state without hardware and stays
    /// quiet beyond a debug line.
    pub fn on_ports_changed(&mut self, ports: &[PortDescriptor]) -> Vec<HandshakeEffect> {
        if self.connection.is_fully_connected() {
            return Vec::new();
        }

        let Some(found) = probe(ports, &self.probe_spec) else {
            debug!("Port scan found no Launchkey MK3 DAW ports");
            return Vec::new();
        };

        self.phase = HandshakePhase::ProbeSucceeded;
        info!(
            "Found Launchkey MK3 DAW ports: in '{}', out '{}'",
            found.input, found.output
        );

        let mut effects = Vec::new();
        if !self.connection.input_connected() {
            effects.push(HandshakeEffect::ConnectInput(found.input));
        }
        if !self.connection.output_connected() {
            effects.push(HandshakeEffect::ConnectOutput(found.output));
        }
        if !effects.is_empty() {
            self.phase = HandshakePhase::PortsConnecting;
        }
        effects
    }

    /// A connection between two ports changed. Events not involving our own
    /// endpoints are ignored. Names must be canonical; the port layer
    /// resolves aliases before delivering events here.
    pub fn on_connection_changed(
        &mut self,
        port_a: &str,
        port_b: &str,
        connected: bool,
    ) -> Vec<HandshakeEffect> {
        let was_active = self.device_active;

        if port_a == self.own_input || port_b == self.own_input {
            self.connection.set_input(connected);
        } else if port_a == self.own_output || port_b == self.own_output {
            self.connection.set_output(connected);
        } else {
            return Vec::new();
        }

        self.device_active = self.connection.is_fully_connected();

        if self.device_active && !was_active {
            self.phase = HandshakePhase::FullyConnected;
            info!("Launchkey MK3 ports connected, waiting for device to settle");
            vec![HandshakeEffect::StartSettleTimer]
        } else if !self.device_active && was_active {
            self.disconnected()
        } else {
            Vec::new()
        }
    }

    /// Settle timer fired. Sends the identity inquiry unless a connection
    /// dropped while the timer was running.
    pub fn on_settle_elapsed(&mut self) -> Vec<HandshakeEffect> {
        if !self.connection.is_fully_connected() {
            return Vec::new();
        }

        self.phase = HandshakePhase::Identifying;
        debug!("Sending universal device inquiry");
        vec![HandshakeEffect::Send(DEVICE_INQUIRY.to_vec())]
    }

    /// Inbound SysEx frame. Anything that is not a valid Launchkey inquiry
    /// reply is ignored; a valid reply completes the handshake.
    pub fn on_sysex(&mut self, frame: &[u8]) -> Vec<HandshakeEffect> {
        let Some(identity) = parse_inquiry_reply(frame) else {
            return Vec::new();
        };

        info!("Identified {}", identity);
        if identity.firmware_mode == FirmwareMode::Bootloader {
            warn!("Launchkey is running its bootloader; controls may be inert");
        }

        self.identity = Some(identity);
        self.in_daw_mode = true;
        self.phase = HandshakePhase::DawModeActive;

        vec![
            HandshakeEffect::Send(DAW_MODE_ON[0].to_vec()),
            HandshakeEffect::Send(DAW_MODE_ON[1].to_vec()),
            HandshakeEffect::ResetControlModes,
        ]
    }

    /// Driver is stopping. Returns the DAW-mode exit writes if the device
    /// was in DAW mode, and resets the ladder to its initial state.
    pub fn on_stop(&mut self) -> Vec<HandshakeEffect> {
        let mut effects = Vec::new();
        if self.in_daw_mode {
            info!("Returning Launchkey to standalone mode");
            effects.push(HandshakeEffect::Send(DAW_MODE_OFF[0].to_vec()));
            effects.push(HandshakeEffect::Send(DAW_MODE_OFF[1].to_vec()));
            self.in_daw_mode = false;
        }
        self.identity = None;
        self.device_active = false;
        self.connection.clear();
        self.phase = HandshakePhase::Unprobed;
        effects
    }

    fn disconnected(&mut self) -> Vec<HandshakeEffect> {
        self.phase = HandshakePhase::Disconnected;
        self.identity = None;

        let mut effects = Vec::new();
        if self.in_daw_mode {
            info!("Launchkey MK3 disconnected");
            effects.push(HandshakeEffect::Send(DAW_MODE_OFF[0].to_vec()));
            effects.push(HandshakeEffect::Send(DAW_MODE_OFF[1].to_vec()));
            self.in_daw_mode = false;
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortDirection;

    const OWN_IN: &str = "launchkey-surface:daw_in";
    const OWN_OUT: &str = "launchkey-surface:daw_out";
    const DEV_SRC: &str = "Launchkey MK3 49 LKMK3 DAW Out";
    const DEV_SINK: &str = "Launchkey MK3 49 LKMK3 DAW In";

    fn machine() -> Handshake {
        Handshake::new(OWN_IN.into(), OWN_OUT.into(), ProbeSpec::default())
    }

    fn daw_ports() -> Vec<PortDescriptor> {
        vec![
            PortDescriptor::new(DEV_SRC, PortDirection::Source),
            PortDescriptor::new(DEV_SINK, PortDirection::Sink),
            PortDescriptor::new("Midi Through Port-0", PortDirection::Source),
            PortDescriptor::new("Midi Through Port-0", PortDirection::Sink),
        ]
    }

    fn reply_49() -> Vec<u8> {
        vec![
            0xF0, 0x7E, 0x00, 0x06, 0x02, 0x00, 0x20, 0x29, 0x36, 0x01, 0x00, 0x00, 0x01, 0x03,
            0x00, 0x07, 0xF7,
        ]
    }

    #[test]
    fn test_probe_miss_is_quiet() {
        let mut hs = machine();
        let scan = vec![PortDescriptor::new("Midi Through Port-0", PortDirection::Source)];
        assert_eq!(hs.on_ports_changed(&scan), vec![]);
        assert_eq!(hs.phase(), HandshakePhase::Unprobed);
    }

    #[test]
    fn test_probe_hit_requests_both_connections() {
        let mut hs = machine();
        let effects = hs.on_ports_changed(&daw_ports());
        assert_eq!(
            effects,
            vec![
                HandshakeEffect::ConnectInput(DEV_SRC.into()),
                HandshakeEffect::ConnectOutput(DEV_SINK.into()),
            ]
        );
        assert_eq!(hs.phase(), HandshakePhase::PortsConnecting);
    }

    #[test]
    fn test_partial_connection_has_no_effects() {
        let mut hs = machine();
        hs.on_ports_changed(&daw_ports());

        let effects = hs.on_connection_changed(DEV_SRC, OWN_IN, true);
        assert_eq!(effects, vec![]);
        assert!(!hs.device_active());
        assert!(hs.connection().input_connected());
        assert!(!hs.connection().output_connected());
    }

    #[test]
    fn test_full_connection_arms_settle_timer() {
        let mut hs = machine();
        hs.on_ports_changed(&daw_ports());
        hs.on_connection_changed(DEV_SRC, OWN_IN, true);

        let effects = hs.on_connection_changed(OWN_OUT, DEV_SINK, true);
        assert_eq!(effects, vec![HandshakeEffect::StartSettleTimer]);
        assert!(hs.device_active());
        assert_eq!(hs.phase(), HandshakePhase::FullyConnected);
    }

    #[test]
    fn test_settle_then_inquiry_then_reply_enables_daw_mode() {
        let mut hs = machine();
        hs.on_ports_changed(&daw_ports());
        hs.on_connection_changed(DEV_SRC, OWN_IN, true);
        hs.on_connection_changed(OWN_OUT, DEV_SINK, true);

        let effects = hs.on_settle_elapsed();
        assert_eq!(effects, vec![HandshakeEffect::Send(DEVICE_INQUIRY.to_vec())]);
        assert_eq!(hs.phase(), HandshakePhase::Identifying);

        let effects = hs.on_sysex(&reply_49());
        assert_eq!(
            effects,
            vec![
                HandshakeEffect::Send(vec![0x9F, 0x0C, 0x7F]),
                HandshakeEffect::Send(vec![0x9F, 0x0A, 0x7F]),
                HandshakeEffect::ResetControlModes,
            ]
        );
        assert_eq!(hs.phase(), HandshakePhase::DawModeActive);
        assert!(hs.in_daw_mode());
        assert_eq!(
            hs.identity().map(|i| i.firmware_version.as_str()),
            Some("1307")
        );
    }

    #[test]
    fn test_disconnect_during_settle_cancels_inquiry() {
        let mut hs = machine();
        hs.on_ports_changed(&daw_ports());
        hs.on_connection_changed(DEV_SRC, OWN_IN, true);
        hs.on_connection_changed(OWN_OUT, DEV_SINK, true);

        // Output drops before the timer fires.
        let effects = hs.on_connection_changed(OWN_OUT, DEV_SINK, false);
        assert_eq!(effects, vec![]); // not yet in DAW mode, nothing to undo
        assert_eq!(hs.phase(), HandshakePhase::Disconnected);

        assert_eq!(hs.on_settle_elapsed(), vec![]);
    }

    #[test]
    fn test_disconnect_after_daw_mode_sends_exit_pair() {
        let mut hs = machine();
        hs.on_ports_changed(&daw_ports());
        hs.on_connection_changed(DEV_SRC, OWN_IN, true);
        hs.on_connection_changed(OWN_OUT, DEV_SINK, true);
        hs.on_settle_elapsed();
        hs.on_sysex(&reply_49());

        let effects = hs.on_connection_changed(DEV_SRC, OWN_IN, false);
        assert_eq!(
            effects,
            vec![
                HandshakeEffect::Send(vec![0x8F, 0x0C, 0x00]),
                HandshakeEffect::Send(vec![0x8F, 0x0A, 0x00]),
            ]
        );
        assert!(!hs.in_daw_mode());
        assert!(hs.identity().is_none());
        assert_eq!(hs.phase(), HandshakePhase::Disconnected);
    }

    #[test]
    fn test_unrelated_connections_are_ignored() {
        let mut hs = machine();
        hs.on_ports_changed(&daw_ports());
        let effects = hs.on_connection_changed("a2j:some synth", "seq:playback", true);
        assert_eq!(effects, vec![]);
        assert!(!hs.connection().input_connected());
        assert!(!hs.connection().output_connected());
    }

    #[test]
    fn test_foreign_sysex_is_ignored() {
        let mut hs = machine();
        hs.on_ports_changed(&daw_ports());
        hs.on_connection_changed(DEV_SRC, OWN_IN, true);
        hs.on_connection_changed(OWN_OUT, DEV_SINK, true);
        hs.on_settle_elapsed();

        assert_eq!(hs.on_sysex(&[0xF0, 0x43, 0x10, 0x4C, 0xF7]), vec![]);
        assert_eq!(hs.phase(), HandshakePhase::Identifying);
        assert!(!hs.in_daw_mode());
    }

    #[test]
    fn test_reconnect_runs_a_fresh_handshake() {
        let mut hs = machine();
        hs.on_ports_changed(&daw_ports());
        hs.on_connection_changed(DEV_SRC, OWN_IN, true);
        hs.on_connection_changed(OWN_OUT, DEV_SINK, true);
        hs.on_settle_elapsed();
        hs.on_sysex(&reply_49());
        hs.on_connection_changed(DEV_SRC, OWN_IN, false);

        // Replug: scan fires again, input reconnects, ladder restarts.
        let effects = hs.on_ports_changed(&daw_ports());
        assert_eq!(effects, vec![HandshakeEffect::ConnectInput(DEV_SRC.into())]);

        let effects = hs.on_connection_changed(DEV_SRC, OWN_IN, true);
        assert_eq!(effects, vec![HandshakeEffect::StartSettleTimer]);
        assert_eq!(hs.on_settle_elapsed(), vec![HandshakeEffect::Send(DEVICE_INQUIRY.to_vec())]);
    }

    #[test]
    fn test_stop_sends_exit_pair_only_in_daw_mode() {
        let mut hs = machine();
        assert_eq!(hs.on_stop(), vec![]);

        hs.on_ports_changed(&daw_ports());
        hs.on_connection_changed(DEV_SRC, OWN_IN, true);
        hs.on_connection_changed(OWN_OUT, DEV_SINK, true);
        hs.on_settle_elapsed();
        hs.on_sysex(&reply_49());

        let effects = hs.on_stop();
        assert_eq!(
            effects,
            vec![
                HandshakeEffect::Send(vec![0x8F, 0x0C, 0x00]),
                HandshakeEffect::Send(vec![0x8F, 0x0A, 0x00]),
            ]
        );
        assert_eq!(hs.phase(), HandshakePhase::Unprobed);
        assert!(!hs.device_active());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Step {
            Input(bool),
            Output(bool),
            Unrelated(bool),
        }

        fn step_strategy() -> impl Strategy<Value = Step> {
            prop_oneof![
                any::<bool>().prop_map(Step::Input),
                any::<bool>().prop_map(Step::Output),
                any::<bool>().prop_map(Step::Unrelated),
            ]
        }

        proptest! {
            /// device_active tracks "both endpoints connected" exactly, and
            /// the settle timer is armed on rising edges only.
            #[test]
            fn device_active_mirrors_connection_bits(steps in prop::collection::vec(step_strategy(), 0..64)) {
                let mut hs = machine();
                let mut input = false;
                let mut output = false;

                for step in steps {
                    let was_both = input && output;
                    let effects = match step {
                        Step::Input(c) => {
                            input = c;
                            hs.on_connection_changed(DEV_SRC, OWN_IN, c)
                        }
                        Step::Output(c) => {
                            output = c;
                            hs.on_connection_changed(OWN_OUT, DEV_SINK, c)
                        }
                        Step::Unrelated(c) => hs.on_connection_changed("foo", "bar", c),
                    };

                    prop_assert_eq!(hs.device_active(), input && output);

                    let is_both = input && output;
                    let armed = effects.contains(&HandshakeEffect::StartSettleTimer);
                    prop_assert_eq!(armed, is_both && !was_both);
                }
            }
        }
    }
}
