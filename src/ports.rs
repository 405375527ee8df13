//! MIDI port discovery and attachment.
//!
//! [`PortRegistry`] is the seam between the driver and the MIDI backend:
//! scanning hardware ports, attaching our two endpoints, writing bytes and
//! reporting registry changes. [`MidirPorts`] is the real implementation;
//! tests drive the driver with a scripted registry instead.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use midir::{MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputConnection, MidiOutputPort};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::midi::{format_hex, MidiMessage};

/// Name of our readable endpoint, as other MIDI software sees it.
pub const OWN_INPUT_NAME: &str = "Launchkey Mk3 recv";
/// Name of our writable endpoint.
pub const OWN_OUTPUT_NAME: &str = "Launchkey Mk3 send";

/// How often the shutdown drain rechecks for unflushed output.
pub const DRAIN_POLL: Duration = Duration::from_millis(10);
/// Upper bound on the shutdown drain wait.
pub const DRAIN_LIMIT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum PortError {
    #[error("MIDI backend initialization failed: {0}")]
    Init(#[from] midir::InitError),

    // midir's ConnectError<T> carries the non-Sync port handle back to the
    // caller; only its kind is kept so the error stays Send + Sync.
    #[error("input port connection failed: {0}")]
    InputConnect(midir::ConnectErrorKind),

    #[error("output port connection failed: {0}")]
    OutputConnect(midir::ConnectErrorKind),

    #[error("no MIDI port named '{0}'")]
    NotFound(String),
}

impl From<midir::ConnectError<MidiInput>> for PortError {
    fn from(e: midir::ConnectError<MidiInput>) -> Self {
        PortError::InputConnect(e.kind())
    }
}

impl From<midir::ConnectError<MidiOutput>> for PortError {
    fn from(e: midir::ConnectError<MidiOutput>) -> Self {
        PortError::OutputConnect(e.kind())
    }
}

/// Direction of a hardware port from our point of view: a `Source` emits
/// data we can read (the device's output), a `Sink` accepts our writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Source,
    Sink,
}

/// One scanned hardware port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub name: String,
    pub direction: PortDirection,
}

impl PortDescriptor {
    pub fn new(name: impl Into<String>, direction: PortDirection) -> Self {
        Self {
            name: name.into(),
            direction,
        }
    }
}

/// Name patterns identifying the device's DAW port pair.
///
/// A port matches when its name contains any of the family patterns and the
/// DAW discriminator. The discriminator keeps the probe off the device's
/// plain keyboard ports, which carry performance MIDI rather than the
/// control protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSpec {
    #[serde(default = "default_family_patterns")]
    pub family_patterns: Vec<String>,

    #[serde(default = "default_daw_discriminator")]
    pub daw_discriminator: String,
}

fn default_family_patterns() -> Vec<String> {
    vec!["Launchkey MK3".to_string(), "LKMK3".to_string()]
}

fn default_daw_discriminator() -> String {
    "DAW".to_string()
}

impl Default for ProbeSpec {
    fn default() -> Self {
        Self {
            family_patterns: default_family_patterns(),
            daw_discriminator: default_daw_discriminator(),
        }
    }
}

impl ProbeSpec {
    fn matches(&self, port_name: &str) -> bool {
        self.family_patterns.iter().any(|p| port_name.contains(p.as_str()))
            && port_name.contains(&self.daw_discriminator)
    }
}

/// DAW port pair found by [`probe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeMatch {
    /// Source port to read the control protocol from.
    pub input: String,
    /// Sink port to write to.
    pub output: String,
}

/// Search a port scan for the device's DAW port pair. Succeeds only when
/// both directions are present; a probe miss is the normal state when no
/// device is plugged in.
pub fn probe(ports: &[PortDescriptor], spec: &ProbeSpec) -> Option<ProbeMatch> {
    let input = ports
        .iter()
        .find(|p| p.direction == PortDirection::Source && spec.matches(&p.name))?;
    let output = ports
        .iter()
        .find(|p| p.direction == PortDirection::Sink && spec.matches(&p.name))?;

    Some(ProbeMatch {
        input: input.name.clone(),
        output: output.name.clone(),
    })
}

/// Registry or connection change, reported by [`PortRegistry::poll_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// The set of hardware ports changed.
    RegistryChanged,
    /// A connection involving the named ports went up or down. Names are
    /// canonical.
    ConnectionChanged {
        port_a: String,
        port_b: String,
        connected: bool,
    },
}

/// Parsed inbound MIDI with its arrival time and raw bytes.
#[derive(Debug, Clone)]
pub struct MidiEvent {
    pub timestamp: Instant,
    pub message: MidiMessage,
    pub raw: Vec<u8>,
}

/// Channel end that input connections feed parsed events into.
pub type MidiSink = mpsc::Sender<MidiEvent>;

/// Backend seam for MIDI port access.
///
/// All methods are called from the driver task only. Event delivery is by
/// polling: backends without native change notification (midir) synthesize
/// events by diffing scans.
pub trait PortRegistry: Send {
    /// Canonical name of our readable endpoint.
    fn own_input_name(&self) -> &str;

    /// Canonical name of our writable endpoint.
    fn own_output_name(&self) -> &str;

    /// Hardware port our input endpoint is attached to, if any.
    fn connected_input(&self) -> Option<&str>;

    /// Hardware port our output endpoint is attached to, if any.
    fn connected_output(&self) -> Option<&str>;

    /// Snapshot the current hardware ports.
    fn scan(&mut self) -> Result<Vec<PortDescriptor>, PortError>;

    /// Resolve a possibly aliased port name to its canonical form. Backends
    /// that only ever expose canonical names return the input unchanged.
    fn canonical_name(&self, name: &str) -> String;

    /// Attach our input endpoint to `port_name`; parsed traffic flows into
    /// `sink` from the backend's callback thread.
    fn connect_input(&mut self, port_name: &str, sink: MidiSink) -> Result<(), PortError>;

    /// Attach our output endpoint to `port_name`.
    fn connect_output(&mut self, port_name: &str) -> Result<(), PortError>;

    /// Drop both attachments.
    fn disconnect(&mut self);

    /// Fire-and-forget write to the attached output. Write failures are
    /// logged, never surfaced; with no output attached the bytes are
    /// dropped.
    fn send(&mut self, bytes: &[u8]);

    /// Registry and connection events since the last call.
    fn poll_events(&mut self) -> Vec<PortEvent>;

    /// Block briefly until queued output has flushed, rechecking every
    /// `poll_every` up to `limit`. Returns false on timeout. Backends whose
    /// writes flush inside [`PortRegistry::send`] return true immediately.
    fn drain_output(&mut self, poll_every: Duration, limit: Duration) -> bool;
}

/// [`PortRegistry`] backed by midir.
///
/// midir has no registration callbacks, so [`MidirPorts::poll_events`]
/// diffs consecutive scans: a changed port set becomes `RegistryChanged`,
/// and an attached target vanishing from the scan becomes a
/// `ConnectionChanged` drop. Successful attachments are queued as
/// `ConnectionChanged` rises so the caller sees a uniform event stream.
pub struct MidirPorts {
    input: Option<MidiInputConnection<()>>,
    input_target: Option<String>,
    output: Option<MidiOutputConnection>,
    output_target: Option<String>,
    last_scan: Vec<PortDescriptor>,
    pending: VecDeque<PortEvent>,
}

impl MidirPorts {
    /// Verifies the MIDI backend is reachable. Failure here aborts driver
    /// construction.
    pub fn new() -> Result<Self, PortError> {
        // Probe the backend once so a missing sequencer fails loudly now
        // rather than on the first scan.
        let _ = MidiInput::new("launchkey-surface probe")?;

        Ok(Self {
            input: None,
            input_target: None,
            output: None,
            output_target: None,
            last_scan: Vec::new(),
            pending: VecDeque::new(),
        })
    }

    fn find_input_port(midi_in: &MidiInput, name: &str) -> Result<MidiInputPort, PortError> {
        for port in midi_in.ports() {
            if let Ok(port_name) = midi_in.port_name(&port) {
                if port_name == name {
                    return Ok(port);
                }
            }
        }
        // Fall back to a case-insensitive substring match, useful when the
        // configured name is a fragment.
        let needle = name.to_lowercase();
        for port in midi_in.ports() {
            if let Ok(port_name) = midi_in.port_name(&port) {
                if port_name.to_lowercase().contains(&needle) {
                    return Ok(port);
                }
            }
        }
        Err(PortError::NotFound(name.to_string()))
    }

    fn find_output_port(midi_out: &MidiOutput, name: &str) -> Result<MidiOutputPort, PortError> {
        for port in midi_out.ports() {
            if let Ok(port_name) = midi_out.port_name(&port) {
                if port_name == name {
                    return Ok(port);
                }
            }
        }
        let needle = name.to_lowercase();
        for port in midi_out.ports() {
            if let Ok(port_name) = midi_out.port_name(&port) {
                if port_name.to_lowercase().contains(&needle) {
                    return Ok(port);
                }
            }
        }
        Err(PortError::NotFound(name.to_string()))
    }
}

impl PortRegistry for MidirPorts {
    fn own_input_name(&self) -> &str {
        OWN_INPUT_NAME
    }

    fn own_output_name(&self) -> &str {
        OWN_OUTPUT_NAME
    }

    fn connected_input(&self) -> Option<&str> {
        self.input_target.as_deref()
    }

    fn connected_output(&self) -> Option<&str> {
        self.output_target.as_deref()
    }

    fn scan(&mut self) -> Result<Vec<PortDescriptor>, PortError> {
        let midi_in = MidiInput::new("launchkey-surface scanner")?;
        let midi_out = MidiOutput::new("launchkey-surface scanner")?;

        let mut ports = Vec::new();
        for port in midi_in.ports() {
            if let Ok(name) = midi_in.port_name(&port) {
                ports.push(PortDescriptor::new(name, PortDirection::Source));
            }
        }
        for port in midi_out.ports() {
            if let Ok(name) = midi_out.port_name(&port) {
                ports.push(PortDescriptor::new(name, PortDirection::Sink));
            }
        }
        Ok(ports)
    }

    fn canonical_name(&self, name: &str) -> String {
        // midir exposes canonical names only.
        name.to_string()
    }

    fn connect_input(&mut self, port_name: &str, sink: MidiSink) -> Result<(), PortError> {
        let midi_in = MidiInput::new(OWN_INPUT_NAME)?;
        let port = Self::find_input_port(&midi_in, port_name)?;

        let connection = midi_in.connect(
            &port,
            "daw_in",
            move |_timestamp, bytes, _| {
                let Some(message) = MidiMessage::parse(bytes) else {
                    debug!("Unparseable MIDI from device: {}", format_hex(bytes));
                    return;
                };
                trace!("RX {}", message);
                let event = MidiEvent {
                    timestamp: Instant::now(),
                    message,
                    raw: bytes.to_vec(),
                };
                if sink.try_send(event).is_err() {
                    warn!("MIDI event queue full, dropping message");
                }
            },
            (),
        )?;

        debug!("Attached input to '{}'", port_name);
        self.input = Some(connection);
        self.input_target = Some(port_name.to_string());
        self.pending.push_back(PortEvent::ConnectionChanged {
            port_a: OWN_INPUT_NAME.to_string(),
            port_b: port_name.to_string(),
            connected: true,
        });
        Ok(())
    }

    fn connect_output(&mut self, port_name: &str) -> Result<(), PortError> {
        let midi_out = MidiOutput::new(OWN_OUTPUT_NAME)?;
        let port = Self::find_output_port(&midi_out, port_name)?;
        let connection = midi_out.connect(&port, "daw_out")?;

        debug!("Attached output to '{}'", port_name);
        self.output = Some(connection);
        self.output_target = Some(port_name.to_string());
        self.pending.push_back(PortEvent::ConnectionChanged {
            port_a: OWN_OUTPUT_NAME.to_string(),
            port_b: port_name.to_string(),
            connected: true,
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(connection) = self.input.take() {
            connection.close();
        }
        if let Some(connection) = self.output.take() {
            connection.close();
        }
        if let Some(target) = self.input_target.take() {
            self.pending.push_back(PortEvent::ConnectionChanged {
                port_a: OWN_INPUT_NAME.to_string(),
                port_b: target,
                connected: false,
            });
        }
        if let Some(target) = self.output_target.take() {
            self.pending.push_back(PortEvent::ConnectionChanged {
                port_a: OWN_OUTPUT_NAME.to_string(),
                port_b: target,
                connected: false,
            });
        }
    }

    fn send(&mut self, bytes: &[u8]) {
        let Some(connection) = self.output.as_mut() else {
            trace!("No output attached, dropping {} bytes", bytes.len());
            return;
        };

        if let Err(e) = connection.send(bytes) {
            debug!("MIDI send failed: {}", e);
        } else {
            trace!("TX {}", format_hex(bytes));
        }
    }

    fn poll_events(&mut self) -> Vec<PortEvent> {
        let mut events: Vec<PortEvent> = self.pending.drain(..).collect();

        match self.scan() {
            Ok(current) => {
                if current != self.last_scan {
                    // An attached target vanishing from the scan is a
                    // connection drop; report it before the registry event
                    // so the caller tears down before re-probing.
                    if let Some(target) = self.input_target.clone() {
                        let alive = current
                            .iter()
                            .any(|p| p.direction == PortDirection::Source && p.name == target);
                        if !alive {
                            self.input = None;
                            self.input_target = None;
                            events.push(PortEvent::ConnectionChanged {
                                port_a: OWN_INPUT_NAME.to_string(),
                                port_b: target,
                                connected: false,
                            });
                        }
                    }
                    if let Some(target) = self.output_target.clone() {
                        let alive = current
                            .iter()
                            .any(|p| p.direction == PortDirection::Sink && p.name == target);
                        if !alive {
                            self.output = None;
                            self.output_target = None;
                            events.push(PortEvent::ConnectionChanged {
                                port_a: OWN_OUTPUT_NAME.to_string(),
                                port_b: target,
                                connected: false,
                            });
                        }
                    }

                    self.last_scan = current;
                    events.push(PortEvent::RegistryChanged);
                }
            }
            Err(e) => warn!("MIDI port scan failed: {}", e),
        }

        events
    }

    fn drain_output(&mut self, _poll_every: Duration, _limit: Duration) -> bool {
        // midir writes synchronously inside send(), so there is never
        // queued output left to wait for.
        true
    }
}
