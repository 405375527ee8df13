//! Driver lifecycle and event loop.
//!
//! [`LaunchkeySurface`] is the embeddable driver: construct it with a port
//! registry and the host collaborators, `start()` it, and a worker task
//! owns everything from then on. The worker is the single writer for all
//! driver state; the public handle talks to it over a command channel and
//! reads a published [`SurfaceSnapshot`] for cheap status queries.
//!
//! Worker event sources, serialized through one `select!` loop:
//! - parsed MIDI from the input connection (callback thread -> channel)
//! - port registry polls on a fixed cadence
//! - the handshake settle timer
//! - commands from the handle (stop, state get/set, rebind)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bindings::{ControlClass, RangeControlSet};
use crate::buttons::{ButtonDispatcher, PadGrid};
use crate::launchkey::handshake::{Handshake, HandshakeEffect, HandshakePhase, SETTLE_DELAY};
use crate::launchkey::{
    DeviceIdentity, CHANNEL_CONTROL, CHANNEL_DRUM_PADS, CHANNEL_SESSION_PADS, CHANNEL_TOUCH,
    PAD_MODE_CC,
};
use crate::midi::dispatcher::MidiDispatcher;
use crate::ports::{
    MidiEvent, MidiSink, PortEvent, PortRegistry, ProbeSpec, DRAIN_LIMIT, DRAIN_POLL,
};
use crate::session::{ActionInvoker, SessionView};


/// How often the port registry is polled for changes. midir has no
/// registration callbacks, so hotplug detection rides on this cadence.
const PORT_SCAN_INTERVAL: Duration = Duration::from_secs(2);

/// Version tag of the serialized state document.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error(transparent)]
    Port(#[from] crate::ports::PortError),

    #[error("driver worker is not running")]
    NotRunning,

    #[error("invalid state document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported state version {0}")]
    StateVersion(u32),
}

/// Host-facing lifecycle of an activatable, serializable controller.
#[async_trait]
pub trait ControlSurface: Send + Sync {
    fn name(&self) -> &str;

    fn is_active(&self) -> bool;

    /// Spawn the driver. Starting an active surface is a no-op.
    async fn start(&mut self) -> Result<(), SurfaceError>;

    /// Leave DAW mode, flush and detach ports, and join the worker.
    /// Stopping an inactive surface is a no-op.
    async fn stop(&mut self) -> Result<(), SurfaceError>;

    /// Serialize the current port attachments.
    async fn get_state(&self) -> Result<serde_json::Value, SurfaceError>;

    /// Restore from a serialized document. Persisted port names are
    /// dropped on restore; attachments always come from live probing.
    async fn set_state(&mut self, state: serde_json::Value) -> Result<(), SurfaceError>;
}

/// Serialized driver state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceStateDoc {
    pub version: u32,
    pub input: PortStateDoc,
    pub output: PortStateDoc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStateDoc {
    /// Attached hardware port. Stripped when a document is restored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub connected: bool,
}

/// Cheap, lock-guarded status published by the worker.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSnapshot {
    pub phase: HandshakePhase,
    pub device_active: bool,
    pub identity: Option<DeviceIdentity>,
}

enum SurfaceCommand {
    GetState {
        reply: oneshot::Sender<SurfaceStateDoc>,
    },
    SetState {
        doc: SurfaceStateDoc,
        reply: oneshot::Sender<()>,
    },
    RefreshBindings,
    Stop {
        reply: oneshot::Sender<WorkerSeed>,
    },
}

/// Everything the worker needs, handed back on stop so the surface can be
/// restarted.
struct WorkerSeed {
    registry: Box<dyn PortRegistry>,
    session: Arc<dyn SessionView>,
    invoker: Arc<dyn ActionInvoker>,
    probe_spec: ProbeSpec,
}

/// Launchkey MK3 control-surface driver.
pub struct LaunchkeySurface {
    name: String,
    // Mutex-wrapped because Box<dyn PortRegistry> is Send but not Sync,
    // while ControlSurface requires Sync; only &mut self paths touch it.
    seed: parking_lot::Mutex<Option<WorkerSeed>>,
    command_tx: Option<mpsc::Sender<SurfaceCommand>>,
    worker: Option<JoinHandle<()>>,
    snapshot: Arc<parking_lot::Mutex<SurfaceSnapshot>>,
}

impl LaunchkeySurface {
    pub fn new(
        name: impl Into<String>,
        registry: Box<dyn PortRegistry>,
        session: Arc<dyn SessionView>,
        invoker: Arc<dyn ActionInvoker>,
        probe_spec: ProbeSpec,
    ) -> Self {
        Self {
            name: name.into(),
            seed: parking_lot::Mutex::new(Some(WorkerSeed {
                registry,
                session,
                invoker,
                probe_spec,
            })),
            command_tx: None,
            worker: None,
            snapshot: Arc::new(parking_lot::Mutex::new(SurfaceSnapshot::default())),
        }
    }

    /// Current connection status, device identity included once known.
    pub fn snapshot(&self) -> SurfaceSnapshot {
        self.snapshot.lock().clone()
    }

    /// Ask the worker to re-resolve all control bindings against the
    /// session's current channels. Hosts call this when their channel list
    /// changes.
    pub async fn refresh_bindings(&self) -> Result<(), SurfaceError> {
        let tx = self.command_tx.as_ref().ok_or(SurfaceError::NotRunning)?;
        tx.send(SurfaceCommand::RefreshBindings)
            .await
            .map_err(|_| SurfaceError::NotRunning)
    }

    fn validate_doc(state: serde_json::Value) -> Result<SurfaceStateDoc, SurfaceError> {
        let mut doc: SurfaceStateDoc = serde_json::from_value(state)?;
        if doc.version != STATE_VERSION {
            return Err(SurfaceError::StateVersion(doc.version));
        }
        // Persisted port names go stale across replugs and sessions; the
        // probe cycle owns reconnection.
        let had_input = doc.input.name.take().is_some();
        let had_output = doc.output.name.take().is_some();
        if had_input || had_output {
            debug!("Dropping persisted port names from restored state");
        }
        Ok(doc)
    }
}

#[async_trait]
impl ControlSurface for LaunchkeySurface {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    async fn start(&mut self) -> Result<(), SurfaceError> {
        if self.worker.is_some() {
            debug!("Surface '{}' already active", self.name);
            return Ok(());
        }
        let seed = self.seed.lock().take().ok_or(SurfaceError::NotRunning)?;

        let (midi_tx, midi_rx) = mpsc::channel(1024);
        let (command_tx, command_rx) = mpsc::channel(32);

        let state = SurfaceWorker::new(seed, midi_tx, self.snapshot.clone());
        let dispatcher = build_dispatcher();

        self.worker = Some(tokio::spawn(run_worker(
            state, dispatcher, midi_rx, command_rx,
        )));
        self.command_tx = Some(command_tx);
        info!("🎹 Surface '{}' started", self.name);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SurfaceError> {
        let Some(command_tx) = self.command_tx.take() else {
            debug!("Surface '{}' already stopped", self.name);
            return Ok(());
        };

        let (reply, rx) = oneshot::channel();
        if command_tx
            .send(SurfaceCommand::Stop { reply })
            .await
            .is_ok()
        {
            if let Ok(seed) = rx.await {
                self.seed = Some(seed);
            }
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        info!("Surface '{}' stopped", self.name);
        Ok(())
    }

    async fn get_state(&self) -> Result<serde_json::Value, SurfaceError> {
        let doc = match self.command_tx.as_ref() {
            Some(tx) => {
                let (reply, rx) = oneshot::channel();
                tx.send(SurfaceCommand::GetState { reply })
                    .await
                    .map_err(|_| SurfaceError::NotRunning)?;
                rx.await.map_err(|_| SurfaceError::NotRunning)?
            }
            None => SurfaceStateDoc {
                version: STATE_VERSION,
                input: PortStateDoc {
                    name: None,
                    connected: false,
                },
                output: PortStateDoc {
                    name: None,
                    connected: false,
                },
            },
        };
        Ok(serde_json::to_value(doc)?)
    }

    async fn set_state(&mut self, state: serde_json::Value) -> Result<(), SurfaceError> {
        let doc = Self::validate_doc(state)?;

        match self.command_tx.as_ref() {
            Some(tx) => {
                let (reply, rx) = oneshot::channel();
                tx.send(SurfaceCommand::SetState { doc, reply })
                    .await
                    .map_err(|_| SurfaceError::NotRunning)?;
                rx.await.map_err(|_| SurfaceError::NotRunning)
            }
            None => {
                // Nothing to apply while stopped; the document holds no
                // state beyond the (stripped) attachments.
                debug!("State restored while stopped");
                Ok(())
            }
        }
    }
}

/// All driver state, owned by the worker task.
struct SurfaceWorker {
    registry: Box<dyn PortRegistry>,
    session: Arc<dyn SessionView>,
    invoker: Arc<dyn ActionInvoker>,
    probe_spec: ProbeSpec,
    handshake: Handshake,
    pots: RangeControlSet,
    faders: RangeControlSet,
    pads: PadGrid,
    buttons: ButtonDispatcher,
    pending_effects: Vec<HandshakeEffect>,
    settle_deadline: Option<tokio::time::Instant>,
    midi_tx: MidiSink,
    snapshot: Arc<parking_lot::Mutex<SurfaceSnapshot>>,
}

impl SurfaceWorker {
    fn new(seed: WorkerSeed, midi_tx: MidiSink, snapshot: Arc<parking_lot::Mutex<SurfaceSnapshot>>) -> Self {
        let handshake = Handshake::new(
            seed.registry.own_input_name().to_string(),
            seed.registry.own_output_name().to_string(),
            seed.probe_spec.clone(),
        );
        Self {
            handshake,
            pots: RangeControlSet::new(ControlClass::Pot, seed.session.clone()),
            faders: RangeControlSet::new(ControlClass::Fader, seed.session.clone()),
            pads: PadGrid::new(),
            buttons: ButtonDispatcher::new(seed.invoker.clone()),
            registry: seed.registry,
            session: seed.session,
            invoker: seed.invoker,
            probe_spec: seed.probe_spec,
            pending_effects: Vec::new(),
            settle_deadline: None,
            midi_tx,
            snapshot,
        }
    }

    fn into_seed(self) -> WorkerSeed {
        WorkerSeed {
            registry: self.registry,
            session: self.session,
            invoker: self.invoker,
            probe_spec: self.probe_spec,
        }
    }

    /// Drain registry events into handshake events.
    fn pump_port_events(&mut self) {
        for event in self.registry.poll_events() {
            match event {
                PortEvent::RegistryChanged => match self.registry.scan() {
                    Ok(ports) => {
                        let effects = self.handshake.on_ports_changed(&ports);
                        self.pending_effects.extend(effects);
                    }
                    Err(e) => warn!("Port scan failed: {}", e),
                },
                PortEvent::ConnectionChanged {
                    port_a,
                    port_b,
                    connected,
                } => {
                    let a = self.registry.canonical_name(&port_a);
                    let b = self.registry.canonical_name(&port_b);
                    let effects = self.handshake.on_connection_changed(&a, &b, connected);
                    self.pending_effects.extend(effects);
                }
            }
        }
    }

    /// Execute queued handshake effects. Connects can complete the ladder
    /// synchronously, so port events are re-pumped until nothing new
    /// appears.
    fn flush_effects(&mut self) {
        while !self.pending_effects.is_empty() {
            let mut connected = false;
            for effect in std::mem::take(&mut self.pending_effects) {
                match effect {
                    HandshakeEffect::ConnectInput(port) => {
                        match self.registry.connect_input(&port, self.midi_tx.clone()) {
                            Ok(()) => connected = true,
                            Err(e) => warn!("Input connection to '{}' failed: {}", port, e),
                        }
                    }
                    HandshakeEffect::ConnectOutput(port) => {
                        match self.registry.connect_output(&port) {
                            Ok(()) => connected = true,
                            Err(e) => warn!("Output connection to '{}' failed: {}", port, e),
                        }
                    }
                    HandshakeEffect::StartSettleTimer => {
                        self.settle_deadline =
                            Some(tokio::time::Instant::now() + SETTLE_DELAY);
                    }
                    HandshakeEffect::Send(bytes) => self.registry.send(&bytes),
                    HandshakeEffect::ResetControlModes => {
                        self.pots.reset_to_default();
                        self.faders.reset_to_default();
                        self.pads.reset_to_default();
                    }
                }
            }
            if connected {
                self.pump_port_events();
            }
        }
    }

    fn publish_snapshot(&self) {
        let mut snapshot = self.snapshot.lock();
        snapshot.phase = self.handshake.phase();
        snapshot.device_active = self.handshake.device_active();
        snapshot.identity = self.handshake.identity().cloned();
    }

    fn state_doc(&self) -> SurfaceStateDoc {
        let connection = self.handshake.connection();
        SurfaceStateDoc {
            version: STATE_VERSION,
            input: PortStateDoc {
                name: self.registry.connected_input().map(str::to_string),
                connected: connection.input_connected(),
            },
            output: PortStateDoc {
                name: self.registry.connected_output().map(str::to_string),
                connected: connection.output_connected(),
            },
        }
    }

    fn restore_state(&mut self, doc: SurfaceStateDoc) {
        // Attachments come from probing, never from the document; by the
        // time a document reaches the worker its names are stripped.
        debug!(
            "State restored (saved flags: input {}, output {})",
            doc.input.connected, doc.output.connected
        );
    }

    /// Ordered teardown: leave DAW mode, flush, detach.
    fn shutdown(&mut self) {
        let effects = self.handshake.on_stop();
        self.pending_effects.extend(effects);
        self.flush_effects();
        self.registry.drain_output(DRAIN_POLL, DRAIN_LIMIT);
        self.registry.disconnect();
        self.settle_deadline = None;
        self.publish_snapshot();
    }
}

/// Wire all MIDI routes. Handlers only queue work on the context; the
/// worker flushes effects after every dispatch.
fn build_dispatcher() -> MidiDispatcher<SurfaceWorker> {
    let mut dispatcher = MidiDispatcher::new();

    // Identity replies and any other device SysEx.
    dispatcher.on_sysex(|state: &mut SurfaceWorker, frame: &[u8]| {
        let effects = state.handshake.on_sysex(frame);
        state.pending_effects.extend(effects);
    });

    // Touch channel: both banks listen, each filters its own CC range.
    dispatcher.on_cc(CHANNEL_TOUCH, |state: &mut SurfaceWorker, cc, value| {
        state.pots.handle_touch_cc(cc, value);
        state.faders.handle_touch_cc(cc, value);
    });

    // Control channel: values, bank modes, pad mode, buttons. Every
    // consumer sees the CC and filters for itself.
    dispatcher.on_cc(CHANNEL_CONTROL, |state: &mut SurfaceWorker, cc, value| {
        state.pots.handle_value_cc(cc, value);
        state.faders.handle_value_cc(cc, value);
        if cc == PAD_MODE_CC {
            state.pads.handle_mode_cc(value);
        }
        state.buttons.handle_cc(CHANNEL_CONTROL, cc, value);
    });

    // Shift row buttons arrive on wire channel 1.
    dispatcher.on_cc(CHANNEL_SESSION_PADS, |state: &mut SurfaceWorker, cc, value| {
        state.buttons.handle_cc(CHANNEL_SESSION_PADS, cc, value);
    });

    // Pads in both layouts.
    for channel in [CHANNEL_SESSION_PADS, CHANNEL_DRUM_PADS] {
        dispatcher.on_note_on(channel, move |state: &mut SurfaceWorker, note, velocity| {
            state.pads.handle_pad_on(channel, note, velocity);
        });
        dispatcher.on_note_off(channel, move |state: &mut SurfaceWorker, note, _velocity| {
            state.pads.handle_pad_off(channel, note);
        });
        dispatcher.on_poly_pressure(channel, move |state: &mut SurfaceWorker, note, pressure| {
            state.pads.handle_pad_pressure(channel, note, pressure);
        });
    }

    dispatcher
}

async fn run_worker(
    mut state: SurfaceWorker,
    mut dispatcher: MidiDispatcher<SurfaceWorker>,
    mut midi_rx: mpsc::Receiver<MidiEvent>,
    mut command_rx: mpsc::Receiver<SurfaceCommand>,
) {
    // Initial probe; a device already plugged in connects without waiting
    // for the first scan tick.
    match state.registry.scan() {
        Ok(ports) => {
            let effects = state.handshake.on_ports_changed(&ports);
            state.pending_effects.extend(effects);
        }
        Err(e) => warn!("Initial port scan failed: {}", e),
    }
    state.flush_effects();
    state.pump_port_events();
    state.flush_effects();
    state.publish_snapshot();

    let mut scan_tick = tokio::time::interval(PORT_SCAN_INTERVAL);
    scan_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        // Copied out so the select arm does not borrow state.
        let settle_deadline = state.settle_deadline;
        let settle = async move {
            match settle_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            command = command_rx.recv() => {
                match command {
                    Some(SurfaceCommand::GetState { reply }) => {
                        let _ = reply.send(state.state_doc());
                    }
                    Some(SurfaceCommand::SetState { doc, reply }) => {
                        state.restore_state(doc);
                        let _ = reply.send(());
                    }
                    Some(SurfaceCommand::RefreshBindings) => {
                        state.pots.reassign_stripables();
                        state.faders.reassign_stripables();
                    }
                    Some(SurfaceCommand::Stop { reply }) => {
                        state.shutdown();
                        let _ = reply.send(state.into_seed());
                        break;
                    }
                    None => {
                        // Handle dropped without a stop; clean up anyway.
                        state.shutdown();
                        break;
                    }
                }
            }
            Some(event) = midi_rx.recv() => {
                dispatcher.dispatch(&mut state, &event.message);
                state.flush_effects();
                state.publish_snapshot();
            }
            _ = settle => {
                state.settle_deadline = None;
                let effects = state.handshake.on_settle_elapsed();
                state.pending_effects.extend(effects);
                state.flush_effects();
                state.publish_snapshot();
            }
            _ = scan_tick.tick() => {
                state.pump_port_events();
                state.flush_effects();
                state.publish_snapshot();
            }
        }
    }

    debug!("Surface worker exited");
}
