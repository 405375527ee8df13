//! Logging session that stands in for a host application.
//!
//! Useful for:
//! - Running the driver standalone against real hardware
//! - Watching which parameter every pot and fader lands on
//! - Development without a DAW running
//!
//! Channels are named "Track 1".."Track N" plus a master bus; every
//! parameter write is logged and stored so the last value can be read back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{
    ActionInvoker, GroupDisposition, Parameter, ParameterKind, SessionView, Stripable,
    TransportTime,
};

/// Sample rate the fake transport clock runs at.
const CLOCK_RATE: f64 = 48_000.0;

/// Parameter that logs and stores every write.
pub struct ConsoleParameter {
    target: String,
    value: Mutex<f64>,
    writes: Arc<AtomicU64>,
}

impl ConsoleParameter {
    fn new(target: String, initial: f64, writes: Arc<AtomicU64>) -> Arc<Self> {
        Arc::new(Self {
            target,
            value: Mutex::new(initial),
            writes,
        })
    }
}

impl Parameter for ConsoleParameter {
    fn name(&self) -> String {
        self.target.clone()
    }

    fn value(&self) -> f64 {
        *self.value.lock()
    }

    fn interface_to_internal(&self, value: f64) -> f64 {
        // 1:1 mapping; a real host curves gain here.
        value
    }

    fn set_value(&self, value: f64, _group: GroupDisposition) {
        *self.value.lock() = value;
        let count = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        info!("🎚 {} → {:.3} [write #{}]", self.target, value, count);
    }

    fn start_touch(&self, when: TransportTime) {
        debug!("{} touch begin at sample {}", self.target, when);
    }

    fn stop_touch(&self, when: TransportTime) {
        debug!("{} touch end at sample {}", self.target, when);
    }
}

/// Channel with a gain, a pan and two sends.
pub struct ConsoleStripable {
    name: String,
    gain: Arc<ConsoleParameter>,
    pan: Arc<ConsoleParameter>,
    sends: Vec<Arc<ConsoleParameter>>,
}

impl ConsoleStripable {
    fn new(name: &str, send_count: usize, writes: &Arc<AtomicU64>) -> Arc<Self> {
        let sends = (0..send_count)
            .map(|i| {
                ConsoleParameter::new(format!("{} send {}", name, ['A', 'B', 'C', 'D'][i % 4]), 0.0, writes.clone())
            })
            .collect();
        Arc::new(Self {
            name: name.to_string(),
            gain: ConsoleParameter::new(format!("{name} gain"), 1.0, writes.clone()),
            pan: ConsoleParameter::new(format!("{name} pan"), 0.5, writes.clone()),
            sends,
        })
    }
}

impl Stripable for ConsoleStripable {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn parameter(&self, kind: ParameterKind) -> Option<Arc<dyn Parameter>> {
        match kind {
            ParameterKind::Gain => Some(self.gain.clone() as Arc<dyn Parameter>),
            ParameterKind::Pan => Some(self.pan.clone() as Arc<dyn Parameter>),
            ParameterKind::Send(n) => self
                .sends
                .get(n)
                .cloned()
                .map(|p| p as Arc<dyn Parameter>),
        }
    }
}

/// Fixed-size logging session.
pub struct ConsoleSession {
    stripables: Vec<Arc<ConsoleStripable>>,
    master: Arc<ConsoleStripable>,
    started: Instant,
    writes: Arc<AtomicU64>,
}

impl ConsoleSession {
    pub fn new(track_count: usize) -> Arc<Self> {
        let writes = Arc::new(AtomicU64::new(0));
        let stripables = (1..=track_count)
            .map(|i| ConsoleStripable::new(&format!("Track {i}"), 2, &writes))
            .collect();
        // No sends on the master.
        let master = ConsoleStripable::new("Master", 0, &writes);

        info!("🎛 Console session ready: {} tracks + master", track_count);
        Arc::new(Self {
            stripables,
            master,
            started: Instant::now(),
            writes,
        })
    }

    /// Total parameter writes since construction.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl SessionView for ConsoleSession {
    fn stripables(&self) -> Vec<Arc<dyn Stripable>> {
        self.stripables
            .iter()
            .map(|s| s.clone() as Arc<dyn Stripable>)
            .collect()
    }

    fn master(&self) -> Option<Arc<dyn Stripable>> {
        Some(self.master.clone() as Arc<dyn Stripable>)
    }

    fn transport_time(&self) -> TransportTime {
        // A free-running 48 kHz clock standing in for the host transport.
        (self.started.elapsed().as_secs_f64() * CLOCK_RATE) as TransportTime
    }
}

/// Logs invoked actions instead of executing them.
#[derive(Default)]
pub struct ConsoleInvoker;

impl ConsoleInvoker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl ActionInvoker for ConsoleInvoker {
    fn invoke(&self, group: &str, name: &str) {
        info!("🎛 Action {} → {}", group, name);
    }
}
