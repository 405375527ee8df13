//! Host-session collaborator traits.
//!
//! The driver never talks to a mixing engine directly. It sees the host
//! through three narrow traits: [`SessionView`] enumerates channels,
//! [`Stripable`] hands out automatable [`Parameter`]s by capability, and
//! [`ActionInvoker`] fires named host actions for the button row. A host
//! embeds the driver by implementing these; the bundled
//! [`console::ConsoleSession`] implements them with plain logging so the
//! driver can run standalone.

use std::sync::Arc;

pub mod console;

/// Transport position in samples. Touch brackets are stamped with this so
/// automation writes land at the right timeline position.
pub type TransportTime = i64;

/// Whether a control change propagates to other channels grouped with the
/// target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupDisposition {
    /// Apply to the whole group.
    Follow,
    /// Apply to the addressed channel only. Surface writes use this.
    Bypass,
}

/// Standard automatable parameter slots on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    /// Channel level.
    Gain,
    /// Stereo position.
    Pan,
    /// Level of the Nth send, 0-based.
    Send(usize),
}

/// One automatable host parameter, bound to a physical control.
pub trait Parameter: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> String;

    /// Current value, in the parameter's internal range.
    fn value(&self) -> f64;

    /// Map a 0.0..=1.0 surface position into the parameter's internal
    /// range.
    fn interface_to_internal(&self, value: f64) -> f64;

    /// Write a value in the parameter's internal range.
    fn set_value(&self, value: f64, group: GroupDisposition);

    /// Open an automation touch bracket at transport position `when`.
    fn start_touch(&self, when: TransportTime);

    /// Close the automation touch bracket.
    fn stop_touch(&self, when: TransportTime);
}

/// One mixer channel (track or bus).
pub trait Stripable: Send + Sync {
    fn name(&self) -> String;

    /// Hidden channels are skipped when binding controls.
    fn is_hidden(&self) -> bool {
        false
    }

    /// Auxiliary and monitoring busses are skipped when binding controls.
    fn is_aux(&self) -> bool {
        false
    }

    /// Look up a standard parameter. `None` when this channel does not
    /// carry it; a master bus has no sends, MIDI tracks may have no pan.
    fn parameter(&self, kind: ParameterKind) -> Option<Arc<dyn Parameter>>;

    /// Parameter `index` (declaration order) of the plugin in `slot`.
    /// `None` when the slot is empty or the plugin has fewer parameters.
    fn plugin_parameter(&self, slot: usize, index: usize) -> Option<Arc<dyn Parameter>> {
        let _ = (slot, index);
        None
    }
}

/// Driver-facing view of the host session.
pub trait SessionView: Send + Sync {
    /// Regular channels in stable mixer order, master excluded. The driver
    /// applies hidden/aux filtering itself via the [`Stripable`] flags.
    fn stripables(&self) -> Vec<Arc<dyn Stripable>>;

    /// The master bus, if the session has one.
    fn master(&self) -> Option<Arc<dyn Stripable>>;

    /// Current transport position.
    fn transport_time(&self) -> TransportTime;
}

/// Named host actions, fired by the surface's button row.
pub trait ActionInvoker: Send + Sync {
    /// Invoke action `name` within `group` (e.g. `"Transport"`, `"Editor"`).
    fn invoke(&self, group: &str, name: &str);
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording fakes shared by the binding and driver tests.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum ParameterCall {
        SetValue { value: f64, group: GroupDisposition },
        StartTouch { when: TransportTime },
        StopTouch { when: TransportTime },
    }

    pub(crate) struct FakeParameter {
        name: String,
        /// interface_to_internal multiplies by this, so tests can tell the
        /// mapped value from the raw one.
        pub scale: f64,
        pub calls: Mutex<Vec<ParameterCall>>,
    }

    impl FakeParameter {
        pub fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                scale: 2.0,
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> Vec<ParameterCall> {
            self.calls.lock().clone()
        }
    }

    impl Parameter for FakeParameter {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn value(&self) -> f64 {
            self.calls
                .lock()
                .iter()
                .rev()
                .find_map(|call| match call {
                    ParameterCall::SetValue { value, .. } => Some(*value),
                    _ => None,
                })
                .unwrap_or(0.0)
        }

        fn interface_to_internal(&self, value: f64) -> f64 {
            value * self.scale
        }

        fn set_value(&self, value: f64, group: GroupDisposition) {
            self.calls.lock().push(ParameterCall::SetValue { value, group });
        }

        fn start_touch(&self, when: TransportTime) {
            self.calls.lock().push(ParameterCall::StartTouch { when });
        }

        fn stop_touch(&self, when: TransportTime) {
            self.calls.lock().push(ParameterCall::StopTouch { when });
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeStripable {
        pub name: String,
        pub hidden: bool,
        pub aux: bool,
        pub gain: Option<Arc<FakeParameter>>,
        pub pan: Option<Arc<FakeParameter>>,
        pub sends: Vec<Arc<FakeParameter>>,
        pub plugin_params: Vec<Arc<FakeParameter>>,
    }

    impl FakeStripable {
        /// A full-featured track: gain, pan and two sends.
        pub fn track(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                gain: Some(FakeParameter::new(&format!("{name}/gain"))),
                pan: Some(FakeParameter::new(&format!("{name}/pan"))),
                sends: vec![
                    FakeParameter::new(&format!("{name}/send0")),
                    FakeParameter::new(&format!("{name}/send1")),
                ],
                ..Default::default()
            })
        }

        pub fn hidden(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                hidden: true,
                gain: Some(FakeParameter::new(&format!("{name}/gain"))),
                ..Default::default()
            })
        }

        pub fn aux(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                aux: true,
                gain: Some(FakeParameter::new(&format!("{name}/gain"))),
                ..Default::default()
            })
        }

        /// A master bus: gain and pan, no sends.
        pub fn master() -> Arc<Self> {
            Arc::new(Self {
                name: "Master".to_string(),
                gain: Some(FakeParameter::new("Master/gain")),
                pan: Some(FakeParameter::new("Master/pan")),
                ..Default::default()
            })
        }

        pub fn with_plugin(name: &str, param_count: usize) -> Arc<Self> {
            let mut stripable = Self {
                name: name.to_string(),
                gain: Some(FakeParameter::new(&format!("{name}/gain"))),
                pan: Some(FakeParameter::new(&format!("{name}/pan"))),
                ..Default::default()
            };
            for i in 0..param_count {
                stripable
                    .plugin_params
                    .push(FakeParameter::new(&format!("{name}/plugin0/p{i}")));
            }
            Arc::new(stripable)
        }
    }

    impl Stripable for FakeStripable {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn is_hidden(&self) -> bool {
            self.hidden
        }

        fn is_aux(&self) -> bool {
            self.aux
        }

        fn parameter(&self, kind: ParameterKind) -> Option<Arc<dyn Parameter>> {
            match kind {
                ParameterKind::Gain => self.gain.clone().map(|p| p as Arc<dyn Parameter>),
                ParameterKind::Pan => self.pan.clone().map(|p| p as Arc<dyn Parameter>),
                ParameterKind::Send(n) => {
                    self.sends.get(n).cloned().map(|p| p as Arc<dyn Parameter>)
                }
            }
        }

        fn plugin_parameter(&self, slot: usize, index: usize) -> Option<Arc<dyn Parameter>> {
            if slot != 0 {
                return None;
            }
            self.plugin_params
                .get(index)
                .cloned()
                .map(|p| p as Arc<dyn Parameter>)
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeSession {
        pub stripables: Vec<Arc<FakeStripable>>,
        pub master: Option<Arc<FakeStripable>>,
        pub time: AtomicI64,
    }

    impl FakeSession {
        pub fn with_tracks(count: usize) -> Arc<Self> {
            let stripables = (1..=count)
                .map(|i| FakeStripable::track(&format!("Track {i}")))
                .collect();
            Arc::new(Self {
                stripables,
                master: Some(FakeStripable::master()),
                time: AtomicI64::new(0),
            })
        }

        pub fn set_transport_time(&self, time: TransportTime) {
            self.time.store(time, Ordering::SeqCst);
        }
    }

    impl SessionView for FakeSession {
        fn stripables(&self) -> Vec<Arc<dyn Stripable>> {
            self.stripables
                .iter()
                .map(|s| s.clone() as Arc<dyn Stripable>)
                .collect()
        }

        fn master(&self) -> Option<Arc<dyn Stripable>> {
            self.master.clone().map(|s| s as Arc<dyn Stripable>)
        }

        fn transport_time(&self) -> TransportTime {
            self.time.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeInvoker {
        pub calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeInvoker {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().clone()
        }
    }

    impl ActionInvoker for FakeInvoker {
        fn invoke(&self, group: &str, name: &str) {
            self.calls.lock().push((group.to_string(), name.to_string()));
        }
    }
}
