//! Continuous-control binding engine.
//!
//! A [`RangeControlSet`] owns one bank of identical controls (the eight
//! pots, or the nine faders with the master on the last slot) and maps each
//! to an automatable session parameter according to the bank's current
//! mode. The device announces mode changes itself on a dedicated CC; the
//! driver re-resolves the whole bank on every announcement.
//!
//! Bindings are held as a fixed-capacity list padded with `None`, so a
//! control index always addresses the same slot whether or not something is
//! bound there. Events for unbound slots are dropped.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::launchkey::{
    FADER_BASE_CC, FADER_MODE_CC, POT_BASE_CC, POT_COUNT, POT_MODE_CC, PRESS_THRESHOLD,
};
use crate::session::{GroupDisposition, Parameter, ParameterKind, SessionView, Stripable};

/// Which channel feeds plugin-parameter mode, until the surface grows
/// device-row navigation.
pub const DEVICE_MODE_STRIPABLE: usize = 0;
/// Which plugin slot on that channel feeds plugin-parameter mode.
pub const DEVICE_MODE_PLUGIN_SLOT: usize = 0;

/// Slot index of the master fader.
const MASTER_FADER: usize = 8;

/// The two continuous-control banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlClass {
    Pot,
    Fader,
}

impl ControlClass {
    /// CC of the bank's first control; control N is `base_cc + N`.
    pub fn base_cc(self) -> u8 {
        match self {
            ControlClass::Pot => POT_BASE_CC,
            ControlClass::Fader => FADER_BASE_CC,
        }
    }

    /// Total addressable controls, master fader included.
    pub fn capacity(self) -> usize {
        match self {
            ControlClass::Pot => POT_COUNT,
            ControlClass::Fader => MASTER_FADER + 1,
        }
    }

    /// Controls that follow the channel bank (excludes the master fader).
    fn bank_size(self) -> usize {
        POT_COUNT
    }

    /// CC carrying this bank's mode announcements.
    pub fn mode_cc(self) -> u8 {
        match self {
            ControlClass::Pot => POT_MODE_CC,
            ControlClass::Fader => FADER_MODE_CC,
        }
    }

    /// Mode the device selects for this bank after entering DAW mode.
    pub fn default_mode(self) -> ControllableMode {
        match self {
            ControlClass::Pot => ControllableMode::Pan,
            ControlClass::Fader => ControllableMode::Volume,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ControlClass::Pot => "pot",
            ControlClass::Fader => "fader",
        }
    }
}

/// Bank mode, as announced by the device.
///
/// The hardware offers Pan only in the pot menu, but the decoding is shared:
/// both banks announce on their own CC with the same value scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllableMode {
    Volume,
    Device,
    Pan,
    SendA,
    SendB,
    Custom0,
    Custom1,
    Custom2,
    Custom3,
}

impl ControllableMode {
    /// Decode a mode announcement value. The device sends 0 when a custom
    /// bank is recalled through the settings menu; values past the custom
    /// banks are unknown and return `None`.
    pub fn from_cc_value(value: u8) -> Option<Self> {
        match value {
            0 | 6 => Some(ControllableMode::Custom0),
            1 => Some(ControllableMode::Volume),
            2 => Some(ControllableMode::Device),
            3 => Some(ControllableMode::Pan),
            4 => Some(ControllableMode::SendA),
            5 => Some(ControllableMode::SendB),
            7 => Some(ControllableMode::Custom1),
            8 => Some(ControllableMode::Custom2),
            9 => Some(ControllableMode::Custom3),
            _ => None,
        }
    }
}

/// One bank of continuous controls bound to session parameters.
pub struct RangeControlSet {
    class: ControlClass,
    session: Arc<dyn SessionView>,
    mode: ControllableMode,
    slots: Vec<Option<Arc<dyn Parameter>>>,
    touched: Vec<bool>,
}

impl RangeControlSet {
    pub fn new(class: ControlClass, session: Arc<dyn SessionView>) -> Self {
        let capacity = class.capacity();
        let mut set = Self {
            class,
            session,
            mode: class.default_mode(),
            slots: vec![None; capacity],
            touched: vec![false; capacity],
        };
        set.reassign_stripables();
        set
    }

    pub fn mode(&self) -> ControllableMode {
        self.mode
    }

    /// Name of the parameter bound at `id`, for diagnostics.
    pub fn binding_name(&self, id: usize) -> Option<String> {
        self.slots.get(id)?.as_ref().map(|p| p.name())
    }

    /// Value CC from the device's control channel. Mode announcements and
    /// out-of-range controllers are handled here too; everything else on
    /// the channel is ignored.
    pub fn handle_value_cc(&mut self, cc: u8, value: u8) {
        if cc == self.class.mode_cc() {
            match ControllableMode::from_cc_value(value) {
                Some(mode) => self.mode_switch(mode),
                None => trace!("Unknown {} mode value {}", self.class.label(), value),
            }
            return;
        }

        let Some(id) = self.control_index(cc) else {
            return;
        };
        self.new_value_received(id, value);
    }

    /// Touch CC from the device's touch channel. Values at or above the
    /// press threshold open a touch bracket, lower values close it.
    pub fn handle_touch_cc(&mut self, cc: u8, value: u8) {
        let Some(id) = self.control_index(cc) else {
            return;
        };
        self.touch_event(id, value >= PRESS_THRESHOLD);
    }

    /// Switch the bank mode and rebind every slot.
    pub fn mode_switch(&mut self, mode: ControllableMode) {
        debug!("{} bank mode switched to {:?}", self.class.label(), mode);
        self.mode = mode;
        self.reassign_stripables();
    }

    /// Back to the mode the device itself selects after the handshake.
    pub fn reset_to_default(&mut self) {
        self.mode_switch(self.class.default_mode());
    }

    /// Re-resolve every slot against the session's current channels.
    ///
    /// Channel slots follow the first eight visible regular channels in
    /// mixer order; hidden and aux channels are skipped without consuming
    /// a slot. The master fader rebinds against the master bus. Touch
    /// latches are cleared, since a held touch no longer refers to the
    /// parameter it started on.
    pub fn reassign_stripables(&mut self) {
        let visible: Vec<Arc<dyn Stripable>> = self
            .session
            .stripables()
            .into_iter()
            .filter(|s| !s.is_hidden() && !s.is_aux())
            .take(self.class.bank_size())
            .collect();

        for id in 0..self.class.bank_size() {
            self.slots[id] = match self.mode {
                ControllableMode::Device => visible
                    .get(DEVICE_MODE_STRIPABLE)
                    .and_then(|s| s.plugin_parameter(DEVICE_MODE_PLUGIN_SLOT, id)),
                mode => visible.get(id).and_then(|s| Self::standard_parameter(s, mode)),
            };
        }

        if self.class == ControlClass::Fader {
            self.slots[MASTER_FADER] = match self.mode {
                ControllableMode::Device => None,
                mode => self
                    .session
                    .master()
                    .and_then(|m| Self::standard_parameter(&m, mode)),
            };
        }

        for touched in self.touched.iter_mut() {
            *touched = false;
        }

        let bound = self.slots.iter().filter(|s| s.is_some()).count();
        debug!(
            "{} bank rebound: {}/{} slots in {:?} mode",
            self.class.label(),
            bound,
            self.slots.len(),
            self.mode
        );
        for (id, slot) in self.slots.iter().enumerate() {
            if let Some(parameter) = slot {
                trace!("{} {} bound to {}", self.class.label(), id, parameter.name());
            }
        }
    }

    fn standard_parameter(
        stripable: &Arc<dyn Stripable>,
        mode: ControllableMode,
    ) -> Option<Arc<dyn Parameter>> {
        match mode {
            ControllableMode::Volume => stripable.parameter(ParameterKind::Gain),
            ControllableMode::Pan => stripable.parameter(ParameterKind::Pan),
            ControllableMode::SendA => stripable.parameter(ParameterKind::Send(0)),
            ControllableMode::SendB => stripable.parameter(ParameterKind::Send(1)),
            // Custom banks carry user CC maps, nothing to bind here.
            ControllableMode::Custom0
            | ControllableMode::Custom1
            | ControllableMode::Custom2
            | ControllableMode::Custom3 => None,
            // Plugin parameters resolve per slot, not per stripable.
            ControllableMode::Device => None,
        }
    }

    fn control_index(&self, cc: u8) -> Option<usize> {
        let base = self.class.base_cc();
        if cc < base {
            return None;
        }
        let id = usize::from(cc - base);
        if id >= self.class.capacity() {
            return None;
        }
        Some(id)
    }

    fn new_value_received(&mut self, id: usize, value: u8) {
        let Some(parameter) = self.slots[id].clone() else {
            trace!("{} {} unbound, dropping value {}", self.class.label(), id, value);
            return;
        };

        let now = self.session.transport_time();
        // A value from a control we never saw a touch for still opens a
        // bracket, so the automation write is anchored.
        if !self.touched[id] {
            self.touched[id] = true;
            parameter.start_touch(now);
        }

        let position = f64::from(value) / 127.0;
        parameter.set_value(
            parameter.interface_to_internal(position),
            GroupDisposition::Bypass,
        );
    }

    fn touch_event(&mut self, id: usize, on: bool) {
        if self.touched[id] == on {
            return;
        }
        self.touched[id] = on;

        let Some(parameter) = self.slots[id].clone() else {
            return;
        };

        let now = self.session.transport_time();
        if on {
            parameter.start_touch(now);
        } else {
            parameter.stop_touch(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{FakeSession, FakeStripable, ParameterCall};

    fn touch_cc(class: ControlClass, id: u8) -> u8 {
        class.base_cc() + id
    }

    #[test]
    fn test_pots_default_to_pan() {
        let session = FakeSession::with_tracks(3);
        let pots = RangeControlSet::new(ControlClass::Pot, session.clone());

        assert_eq!(pots.mode(), ControllableMode::Pan);
        assert_eq!(pots.binding_name(0).as_deref(), Some("Track 1/pan"));
        assert_eq!(pots.binding_name(2).as_deref(), Some("Track 3/pan"));
        // Bank is padded out to full capacity with unbound slots.
        assert_eq!(pots.binding_name(3), None);
        assert_eq!(pots.binding_name(7), None);
    }

    #[test]
    fn test_faders_default_to_volume_with_master() {
        let session = FakeSession::with_tracks(2);
        let faders = RangeControlSet::new(ControlClass::Fader, session.clone());

        assert_eq!(faders.mode(), ControllableMode::Volume);
        assert_eq!(faders.binding_name(0).as_deref(), Some("Track 1/gain"));
        assert_eq!(faders.binding_name(8).as_deref(), Some("Master/gain"));
        assert_eq!(faders.binding_name(5), None);
    }

    #[test]
    fn test_touch_value_release_round_trip() {
        let session = FakeSession::with_tracks(1);
        let mut pots = RangeControlSet::new(ControlClass::Pot, session.clone());
        let pan = session.stripables[0].pan.clone().unwrap();

        session.set_transport_time(100);
        pots.handle_touch_cc(touch_cc(ControlClass::Pot, 0), 0x7F);
        session.set_transport_time(200);
        pots.handle_value_cc(touch_cc(ControlClass::Pot, 0), 100);
        session.set_transport_time(300);
        pots.handle_touch_cc(touch_cc(ControlClass::Pot, 0), 0x00);

        let expected_value = (100.0 / 127.0) * 2.0; // fake maps by doubling
        assert_eq!(
            pan.calls(),
            vec![
                ParameterCall::StartTouch { when: 100 },
                ParameterCall::SetValue {
                    value: expected_value,
                    group: GroupDisposition::Bypass
                },
                ParameterCall::StopTouch { when: 300 },
            ]
        );
    }

    #[test]
    fn test_duplicate_touch_events_are_filtered() {
        let session = FakeSession::with_tracks(1);
        let mut pots = RangeControlSet::new(ControlClass::Pot, session.clone());
        let pan = session.stripables[0].pan.clone().unwrap();

        pots.handle_touch_cc(touch_cc(ControlClass::Pot, 0), 0x7F);
        pots.handle_touch_cc(touch_cc(ControlClass::Pot, 0), 0x70);
        pots.handle_touch_cc(touch_cc(ControlClass::Pot, 0), 0x00);
        pots.handle_touch_cc(touch_cc(ControlClass::Pot, 0), 0x00);

        assert_eq!(
            pan.calls(),
            vec![
                ParameterCall::StartTouch { when: 0 },
                ParameterCall::StopTouch { when: 0 },
            ]
        );
    }

    #[test]
    fn test_press_threshold_boundary() {
        let session = FakeSession::with_tracks(1);
        let mut pots = RangeControlSet::new(ControlClass::Pot, session.clone());
        let pan = session.stripables[0].pan.clone().unwrap();

        // 63 is a release, 64 a touch.
        pots.handle_touch_cc(touch_cc(ControlClass::Pot, 0), 63);
        assert_eq!(pan.calls(), vec![]);

        pots.handle_touch_cc(touch_cc(ControlClass::Pot, 0), 64);
        assert_eq!(pan.calls(), vec![ParameterCall::StartTouch { when: 0 }]);
    }

    #[test]
    fn test_unbound_slot_is_a_no_op() {
        let session = FakeSession::with_tracks(1);
        let mut pots = RangeControlSet::new(ControlClass::Pot, session);

        // Slot 5 has no channel behind it.
        pots.handle_touch_cc(touch_cc(ControlClass::Pot, 5), 0x7F);
        pots.handle_value_cc(touch_cc(ControlClass::Pot, 5), 90);
        pots.handle_touch_cc(touch_cc(ControlClass::Pot, 5), 0x00);
    }

    #[test]
    fn test_out_of_range_controllers_are_ignored() {
        let session = FakeSession::with_tracks(8);
        let mut pots = RangeControlSet::new(ControlClass::Pot, session.clone());
        let mut faders = RangeControlSet::new(ControlClass::Fader, session.clone());

        // One past each bank's last control.
        pots.handle_value_cc(POT_BASE_CC + 8, 64);
        faders.handle_value_cc(FADER_BASE_CC + 9, 64);
        // Below each bank's base.
        pots.handle_value_cc(POT_BASE_CC - 1, 64);
        faders.handle_value_cc(FADER_BASE_CC - 1, 64);

        for stripable in &session.stripables {
            assert_eq!(stripable.gain.as_ref().unwrap().calls(), vec![]);
            assert_eq!(stripable.pan.as_ref().unwrap().calls(), vec![]);
        }
    }

    #[test]
    fn test_mode_announcement_rebinds() {
        let session = FakeSession::with_tracks(2);
        let mut pots = RangeControlSet::new(ControlClass::Pot, session.clone());

        pots.handle_value_cc(POT_MODE_CC, 1); // volume
        assert_eq!(pots.mode(), ControllableMode::Volume);
        assert_eq!(pots.binding_name(0).as_deref(), Some("Track 1/gain"));

        pots.handle_value_cc(POT_MODE_CC, 4); // send A
        assert_eq!(pots.binding_name(1).as_deref(), Some("Track 2/send0"));
    }

    #[test]
    fn test_unknown_mode_value_is_ignored() {
        let session = FakeSession::with_tracks(1);
        let mut pots = RangeControlSet::new(ControlClass::Pot, session);

        pots.handle_value_cc(POT_MODE_CC, 12);
        assert_eq!(pots.mode(), ControllableMode::Pan);
    }

    #[test]
    fn test_custom_mode_value_zero() {
        let session = FakeSession::with_tracks(4);
        let mut faders = RangeControlSet::new(ControlClass::Fader, session);

        faders.handle_value_cc(FADER_MODE_CC, 0);
        assert_eq!(faders.mode(), ControllableMode::Custom0);
        for id in 0..9 {
            assert_eq!(faders.binding_name(id), None);
        }
    }

    #[test]
    fn test_hidden_and_aux_channels_are_skipped() {
        let session = Arc::new(FakeSession {
            stripables: vec![
                FakeStripable::track("Drums"),
                FakeStripable::hidden("Hidden"),
                FakeStripable::aux("Aux"),
                FakeStripable::track("Bass"),
            ],
            master: Some(FakeStripable::master()),
            ..Default::default()
        });
        let mut pots = RangeControlSet::new(ControlClass::Pot, session);
        pots.mode_switch(ControllableMode::Volume);

        assert_eq!(pots.binding_name(0).as_deref(), Some("Drums/gain"));
        assert_eq!(pots.binding_name(1).as_deref(), Some("Bass/gain"));
        assert_eq!(pots.binding_name(2), None);
    }

    #[test]
    fn test_master_fader_follows_capability() {
        let session = FakeSession::with_tracks(1);
        let mut faders = RangeControlSet::new(ControlClass::Fader, session);

        // Master has no sends, so its slot goes unbound in send mode while
        // track slots still bind.
        faders.handle_value_cc(FADER_MODE_CC, 4);
        assert_eq!(faders.binding_name(0).as_deref(), Some("Track 1/send0"));
        assert_eq!(faders.binding_name(8), None);
    }

    #[test]
    fn test_device_mode_binds_plugin_parameters() {
        let session = Arc::new(FakeSession {
            stripables: vec![
                FakeStripable::with_plugin("Synth", 4),
                FakeStripable::track("Other"),
            ],
            master: Some(FakeStripable::master()),
            ..Default::default()
        });
        let mut pots = RangeControlSet::new(ControlClass::Pot, session.clone());

        pots.handle_value_cc(POT_MODE_CC, 2);
        assert_eq!(pots.mode(), ControllableMode::Device);
        assert_eq!(pots.binding_name(0).as_deref(), Some("Synth/plugin0/p0"));
        assert_eq!(pots.binding_name(3).as_deref(), Some("Synth/plugin0/p3"));
        assert_eq!(pots.binding_name(4), None);

        pots.handle_value_cc(POT_BASE_CC + 2, 127);
        let plugin_param = &session.stripables[0].plugin_params[2];
        assert!(matches!(
            plugin_param.calls().last(),
            Some(ParameterCall::SetValue { .. })
        ));
    }

    #[test]
    fn test_device_mode_leaves_master_fader_unbound() {
        let session = FakeSession::with_tracks(1);
        let mut faders = RangeControlSet::new(ControlClass::Fader, session);

        faders.handle_value_cc(FADER_MODE_CC, 2);
        assert_eq!(faders.binding_name(8), None);
    }

    #[test]
    fn test_value_without_touch_opens_bracket_once() {
        let session = FakeSession::with_tracks(1);
        let mut faders = RangeControlSet::new(ControlClass::Fader, session.clone());
        let gain = session.stripables[0].gain.clone().unwrap();

        faders.handle_value_cc(FADER_BASE_CC, 64);
        faders.handle_value_cc(FADER_BASE_CC, 65);

        let calls = gain.calls();
        assert!(matches!(calls[0], ParameterCall::StartTouch { .. }));
        assert!(matches!(calls[1], ParameterCall::SetValue { .. }));
        assert!(matches!(calls[2], ParameterCall::SetValue { .. }));
        assert_eq!(calls.len(), 3);
    }

    #[test]
    fn test_rebind_clears_touch_latch() {
        let session = FakeSession::with_tracks(1);
        let mut pots = RangeControlSet::new(ControlClass::Pot, session.clone());
        let gain = session.stripables[0].gain.clone().unwrap();

        pots.handle_touch_cc(touch_cc(ControlClass::Pot, 0), 0x7F);
        pots.mode_switch(ControllableMode::Volume);

        // The release after a rebind refers to the old binding; the new
        // parameter must not see a stray stop.
        pots.handle_touch_cc(touch_cc(ControlClass::Pot, 0), 0x00);
        assert_eq!(gain.calls(), vec![]);

        pots.handle_touch_cc(touch_cc(ControlClass::Pot, 0), 0x7F);
        assert_eq!(gain.calls(), vec![ParameterCall::StartTouch { when: 0 }]);
    }
}
