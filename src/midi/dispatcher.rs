//! Routing of parsed MIDI messages to registered handlers.
//!
//! Handlers register per channel and message kind, keyed by the slot they
//! care about. Registration order is preserved: when several handlers share
//! a `(channel, kind)` slot each one sees every message, in the order the
//! handlers were added. Every registration returns a [`HandlerId`] that can
//! later be passed to [`MidiDispatcher::remove`].
//!
//! The dispatcher owns no application state. Handlers receive a `&mut C`
//! context on each dispatch, so a caller-side struct carries whatever the
//! handlers mutate. Handlers must not register or remove handlers from
//! inside a dispatch; wiring happens up front.

use tracing::trace;

use super::MidiMessage;

/// Opaque handle for a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type CcHandler<C> = Box<dyn FnMut(&mut C, u8, u8) + Send>;
type NoteHandler<C> = Box<dyn FnMut(&mut C, u8, u8) + Send>;
type SysExHandler<C> = Box<dyn FnMut(&mut C, &[u8]) + Send>;

struct Entry<F> {
    id: HandlerId,
    handler: F,
}

/// Per-channel, per-kind handler registry for parsed MIDI messages.
pub struct MidiDispatcher<C> {
    next_id: u64,
    cc: [Vec<Entry<CcHandler<C>>>; 16],
    note_on: [Vec<Entry<NoteHandler<C>>>; 16],
    note_off: [Vec<Entry<NoteHandler<C>>>; 16],
    poly_pressure: [Vec<Entry<NoteHandler<C>>>; 16],
    sysex: Vec<Entry<SysExHandler<C>>>,
}

impl<C> MidiDispatcher<C> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            cc: std::array::from_fn(|_| Vec::new()),
            note_on: std::array::from_fn(|_| Vec::new()),
            note_off: std::array::from_fn(|_| Vec::new()),
            poly_pressure: std::array::from_fn(|_| Vec::new()),
            sysex: Vec::new(),
        }
    }

    fn next_id(&mut self) -> HandlerId {
        self.next_id += 1;
        HandlerId(self.next_id)
    }

    /// Register a Control Change handler for one channel (0-15).
    /// The handler receives `(ctx, cc, value)`.
    pub fn on_cc<F>(&mut self, channel: u8, handler: F) -> HandlerId
    where
        F: FnMut(&mut C, u8, u8) + Send + 'static,
    {
        let id = self.next_id();
        self.cc[usize::from(channel & 0x0F)].push(Entry {
            id,
            handler: Box::new(handler),
        });
        id
    }

    /// Register a Note On handler for one channel. Receives `(ctx, note, velocity)`.
    pub fn on_note_on<F>(&mut self, channel: u8, handler: F) -> HandlerId
    where
        F: FnMut(&mut C, u8, u8) + Send + 'static,
    {
        let id = self.next_id();
        self.note_on[usize::from(channel & 0x0F)].push(Entry {
            id,
            handler: Box::new(handler),
        });
        id
    }

    /// Register a Note Off handler for one channel. Receives `(ctx, note, velocity)`.
    /// Note On messages with velocity 0 arrive here, normalized at parse time.
    pub fn on_note_off<F>(&mut self, channel: u8, handler: F) -> HandlerId
    where
        F: FnMut(&mut C, u8, u8) + Send + 'static,
    {
        let id = self.next_id();
        self.note_off[usize::from(channel & 0x0F)].push(Entry {
            id,
            handler: Box::new(handler),
        });
        id
    }

    /// Register a Polyphonic Key Pressure handler for one channel.
    /// Receives `(ctx, note, pressure)`.
    pub fn on_poly_pressure<F>(&mut self, channel: u8, handler: F) -> HandlerId
    where
        F: FnMut(&mut C, u8, u8) + Send + 'static,
    {
        let id = self.next_id();
        self.poly_pressure[usize::from(channel & 0x0F)].push(Entry {
            id,
            handler: Box::new(handler),
        });
        id
    }

    /// Register a System Exclusive handler. Receives the full frame
    /// including the `F0`/`F7` framing bytes.
    pub fn on_sysex<F>(&mut self, handler: F) -> HandlerId
    where
        F: FnMut(&mut C, &[u8]) + Send + 'static,
    {
        let id = self.next_id();
        self.sysex.push(Entry {
            id,
            handler: Box::new(handler),
        });
        id
    }

    /// Remove a previously registered handler. Returns false if the id is
    /// unknown (already removed).
    pub fn remove(&mut self, id: HandlerId) -> bool {
        for list in self.cc.iter_mut() {
            if let Some(pos) = list.iter().position(|e| e.id == id) {
                list.remove(pos);
                return true;
            }
        }
        for list in self.note_on.iter_mut() {
            if let Some(pos) = list.iter().position(|e| e.id == id) {
                list.remove(pos);
                return true;
            }
        }
        for list in self.note_off.iter_mut() {
            if let Some(pos) = list.iter().position(|e| e.id == id) {
                list.remove(pos);
                return true;
            }
        }
        for list in self.poly_pressure.iter_mut() {
            if let Some(pos) = list.iter().position(|e| e.id == id) {
                list.remove(pos);
                return true;
            }
        }
        if let Some(pos) = self.sysex.iter().position(|e| e.id == id) {
            self.sysex.remove(pos);
            return true;
        }
        false
    }

    /// Route one message to every handler registered for its channel and
    /// kind. Messages nothing subscribes to are logged at trace level.
    pub fn dispatch(&mut self, ctx: &mut C, message: &MidiMessage) {
        let mut handled = false;

        match message {
            MidiMessage::ControlChange { channel, cc, value } => {
                for entry in self.cc[usize::from(*channel)].iter_mut() {
                    (entry.handler)(ctx, *cc, *value);
                    handled = true;
                }
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                for entry in self.note_on[usize::from(*channel)].iter_mut() {
                    (entry.handler)(ctx, *note, *velocity);
                    handled = true;
                }
            }
            MidiMessage::NoteOff { channel, note, velocity } => {
                for entry in self.note_off[usize::from(*channel)].iter_mut() {
                    (entry.handler)(ctx, *note, *velocity);
                    handled = true;
                }
            }
            MidiMessage::PolyPressure { channel, note, pressure } => {
                for entry in self.poly_pressure[usize::from(*channel)].iter_mut() {
                    (entry.handler)(ctx, *note, *pressure);
                    handled = true;
                }
            }
            MidiMessage::SysEx { data } => {
                for entry in self.sysex.iter_mut() {
                    (entry.handler)(ctx, data);
                    handled = true;
                }
            }
            MidiMessage::ProgramChange { .. }
            | MidiMessage::ChannelPressure { .. }
            | MidiMessage::PitchBend { .. }
            | MidiMessage::Other { .. } => {}
        }

        if !handled {
            trace!("Unrouted MIDI message: {}", message);
        }
    }
}

impl<C> Default for MidiDispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}
