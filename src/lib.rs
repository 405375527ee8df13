//! Driver for using a Novation Launchkey MK3 as a DAW control surface.
//!
//! The driver finds the keyboard's hidden DAW port pair, runs the
//! identity/DAW-mode handshake, and keeps the pots, faders, pads and
//! transport buttons bound to the parameters of a mixing session while the
//! device is plugged in. Unplug and replug are handled transparently.
//!
//! Hosts embed [`surface::LaunchkeySurface`] and supply two things:
//! a [`session::SessionView`] exposing their mixing channels and a
//! [`session::ActionInvoker`] for transport and editor actions. The
//! [`session::console`] module ships a self-contained demo session used by
//! the binary.

pub mod bindings;
pub mod buttons;
pub mod config;
pub mod launchkey;
pub mod midi;
pub mod monitor;
pub mod paths;
pub mod ports;
pub mod session;
pub mod surface;

pub use session::{ActionInvoker, Parameter, SessionView, Stripable};
pub use surface::{ControlSurface, LaunchkeySurface};
