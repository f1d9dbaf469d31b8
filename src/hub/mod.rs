//! Hub core: connection registry, room broadcast, command dispatch and
//! the capture-session state machine.
//!
//! The hub is the authoritative core that:
//! - Accepts connections from input devices and admin consoles
//! - Authorizes devices against the session store
//! - Relays capture frames and lifecycle events into the admin room
//! - Drives capture sessions through recognition to completion

mod capture;
mod connection;
mod dispatcher;
mod registry;

pub use capture::{CaptureController, FrameOutcome, SessionPhase};
pub use connection::{ConnectionContext, ConnectionHandle, WireSink};
pub use dispatcher::{handle_envelope, run_connection, HubState};
pub use registry::{HubStats, Registry};
