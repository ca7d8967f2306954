//! Interview session: wire format, transport, projected state, and the
//! room that sequences them.
//!
//! The [`room::InterviewRoom`] is the entry point; everything else in
//! this module is a piece it coordinates. The transport is strictly
//! one-shot (`connecting → open → closed`, no reconnect), and the
//! presented state is a pure projection of four flags, computed in
//! [`state`].

pub mod room;
pub mod socket;
pub mod state;
pub mod wire;

pub use room::{Conversation, InterviewRoom};
pub use socket::{ConnectionState, SessionSocket, SocketEvent};
pub use state::{SessionState, StateTracker};
pub use wire::{ClientMessage, ServerEvent};
