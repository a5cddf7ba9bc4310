//! Hub wire protocol (SignalR JSON, version 1).
//!
//! - [`constants`]: message type codes, framing, and handshake values.
//! - [`messages`]: typed frames plus record-separator framing helpers.

pub mod constants;
pub mod messages;

pub use constants::{MessageType, RECORD_SEPARATOR};
pub use messages::{
    CloseMessage, CompletionMessage, HandshakeRequest, HandshakeResponse, HubMessage,
    InvocationMessage, encode_frame, split_frames,
};
