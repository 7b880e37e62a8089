//! Protocol module - wire format, framing, and the handshake.
//!
//! Layout of one event frame (network byte order):
//!
//! ```text
//! [event-name: u32 length + UTF-8 bytes][param-count: u32][param]*
//! param := [type-tag: u8][type-specific payload]
//! ```
//!
//! [`frame`] builds and parses frames, [`frame_buffer`] reassembles them
//! from a fragmented stream, and [`wire`] holds the handshake hello,
//! reserved control-event names, and inbound input limits.

mod frame;
mod frame_buffer;
mod wire;

pub use frame::{build_frame, parse_frame, Event};
pub use frame_buffer::FrameBuffer;
pub use wire::{
    is_reserved_event, FrameLimits, Hello, HELLO_MAGIC, MAX_PEER_CLASS_LEN, PROTOCOL_VERSION,
    REGISTER_EVENT, UNREGISTER_EVENT,
};

pub(crate) use frame::validate_event;
pub(crate) use wire::{registration_frame, registration_update};
