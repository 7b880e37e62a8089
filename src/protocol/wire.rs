//! Wire-level constants, frame limits, and the handshake hello.
//!
//! A connection opens with each side sending a hello:
//!
//! ```text
//! ┌───────────┬──────────┬──────────────────────────┐
//! │ Magic     │ Version  │ Peer class               │
//! │ 4 bytes   │ 4 bytes  │ u32 length + UTF-8 bytes │
//! │ "BROC"    │ u32 BE   │                          │
//! └───────────┴──────────┴──────────────────────────┘
//! ```
//!
//! After the hello exchange everything on the stream is event frames.
//! Registration updates travel as frames with reserved event names.

use bytes::{BufMut, Bytes, BytesMut};

use super::frame::{build_frame, Event};
use crate::error::{BroError, Result};
use crate::value::codec::{put_string, CodecError, Cursor};
use crate::value::BroValue;

/// Handshake magic, "BROC" in ASCII.
pub const HELLO_MAGIC: u32 = 0x4252_4F43;

/// Protocol version carried in the hello. Peers must match exactly.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum peer-class length in the hello, in bytes.
pub const MAX_PEER_CLASS_LEN: u32 = 512;

/// Reserved event name: request delivery of a named event.
pub const REGISTER_EVENT: &str = "__register_event";

/// Reserved event name: revoke a prior registration.
pub const UNREGISTER_EVENT: &str = "__unregister_event";

/// Whether an event name is reserved for protocol control frames.
///
/// Reserved names are never dispatched to user handlers and are rejected
/// in outbound application events.
pub fn is_reserved_event(name: &str) -> bool {
    name.starts_with("__")
}

/// Input limits enforced while parsing inbound frames.
///
/// On a stream with no outer length prefix these caps are what make
/// hostile garbage distinguishable from a frame that is still arriving.
/// Exceeding a cap is fatal to the connection.
#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    /// Maximum event-name length in bytes.
    pub max_name_len: u32,
    /// Maximum parameters per event.
    pub max_params: u32,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_name_len: 512,
            max_params: 256,
        }
    }
}

/// The versioned handshake message each side sends on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Protocol version the sender speaks.
    pub version: u32,
    /// Identifier the sender reports for itself (process/role name).
    pub peer_class: String,
}

impl Hello {
    /// Create a hello for the current protocol version.
    pub fn new(peer_class: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            peer_class: peer_class.into(),
        }
    }

    /// Encode this hello for transmission.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12 + self.peer_class.len());
        buf.put_u32(HELLO_MAGIC);
        buf.put_u32(self.version);
        put_string(&mut buf, &self.peer_class);
        buf.freeze()
    }

    /// Try to decode a hello from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, `Ok(Some((hello,
    /// consumed)))` on success, and a `HandshakeError` when the magic is
    /// wrong or the peer class is malformed.
    pub fn try_decode(buf: &[u8]) -> Result<Option<(Hello, usize)>> {
        let mut cur = Cursor::new(buf);

        let magic = match cur.get_u32() {
            Ok(m) => m,
            Err(_) => return Ok(None),
        };
        if magic != HELLO_MAGIC {
            return Err(BroError::Handshake(format!(
                "bad magic 0x{:08X}, peer is not speaking this protocol",
                magic
            )));
        }

        let version = match cur.get_u32() {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };

        let peer_class = match cur.get_string(MAX_PEER_CLASS_LEN, "peer class") {
            Ok(s) => s,
            Err(CodecError::Incomplete) => return Ok(None),
            Err(CodecError::Corrupt(msg)) => return Err(BroError::Handshake(msg)),
        };

        Ok(Some((
            Hello {
                version,
                peer_class,
            },
            cur.position(),
        )))
    }
}

/// Build a registration update frame for `name`.
pub(crate) fn registration_frame(name: &str, register: bool) -> Bytes {
    let control = if register {
        REGISTER_EVENT
    } else {
        UNREGISTER_EVENT
    };
    let event = Event::with_args(control, vec![BroValue::String(name.to_string())]);
    build_frame(&event)
}

/// Interpret an inbound control frame as a registration update.
///
/// Returns `(event_name, register)` for well-formed updates, `None` for
/// anything else.
pub(crate) fn registration_update(event: &Event) -> Option<(&str, bool)> {
    let register = match event.name() {
        REGISTER_EVENT => true,
        UNREGISTER_EVENT => false,
        _ => return None,
    };
    match event.args() {
        [BroValue::String(name)] => Some((name, register)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::parse_frame;

    #[test]
    fn test_hello_roundtrip() {
        let hello = Hello::new("rust-client");
        let bytes = hello.encode();
        let (decoded, consumed) = Hello::try_decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded, hello);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_hello_partial_input_needs_more() {
        let bytes = Hello::new("worker").encode();
        for cut in 0..bytes.len() {
            assert!(
                Hello::try_decode(&bytes[..cut]).unwrap().is_none(),
                "prefix of {} bytes must not decode",
                cut
            );
        }
    }

    #[test]
    fn test_hello_trailing_bytes_left_for_frames() {
        let mut bytes = Hello::new("worker").encode().to_vec();
        bytes.extend_from_slice(b"leftover");
        let (_, consumed) = Hello::try_decode(&bytes).unwrap().unwrap();
        assert_eq!(&bytes[consumed..], b"leftover");
    }

    #[test]
    fn test_hello_bad_magic_is_handshake_error() {
        let mut bytes = Hello::new("worker").encode().to_vec();
        bytes[0] = 0x00;
        let err = Hello::try_decode(&bytes).unwrap_err();
        assert!(matches!(err, BroError::Handshake(_)));
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved_event(REGISTER_EVENT));
        assert!(is_reserved_event(UNREGISTER_EVENT));
        assert!(is_reserved_event("__anything"));
        assert!(!is_reserved_event("foo"));
    }

    #[test]
    fn test_registration_frame_roundtrip() {
        let frame = registration_frame("foo", true);
        let event = parse_frame(&frame).unwrap();
        assert_eq!(registration_update(&event), Some(("foo", true)));

        let frame = registration_frame("foo", false);
        let event = parse_frame(&frame).unwrap();
        assert_eq!(registration_update(&event), Some(("foo", false)));
    }

    #[test]
    fn test_registration_update_ignores_ordinary_events() {
        let event = Event::with_args("foo", vec![BroValue::Bool(true)]);
        assert_eq!(registration_update(&event), None);
    }

    #[test]
    fn test_registration_update_rejects_wrong_arity() {
        let event = Event::new(REGISTER_EVENT);
        assert_eq!(registration_update(&event), None);
    }
}
