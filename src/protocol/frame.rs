//! Events and their wire frames.
//!
//! A frame is one event on the wire (network byte order):
//!
//! ```text
//! ┌──────────────────────────┬─────────────┬──────────────────┐
//! │ Event name               │ Param count │ Params           │
//! │ u32 length + UTF-8 bytes │ u32 BE      │ tagged values    │
//! └──────────────────────────┴─────────────┴──────────────────┘
//! ```
//!
//! Building is deterministic: equal events always produce byte-identical
//! frames.
//!
//! # Example
//!
//! ```
//! use broccoli_client::protocol::{build_frame, parse_frame, Event};
//! use broccoli_client::value::BroPort;
//!
//! let event = Event::new("bar").arg("Text parameter").arg(BroPort::tcp(80));
//! let frame = build_frame(&event);
//! assert_eq!(parse_frame(&frame).unwrap(), event);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire::FrameLimits;
use crate::error::{BroError, Result};
use crate::value::codec::{decode_value, put_string, validate_value, CodecError, Cursor};
use crate::value::BroValue;

/// A named, ordered, typed parameter tuple exchanged between peers.
///
/// Parameter order is positional and semantically significant: it must
/// match the event's registered schema on the peer side.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    name: String,
    args: Vec<BroValue>,
}

impl Event {
    /// Create an event with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Create an event from a complete parameter list.
    pub fn with_args(name: impl Into<String>, args: Vec<BroValue>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Append a parameter, returning `self` for chaining.
    pub fn arg(mut self, value: impl Into<BroValue>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Append a parameter.
    pub fn push(&mut self, value: impl Into<BroValue>) {
        self.args.push(value.into());
    }

    /// The event name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parameters, in wire order.
    pub fn args(&self) -> &[BroValue] {
        &self.args
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether the event carries no parameters.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// Check that an event would pass a receiving peer's input limits.
///
/// [`build_frame`] encodes whatever it is given; without this check an
/// oversized name or parameter would encode fine locally and then fatally
/// kill the peer's connection on receipt. Outbound paths run it before
/// building.
pub(crate) fn validate_event(event: &Event, limits: &FrameLimits) -> Result<()> {
    if event.name().is_empty() {
        return Err(BroError::Frame("empty event name".to_string()));
    }
    if event.name().len() > limits.max_name_len as usize {
        return Err(BroError::Frame(format!(
            "event name length {} exceeds maximum {}",
            event.name().len(),
            limits.max_name_len
        )));
    }
    if event.len() > limits.max_params as usize {
        return Err(BroError::Frame(format!(
            "parameter count {} exceeds maximum {}",
            event.len(),
            limits.max_params
        )));
    }
    for arg in event.args() {
        validate_value(arg, 0).map_err(BroError::Frame)?;
    }
    Ok(())
}

/// Serialize an event into a wire frame.
pub fn build_frame(event: &Event) -> Bytes {
    debug_assert!(!event.name().is_empty(), "event name must not be empty");

    let mut buf = BytesMut::with_capacity(8 + event.name().len() + event.len() * 16);
    put_string(&mut buf, event.name());
    buf.put_u32(event.len() as u32);
    for arg in event.args() {
        arg.encode_into(&mut buf);
    }
    buf.freeze()
}

/// Try to parse one frame from the front of `buf`.
///
/// Returns `Ok(None)` when the frame is still incomplete (more stream
/// bytes may complete it), `Ok(Some((event, consumed)))` for a complete
/// frame, and an error for input that can never become a valid frame:
/// `FrameError` for structural violations (limits, empty name, bad name
/// encoding) and `DecodeError` for corrupt parameter values.
pub(crate) fn try_parse_frame(buf: &[u8], limits: &FrameLimits) -> Result<Option<(Event, usize)>> {
    let mut cur = Cursor::new(buf);

    let name = match cur.get_string(limits.max_name_len, "event name") {
        Ok(name) => name,
        Err(CodecError::Incomplete) => return Ok(None),
        Err(CodecError::Corrupt(msg)) => return Err(BroError::Frame(msg)),
    };
    if name.is_empty() {
        return Err(BroError::Frame("empty event name".to_string()));
    }

    let count = match cur.get_u32() {
        Ok(count) => count,
        Err(_) => return Ok(None),
    };
    if count > limits.max_params {
        return Err(BroError::Frame(format!(
            "parameter count {} exceeds maximum {}",
            count, limits.max_params
        )));
    }

    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match decode_value(&mut cur, 0) {
            Ok(value) => args.push(value),
            Err(CodecError::Incomplete) => return Ok(None),
            Err(CodecError::Corrupt(msg)) => return Err(BroError::Decode(msg)),
        }
    }

    Ok(Some((Event::with_args(name, args), cur.position())))
}

/// Parse a complete frame.
///
/// The inverse of [`build_frame`]. Unlike the streaming path, `buf` must
/// hold exactly one whole frame: a declared parameter count or length
/// exceeding the remaining bytes fails with a `FrameError`, and so do
/// trailing bytes.
pub fn parse_frame(buf: &[u8]) -> Result<Event> {
    match try_parse_frame(buf, &FrameLimits::default())? {
        Some((event, consumed)) if consumed == buf.len() => Ok(event),
        Some((_, consumed)) => Err(BroError::Frame(format!(
            "{} trailing bytes after frame",
            buf.len() - consumed
        ))),
        None => Err(BroError::Frame(
            "frame is truncated: declared lengths exceed the buffer".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{BroEnum, BroPort, BroRecord, BroTime};

    fn bar_event() -> Event {
        Event::new("bar")
            .arg("Text parameter")
            .arg(true)
            .arg("192.168.1.1".parse::<std::net::IpAddr>().unwrap())
            .arg(BroPort::tcp(80))
            .arg(BroEnum::new(2, "transport_proto"))
            .arg(BroTime::now())
    }

    #[test]
    fn test_frame_roundtrip() {
        let event = bar_event();
        let parsed = parse_frame(&build_frame(&event)).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_roundtrip_preserves_parameter_order_and_types() {
        let event = bar_event();
        let parsed = parse_frame(&build_frame(&event)).unwrap();

        assert_eq!(parsed.name(), "bar");
        assert_eq!(parsed.len(), 6);
        assert!(matches!(parsed.args()[0], BroValue::String(_)));
        assert!(matches!(parsed.args()[1], BroValue::Bool(true)));
        assert!(matches!(parsed.args()[2], BroValue::Address(_)));
        assert!(matches!(parsed.args()[3], BroValue::Port(p) if p == BroPort::tcp(80)));
        assert!(matches!(&parsed.args()[4], BroValue::Enum(e) if e.type_name == "transport_proto"));
        assert!(matches!(parsed.args()[5], BroValue::Time(_)));
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = Event::new("ping")
            .arg(1i64)
            .arg(BroRecord::new().field("x", true));
        let b = a.clone();
        assert_eq!(build_frame(&a), build_frame(&b));
    }

    #[test]
    fn test_frame_with_no_parameters() {
        let event = Event::new("heartbeat");
        let parsed = parse_frame(&build_frame(&event)).unwrap();
        assert_eq!(parsed, event);
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_declared_count_exceeding_bytes_is_frame_error() {
        // Header claims 3 parameters but supplies one.
        let mut buf = BytesMut::new();
        put_string(&mut buf, "foo");
        buf.put_u32(3);
        BroValue::Bool(true).encode_into(&mut buf);

        let err = parse_frame(&buf).unwrap_err();
        assert!(matches!(err, BroError::Frame(_)));
    }

    #[test]
    fn test_truncated_name_is_frame_error() {
        let frame = build_frame(&Event::new("bar"));
        let err = parse_frame(&frame[..3]).unwrap_err();
        assert!(matches!(err, BroError::Frame(_)));
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "");
        buf.put_u32(0);
        assert!(matches!(parse_frame(&buf), Err(BroError::Frame(_))));
    }

    #[test]
    fn test_param_count_limit_enforced() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "flood");
        buf.put_u32(FrameLimits::default().max_params + 1);

        let err = try_parse_frame(&buf, &FrameLimits::default()).unwrap_err();
        assert!(matches!(err, BroError::Frame(_)));
        assert!(err.to_string().contains("parameter count"));
    }

    #[test]
    fn test_name_length_limit_enforced() {
        let long_name = "x".repeat(FrameLimits::default().max_name_len as usize + 1);
        let frame = build_frame(&Event::new(long_name));
        let err = try_parse_frame(&frame, &FrameLimits::default()).unwrap_err();
        assert!(matches!(err, BroError::Frame(_)));
    }

    #[test]
    fn test_corrupt_parameter_is_decode_error() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "foo");
        buf.put_u32(1);
        buf.put_u8(0xEE); // unknown type tag

        let err = try_parse_frame(&buf, &FrameLimits::default()).unwrap_err();
        assert!(matches!(err, BroError::Decode(_)));
    }

    #[test]
    fn test_trailing_bytes_rejected_by_parse() {
        let mut bytes = build_frame(&Event::new("bar")).to_vec();
        bytes.push(0x00);
        assert!(matches!(parse_frame(&bytes), Err(BroError::Frame(_))));
    }

    #[test]
    fn test_try_parse_incomplete_returns_none() {
        let frame = build_frame(&bar_event());
        for cut in 0..frame.len() {
            let outcome = try_parse_frame(&frame[..cut], &FrameLimits::default()).unwrap();
            assert!(outcome.is_none(), "prefix of {} bytes must not parse", cut);
        }
    }

    #[test]
    fn test_validate_event_mirrors_parse_limits() {
        let limits = FrameLimits::default();

        assert!(validate_event(&bar_event(), &limits).is_ok());

        let long_name = "x".repeat(limits.max_name_len as usize + 1);
        let err = validate_event(&Event::new(long_name), &limits).unwrap_err();
        assert!(matches!(err, BroError::Frame(_)));

        let err = validate_event(&Event::new(""), &limits).unwrap_err();
        assert!(matches!(err, BroError::Frame(_)));

        let huge = "x".repeat(crate::value::codec::MAX_STRING_LEN as usize + 1);
        let err = validate_event(&Event::new("bar").arg(huge), &limits).unwrap_err();
        assert!(matches!(err, BroError::Frame(_)));
    }

    #[test]
    fn test_try_parse_reports_consumed_length() {
        let frame = build_frame(&bar_event());
        let mut extended = frame.to_vec();
        extended.extend_from_slice(&build_frame(&Event::new("next")));

        let (event, consumed) = try_parse_frame(&extended, &FrameLimits::default())
            .unwrap()
            .unwrap();
        assert_eq!(event.name(), "bar");
        assert_eq!(consumed, frame.len());
    }
}
