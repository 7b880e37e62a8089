//! Binary encoding and decoding of typed values.
//!
//! Each value encodes as a one-byte type tag followed by a type-specific
//! payload, all multi-byte integers in network byte order:
//!
//! ```text
//! String    u32 length + UTF-8 bytes
//! Bool      1 byte (0 = false, nonzero = true)
//! Int       i64 (8 bytes)
//! Count     u64 (8 bytes)
//! Double    f64 bit pattern (8 bytes)
//! Interval  f64 bit pattern (8 bytes)
//! Address   family flag u8 (4 or 6) + 4 or 16 address bytes
//! Subnet    family flag u8 + address bytes + prefix width u8
//! Port      number u16 + IP protocol number u8
//! Enum      ordinal u32 + type name (length-prefixed string)
//! Time      seconds u32 + fraction u32 (nanoseconds)
//! Record    field count u32, then per field: name string + tagged value
//! Table     entry count u32, then per entry: tagged key + tagged value
//! Vector    element count u32, then tagged elements
//! Set       element count u32, then tagged elements
//! ```
//!
//! Decoding is total: every byte sequence either decodes to a valid value
//! or fails with an explicit error. There are no reads past buffer bounds.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, Bytes, BytesMut};

use super::{BroEnum, BroField, BroPort, BroRecord, BroSubnet, BroTable, BroTime, BroValue};
use crate::error::{BroError, Result};

/// One-byte type tags. Ordinals follow the Bro type system.
pub mod tag {
    /// Boolean.
    pub const BOOL: u8 = 1;
    /// Signed 64-bit integer.
    pub const INT: u8 = 2;
    /// Unsigned 64-bit counter.
    pub const COUNT: u8 = 3;
    /// IEEE-754 double.
    pub const DOUBLE: u8 = 5;
    /// Timestamp.
    pub const TIME: u8 = 6;
    /// Interval in seconds.
    pub const INTERVAL: u8 = 7;
    /// UTF-8 string.
    pub const STRING: u8 = 8;
    /// Enumerated value.
    pub const ENUM: u8 = 10;
    /// Transport-layer port.
    pub const PORT: u8 = 12;
    /// IP address.
    pub const ADDR: u8 = 13;
    /// IP subnet.
    pub const SUBNET: u8 = 14;
    /// Ordered key/value mapping.
    pub const TABLE: u8 = 16;
    /// Ordered named fields.
    pub const RECORD: u8 = 18;
    /// Ordered sequence of values.
    pub const VECTOR: u8 = 22;
    /// Collection of distinct values.
    pub const SET: u8 = 25;
}

/// Address family flag for IPv4 payloads.
const FAMILY_V4: u8 = 4;
/// Address family flag for IPv6 payloads.
const FAMILY_V6: u8 = 6;

/// Maximum length of any length-prefixed string, in bytes.
pub const MAX_STRING_LEN: u32 = 1 << 20;

/// Maximum number of fields in a single record.
pub const MAX_RECORD_FIELDS: u32 = 1024;

/// Maximum number of elements in a table, vector, or set.
pub const MAX_CONTAINER_ELEMS: u32 = 65_536;

/// Maximum container nesting depth.
pub const MAX_NESTING_DEPTH: u32 = 16;

/// Internal decode failure, before mapping to [`BroError`].
///
/// `Incomplete` is recoverable when reading from a stream (more bytes may
/// arrive); `Corrupt` input can never become valid.
#[derive(Debug)]
pub(crate) enum CodecError {
    /// More bytes are needed.
    Incomplete,
    /// The input is structurally invalid.
    Corrupt(String),
}

impl CodecError {
    /// Map to a `DecodeError`, treating truncation as fatal.
    pub(crate) fn into_decode_error(self) -> BroError {
        match self {
            CodecError::Incomplete => BroError::Decode("unexpected end of input".to_string()),
            CodecError::Corrupt(msg) => BroError::Decode(msg),
        }
    }
}

/// Bounds-checked reader over a byte slice.
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Incomplete);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn get_u8(&mut self) -> std::result::Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn get_u16(&mut self) -> std::result::Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn get_u32(&mut self) -> std::result::Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn get_u64(&mut self) -> std::result::Result<u64, CodecError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub(crate) fn get_i64(&mut self) -> std::result::Result<i64, CodecError> {
        Ok(self.get_u64()? as i64)
    }

    pub(crate) fn get_f64(&mut self) -> std::result::Result<f64, CodecError> {
        Ok(f64::from_bits(self.get_u64()?))
    }

    /// Read a length-prefixed UTF-8 string, rejecting declared lengths
    /// above `max`.
    pub(crate) fn get_string(
        &mut self,
        max: u32,
        what: &str,
    ) -> std::result::Result<String, CodecError> {
        let len = self.get_u32()?;
        if len > max {
            return Err(CodecError::Corrupt(format!(
                "{} length {} exceeds maximum {}",
                what, len, max
            )));
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CodecError::Corrupt(format!("{} is not valid UTF-8", what)))
    }
}

/// Append a length-prefixed UTF-8 string.
///
/// Does not enforce [`MAX_STRING_LEN`]; callers that build frames for a
/// peer run [`validate_value`] first so the encoding stays decodable.
pub(crate) fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Check that `value` stays within the caps the decode side enforces.
///
/// An oversized string or container would encode fine locally and then
/// fatally kill the receiving peer's connection; outbound paths reject
/// such values before they reach the wire.
pub(crate) fn validate_value(value: &BroValue, depth: u32) -> std::result::Result<(), String> {
    if depth > MAX_NESTING_DEPTH {
        return Err(format!(
            "container nesting exceeds maximum depth {}",
            MAX_NESTING_DEPTH
        ));
    }

    let check_string = |s: &str, what: &str| {
        if s.len() > MAX_STRING_LEN as usize {
            Err(format!(
                "{} length {} exceeds maximum {}",
                what,
                s.len(),
                MAX_STRING_LEN
            ))
        } else {
            Ok(())
        }
    };

    match value {
        BroValue::String(s) => check_string(s, "string"),
        BroValue::Enum(e) => check_string(&e.type_name, "enum type name"),
        BroValue::Record(r) => {
            if r.len() > MAX_RECORD_FIELDS as usize {
                return Err(format!(
                    "record field count {} exceeds maximum {}",
                    r.len(),
                    MAX_RECORD_FIELDS
                ));
            }
            for BroField { name, value } in r.iter() {
                check_string(name, "record field name")?;
                validate_value(value, depth + 1)?;
            }
            Ok(())
        }
        BroValue::Table(t) => {
            if t.len() > MAX_CONTAINER_ELEMS as usize {
                return Err(format!(
                    "table element count {} exceeds maximum {}",
                    t.len(),
                    MAX_CONTAINER_ELEMS
                ));
            }
            for (key, value) in t.iter() {
                validate_value(key, depth + 1)?;
                validate_value(value, depth + 1)?;
            }
            Ok(())
        }
        BroValue::Vector(v) | BroValue::Set(v) => {
            if v.len() > MAX_CONTAINER_ELEMS as usize {
                return Err(format!(
                    "container element count {} exceeds maximum {}",
                    v.len(),
                    MAX_CONTAINER_ELEMS
                ));
            }
            for value in v {
                validate_value(value, depth + 1)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn put_address(buf: &mut BytesMut, address: &IpAddr) {
    match address {
        IpAddr::V4(v4) => {
            buf.put_u8(FAMILY_V4);
            buf.put_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            buf.put_u8(FAMILY_V6);
            buf.put_slice(&v6.octets());
        }
    }
}

fn get_address(cur: &mut Cursor<'_>) -> std::result::Result<IpAddr, CodecError> {
    match cur.get_u8()? {
        FAMILY_V4 => {
            let b = cur.take(4)?;
            Ok(IpAddr::V4(Ipv4Addr::new(b[0], b[1], b[2], b[3])))
        }
        FAMILY_V6 => {
            let b = cur.take(16)?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(b);
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        other => Err(CodecError::Corrupt(format!(
            "unrecognized address family flag {}",
            other
        ))),
    }
}

/// Decode one tagged value starting at the cursor position.
pub(crate) fn decode_value(
    cur: &mut Cursor<'_>,
    depth: u32,
) -> std::result::Result<BroValue, CodecError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(CodecError::Corrupt(format!(
            "container nesting exceeds maximum depth {}",
            MAX_NESTING_DEPTH
        )));
    }

    let type_tag = cur.get_u8()?;
    match type_tag {
        tag::BOOL => Ok(BroValue::Bool(cur.get_u8()? != 0)),
        tag::INT => Ok(BroValue::Int(cur.get_i64()?)),
        tag::COUNT => Ok(BroValue::Count(cur.get_u64()?)),
        tag::DOUBLE => Ok(BroValue::Double(cur.get_f64()?)),
        tag::INTERVAL => Ok(BroValue::Interval(cur.get_f64()?)),
        tag::STRING => Ok(BroValue::String(cur.get_string(MAX_STRING_LEN, "string")?)),
        tag::ENUM => {
            let ordinal = cur.get_u32()?;
            let type_name = cur.get_string(MAX_STRING_LEN, "enum type name")?;
            Ok(BroValue::Enum(BroEnum { ordinal, type_name }))
        }
        tag::PORT => {
            let number = cur.get_u16()?;
            let protocol = cur.get_u8()?;
            Ok(BroValue::Port(BroPort { number, protocol }))
        }
        tag::ADDR => Ok(BroValue::Address(get_address(cur)?)),
        tag::SUBNET => {
            let address = get_address(cur)?;
            let prefix_len = cur.get_u8()?;
            let max_prefix = if address.is_ipv4() { 32 } else { 128 };
            if prefix_len > max_prefix {
                return Err(CodecError::Corrupt(format!(
                    "subnet prefix width {} exceeds {}",
                    prefix_len, max_prefix
                )));
            }
            Ok(BroValue::Subnet(BroSubnet {
                address,
                prefix_len,
            }))
        }
        tag::TIME => {
            let seconds = cur.get_u32()?;
            let fraction = cur.get_u32()?;
            Ok(BroValue::Time(BroTime { seconds, fraction }))
        }
        tag::RECORD => {
            let count = cur.get_u32()?;
            if count > MAX_RECORD_FIELDS {
                return Err(CodecError::Corrupt(format!(
                    "record field count {} exceeds maximum {}",
                    count, MAX_RECORD_FIELDS
                )));
            }
            let mut record = BroRecord::new();
            for _ in 0..count {
                let name = cur.get_string(MAX_STRING_LEN, "record field name")?;
                let value = decode_value(cur, depth + 1)?;
                record.push(name, value);
            }
            Ok(BroValue::Record(record))
        }
        tag::TABLE => {
            let count = container_count(cur, "table")?;
            let mut table = BroTable::new();
            for _ in 0..count {
                let key = decode_value(cur, depth + 1)?;
                let value = decode_value(cur, depth + 1)?;
                table.push(key, value);
            }
            Ok(BroValue::Table(table))
        }
        tag::VECTOR => Ok(BroValue::Vector(decode_seq(cur, depth, "vector")?)),
        tag::SET => Ok(BroValue::Set(decode_seq(cur, depth, "set")?)),
        other => Err(CodecError::Corrupt(format!(
            "unrecognized type tag {}",
            other
        ))),
    }
}

fn container_count(cur: &mut Cursor<'_>, what: &str) -> std::result::Result<u32, CodecError> {
    let count = cur.get_u32()?;
    if count > MAX_CONTAINER_ELEMS {
        return Err(CodecError::Corrupt(format!(
            "{} element count {} exceeds maximum {}",
            what, count, MAX_CONTAINER_ELEMS
        )));
    }
    Ok(count)
}

fn decode_seq(
    cur: &mut Cursor<'_>,
    depth: u32,
    what: &str,
) -> std::result::Result<Vec<BroValue>, CodecError> {
    let count = container_count(cur, what)?;
    let mut values = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        values.push(decode_value(cur, depth + 1)?);
    }
    Ok(values)
}

impl BroValue {
    /// The one-byte type tag this value encodes with.
    pub fn type_tag(&self) -> u8 {
        match self {
            BroValue::Bool(_) => tag::BOOL,
            BroValue::Int(_) => tag::INT,
            BroValue::Count(_) => tag::COUNT,
            BroValue::Double(_) => tag::DOUBLE,
            BroValue::Interval(_) => tag::INTERVAL,
            BroValue::String(_) => tag::STRING,
            BroValue::Enum(_) => tag::ENUM,
            BroValue::Port(_) => tag::PORT,
            BroValue::Address(_) => tag::ADDR,
            BroValue::Subnet(_) => tag::SUBNET,
            BroValue::Time(_) => tag::TIME,
            BroValue::Record(_) => tag::RECORD,
            BroValue::Table(_) => tag::TABLE,
            BroValue::Vector(_) => tag::VECTOR,
            BroValue::Set(_) => tag::SET,
        }
    }

    /// Append this value's tagged encoding to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.type_tag());
        match self {
            BroValue::Bool(v) => buf.put_u8(u8::from(*v)),
            BroValue::Int(v) => buf.put_i64(*v),
            BroValue::Count(v) => buf.put_u64(*v),
            BroValue::Double(v) | BroValue::Interval(v) => buf.put_u64(v.to_bits()),
            BroValue::String(v) => put_string(buf, v),
            BroValue::Enum(v) => {
                buf.put_u32(v.ordinal);
                put_string(buf, &v.type_name);
            }
            BroValue::Port(v) => {
                buf.put_u16(v.number);
                buf.put_u8(v.protocol);
            }
            BroValue::Address(v) => put_address(buf, v),
            BroValue::Subnet(v) => {
                put_address(buf, &v.address);
                buf.put_u8(v.prefix_len);
            }
            BroValue::Time(v) => {
                buf.put_u32(v.seconds);
                buf.put_u32(v.fraction);
            }
            BroValue::Record(v) => {
                buf.put_u32(v.len() as u32);
                for BroField { name, value } in v.iter() {
                    put_string(buf, name);
                    value.encode_into(buf);
                }
            }
            BroValue::Table(v) => {
                buf.put_u32(v.len() as u32);
                for (key, value) in v.iter() {
                    key.encode_into(buf);
                    value.encode_into(buf);
                }
            }
            BroValue::Vector(v) | BroValue::Set(v) => {
                buf.put_u32(v.len() as u32);
                for value in v {
                    value.encode_into(buf);
                }
            }
        }
    }

    /// This value's tagged encoding as a standalone buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode one tagged value from `buf` starting at `*pos`, advancing
    /// `*pos` past the consumed bytes.
    ///
    /// # Errors
    ///
    /// Fails with a `DecodeError` when the tag is unrecognized or the
    /// remaining bytes are insufficient for the declared length.
    pub fn decode(buf: &[u8], pos: &mut usize) -> Result<BroValue> {
        let mut cur = Cursor::at(buf, *pos);
        let value = decode_value(&mut cur, 0).map_err(CodecError::into_decode_error)?;
        *pos = cur.position();
        Ok(value)
    }
}
