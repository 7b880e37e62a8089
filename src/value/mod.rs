//! Typed protocol values.
//!
//! [`BroValue`] is the tagged union exchanged as event parameters. The tag
//! determines the wire layout (see [`codec`]); values are immutable once
//! constructed.
//!
//! # Example
//!
//! ```
//! use broccoli_client::value::{BroValue, BroPort, BroTime};
//!
//! let port = BroValue::from(BroPort::tcp(80));
//! let text = BroValue::from("Text parameter");
//! assert_eq!(port.type_tag(), 12);
//! assert_eq!(text.type_tag(), 8);
//! ```

pub mod codec;

use std::fmt;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// A transport-layer port with its IP protocol number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroPort {
    /// Port number.
    pub number: u16,
    /// IP protocol number (6 = TCP, 17 = UDP, 1 = ICMP).
    pub protocol: u8,
}

impl BroPort {
    /// IP protocol number for TCP.
    pub const TCP: u8 = 6;
    /// IP protocol number for UDP.
    pub const UDP: u8 = 17;
    /// IP protocol number for ICMP.
    pub const ICMP: u8 = 1;

    /// Create a port with an explicit protocol number.
    pub fn new(number: u16, protocol: u8) -> Self {
        Self { number, protocol }
    }

    /// Create a TCP port.
    pub fn tcp(number: u16) -> Self {
        Self::new(number, Self::TCP)
    }

    /// Create a UDP port.
    pub fn udp(number: u16) -> Self {
        Self::new(number, Self::UDP)
    }
}

impl fmt::Display for BroPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol {
            Self::TCP => write!(f, "{}/tcp", self.number),
            Self::UDP => write!(f, "{}/udp", self.number),
            Self::ICMP => write!(f, "{}/icmp", self.number),
            other => write!(f, "{}/proto({})", self.number, other),
        }
    }
}

/// A protocol timestamp: seconds since the Unix epoch plus a fractional
/// part in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroTime {
    /// Whole seconds since the Unix epoch.
    pub seconds: u32,
    /// Fractional part, in nanoseconds (always < 1_000_000_000).
    pub fraction: u32,
}

impl BroTime {
    /// The current wall-clock time.
    pub fn now() -> Self {
        SystemTime::now().into()
    }

    /// This timestamp as fractional seconds since the epoch.
    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + self.fraction as f64 * 1e-9
    }
}

impl From<SystemTime> for BroTime {
    fn from(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            seconds: since_epoch.as_secs() as u32,
            fraction: since_epoch.subsec_nanos(),
        }
    }
}

impl fmt::Display for BroTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.as_secs_f64())
    }
}

/// An enumerated value: a numeric ordinal qualified by the name of its
/// enum type on the peer side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroEnum {
    /// Ordinal within the named enum type.
    pub ordinal: u32,
    /// Name of the enum type (e.g. `transport_proto`).
    pub type_name: String,
}

impl BroEnum {
    /// Create an enum value.
    pub fn new(ordinal: u32, type_name: impl Into<String>) -> Self {
        Self {
            ordinal,
            type_name: type_name.into(),
        }
    }
}

impl fmt::Display for BroEnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name, self.ordinal)
    }
}

/// An IP subnet: a base address plus a prefix width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroSubnet {
    /// Base address of the subnet.
    pub address: IpAddr,
    /// Prefix width in bits (<= 32 for IPv4, <= 128 for IPv6).
    pub prefix_len: u8,
}

impl BroSubnet {
    /// Create a subnet value.
    pub fn new(address: IpAddr, prefix_len: u8) -> Self {
        Self {
            address,
            prefix_len,
        }
    }
}

impl fmt::Display for BroSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

/// A single named field within a [`BroRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct BroField {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: BroValue,
}

/// An ordered collection of named values.
///
/// Field order is part of the value: two records with the same fields in
/// different order are distinct and encode to different bytes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BroRecord {
    fields: Vec<BroField>,
}

impl BroRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field. Returns `self` for chaining.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<BroValue>) -> Self {
        self.push(name, value);
        self
    }

    /// Append a field.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<BroValue>) {
        self.fields.push(BroField {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Look up a field by name (first match).
    pub fn get(&self, name: &str) -> Option<&BroValue> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.value)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over fields in order.
    pub fn iter(&self) -> impl Iterator<Item = &BroField> {
        self.fields.iter()
    }
}

impl fmt::Display for BroRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", field.name, field.value)?;
        }
        write!(f, "]")
    }
}

/// An ordered key/value mapping.
///
/// Entry order is part of the value, matching [`BroRecord`]: lookups scan
/// in insertion order and the encoding preserves it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BroTable {
    entries: Vec<(BroValue, BroValue)>,
}

impl BroTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Returns `self` for chaining.
    pub fn entry(mut self, key: impl Into<BroValue>, value: impl Into<BroValue>) -> Self {
        self.push(key, value);
        self
    }

    /// Append an entry.
    pub fn push(&mut self, key: impl Into<BroValue>, value: impl Into<BroValue>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Look up a value by key (first match).
    pub fn get(&self, key: &BroValue) -> Option<&BroValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in order.
    pub fn iter(&self) -> impl Iterator<Item = &(BroValue, BroValue)> {
        self.entries.iter()
    }
}

impl fmt::Display for BroTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} -> {}", key, value)?;
        }
        write!(f, "}}")
    }
}

/// A typed protocol value.
///
/// The variant determines the one-byte type tag and payload layout on the
/// wire; see [`codec`] for the exact encodings.
#[derive(Debug, Clone, PartialEq)]
pub enum BroValue {
    /// UTF-8 string.
    String(String),
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// Unsigned 64-bit counter.
    Count(u64),
    /// IEEE-754 double.
    Double(f64),
    /// Time interval in seconds.
    Interval(f64),
    /// IPv4 or IPv6 address.
    Address(IpAddr),
    /// IP subnet.
    Subnet(BroSubnet),
    /// Transport-layer port.
    Port(BroPort),
    /// Enumerated value.
    Enum(BroEnum),
    /// Timestamp.
    Time(BroTime),
    /// Ordered named fields.
    Record(BroRecord),
    /// Ordered key/value mapping.
    Table(BroTable),
    /// Ordered sequence of values.
    Vector(Vec<BroValue>),
    /// Collection of distinct values, in insertion order.
    Set(Vec<BroValue>),
}

impl fmt::Display for BroValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroValue::String(v) => write!(f, "{}", v),
            BroValue::Bool(v) => write!(f, "{}", v),
            BroValue::Int(v) => write!(f, "{}", v),
            BroValue::Count(v) => write!(f, "{}", v),
            BroValue::Double(v) => write!(f, "{}", v),
            BroValue::Interval(v) => write!(f, "{}s", v),
            BroValue::Address(v) => write!(f, "{}", v),
            BroValue::Subnet(v) => write!(f, "{}", v),
            BroValue::Port(v) => write!(f, "{}", v),
            BroValue::Enum(v) => write!(f, "{}", v),
            BroValue::Time(v) => write!(f, "{}", v),
            BroValue::Record(v) => write!(f, "{}", v),
            BroValue::Table(v) => write!(f, "{}", v),
            BroValue::Vector(v) => write_seq(f, "[", v, "]"),
            BroValue::Set(v) => write_seq(f, "{", v, "}"),
        }
    }
}

fn write_seq(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    values: &[BroValue],
    close: &str,
) -> fmt::Result {
    write!(f, "{}", open)?;
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", value)?;
    }
    write!(f, "{}", close)
}

impl From<&str> for BroValue {
    fn from(v: &str) -> Self {
        BroValue::String(v.to_string())
    }
}

impl From<String> for BroValue {
    fn from(v: String) -> Self {
        BroValue::String(v)
    }
}

impl From<bool> for BroValue {
    fn from(v: bool) -> Self {
        BroValue::Bool(v)
    }
}

impl From<i64> for BroValue {
    fn from(v: i64) -> Self {
        BroValue::Int(v)
    }
}

impl From<u64> for BroValue {
    fn from(v: u64) -> Self {
        BroValue::Count(v)
    }
}

impl From<f64> for BroValue {
    fn from(v: f64) -> Self {
        BroValue::Double(v)
    }
}

impl From<IpAddr> for BroValue {
    fn from(v: IpAddr) -> Self {
        BroValue::Address(v)
    }
}

impl From<BroSubnet> for BroValue {
    fn from(v: BroSubnet) -> Self {
        BroValue::Subnet(v)
    }
}

impl From<BroPort> for BroValue {
    fn from(v: BroPort) -> Self {
        BroValue::Port(v)
    }
}

impl From<BroEnum> for BroValue {
    fn from(v: BroEnum) -> Self {
        BroValue::Enum(v)
    }
}

impl From<BroTime> for BroValue {
    fn from(v: BroTime) -> Self {
        BroValue::Time(v)
    }
}

impl From<BroRecord> for BroValue {
    fn from(v: BroRecord) -> Self {
        BroValue::Record(v)
    }
}

impl From<BroTable> for BroValue {
    fn from(v: BroTable) -> Self {
        BroValue::Table(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_constructors() {
        assert_eq!(BroPort::tcp(80), BroPort::new(80, 6));
        assert_eq!(BroPort::udp(53), BroPort::new(53, 17));
    }

    #[test]
    fn test_port_display() {
        assert_eq!(BroPort::tcp(80).to_string(), "80/tcp");
        assert_eq!(BroPort::udp(53).to_string(), "53/udp");
        assert_eq!(BroPort::new(7, 99).to_string(), "7/proto(99)");
    }

    #[test]
    fn test_time_from_system_time() {
        let time = BroTime::now();
        assert!(time.seconds > 1_700_000_000);
        assert!(time.fraction < 1_000_000_000);
    }

    #[test]
    fn test_time_as_secs_f64() {
        let time = BroTime {
            seconds: 100,
            fraction: 500_000_000,
        };
        assert!((time.as_secs_f64() - 100.5).abs() < 1e-9);
    }

    #[test]
    fn test_record_field_order_and_lookup() {
        let record = BroRecord::new()
            .field("host", "example.org")
            .field("port", BroPort::tcp(443));

        assert_eq!(record.len(), 2);
        assert_eq!(
            record.get("host"),
            Some(&BroValue::String("example.org".to_string()))
        );
        assert_eq!(record.get("port"), Some(&BroValue::Port(BroPort::tcp(443))));
        assert_eq!(record.get("missing"), None);

        let names: Vec<_> = record.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["host", "port"]);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(BroValue::from("hi").to_string(), "hi");
        assert_eq!(BroValue::Bool(true).to_string(), "true");
        assert_eq!(
            BroValue::Enum(BroEnum::new(2, "transport_proto")).to_string(),
            "transport_proto(2)"
        );
        let subnet = BroSubnet::new("10.0.0.0".parse().unwrap(), 8);
        assert_eq!(BroValue::Subnet(subnet).to_string(), "10.0.0.0/8");
    }

    #[test]
    fn test_table_entry_order_and_lookup() {
        let table = BroTable::new()
            .entry("a", 1u64)
            .entry(BroPort::tcp(80), "http")
            .entry("a", 2u64); // duplicate key: first match wins on lookup

        assert_eq!(table.len(), 3);
        assert_eq!(
            table.get(&BroValue::from("a")),
            Some(&BroValue::Count(1))
        );
        assert_eq!(
            table.get(&BroValue::Port(BroPort::tcp(80))),
            Some(&BroValue::String("http".to_string()))
        );
        assert_eq!(table.get(&BroValue::Bool(true)), None);
    }

    #[test]
    fn test_container_display() {
        let vector = BroValue::Vector(vec![BroValue::Int(1), BroValue::Int(2)]);
        assert_eq!(vector.to_string(), "[1, 2]");

        let set = BroValue::Set(vec![BroValue::from("a"), BroValue::from("b")]);
        assert_eq!(set.to_string(), "{a, b}");

        let table = BroValue::Table(BroTable::new().entry("k", 9u64));
        assert_eq!(table.to_string(), "{k -> 9}");
    }

    #[test]
    fn test_from_conversions() {
        assert_eq!(BroValue::from(5i64), BroValue::Int(5));
        assert_eq!(BroValue::from(5u64), BroValue::Count(5));
        assert_eq!(BroValue::from(1.5f64), BroValue::Double(1.5));
        let addr: IpAddr = "192.168.1.1".parse().unwrap();
        assert_eq!(BroValue::from(addr), BroValue::Address(addr));
    }
}
