//! W3C `traceparent` codec.
//!
//! # Format
//! ```text
//! 00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01
//! ^^ ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^ ^^^^^^^^^^^^^^^^ ^^
//! |  trace id (16 bytes)              span id (8 bytes) flags
//! version
//! ```
//!
//! # Design Decisions
//! - Fixed width, no optional fields: `format` has exactly one output per input
//! - Uppercase hex is rejected rather than normalized
//! - All-zero ids are invalid per W3C and rejected on decode

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Serialize, Serializer};

use crate::propagation::error::PropagationError;

/// Header carrying the trace id, parent span id and flags.
pub const TRACEPARENT_HEADER: &str = "traceparent";

const VERSION: &str = "00";

/// 16-byte trace identifier, shared by every hop of one trace.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId([u8; 16]);

impl TraceId {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Generate a random, non-zero trace id.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let bytes: [u8; 16] = rng.gen();
            if bytes != [0; 16] {
                return Self(bytes);
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.0 != [0; 16]
    }
}

/// 8-byte span identifier, fresh for every hop.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId([u8; 8]);

impl SpanId {
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Generate a random, non-zero span id.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let bytes: [u8; 8] = rng.gen();
            if bytes != [0; 8] {
                return Self(bytes);
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.0 != [0; 8]
    }
}

macro_rules! hex_id_impls {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($ty), "({})"), self)
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }
    };
}

hex_id_impls!(TraceId);
hex_id_impls!(SpanId);

/// Trace flags byte. Bit 0 is the sampling decision.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TraceFlags(u8);

impl TraceFlags {
    pub const SAMPLED: TraceFlags = TraceFlags(0x01);
    pub const NOT_SAMPLED: TraceFlags = TraceFlags(0x00);

    pub const fn new(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_sampled(&self) -> bool {
        self.0 & Self::SAMPLED.0 != 0
    }

    /// Return a copy with the sampled bit set or cleared, other bits kept.
    pub fn with_sampled(self, sampled: bool) -> Self {
        if sampled {
            Self(self.0 | Self::SAMPLED.0)
        } else {
            Self(self.0 & !Self::SAMPLED.0)
        }
    }
}

impl fmt::Debug for TraceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceFlags({:02x})", self.0)
    }
}

/// Decoded `traceparent` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceParent {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub flags: TraceFlags,
}

impl TraceParent {
    pub fn new(trace_id: TraceId, span_id: SpanId, flags: TraceFlags) -> Self {
        Self {
            trace_id,
            span_id,
            flags,
        }
    }

    /// Same trace and flags, different span id: the header for the next hop.
    pub fn with_span_id(self, span_id: SpanId) -> Self {
        Self { span_id, ..self }
    }

    pub fn is_sampled(&self) -> bool {
        self.flags.is_sampled()
    }
}

impl fmt::Display for TraceParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{:02x}",
            VERSION, self.trace_id, self.span_id, self.flags.0
        )
    }
}

impl FromStr for TraceParent {
    type Err = PropagationError;

    fn from_str(header: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = header.trim().split('-').collect();
        if fields.len() != 4 {
            return Err(PropagationError::FieldCount(fields.len()));
        }

        if fields[0] != VERSION {
            return Err(PropagationError::UnsupportedVersion(fields[0].to_string()));
        }

        let mut trace_id = [0u8; 16];
        decode_hex_field("trace-id", fields[1], &mut trace_id)?;
        let mut span_id = [0u8; 8];
        decode_hex_field("span-id", fields[2], &mut span_id)?;
        let mut flags = [0u8; 1];
        decode_hex_field("trace-flags", fields[3], &mut flags)?;

        let trace_id = TraceId(trace_id);
        if !trace_id.is_valid() {
            return Err(PropagationError::ZeroId("trace-id"));
        }
        let span_id = SpanId(span_id);
        if !span_id.is_valid() {
            return Err(PropagationError::ZeroId("span-id"));
        }

        Ok(TraceParent {
            trace_id,
            span_id,
            flags: TraceFlags(flags[0]),
        })
    }
}

fn decode_hex_field(
    field: &'static str,
    value: &str,
    out: &mut [u8],
) -> Result<(), PropagationError> {
    let expected = out.len() * 2;
    let lowercase_hex = value
        .bytes()
        .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if value.len() != expected || !lowercase_hex {
        return Err(PropagationError::InvalidHex {
            field,
            expected,
            actual: value.to_string(),
        });
    }
    hex::decode_to_slice(value, out).map_err(|_| PropagationError::InvalidHex {
        field,
        expected,
        actual: value.to_string(),
    })
}

/// Decode a `traceparent` header value.
pub fn parse(header: &str) -> Result<(TraceId, SpanId, TraceFlags), PropagationError> {
    let parent: TraceParent = header.parse()?;
    Ok((parent.trace_id, parent.span_id, parent.flags))
}

/// Encode the canonical `traceparent` header value.
pub fn format(trace_id: TraceId, span_id: SpanId, flags: TraceFlags) -> String {
    TraceParent::new(trace_id, span_id, flags).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_parse_valid_header() {
        let (trace_id, span_id, flags) = parse(HEADER).unwrap();
        assert_eq!(trace_id.to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(span_id.to_string(), "00f067aa0ba902b7");
        assert!(flags.is_sampled());
    }

    #[test]
    fn test_reencode_is_byte_identical() {
        let parent: TraceParent = HEADER.parse().unwrap();
        assert_eq!(parent.to_string(), HEADER);
    }

    #[test]
    fn test_round_trip_random_ids() {
        for bits in [0x00, 0x01, 0x03] {
            let trace_id = TraceId::random();
            let span_id = SpanId::random();
            let flags = TraceFlags::new(bits);
            let header = format(trace_id, span_id, flags);
            assert_eq!(parse(&header).unwrap(), (trace_id, span_id, flags));
        }
    }

    #[test]
    fn test_next_hop_keeps_trace_and_flags() {
        let parent: TraceParent = HEADER.parse().unwrap();
        let next = parent.with_span_id(SpanId::random());
        let encoded = next.to_string();
        assert!(encoded.starts_with("00-4bf92f3577b34da6a3ce929d0e0e4736-"));
        assert!(encoded.ends_with("-01"));
        assert_ne!(encoded, HEADER);
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        assert_eq!(
            parse("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7"),
            Err(PropagationError::FieldCount(3))
        );
        assert!(matches!(
            parse(&format!("{}-extra", HEADER)),
            Err(PropagationError::FieldCount(5))
        ));
        assert!(matches!(parse(""), Err(PropagationError::FieldCount(1))));
    }

    #[test]
    fn test_rejects_non_hex_and_wrong_length() {
        assert!(matches!(
            parse("00-4bf92f3577b34da6a3ce929d0e0e473z-00f067aa0ba902b7-01"),
            Err(PropagationError::InvalidHex { field: "trace-id", .. })
        ));
        assert!(matches!(
            parse("00-4bf92f3577b34da6a3ce929d0e0e47-00f067aa0ba902b7-01"),
            Err(PropagationError::InvalidHex { field: "trace-id", .. })
        ));
        assert!(matches!(
            parse("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902-01"),
            Err(PropagationError::InvalidHex { field: "span-id", .. })
        ));
        assert!(matches!(
            parse("00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01"),
            Err(PropagationError::InvalidHex { field: "trace-id", .. })
        ));
        assert!(matches!(
            parse("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-1"),
            Err(PropagationError::InvalidHex { field: "trace-flags", .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_version_and_zero_ids() {
        assert!(matches!(
            parse("ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"),
            Err(PropagationError::UnsupportedVersion(_))
        ));
        assert_eq!(
            parse("00-00000000000000000000000000000000-00f067aa0ba902b7-01"),
            Err(PropagationError::ZeroId("trace-id"))
        );
        assert_eq!(
            parse("00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01"),
            Err(PropagationError::ZeroId("span-id"))
        );
    }

    #[test]
    fn test_flags_sampled_bit() {
        let flags = TraceFlags::new(0x02);
        assert!(!flags.is_sampled());
        let sampled = flags.with_sampled(true);
        assert_eq!(sampled.bits(), 0x03);
        assert_eq!(sampled.with_sampled(false).bits(), 0x02);
    }
}
