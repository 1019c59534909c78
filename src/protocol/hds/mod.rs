//! Tagged binary value format carried by HomeKit Data Stream messages
//!
//! Every value starts with a tag byte. Small integers and short strings are
//! inlined in the tag; repeated scalars can be replaced by a back-reference
//! into a window of previously written values.

pub mod decode;
pub mod encode;

#[cfg(test)]
mod tests;

pub use decode::{HdsDecodeError, HdsDecoder, decode};
pub use encode::{HdsEncodeError, HdsEncoder, encode};

use std::collections::BTreeMap;
use uuid::Uuid;

/// Dictionary type used by [`HdsValue::Dictionary`]
pub type HdsDict = BTreeMap<String, HdsValue>;

/// Number of scalars remembered for back-references
pub const BACK_REFERENCE_WINDOW: usize = 48;

/// Maximum container nesting accepted by the decoder
pub const MAX_DEPTH: usize = 32;

/// Wire tags
#[allow(missing_docs)]
pub mod tags {
    pub const TRUE: u8 = 0x01;
    pub const FALSE: u8 = 0x02;
    pub const TERMINATOR: u8 = 0x03;
    pub const NULL: u8 = 0x04;
    pub const UUID: u8 = 0x05;
    pub const DATE: u8 = 0x06;
    pub const INTEGER_MINUS_ONE: u8 = 0x07;
    pub const INTEGER_RANGE_START: u8 = 0x08;
    pub const INTEGER_RANGE_STOP: u8 = 0x2F;
    pub const INT8: u8 = 0x30;
    pub const INT16LE: u8 = 0x31;
    pub const INT32LE: u8 = 0x32;
    pub const INT64LE: u8 = 0x33;
    pub const FLOAT32LE: u8 = 0x35;
    pub const FLOAT64LE: u8 = 0x36;
    pub const UTF8_LENGTH_START: u8 = 0x40;
    pub const UTF8_LENGTH_STOP: u8 = 0x60;
    pub const UTF8_LENGTH8: u8 = 0x61;
    pub const UTF8_LENGTH16LE: u8 = 0x62;
    pub const UTF8_LENGTH32LE: u8 = 0x63;
    pub const UTF8_LENGTH64LE: u8 = 0x64;
    pub const UTF8_NULL_TERMINATED: u8 = 0x6F;
    pub const DATA_LENGTH_START: u8 = 0x70;
    pub const DATA_LENGTH_STOP: u8 = 0x90;
    pub const DATA_LENGTH8: u8 = 0x91;
    pub const DATA_LENGTH16LE: u8 = 0x92;
    pub const DATA_LENGTH32LE: u8 = 0x93;
    pub const DATA_LENGTH64LE: u8 = 0x94;
    pub const DATA_TERMINATED: u8 = 0x9F;
    pub const COMPRESSION_START: u8 = 0xA0;
    pub const COMPRESSION_STOP: u8 = 0xCF;
    pub const ARRAY_LENGTH_START: u8 = 0xD0;
    pub const ARRAY_LENGTH_STOP: u8 = 0xDE;
    pub const ARRAY_TERMINATED: u8 = 0xDF;
    pub const DICTIONARY_LENGTH_START: u8 = 0xE0;
    pub const DICTIONARY_LENGTH_STOP: u8 = 0xEE;
    pub const DICTIONARY_TERMINATED: u8 = 0xEF;
}

/// A data stream value
#[derive(Debug, Clone, PartialEq)]
pub enum HdsValue {
    /// Null
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer up to 64 bits
    Integer(i64),
    /// Floating point number
    Float(f64),
    /// Seconds since 2001-01-01 00:00:00 UTC
    Date(f64),
    /// 16-byte UUID
    Uuid(Uuid),
    /// UTF-8 string
    String(String),
    /// Binary data
    Data(Vec<u8>),
    /// Array of values
    Array(Vec<HdsValue>),
    /// Dictionary with string keys
    Dictionary(HdsDict),
}

impl HdsValue {
    /// Empty dictionary
    #[must_use]
    pub fn empty_dict() -> Self {
        Self::Dictionary(HdsDict::new())
    }

    /// Try to get as boolean
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as f64
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) | Self::Date(f) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get as string reference
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as byte slice
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Data(d) => Some(d),
            _ => None,
        }
    }

    /// Try to get as array reference
    #[must_use]
    pub fn as_array(&self) -> Option<&[HdsValue]> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Try to get as dictionary reference
    #[must_use]
    pub fn as_dict(&self) -> Option<&HdsDict> {
        match self {
            Self::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// Look up a key if this is a dictionary
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&HdsValue> {
        self.as_dict().and_then(|d| d.get(key))
    }

    /// Scalars eligible for the back-reference window
    fn is_compressible(&self) -> bool {
        matches!(
            self,
            Self::Integer(_)
                | Self::Float(_)
                | Self::Date(_)
                | Self::Uuid(_)
                | Self::String(_)
                | Self::Data(_)
        )
    }

    /// Structural equality that tells `0.0` from `-0.0`
    fn same_scalar(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) | (Self::Date(a), Self::Date(b)) => {
                a.to_bits() == b.to_bits()
            }
            (a, b) => a == b,
        }
    }
}

impl From<bool> for HdsValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for HdsValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for HdsValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for HdsValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for HdsValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for HdsValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Data(v)
    }
}

impl From<HdsDict> for HdsValue {
    fn from(v: HdsDict) -> Self {
        Self::Dictionary(v)
    }
}

impl From<Vec<HdsValue>> for HdsValue {
    fn from(v: Vec<HdsValue>) -> Self {
        Self::Array(v)
    }
}
