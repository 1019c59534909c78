//! TLV8 encoding for HAP control messages
//!
//! Records are `[type:u8][len:u8][value]`. Values longer than 255 bytes are split
//! into consecutive records of the same type and joined again on decode.

use std::collections::HashMap;
use thiserror::Error;

#[cfg(test)]
mod tests;

/// Largest value carried by a single record
pub const MAX_FRAGMENT: usize = 255;

/// TLV type codes used by pairing and pairing management
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    /// Method to use (pairing method)
    Method = 0x00,
    /// Pairing identifier
    Identifier = 0x01,
    /// Salt for SRP
    Salt = 0x02,
    /// Public key
    PublicKey = 0x03,
    /// Proof (M1/M2 in SRP)
    Proof = 0x04,
    /// Encrypted data
    EncryptedData = 0x05,
    /// Pairing state/sequence number
    State = 0x06,
    /// Error code
    Error = 0x07,
    /// Retry delay
    RetryDelay = 0x08,
    /// Certificate
    Certificate = 0x09,
    /// Signature
    Signature = 0x0A,
    /// Permissions
    Permissions = 0x0B,
    /// Fragment data
    FragmentData = 0x0C,
    /// Fragment last
    FragmentLast = 0x0D,
    /// Session ID
    SessionID = 0x0E,
    /// Flags
    Flags = 0x13,
    /// Separator (empty value, used to separate items)
    Separator = 0xFF,
}

impl TlvType {
    /// Create from byte value
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Method),
            0x01 => Some(Self::Identifier),
            0x02 => Some(Self::Salt),
            0x03 => Some(Self::PublicKey),
            0x04 => Some(Self::Proof),
            0x05 => Some(Self::EncryptedData),
            0x06 => Some(Self::State),
            0x07 => Some(Self::Error),
            0x08 => Some(Self::RetryDelay),
            0x09 => Some(Self::Certificate),
            0x0A => Some(Self::Signature),
            0x0B => Some(Self::Permissions),
            0x0C => Some(Self::FragmentData),
            0x0D => Some(Self::FragmentLast),
            0x0E => Some(Self::SessionID),
            0x13 => Some(Self::Flags),
            0xFF => Some(Self::Separator),
            _ => None,
        }
    }
}

impl From<TlvType> for u8 {
    fn from(t: TlvType) -> Self {
        t as u8
    }
}

/// TLV encoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TlvError {
    /// A record header or value runs past the end of the buffer
    #[error("truncated record at offset {offset}")]
    Truncated {
        /// Offset of the offending record
        offset: usize,
    },

    /// A required type was absent
    #[error("missing required field: 0x{0:02x}")]
    MissingField(u8),

    /// A value had an unexpected size or content
    #[error("invalid value for type 0x{0:02x}")]
    InvalidValue(u8),

    /// List decoding saw a record before the first entry start
    #[error("record 0x{0:02x} appears before the first list entry")]
    UninitializedEntry(u8),

    /// List decoding saw a non-consecutive repeat of a type within one entry
    #[error("duplicated record 0x{0:02x} within a list entry")]
    DuplicateEntry(u8),
}

/// One raw record as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvRecord<'a> {
    /// Type byte
    pub tlv_type: u8,
    /// Value bytes (at most 255)
    pub value: &'a [u8],
}

/// Iterate raw records, failing on the first truncated one
pub fn records(data: &[u8]) -> impl Iterator<Item = Result<TlvRecord<'_>, TlvError>> + '_ {
    let mut pos = 0;
    std::iter::from_fn(move || {
        if pos >= data.len() {
            return None;
        }
        let offset = pos;
        if pos + 2 > data.len() {
            pos = data.len();
            return Some(Err(TlvError::Truncated { offset }));
        }
        let tlv_type = data[pos];
        let length = data[pos + 1] as usize;
        if pos + 2 + length > data.len() {
            pos = data.len();
            return Some(Err(TlvError::Truncated { offset }));
        }
        let value = &data[pos + 2..pos + 2 + length];
        pos += 2 + length;
        Some(Ok(TlvRecord { tlv_type, value }))
    })
}

/// TLV encoder
#[derive(Debug, Default, Clone)]
pub struct TlvEncoder {
    buffer: Vec<u8>,
}

impl TlvEncoder {
    /// Create a new encoder
    #[must_use]
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Add a TLV item, fragmenting values over 255 bytes
    #[must_use]
    pub fn add(mut self, tlv_type: impl Into<u8>, value: &[u8]) -> Self {
        let tlv_type = tlv_type.into();
        if value.is_empty() {
            self.buffer.extend_from_slice(&[tlv_type, 0]);
            return self;
        }
        for chunk in value.chunks(MAX_FRAGMENT) {
            self.buffer.push(tlv_type);
            #[allow(clippy::cast_possible_truncation)]
            self.buffer.push(chunk.len() as u8);
            self.buffer.extend_from_slice(chunk);
        }
        self
    }

    /// Add a single byte value
    #[must_use]
    pub fn add_byte(self, tlv_type: impl Into<u8>, value: u8) -> Self {
        self.add(tlv_type, &[value])
    }

    /// Add a little-endian `u16`
    #[must_use]
    pub fn add_u16(self, tlv_type: impl Into<u8>, value: u16) -> Self {
        self.add(tlv_type, &value.to_le_bytes())
    }

    /// Add a nested TLV structure as the value
    #[must_use]
    pub fn add_tlv(self, tlv_type: impl Into<u8>, inner: TlvEncoder) -> Self {
        self.add(tlv_type, &inner.build())
    }

    /// Add state value
    #[must_use]
    pub fn add_state(self, state: u8) -> Self {
        self.add_byte(TlvType::State, state)
    }

    /// Add method value
    #[must_use]
    pub fn add_method(self, method: u8) -> Self {
        self.add_byte(TlvType::Method, method)
    }

    /// Add error value
    #[must_use]
    pub fn add_error(self, code: u8) -> Self {
        self.add_byte(TlvType::Error, code)
    }

    /// Add a zero-length `0xFF` separator between list entries
    #[must_use]
    pub fn add_separator(self) -> Self {
        self.add(TlvType::Separator, &[])
    }

    /// Add each value under the same type, delimited by an empty `0x00` record
    #[must_use]
    pub fn add_list(mut self, tlv_type: impl Into<u8> + Copy, values: &[&[u8]]) -> Self {
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.buffer.extend_from_slice(&[0x00, 0x00]);
            }
            self = self.add(tlv_type, value);
        }
        self
    }

    /// Is anything encoded yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Build the encoded TLV data
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

/// Decoded TLV message: repeated types are concatenated
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TlvDecoder {
    items: HashMap<u8, Vec<u8>>,
}

impl TlvDecoder {
    /// Decode TLV data
    ///
    /// # Errors
    ///
    /// Returns `TlvError::Truncated` if a record runs past the buffer end.
    pub fn decode(data: &[u8]) -> Result<Self, TlvError> {
        let mut items: HashMap<u8, Vec<u8>> = HashMap::new();
        for record in records(data) {
            let record = record?;
            items
                .entry(record.tlv_type)
                .or_default()
                .extend_from_slice(record.value);
        }
        Ok(Self { items })
    }

    /// Decode a flat list of entries, each started by `entry_start`
    ///
    /// A type may repeat inside an entry only as an immediate continuation
    /// fragment. Delimiter records (`0x00`/`0xFF` with no value) are skipped.
    ///
    /// # Errors
    ///
    /// Returns `TlvError::UninitializedEntry` when a record precedes the first
    /// entry start and `TlvError::DuplicateEntry` for any other repetition.
    pub fn decode_list(data: &[u8], entry_start: impl Into<u8>) -> Result<Vec<Self>, TlvError> {
        let entry_start = entry_start.into();
        let mut entries: Vec<Self> = Vec::new();
        let mut last: Option<(u8, usize)> = None;

        for record in records(data) {
            let record = record?;
            let is_delimiter = record.value.is_empty()
                && record.tlv_type != entry_start
                && (record.tlv_type == 0x00 || record.tlv_type == TlvType::Separator as u8);
            if is_delimiter {
                last = None;
                continue;
            }

            let continuation = matches!(last, Some((t, MAX_FRAGMENT)) if t == record.tlv_type);
            if record.tlv_type == entry_start && !continuation {
                entries.push(Self::default());
            }
            let current = entries
                .last_mut()
                .ok_or(TlvError::UninitializedEntry(record.tlv_type))?;

            match current.items.get_mut(&record.tlv_type) {
                Some(existing) if continuation => existing.extend_from_slice(record.value),
                Some(_) => return Err(TlvError::DuplicateEntry(record.tlv_type)),
                None => {
                    current.items.insert(record.tlv_type, record.value.to_vec());
                }
            }
            last = Some((record.tlv_type, record.value.len()));
        }

        Ok(entries)
    }

    /// Get a value by type
    #[must_use]
    pub fn get(&self, tlv_type: impl Into<u8>) -> Option<&[u8]> {
        self.items.get(&tlv_type.into()).map(Vec::as_slice)
    }

    /// Get a single byte value
    #[must_use]
    pub fn get_u8(&self, tlv_type: impl Into<u8>) -> Option<u8> {
        self.get(tlv_type).and_then(|v| v.first().copied())
    }

    /// Get a little-endian `u16` of exactly two bytes
    #[must_use]
    pub fn get_u16(&self, tlv_type: impl Into<u8>) -> Option<u16> {
        self.get(tlv_type)
            .and_then(|v| <[u8; 2]>::try_from(v).ok())
            .map(u16::from_le_bytes)
    }

    /// Get a required value
    ///
    /// # Errors
    ///
    /// Returns `TlvError::MissingField` if the type is absent.
    pub fn get_required(&self, tlv_type: impl Into<u8>) -> Result<&[u8], TlvError> {
        let tlv_type = tlv_type.into();
        self.get(tlv_type).ok_or(TlvError::MissingField(tlv_type))
    }

    /// Get state value
    ///
    /// # Errors
    ///
    /// Returns error if state field is missing or not exactly one byte.
    pub fn get_state(&self) -> Result<u8, TlvError> {
        match self.get_required(TlvType::State)? {
            [state] => Ok(*state),
            _ => Err(TlvError::InvalidValue(TlvType::State as u8)),
        }
    }

    /// Get error value (if present)
    #[must_use]
    pub fn get_error(&self) -> Option<u8> {
        self.get_u8(TlvType::Error)
    }

    /// Does the message carry this type
    #[must_use]
    pub fn contains(&self, tlv_type: impl Into<u8>) -> bool {
        self.items.contains_key(&tlv_type.into())
    }

    /// Number of distinct types
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing was decoded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Pairing method constants
pub mod methods {
    /// Pair-Setup
    pub const PAIR_SETUP: u8 = 0;
    /// Pair-Setup with auth (`MFi`)
    pub const PAIR_SETUP_AUTH: u8 = 1;
    /// Pair-Verify
    pub const PAIR_VERIFY: u8 = 2;
    /// Add pairing
    pub const ADD_PAIRING: u8 = 3;
    /// Remove pairing
    pub const REMOVE_PAIRING: u8 = 4;
    /// List pairings
    pub const LIST_PAIRINGS: u8 = 5;
}

/// Error codes sent to the controller in the `Error` record
pub mod errors {
    /// Generic error
    pub const UNKNOWN: u8 = 0x01;
    /// Proof, signature or AEAD check failed
    pub const AUTHENTICATION: u8 = 0x02;
    /// Retry later
    pub const BACKOFF: u8 = 0x03;
    /// No room for another pairing
    pub const MAX_PEERS: u8 = 0x04;
    /// Too many failed attempts
    pub const MAX_TRIES: u8 = 0x05;
    /// Pairing not available (already paired)
    pub const UNAVAILABLE: u8 = 0x06;
    /// Another pairing is in progress
    pub const BUSY: u8 = 0x07;
}
