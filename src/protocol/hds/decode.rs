use super::{BACK_REFERENCE_WINDOW, HdsDict, HdsValue, MAX_DEPTH, tags};
use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during decoding
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HdsDecodeError {
    /// Input ended inside a value
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEnd(usize),

    /// Tag byte outside every known range
    #[error("unknown tag 0x{0:02x}")]
    UnknownTag(u8),

    /// String bytes were not valid UTF-8
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// Back-reference to a slot that was never filled
    #[error("back-reference {0} has no tracked value")]
    InvalidBackReference(usize),

    /// Dictionary key that is not a string
    #[error("dictionary key is not a string")]
    NonStringKey,

    /// Terminator outside a terminated container
    #[error("unexpected terminator")]
    UnexpectedTerminator,

    /// Containers nested too deeply
    #[error("nesting exceeds {MAX_DEPTH} levels")]
    NestingTooDeep,

    /// Declared length does not fit in memory
    #[error("length overflow")]
    LengthOverflow,

    /// Bytes left after the top-level value
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

/// Decode exactly one value spanning the whole buffer
///
/// # Errors
///
/// Returns an error for malformed input or trailing bytes.
pub fn decode(data: &[u8]) -> Result<HdsValue, HdsDecodeError> {
    let mut decoder = HdsDecoder::new(data);
    let value = decoder.read_value()?;
    match decoder.remaining() {
        0 => Ok(value),
        n => Err(HdsDecodeError::TrailingBytes(n)),
    }
}

enum Item {
    Value(HdsValue),
    Terminator,
}

/// Cursor over an encoded buffer that rebuilds the back-reference window
pub struct HdsDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    tracked: Vec<HdsValue>,
    depth: usize,
}

impl<'a> HdsDecoder<'a> {
    /// Start decoding at the beginning of `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            tracked: Vec::new(),
            depth: 0,
        }
    }

    /// Bytes not yet consumed
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Read the next value
    ///
    /// # Errors
    ///
    /// Returns an error for malformed input; a bare terminator is rejected.
    pub fn read_value(&mut self) -> Result<HdsValue, HdsDecodeError> {
        match self.read_item()? {
            Item::Value(v) => Ok(v),
            Item::Terminator => Err(HdsDecodeError::UnexpectedTerminator),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], HdsDecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .ok_or(HdsDecodeError::LengthOverflow)?;
        if end > self.data.len() {
            return Err(HdsDecodeError::UnexpectedEnd(self.data.len()));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, HdsDecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_length(&mut self, width: u8) -> Result<usize, HdsDecodeError> {
        let len = match width {
            0 => u64::from(self.read_u8()?),
            1 => u64::from(LittleEndian::read_u16(self.take(2)?)),
            2 => u64::from(LittleEndian::read_u32(self.take(4)?)),
            _ => LittleEndian::read_u64(self.take(8)?),
        };
        usize::try_from(len).map_err(|_| HdsDecodeError::LengthOverflow)
    }

    fn track(&mut self, value: HdsValue) -> Item {
        if self.tracked.len() < BACK_REFERENCE_WINDOW {
            self.tracked.push(value.clone());
        }
        Item::Value(value)
    }

    fn string(bytes: &[u8]) -> Result<HdsValue, HdsDecodeError> {
        std::str::from_utf8(bytes)
            .map(|s| HdsValue::String(s.to_string()))
            .map_err(|_| HdsDecodeError::InvalidUtf8)
    }

    fn read_item(&mut self) -> Result<Item, HdsDecodeError> {
        let tag = self.read_u8()?;
        let item = match tag {
            tags::TRUE => Item::Value(HdsValue::Bool(true)),
            tags::FALSE => Item::Value(HdsValue::Bool(false)),
            tags::TERMINATOR => Item::Terminator,
            tags::NULL => Item::Value(HdsValue::Null),
            tags::UUID => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(self.take(16)?);
                self.track(HdsValue::Uuid(Uuid::from_bytes(bytes)))
            }
            tags::DATE => {
                let d = LittleEndian::read_f64(self.take(8)?);
                self.track(HdsValue::Date(d))
            }
            tags::INTEGER_MINUS_ONE => self.track(HdsValue::Integer(-1)),
            tags::INTEGER_RANGE_START..=tags::INTEGER_RANGE_STOP => {
                self.track(HdsValue::Integer(i64::from(tag - tags::INTEGER_RANGE_START)))
            }
            tags::INT8 => {
                #[allow(clippy::cast_possible_wrap)]
                let v = self.read_u8()? as i8;
                self.track(HdsValue::Integer(i64::from(v)))
            }
            tags::INT16LE => {
                let v = LittleEndian::read_i16(self.take(2)?);
                self.track(HdsValue::Integer(i64::from(v)))
            }
            tags::INT32LE => {
                let v = LittleEndian::read_i32(self.take(4)?);
                self.track(HdsValue::Integer(i64::from(v)))
            }
            tags::INT64LE => {
                let v = LittleEndian::read_i64(self.take(8)?);
                self.track(HdsValue::Integer(v))
            }
            tags::FLOAT32LE => {
                let v = LittleEndian::read_f32(self.take(4)?);
                self.track(HdsValue::Float(f64::from(v)))
            }
            tags::FLOAT64LE => {
                let v = LittleEndian::read_f64(self.take(8)?);
                self.track(HdsValue::Float(v))
            }
            tags::UTF8_LENGTH_START..=tags::UTF8_LENGTH_STOP => {
                let bytes = self.take(usize::from(tag - tags::UTF8_LENGTH_START))?;
                let value = Self::string(bytes)?;
                self.track(value)
            }
            tags::UTF8_LENGTH8..=tags::UTF8_LENGTH64LE => {
                let len = self.read_length(tag - tags::UTF8_LENGTH8)?;
                let value = Self::string(self.take(len)?)?;
                self.track(value)
            }
            tags::UTF8_NULL_TERMINATED => {
                let bytes = self.take_until(0x00)?;
                let value = Self::string(bytes)?;
                self.track(value)
            }
            tags::DATA_LENGTH_START..=tags::DATA_LENGTH_STOP => {
                let bytes = self.take(usize::from(tag - tags::DATA_LENGTH_START))?;
                self.track(HdsValue::Data(bytes.to_vec()))
            }
            tags::DATA_LENGTH8..=tags::DATA_LENGTH64LE => {
                let len = self.read_length(tag - tags::DATA_LENGTH8)?;
                let bytes = self.take(len)?;
                self.track(HdsValue::Data(bytes.to_vec()))
            }
            tags::DATA_TERMINATED => {
                let bytes = self.take_until(tags::TERMINATOR)?;
                self.track(HdsValue::Data(bytes.to_vec()))
            }
            tags::COMPRESSION_START..=tags::COMPRESSION_STOP => {
                let index = usize::from(tag - tags::COMPRESSION_START);
                let value = self
                    .tracked
                    .get(index)
                    .cloned()
                    .ok_or(HdsDecodeError::InvalidBackReference(index))?;
                Item::Value(value)
            }
            tags::ARRAY_LENGTH_START..=tags::ARRAY_TERMINATED => {
                self.enter()?;
                let count = (tag != tags::ARRAY_TERMINATED)
                    .then(|| usize::from(tag - tags::ARRAY_LENGTH_START));
                let mut items = Vec::new();
                loop {
                    if count == Some(items.len()) {
                        break;
                    }
                    match self.read_item()? {
                        Item::Value(v) => items.push(v),
                        Item::Terminator if count.is_none() => break,
                        Item::Terminator => return Err(HdsDecodeError::UnexpectedTerminator),
                    }
                }
                self.depth -= 1;
                Item::Value(HdsValue::Array(items))
            }
            tags::DICTIONARY_LENGTH_START..=tags::DICTIONARY_TERMINATED => {
                self.enter()?;
                let count = (tag != tags::DICTIONARY_TERMINATED)
                    .then(|| usize::from(tag - tags::DICTIONARY_LENGTH_START));
                let mut entries = HdsDict::new();
                let mut read = 0;
                loop {
                    if count == Some(read) {
                        break;
                    }
                    let key = match self.read_item()? {
                        Item::Value(HdsValue::String(k)) => k,
                        Item::Value(_) => return Err(HdsDecodeError::NonStringKey),
                        Item::Terminator if count.is_none() => break,
                        Item::Terminator => return Err(HdsDecodeError::UnexpectedTerminator),
                    };
                    let value = self.read_value()?;
                    entries.insert(key, value);
                    read += 1;
                }
                self.depth -= 1;
                Item::Value(HdsValue::Dictionary(entries))
            }
            other => return Err(HdsDecodeError::UnknownTag(other)),
        };
        Ok(item)
    }

    fn take_until(&mut self, delimiter: u8) -> Result<&'a [u8], HdsDecodeError> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == delimiter)
            .ok_or(HdsDecodeError::UnexpectedEnd(self.data.len()))?;
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    fn enter(&mut self) -> Result<(), HdsDecodeError> {
        if self.depth >= MAX_DEPTH {
            return Err(HdsDecodeError::NestingTooDeep);
        }
        self.depth += 1;
        Ok(())
    }
}
