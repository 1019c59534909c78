use super::{BACK_REFERENCE_WINDOW, HdsValue, MAX_DEPTH, tags};
use thiserror::Error;

/// Errors that can occur during encoding
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HdsEncodeError {
    /// Containers nested deeper than the decoder accepts
    #[error("nesting exceeds {MAX_DEPTH} levels")]
    NestingTooDeep,
}

/// Encode a single value with a fresh back-reference window
///
/// # Errors
///
/// Returns `HdsEncodeError::NestingTooDeep` for values the decoder would refuse.
pub fn encode(value: &HdsValue) -> Result<Vec<u8>, HdsEncodeError> {
    let mut encoder = HdsEncoder::new();
    encoder.write_value(value)?;
    Ok(encoder.finish())
}

/// Streaming encoder that owns the back-reference window
#[derive(Debug, Default)]
pub struct HdsEncoder {
    buffer: Vec<u8>,
    tracked: Vec<HdsValue>,
    depth: usize,
}

impl HdsEncoder {
    /// Create an empty encoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one value
    ///
    /// # Errors
    ///
    /// Returns `HdsEncodeError::NestingTooDeep` past [`MAX_DEPTH`] levels.
    pub fn write_value(&mut self, value: &HdsValue) -> Result<(), HdsEncodeError> {
        match value {
            HdsValue::Null => self.buffer.push(tags::NULL),
            HdsValue::Bool(true) => self.buffer.push(tags::TRUE),
            HdsValue::Bool(false) => self.buffer.push(tags::FALSE),
            HdsValue::Array(items) => {
                self.enter()?;
                self.write_array(items)?;
                self.depth -= 1;
            }
            HdsValue::Dictionary(entries) => {
                self.enter()?;
                let count = entries.len();
                if count <= 14 {
                    #[allow(clippy::cast_possible_truncation)]
                    self.buffer.push(tags::DICTIONARY_LENGTH_START + count as u8);
                } else {
                    self.buffer.push(tags::DICTIONARY_TERMINATED);
                }
                for (key, item) in entries {
                    self.write_scalar(&HdsValue::String(key.clone()));
                    self.write_value(item)?;
                }
                if count > 14 {
                    self.buffer.push(tags::TERMINATOR);
                }
                self.depth -= 1;
            }
            scalar => self.write_scalar(scalar),
        }
        Ok(())
    }

    /// Consume the encoder and return the bytes
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }

    fn enter(&mut self) -> Result<(), HdsEncodeError> {
        if self.depth >= MAX_DEPTH {
            return Err(HdsEncodeError::NestingTooDeep);
        }
        self.depth += 1;
        Ok(())
    }

    fn write_array(&mut self, items: &[HdsValue]) -> Result<(), HdsEncodeError> {
        let count = items.len();
        if count <= 14 {
            #[allow(clippy::cast_possible_truncation)]
            self.buffer.push(tags::ARRAY_LENGTH_START + count as u8);
        } else {
            self.buffer.push(tags::ARRAY_TERMINATED);
        }
        for item in items {
            self.write_value(item)?;
        }
        if count > 14 {
            self.buffer.push(tags::TERMINATOR);
        }
        Ok(())
    }

    fn write_scalar(&mut self, value: &HdsValue) {
        let full = full_encoding(value);
        if value.is_compressible() {
            if full.len() > 1 {
                if let Some(index) = self.tracked.iter().position(|t| t.same_scalar(value)) {
                    #[allow(clippy::cast_possible_truncation)]
                    self.buffer.push(tags::COMPRESSION_START + index as u8);
                    return;
                }
            }
            if self.tracked.len() < BACK_REFERENCE_WINDOW {
                self.tracked.push(value.clone());
            }
        }
        self.buffer.extend_from_slice(&full);
    }
}

fn full_encoding(value: &HdsValue) -> Vec<u8> {
    let mut out = Vec::new();
    match value {
        HdsValue::Integer(i) => encode_integer(*i, &mut out),
        HdsValue::Float(f) => {
            #[allow(clippy::cast_possible_truncation)]
            let narrow = *f as f32;
            if f64::from(narrow).to_bits() == f.to_bits() {
                out.push(tags::FLOAT32LE);
                out.extend_from_slice(&narrow.to_le_bytes());
            } else {
                out.push(tags::FLOAT64LE);
                out.extend_from_slice(&f.to_le_bytes());
            }
        }
        HdsValue::Date(d) => {
            out.push(tags::DATE);
            out.extend_from_slice(&d.to_le_bytes());
        }
        HdsValue::Uuid(u) => {
            out.push(tags::UUID);
            out.extend_from_slice(u.as_bytes());
        }
        HdsValue::String(s) => encode_sized(
            s.as_bytes(),
            tags::UTF8_LENGTH_START,
            tags::UTF8_LENGTH8,
            &mut out,
        ),
        HdsValue::Data(d) => encode_sized(d, tags::DATA_LENGTH_START, tags::DATA_LENGTH8, &mut out),
        HdsValue::Null => out.push(tags::NULL),
        HdsValue::Bool(true) => out.push(tags::TRUE),
        HdsValue::Bool(false) => out.push(tags::FALSE),
        // Containers never reach here; write_value handles them
        HdsValue::Array(_) | HdsValue::Dictionary(_) => {}
    }
    out
}

fn encode_integer(value: i64, out: &mut Vec<u8>) {
    match value {
        -1 => out.push(tags::INTEGER_MINUS_ONE),
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        0..=39 => out.push(tags::INTEGER_RANGE_START + value as u8),
        _ => {
            if let Ok(v) = i8::try_from(value) {
                out.push(tags::INT8);
                out.extend_from_slice(&v.to_le_bytes());
            } else if let Ok(v) = i16::try_from(value) {
                out.push(tags::INT16LE);
                out.extend_from_slice(&v.to_le_bytes());
            } else if let Ok(v) = i32::try_from(value) {
                out.push(tags::INT32LE);
                out.extend_from_slice(&v.to_le_bytes());
            } else {
                out.push(tags::INT64LE);
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
    }
}

/// Strings and data share the layout: inline length up to 32, then u8/u16/u32/u64
fn encode_sized(bytes: &[u8], inline_start: u8, length8: u8, out: &mut Vec<u8>) {
    let len = bytes.len();
    if len <= 32 {
        #[allow(clippy::cast_possible_truncation)]
        out.push(inline_start + len as u8);
    } else if let Ok(l) = u8::try_from(len) {
        out.push(length8);
        out.push(l);
    } else if let Ok(l) = u16::try_from(len) {
        out.push(length8 + 1);
        out.extend_from_slice(&l.to_le_bytes());
    } else if let Ok(l) = u32::try_from(len) {
        out.push(length8 + 2);
        out.extend_from_slice(&l.to_le_bytes());
    } else {
        out.push(length8 + 3);
        out.extend_from_slice(&(len as u64).to_le_bytes());
    }
    out.extend_from_slice(bytes);
}
