//! Data stream frames
//!
//! `[type:u8][length:u24 BE][ciphertext][tag:16]`. The 4-byte header is the AEAD
//! additional data. Each direction has its own key and little-endian nonce
//! counter.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use super::DataStreamError;
use crate::protocol::crypto::{ChaCha20Poly1305Cipher, Nonce, derive_key_fixed};

/// Frame type carrying an encrypted message
pub const FRAME_TYPE_ENCRYPTED: u8 = 0x01;
/// Largest payload a frame may carry
pub const MAX_PAYLOAD_LENGTH: usize = 0xF_FFFF;

const HEADER_LEN: usize = 4;
const TAG_LEN: usize = 16;

/// A frame as read from the wire, still sealed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Header bytes (type and length)
    pub header: [u8; HEADER_LEN],
    /// Ciphertext followed by the tag
    pub sealed: Vec<u8>,
}

impl RawFrame {
    /// Frame type byte
    #[must_use]
    pub fn frame_type(&self) -> u8 {
        self.header[0]
    }

    fn parts(&self) -> Option<(&[u8], &[u8])> {
        let split = self.sealed.len().checked_sub(TAG_LEN)?;
        Some(self.sealed.split_at(split))
    }
}

/// Splits the byte stream into [`RawFrame`]s
///
/// Unknown frame types are skipped; a length above the limit is an error.
#[derive(Debug)]
pub struct DataStreamFrameCodec {
    max_payload: usize,
}

impl DataStreamFrameCodec {
    /// Create a codec accepting payloads up to `max_payload` bytes
    #[must_use]
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.min(MAX_PAYLOAD_LENGTH),
        }
    }
}

impl Default for DataStreamFrameCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_LENGTH)
    }
}

impl Decoder for DataStreamFrameCodec {
    type Item = RawFrame;
    type Error = DataStreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < HEADER_LEN {
                return Ok(None);
            }
            let length =
                (usize::from(src[1]) << 16) | (usize::from(src[2]) << 8) | usize::from(src[3]);
            if length > self.max_payload {
                return Err(DataStreamError::FrameTooLarge(length));
            }
            let total = HEADER_LEN + length + TAG_LEN;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            let mut header = [0u8; HEADER_LEN];
            header.copy_from_slice(&src[..HEADER_LEN]);
            src.advance(HEADER_LEN);
            let sealed = src.split_to(length + TAG_LEN).to_vec();

            if header[0] != FRAME_TYPE_ENCRYPTED {
                debug!("skipping data stream frame of type {:#04x}", header[0]);
                continue;
            }
            return Ok(Some(RawFrame { header, sealed }));
        }
    }
}

impl Encoder<RawFrame> for DataStreamFrameCodec {
    type Error = DataStreamError;

    fn encode(&mut self, frame: RawFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(HEADER_LEN + frame.sealed.len());
        dst.put_slice(&frame.header);
        dst.put_slice(&frame.sealed);
        Ok(())
    }
}

/// Directional keys for one data stream session
#[derive(Clone)]
pub struct DataStreamKeys {
    /// Key for frames this side sends
    pub encrypt: [u8; 32],
    /// Key for frames this side receives
    pub decrypt: [u8; 32],
}

impl DataStreamKeys {
    /// Keys as seen by the accessory
    ///
    /// `salt` is the controller salt followed by the accessory salt.
    ///
    /// # Errors
    /// Returns error if HKDF expansion fails.
    pub fn accessory(shared_secret: &[u8], salt: &[u8]) -> Result<Self, DataStreamError> {
        Ok(Self {
            encrypt: derive_key_fixed(salt, shared_secret, b"HDS-Read-Encryption-Key")?,
            decrypt: derive_key_fixed(salt, shared_secret, b"HDS-Write-Encryption-Key")?,
        })
    }

    /// Keys as seen by the controller
    ///
    /// # Errors
    /// Returns error if HKDF expansion fails.
    pub fn controller(shared_secret: &[u8], salt: &[u8]) -> Result<Self, DataStreamError> {
        let accessory = Self::accessory(shared_secret, salt)?;
        Ok(Self {
            encrypt: accessory.decrypt,
            decrypt: accessory.encrypt,
        })
    }
}

impl Drop for DataStreamKeys {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.encrypt.zeroize();
        self.decrypt.zeroize();
    }
}

impl std::fmt::Debug for DataStreamKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataStreamKeys(..)")
    }
}

/// Sealing and opening state for one data stream connection
pub struct FrameCrypto {
    encrypt_cipher: ChaCha20Poly1305Cipher,
    decrypt_cipher: ChaCha20Poly1305Cipher,
    encrypt_count: u64,
    decrypt_count: u64,
}

impl FrameCrypto {
    /// Create from directional keys
    ///
    /// # Errors
    /// Returns error if a key is rejected by the cipher.
    pub fn new(keys: &DataStreamKeys) -> Result<Self, DataStreamError> {
        Ok(Self {
            encrypt_cipher: ChaCha20Poly1305Cipher::new(&keys.encrypt)?,
            decrypt_cipher: ChaCha20Poly1305Cipher::new(&keys.decrypt)?,
            encrypt_count: 0,
            decrypt_count: 0,
        })
    }

    /// Frames sealed so far
    #[must_use]
    pub fn encrypt_count(&self) -> u64 {
        self.encrypt_count
    }

    /// Frames opened so far
    #[must_use]
    pub fn decrypt_count(&self) -> u64 {
        self.decrypt_count
    }

    /// Seal a payload into a frame
    ///
    /// # Errors
    /// Returns `DataStreamError::FrameTooLarge` above the payload limit.
    pub fn seal(&mut self, payload: &[u8]) -> Result<RawFrame, DataStreamError> {
        if payload.len() > MAX_PAYLOAD_LENGTH {
            return Err(DataStreamError::FrameTooLarge(payload.len()));
        }
        // payload.len() <= 0xFFFFF
        #[allow(clippy::cast_possible_truncation)]
        let header = [
            FRAME_TYPE_ENCRYPTED,
            (payload.len() >> 16) as u8,
            (payload.len() >> 8) as u8,
            payload.len() as u8,
        ];

        let mut sealed = Vec::with_capacity(payload.len() + TAG_LEN);
        sealed.extend_from_slice(payload);
        let tag = self.encrypt_cipher.seal_in_place(
            &Nonce::from_counter(self.encrypt_count),
            &header,
            &mut sealed,
        )?;
        sealed.extend_from_slice(&tag);
        self.encrypt_count += 1;

        Ok(RawFrame { header, sealed })
    }

    /// Open the next inbound frame
    ///
    /// # Errors
    /// Returns `DataStreamError::Authentication` if the tag does not verify
    /// under the expected counter.
    pub fn open(&mut self, frame: &RawFrame) -> Result<Vec<u8>, DataStreamError> {
        let plaintext = self
            .try_open(frame)
            .ok_or(DataStreamError::Authentication)?;
        Ok(plaintext)
    }

    /// Open the next inbound frame, returning `None` on authentication failure
    ///
    /// The counter only advances on success, so a failed trial leaves the
    /// state untouched.
    pub fn try_open(&mut self, frame: &RawFrame) -> Option<Vec<u8>> {
        let (ciphertext, tag) = frame.parts()?;
        let mut buffer = ciphertext.to_vec();
        self.decrypt_cipher
            .open_in_place(
                &Nonce::from_counter(self.decrypt_count),
                &frame.header,
                &mut buffer,
                tag,
            )
            .ok()?;
        self.decrypt_count += 1;
        Some(buffer)
    }
}

impl std::fmt::Debug for FrameCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCrypto")
            .field("encrypt_count", &self.encrypt_count)
            .field("decrypt_count", &self.decrypt_count)
            .finish_non_exhaustive()
    }
}
