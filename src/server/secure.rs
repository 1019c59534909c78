//! Encrypted framing for the primary connection
//!
//! After Pair-Verify every byte on the socket is carried in frames of at most
//! 1024 plaintext bytes: `[len:u16 LE][ciphertext][tag:16]`. The length prefix is
//! the additional authenticated data and each direction keeps its own nonce
//! counter.

use byteorder::{ByteOrder, LittleEndian};
use bytes::BytesMut;
use thiserror::Error;

use crate::protocol::crypto::{ChaCha20Poly1305Cipher, CryptoError, Nonce, derive_key_fixed};

/// Largest plaintext carried by one frame
pub const MAX_FRAME_PLAINTEXT: usize = 1024;

const LENGTH_PREFIX: usize = 2;
const TAG_LEN: usize = 16;

/// Secure session errors
#[derive(Debug, Error)]
pub enum SecureSessionError {
    /// Frame failed authentication
    #[error("frame {counter} failed authentication")]
    Authentication {
        /// Counter the frame was expected to carry
        counter: u64,
    },

    /// Length prefix larger than allowed
    #[error("frame length {0} exceeds {MAX_FRAME_PLAINTEXT}")]
    FrameTooLarge(usize),

    /// Key setup or sealing failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Directional traffic keys derived from a Pair-Verify shared secret
pub struct TrafficKeys {
    /// Key for frames this side sends
    pub encrypt: [u8; 32],
    /// Key for frames this side receives
    pub decrypt: [u8; 32],
}

impl TrafficKeys {
    /// Keys as seen by the accessory
    ///
    /// # Errors
    /// Returns error if HKDF expansion fails.
    pub fn accessory(shared_secret: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            encrypt: derive_key_fixed(
                b"Control-Salt",
                shared_secret,
                b"Control-Read-Encryption-Key",
            )?,
            decrypt: derive_key_fixed(
                b"Control-Salt",
                shared_secret,
                b"Control-Write-Encryption-Key",
            )?,
        })
    }

    /// Keys as seen by the controller
    ///
    /// # Errors
    /// Returns error if HKDF expansion fails.
    pub fn controller(shared_secret: &[u8]) -> Result<Self, CryptoError> {
        let accessory = Self::accessory(shared_secret)?;
        Ok(Self {
            encrypt: accessory.decrypt,
            decrypt: accessory.encrypt,
        })
    }
}

impl Drop for TrafficKeys {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.encrypt.zeroize();
        self.decrypt.zeroize();
    }
}

/// Per-connection encryption state
pub struct SecureSession {
    encrypt_cipher: ChaCha20Poly1305Cipher,
    decrypt_cipher: ChaCha20Poly1305Cipher,
    encrypt_count: u64,
    decrypt_count: u64,
    pending: BytesMut,
}

impl SecureSession {
    /// Create a session from directional keys
    ///
    /// # Errors
    /// Returns error if a key is rejected by the cipher.
    pub fn new(keys: &TrafficKeys) -> Result<Self, SecureSessionError> {
        Ok(Self {
            encrypt_cipher: ChaCha20Poly1305Cipher::new(&keys.encrypt)?,
            decrypt_cipher: ChaCha20Poly1305Cipher::new(&keys.decrypt)?,
            encrypt_count: 0,
            decrypt_count: 0,
            pending: BytesMut::new(),
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

    /// Seal `data` into as many frames as needed
    ///
    /// # Errors
    /// Returns error if the cipher refuses the input.
    pub fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, SecureSessionError> {
        let frames = data.len().div_ceil(MAX_FRAME_PLAINTEXT).max(1);
        let mut output = Vec::with_capacity(data.len() + frames * (LENGTH_PREFIX + TAG_LEN));

        for chunk in data.chunks(MAX_FRAME_PLAINTEXT) {
            let mut len_bytes = [0u8; LENGTH_PREFIX];
            // chunk.len() <= 1024
            #[allow(clippy::cast_possible_truncation)]
            LittleEndian::write_u16(&mut len_bytes, chunk.len() as u16);

            let start = output.len();
            output.extend_from_slice(&len_bytes);
            output.extend_from_slice(chunk);
            let tag = self.encrypt_cipher.seal_in_place(
                &Nonce::from_counter(self.encrypt_count),
                &len_bytes,
                &mut output[start + LENGTH_PREFIX..],
            )?;
            output.extend_from_slice(&tag);
            self.encrypt_count += 1;
        }

        Ok(output)
    }

    /// Buffer ciphertext read from the socket
    pub fn feed(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Bytes buffered but not yet forming a complete frame
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Open every complete frame in the buffer
    ///
    /// Incomplete trailing data stays buffered for the next call.
    ///
    /// # Errors
    /// Returns error on an oversize length prefix or failed authentication; the
    /// connection must be closed after either.
    pub fn decrypt(&mut self) -> Result<Vec<u8>, SecureSessionError> {
        let mut plaintext = Vec::new();

        while self.pending.len() >= LENGTH_PREFIX {
            let len = LittleEndian::read_u16(&self.pending[..LENGTH_PREFIX]) as usize;
            if len > MAX_FRAME_PLAINTEXT {
                return Err(SecureSessionError::FrameTooLarge(len));
            }
            if self.pending.len() < LENGTH_PREFIX + len + TAG_LEN {
                break;
            }

            let frame = self.pending.split_to(LENGTH_PREFIX + len + TAG_LEN);
            let mut body = frame[LENGTH_PREFIX..LENGTH_PREFIX + len].to_vec();
            self.decrypt_cipher
                .open_in_place(
                    &Nonce::from_counter(self.decrypt_count),
                    &frame[..LENGTH_PREFIX],
                    &mut body,
                    &frame[LENGTH_PREFIX + len..],
                )
                .map_err(|_| SecureSessionError::Authentication {
                    counter: self.decrypt_count,
                })?;
            self.decrypt_count += 1;
            plaintext.extend_from_slice(&body);
        }

        Ok(plaintext)
    }
}

impl std::fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("encrypt_count", &self.encrypt_count)
            .field("decrypt_count", &self.decrypt_count)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
