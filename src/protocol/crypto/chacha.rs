use super::{CryptoError, lengths};
use chacha20poly1305::{
    AeadInPlace, ChaCha20Poly1305 as ChaChaImpl, Nonce as ChaChaNonce, Tag,
    aead::{Aead, KeyInit},
};

/// 12-byte nonce for ChaCha20-Poly1305
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce([u8; 12]);

impl Nonce {
    /// Frame counter nonce: four zero bytes then the counter little-endian
    #[must_use]
    pub fn from_counter(counter: u64) -> Self {
        let mut arr = [0u8; 12];
        arr[4..12].copy_from_slice(&counter.to_le_bytes());
        Self(arr)
    }

    /// Handshake nonce: four zero bytes then an 8-byte ASCII label such as `PS-Msg05`
    #[must_use]
    pub fn from_label(label: &[u8; 8]) -> Self {
        let mut arr = [0u8; 12];
        arr[4..12].copy_from_slice(label);
        Self(arr)
    }

    /// Get as bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

/// ChaCha20-Poly1305 AEAD cipher
pub struct ChaCha20Poly1305Cipher {
    cipher: ChaChaImpl,
}

impl ChaCha20Poly1305Cipher {
    /// Create cipher with 32-byte key
    ///
    /// # Errors
    /// Returns `CryptoError::InvalidKeyLength` for keys that are not 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let cipher =
            ChaChaImpl::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
                expected: lengths::CHACHA_KEY,
                actual: key.len(),
            })?;
        Ok(Self { cipher })
    }

    /// Encrypt; returns ciphertext with the 16-byte tag appended
    ///
    /// # Errors
    /// Returns `CryptoError::EncryptionFailed` if the backend refuses the input.
    pub fn encrypt(&self, nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(ChaChaNonce::from_slice(&nonce.0), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Decrypt ciphertext with appended tag
    ///
    /// # Errors
    /// Returns `CryptoError::DecryptionFailed` when authentication fails.
    pub fn decrypt(&self, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .decrypt(ChaChaNonce::from_slice(&nonce.0), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Encrypt `buffer` in place and return the detached tag
    ///
    /// # Errors
    /// Returns `CryptoError::EncryptionFailed` if the backend refuses the input.
    pub fn seal_in_place(
        &self,
        nonce: &Nonce,
        aad: &[u8],
        buffer: &mut [u8],
    ) -> Result<[u8; 16], CryptoError> {
        let tag = self
            .cipher
            .encrypt_in_place_detached(ChaChaNonce::from_slice(&nonce.0), aad, buffer)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        let mut out = [0u8; 16];
        out.copy_from_slice(tag.as_slice());
        Ok(out)
    }

    /// Decrypt `buffer` in place against a detached tag
    ///
    /// # Errors
    /// Returns `CryptoError::DecryptionFailed` when authentication fails; the
    /// buffer contents are unspecified in that case.
    pub fn open_in_place(
        &self,
        nonce: &Nonce,
        aad: &[u8],
        buffer: &mut [u8],
        tag: &[u8],
    ) -> Result<(), CryptoError> {
        if tag.len() != lengths::CHACHA_TAG {
            return Err(CryptoError::DecryptionFailed);
        }
        self.cipher
            .decrypt_in_place_detached(
                ChaChaNonce::from_slice(&nonce.0),
                aad,
                buffer,
                Tag::from_slice(tag),
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
