use thiserror::Error;

/// Cryptographic operation errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key, nonce or signature had the wrong size
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Required length
        expected: usize,
        /// Supplied length
        actual: usize,
    },

    /// Ed25519 signature did not verify
    #[error("invalid signature")]
    InvalidSignature,

    /// SRP proof did not match
    #[error("verification failed")]
    VerificationFailed,

    /// AEAD tag did not authenticate
    #[error("decryption failed")]
    DecryptionFailed,

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// HKDF output length was out of range
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// SRP parameter or public value was rejected
    #[error("SRP error: {0}")]
    SrpError(String),

    /// Public key bytes were not a valid curve point
    #[error("invalid public key")]
    InvalidPublicKey,
}
