use std::io;
use thiserror::Error;

use crate::datastream::DataStreamError;
use crate::pairing::{PairingError, StoreError};
use crate::protocol::crypto::CryptoError;
use crate::protocol::hds::{HdsDecodeError, HdsEncodeError};
use crate::protocol::http::ParseError;
use crate::protocol::tlv::TlvError;
use crate::server::{ConfigError, SecureSessionError};

/// Errors that can occur while running the accessory server
#[derive(Debug, Error)]
pub enum HapError {
    /// Network I/O failed
    #[error("network error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cryptographic primitive failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Malformed TLV8
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),

    /// Malformed HDS value
    #[error("HDS decode error: {0}")]
    HdsDecode(#[from] HdsDecodeError),

    /// HDS value could not be encoded
    #[error("HDS encode error: {0}")]
    HdsEncode(#[from] HdsEncodeError),

    /// Malformed HTTP
    #[error("HTTP parse error: {0}")]
    Http(#[from] ParseError),

    /// Pairing handshake failed
    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),

    /// Identity store failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Encrypted framing failed
    #[error("secure session error: {0}")]
    SecureSession(#[from] SecureSessionError),

    /// Data stream failure
    #[error("data stream error: {0}")]
    DataStream(#[from] DataStreamError),

    /// An operation did not finish in time
    #[error("{operation} timed out")]
    Timeout {
        /// What was being waited for
        operation: &'static str,
    },

    /// The connection is gone
    #[error("connection closed")]
    ConnectionClosed,

    /// Server already started
    #[error("server is already running")]
    AlreadyRunning,

    /// Server not started
    #[error("server is not running")]
    NotRunning,
}

impl HapError {
    /// Check if this error is recoverable by retrying
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Pairing(PairingError::Busy)
                | Self::DataStream(DataStreamError::Timeout | DataStreamError::Busy(_))
        )
    }

    /// Check if this error indicates connection loss
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::ConnectionClosed
            | Self::SecureSession(SecureSessionError::Authentication { .. })
            | Self::DataStream(DataStreamError::ConnectionClosed) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Result type alias for accessory operations
pub type Result<T> = std::result::Result<T, HapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HapError::Timeout {
            operation: "pair-verify",
        };
        assert_eq!(err.to_string(), "pair-verify timed out");
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(HapError::Timeout { operation: "x" }.is_recoverable());
        assert!(HapError::Pairing(PairingError::Busy).is_recoverable());
        assert!(HapError::DataStream(DataStreamError::Timeout).is_recoverable());
        assert!(HapError::DataStream(DataStreamError::Busy(8)).is_recoverable());
        assert!(!HapError::Pairing(PairingError::MaxTries).is_recoverable());
    }

    #[test]
    fn test_error_is_connection_lost() {
        assert!(HapError::ConnectionClosed.is_connection_lost());
        let reset: HapError = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert!(reset.is_connection_lost());
        let refused: HapError = io::Error::new(io::ErrorKind::ConnectionRefused, "no").into();
        assert!(!refused.is_connection_lost());
        assert!(!HapError::Timeout { operation: "x" }.is_connection_lost());
    }

    #[test]
    fn test_error_from_layers() {
        let err: HapError = TlvError::MissingField(6).into();
        assert!(matches!(err, HapError::Tlv(TlvError::MissingField(6))));

        let err: HapError = PairingError::AlreadyPaired.into();
        assert!(matches!(err, HapError::Pairing(_)));
    }

    #[test]
    fn test_error_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HapError>();
    }
}
