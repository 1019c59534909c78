//! HomeKit Data Stream
//!
//! A second, independently encrypted TCP channel set up from an authenticated
//! primary connection. The accessory prepares a session (keys derived from the
//! primary connection's shared secret), starts a listener on demand, and the
//! first connection whose opening frame decrypts under a prepared session's key
//! claims that session.

mod config;
mod connection;
mod frame;
mod handlers;
mod message;
mod server;
mod session;
mod transport;

#[cfg(test)]
mod tests;

pub use config::DataStreamConfig;
pub use connection::{DataStreamHandle, DataStreamState};
pub use frame::{
    DataStreamFrameCodec, DataStreamKeys, FRAME_TYPE_ENCRYPTED, FrameCrypto, MAX_PAYLOAD_LENGTH,
    RawFrame,
};
pub use handlers::{DataStreamHandler, HandlerRegistry};
pub use message::{DataStreamMessage, Protocol, ResponseStatus};
pub use server::{DataStreamEvent, DataStreamServer, PreparedSessionInfo};
pub use transport::{
    KEY_SALT_LENGTH, SessionCommand, SetupStatus, SetupTransportRequest, SetupTransportResponse,
    TransportType, supported_configuration,
};

use thiserror::Error;

use crate::protocol::crypto::CryptoError;
use crate::protocol::hds::{HdsDecodeError, HdsEncodeError};
use crate::protocol::tlv::TlvError;

/// Data stream errors
#[derive(Debug, Error)]
pub enum DataStreamError {
    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame length above the limit
    #[error("frame payload of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    /// Frame failed authentication
    #[error("frame failed authentication")]
    Authentication,

    /// Message header above 255 bytes
    #[error("message header of {0} bytes exceeds 255")]
    HeaderTooLarge(usize),

    /// Malformed HDS
    #[error("HDS decode error: {0}")]
    Decode(#[from] HdsDecodeError),

    /// HDS value could not be encoded
    #[error("HDS encode error: {0}")]
    Encode(#[from] HdsEncodeError),

    /// Payload is not a valid message
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Message received out of sequence (before `hello`)
    #[error("unexpected message before hello: {0}")]
    NotReady(String),

    /// Setup transport TLV was malformed
    #[error("invalid transport setup: {0}")]
    InvalidSetup(String),

    /// TLV error in setup
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),

    /// Key derivation or cipher setup failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// No response within the request timeout
    #[error("request timed out")]
    Timeout,

    /// Prepared-session pool is full
    #[error("{0} prepared sessions already pending")]
    Busy(usize),

    /// Connection went away
    #[error("connection closed")]
    ConnectionClosed,
}
