//! Simulated controllers for tests
//!
//! Drive a running [`HapServer`](crate::HapServer) over real sockets the way a
//! controller would: Pair-Setup, Pair-Verify, encrypted requests, events and
//! data streams.

pub mod controller;
pub mod data_stream;
pub mod pairing;

pub use controller::TestController;
pub use data_stream::DataStreamClient;
pub use pairing::{ControllerIdentity, PairSetupClient, PairVerifyClient, PairedAccessory};

use thiserror::Error;

use crate::datastream::DataStreamError;
use crate::protocol::crypto::CryptoError;
use crate::protocol::http::ParseError;
use crate::protocol::tlv::TlvError;
use crate::server::SecureSessionError;

/// Errors seen by a simulated controller
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed TLV from the accessory
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),

    /// Cryptographic check failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Malformed HTTP from the accessory
    #[error("HTTP error: {0}")]
    Http(#[from] ParseError),

    /// Encrypted framing failed
    #[error("secure session error: {0}")]
    SecureSession(#[from] SecureSessionError),

    /// Data stream failure
    #[error("data stream error: {0}")]
    DataStream(#[from] DataStreamError),

    /// Accessory answered with a TLV error
    #[error("rejected at state {state} with error {code}")]
    Rejected {
        /// State carried by the error reply
        state: u8,
        /// TLV error code
        code: u8,
    },

    /// Accessory deviated from the protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Accessory closed the connection
    #[error("connection closed")]
    Closed,

    /// Nothing arrived in time
    #[error("timed out")]
    Timeout,
}
