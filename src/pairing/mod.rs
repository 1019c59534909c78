//! Pair-Setup, Pair-Verify and pairing management
//!
//! Each handshake is a small state machine fed with TLV8 request bodies. The
//! machines never touch the socket: they return a [`PairingResponse`] that the
//! secure session writes back, plus an optional [`PairingEvent`] describing what
//! changed (a new pairing, a verified session).

mod pairings;
mod setup;
mod store;
mod verify;

#[cfg(test)]
mod tests;

pub use pairings::{PairingsOutcome, handle_pairings};
pub use setup::{MAX_SETUP_ATTEMPTS, PairSetup, SetupCoordinator};
pub use store::{IdentityStore, MemoryIdentityStore, PairingRecord, Permission, StoreError};
pub use verify::PairVerify;

use crate::protocol::crypto::{CryptoError, Ed25519KeyPair};
use crate::protocol::http::StatusCode;
use crate::protocol::tlv::{TlvEncoder, TlvError, errors};
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

/// SRP username fixed by the protocol
pub const SETUP_USERNAME: &[u8] = b"Pair-Setup";

/// Long-term identity of the accessory
#[derive(Debug, Clone)]
pub struct AccessoryIdentity {
    /// Device id in `AA:BB:CC:DD:EE:FF` form, used as the pairing identifier
    pub device_id: String,
    /// Long-term Ed25519 key pair (LTSK/LTPK)
    pub keypair: Ed25519KeyPair,
    /// Setup code in `XXX-XX-XXX` form
    pub setup_code: String,
}

impl AccessoryIdentity {
    /// Create an identity with a freshly generated key pair
    #[must_use]
    pub fn new(device_id: impl Into<String>, setup_code: impl Into<String>) -> Self {
        Self::with_keypair(device_id, setup_code, Ed25519KeyPair::generate())
    }

    /// Create an identity from an existing key pair
    #[must_use]
    pub fn with_keypair(
        device_id: impl Into<String>,
        setup_code: impl Into<String>,
        keypair: Ed25519KeyPair,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            keypair,
            setup_code: setup_code.into(),
        }
    }
}

/// Everything a handshake step needs besides its own session state
pub struct PairingContext<'a> {
    /// Accessory identity
    pub identity: &'a AccessoryIdentity,
    /// Pairing records
    pub store: &'a dyn IdentityStore,
    /// Server-wide Pair-Setup bookkeeping
    pub setup: &'a SetupCoordinator,
    /// Accept Pair-Setup even when already paired
    pub allow_insecure: bool,
    /// Connection the request arrived on
    pub connection_id: Uuid,
}

/// What a completed handshake step changed
#[derive(Debug)]
pub enum PairingEvent {
    /// Pair-Setup M5 stored a new admin pairing
    Paired {
        /// Controller pairing username
        username: String,
    },
    /// Pair-Verify M3 authenticated the connection
    Verified {
        /// Controller pairing username
        username: String,
        /// X25519 shared secret the traffic keys derive from
        shared_secret: Zeroizing<[u8; 32]>,
    },
}

/// Reply to a pairing request
#[derive(Debug)]
pub struct PairingResponse {
    /// HTTP status
    pub status: StatusCode,
    /// TLV8 body
    pub body: Vec<u8>,
    /// Set when the step completed a handshake
    pub event: Option<PairingEvent>,
}

impl PairingResponse {
    pub(crate) fn ok(body: Vec<u8>) -> Self {
        Self {
            status: StatusCode::OK,
            body,
            event: None,
        }
    }

    /// Error reply for a failed step; `state` is the state the reply claims
    pub(crate) fn from_error(state: u8, error: &PairingError) -> Self {
        Self {
            status: error.http_status(),
            body: TlvEncoder::new()
                .add_state(state)
                .add_error(error.tlv_code())
                .build(),
            event: None,
        }
    }
}

/// Errors that can occur during pairing
#[derive(Debug, Error)]
pub enum PairingError {
    /// Malformed TLV body
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),

    /// A step arrived out of sequence
    #[error("unexpected step {received}, expected {expected}")]
    UnexpectedState {
        /// Step the machine expected next
        expected: u8,
        /// Step the controller sent
        received: u8,
    },

    /// Method the accessory does not support
    #[error("unsupported pairing method: {0}")]
    UnsupportedMethod(u8),

    /// Pair-Setup attempted while already paired
    #[error("accessory is already paired")]
    AlreadyPaired,

    /// Too many failed Pair-Setup attempts
    #[error("too many unsuccessful pair-setup attempts")]
    MaxTries,

    /// Another connection owns the Pair-Setup
    #[error("pair-setup already in progress on another connection")]
    Busy,

    /// Proof, signature or AEAD check failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(&'static str),

    /// Pair-Verify from a controller with no pairing record
    #[error("no pairing for controller {0}")]
    UnknownController(String),

    /// Pairing management requested by a non-admin
    #[error("controller lacks admin permission")]
    InsufficientPermissions,

    /// Cryptographic primitive failure
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Identity store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Background computation failed
    #[error("internal error: {0}")]
    Internal(String),
}

impl PairingError {
    /// TLV error code reported to the controller
    #[must_use]
    pub fn tlv_code(&self) -> u8 {
        match self {
            Self::AlreadyPaired => errors::UNAVAILABLE,
            Self::MaxTries => errors::MAX_TRIES,
            Self::Busy => errors::BUSY,
            Self::AuthenticationFailed(_)
            | Self::UnknownController(_)
            | Self::InsufficientPermissions
            | Self::Crypto(_) => errors::AUTHENTICATION,
            Self::Store(StoreError::Full) => errors::MAX_PEERS,
            Self::Tlv(_)
            | Self::UnexpectedState { .. }
            | Self::UnsupportedMethod(_)
            | Self::Store(_)
            | Self::Internal(_) => errors::UNKNOWN,
        }
    }

    /// HTTP status for the error reply
    #[must_use]
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::UnexpectedState { .. } | Self::Tlv(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::OK,
        }
    }
}
