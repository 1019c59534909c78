//! # hap-accessory
//!
//! The accessory side of the HomeKit Accessory Protocol over IP.
//!
//! ## Features
//!
//! - Pair-Setup (SRP-6a, 3072-bit group) and Pair-Verify (X25519 + Ed25519)
//! - Pairing management (`/pairings` add, remove, list)
//! - Encrypted HTTP sessions with batched characteristic events
//! - HomeKit Data Stream: lazy listener, prepared sessions, request/response
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hap_accessory::protocol::crypto::Ed25519KeyPair;
//! use hap_accessory::{HapConfig, HapServer, MemoryIdentityStore, NotFoundHandler};
//!
//! # async fn example() -> Result<(), hap_accessory::HapError> {
//! let config = HapConfig::new("482-91-736").with_port(0);
//! let mut server = HapServer::new(
//!     config,
//!     Ed25519KeyPair::generate(),
//!     Arc::new(MemoryIdentityStore::new()),
//!     Arc::new(NotFoundHandler),
//! )?;
//! let address = server.start().await?;
//! println!("listening on {address}");
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Server**: [`HapServer`] accepts controllers, routes pairing endpoints
//!   and hands everything else to a [`RequestHandler`]
//! - **Pairing**: sans-IO handshake state machines over a pluggable
//!   [`IdentityStore`]
//! - **Data stream**: [`DataStreamServer`] for the secondary channel
//! - **Protocol**: TLV8, HDS, HTTP and crypto building blocks

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Error types
pub mod error;

/// Data stream subsystem
pub mod datastream;
pub mod pairing;
pub mod protocol;
pub mod server;
/// Owned timers
pub mod timer;

/// Testing utilities
pub mod testing;

// Re-exports
pub use datastream::{DataStreamConfig, DataStreamEvent, DataStreamHandler, DataStreamServer};
pub use error::{HapError, Result};
pub use pairing::{IdentityStore, MemoryIdentityStore, PairingRecord, Permission};
pub use server::{
    CharacteristicEvent, EventMode, HapConfig, HapServer, NotFoundHandler, RequestContext,
    RequestHandler, ServerEvent,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
