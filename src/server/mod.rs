//! Primary accessory server
//!
//! One task per TCP connection. A connection starts in plaintext, runs
//! Pair-Setup and Pair-Verify over `/pair-setup` and `/pair-verify`, then
//! switches to the encrypted frame format for the rest of its life.

mod config;
mod connection;
mod events;
mod hap;
mod handle;
mod registry;
mod router;
mod secure;

#[cfg(test)]
mod tests;

pub use config::{ConfigError, HapConfig};
pub use events::{CharacteristicEvent, EventMode, EventQueue, encode_events, event_name};
pub use hap::{HapServer, ServerEvent, ServerState};
pub use handle::{ConnectionHandle, ConnectionState};
pub use router::{
    INSUFFICIENT_PRIVILEGES, NotFoundHandler, RequestContext, RequestHandler, paths,
};
pub use secure::{MAX_FRAME_PLAINTEXT, SecureSession, SecureSessionError, TrafficKeys};
