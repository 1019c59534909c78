//! Data stream configuration

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use super::frame::MAX_PAYLOAD_LENGTH;

/// Data stream listener and connection settings
#[derive(Debug, Clone)]
pub struct DataStreamConfig {
    /// Address the lazy listener binds to (port is always ephemeral)
    pub bind_address: IpAddr,

    /// Lifetime of a prepared session waiting to be claimed
    pub connect_timeout: Duration,

    /// Time an identified connection has to send `control`/`hello`
    pub hello_timeout: Duration,

    /// Time the controller has to answer an accessory request
    pub request_timeout: Duration,

    /// Largest accepted frame payload
    pub max_payload_length: usize,

    /// Prepared sessions allowed to wait for a connection at once
    pub max_pending_sessions: usize,
}

impl Default for DataStreamConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            connect_timeout: Duration::from_secs(10),
            hello_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            max_payload_length: MAX_PAYLOAD_LENGTH,
            max_pending_sessions: 8,
        }
    }
}

impl DataStreamConfig {
    /// Set the bind address
    #[must_use]
    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Set the prepared-session lifetime
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the hello timeout
    #[must_use]
    pub fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Bound the prepared-session pool
    #[must_use]
    pub fn with_max_pending_sessions(mut self, max: usize) -> Self {
        self.max_pending_sessions = max;
        self
    }
}
