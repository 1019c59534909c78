//! Configuration for the accessory server

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use rand::Rng;

use crate::datastream::DataStreamConfig;

/// Setup codes the protocol forbids
const TRIVIAL_SETUP_CODES: &[&str] = &[
    "000-00-000",
    "111-11-111",
    "222-22-222",
    "333-33-333",
    "444-44-444",
    "555-55-555",
    "666-66-666",
    "777-77-777",
    "888-88-888",
    "999-99-999",
    "123-45-678",
    "876-54-321",
];

/// Accessory server configuration
#[derive(Debug, Clone)]
pub struct HapConfig {
    /// Address to bind the primary listener to
    pub bind_address: IpAddr,

    /// Primary listener port (0 picks an ephemeral port)
    pub port: u16,

    /// Device id in `AA:BB:CC:DD:EE:FF` form
    pub device_id: String,

    /// Setup code in `XXX-XX-XXX` form
    pub setup_code: String,

    /// Accept Pair-Setup even when a controller is already paired
    pub allow_insecure_pairing: bool,

    /// Debounce window for batched events
    pub event_batch_delay: Duration,

    /// Open connection count at which the idle sweep starts
    pub idle_connection_limit: usize,

    /// Idle time after which a swept connection is closed
    pub max_idle_time: Duration,

    /// Time allowed to finish a Pair-Setup or Pair-Verify
    pub handshake_timeout: Duration,

    /// Data stream listener settings
    pub data_stream: DataStreamConfig,
}

impl Default for HapConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 51826,
            device_id: Self::generate_device_id(),
            setup_code: "031-45-154".to_string(),
            allow_insecure_pairing: false,
            event_batch_delay: Duration::from_millis(250),
            idle_connection_limit: 16,
            max_idle_time: Duration::from_secs(60 * 60),
            handshake_timeout: Duration::from_secs(60),
            data_stream: DataStreamConfig::default(),
        }
    }
}

impl HapConfig {
    /// Create a configuration with the given setup code
    #[must_use]
    pub fn new(setup_code: impl Into<String>) -> Self {
        Self {
            setup_code: setup_code.into(),
            ..Default::default()
        }
    }

    /// Set the bind address
    #[must_use]
    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Set the listener port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the device id
    #[must_use]
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    /// Allow Pair-Setup while already paired
    #[must_use]
    pub fn with_insecure_pairing(mut self) -> Self {
        self.allow_insecure_pairing = true;
        self
    }

    /// Set the event batch delay
    #[must_use]
    pub fn with_event_batch_delay(mut self, delay: Duration) -> Self {
        self.event_batch_delay = delay;
        self
    }

    /// Set the idle sweep threshold and idle timeout
    #[must_use]
    pub fn with_idle_limits(mut self, connections: usize, max_idle: Duration) -> Self {
        self.idle_connection_limit = connections;
        self.max_idle_time = max_idle;
        self
    }

    /// Set the data stream settings
    #[must_use]
    pub fn with_data_stream(mut self, config: DataStreamConfig) -> Self {
        self.data_stream = config;
        self
    }

    /// Set the handshake timeout
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Check the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for a malformed device id or setup code.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_device_id(&self.device_id) {
            return Err(ConfigError::InvalidDeviceId(self.device_id.clone()));
        }
        if !is_valid_setup_code(&self.setup_code) {
            return Err(ConfigError::InvalidSetupCode(self.setup_code.clone()));
        }
        if self.event_batch_delay.is_zero() {
            return Err(ConfigError::InvalidTiming("event batch delay"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::InvalidTiming("handshake timeout"));
        }
        Ok(())
    }

    fn generate_device_id() -> String {
        let mut rng = rand::thread_rng();
        let bytes: [u8; 6] = rng.r#gen();
        format!(
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
        )
    }
}

fn is_valid_device_id(id: &str) -> bool {
    let parts: Vec<&str> = id.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

fn is_valid_setup_code(code: &str) -> bool {
    let bytes = code.as_bytes();
    let shaped = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            3 | 6 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    shaped && !TRIVIAL_SETUP_CODES.contains(&code)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Device id is not six colon-separated hex pairs
    #[error("Invalid device ID: {0}")]
    InvalidDeviceId(String),

    /// Setup code is malformed or trivial
    #[error("Invalid setup code: {0}")]
    InvalidSetupCode(String),

    /// A timer was configured as zero
    #[error("Invalid timing: {0} must be non-zero")]
    InvalidTiming(&'static str),
}
