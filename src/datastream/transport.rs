//! Setup Data Stream Transport TLV

use super::DataStreamError;
use crate::protocol::tlv::{TlvDecoder, TlvEncoder};

mod request_types {
    pub const SESSION_COMMAND_TYPE: u8 = 0x01;
    pub const TRANSPORT_TYPE: u8 = 0x02;
    pub const CONTROLLER_KEY_SALT: u8 = 0x03;
}

mod response_types {
    pub const STATUS: u8 = 0x01;
    pub const TRANSPORT_SESSION_PARAMETERS: u8 = 0x02;
}

mod parameter_types {
    pub const TCP_LISTENING_PORT: u8 = 0x01;
    pub const ACCESSORY_KEY_SALT: u8 = 0x03;
}

mod configuration_types {
    pub const TRANSFER_TRANSPORT_CONFIGURATION: u8 = 0x01;
    pub const TRANSPORT_TYPE: u8 = 0x01;
}

/// Length of each side's key salt
pub const KEY_SALT_LENGTH: usize = 32;

/// Session command requested by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Start a new session
    StartSession,
}

/// Transport requested by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// HomeKit Data Stream over TCP
    HomeKitDataStreamTcp,
}

/// Setup status reported back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStatus {
    /// Session prepared
    Success = 0,
    /// Generic failure
    GenericError = 1,
    /// Accessory cannot take another session
    Busy = 2,
}

/// Parsed setup request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupTransportRequest {
    /// Command
    pub command: SessionCommand,
    /// Transport
    pub transport: TransportType,
    /// Controller half of the key salt
    pub controller_salt: [u8; KEY_SALT_LENGTH],
}

impl SetupTransportRequest {
    /// Parse the TLV written by the controller
    ///
    /// # Errors
    /// Returns `DataStreamError::InvalidSetup` for unknown commands, transports or
    /// a salt that is not 32 bytes.
    pub fn parse(data: &[u8]) -> Result<Self, DataStreamError> {
        let tlv = TlvDecoder::decode(data)?;
        let command = match tlv.get_u8(request_types::SESSION_COMMAND_TYPE) {
            Some(0) => SessionCommand::StartSession,
            other => {
                return Err(DataStreamError::InvalidSetup(format!(
                    "unsupported session command {other:?}"
                )));
            }
        };
        let transport = match tlv.get_u8(request_types::TRANSPORT_TYPE) {
            Some(0) => TransportType::HomeKitDataStreamTcp,
            other => {
                return Err(DataStreamError::InvalidSetup(format!(
                    "unsupported transport type {other:?}"
                )));
            }
        };
        let controller_salt = tlv
            .get_required(request_types::CONTROLLER_KEY_SALT)?
            .try_into()
            .map_err(|_| DataStreamError::InvalidSetup("controller salt must be 32 bytes".into()))?;

        Ok(Self {
            command,
            transport,
            controller_salt,
        })
    }

    /// Encode as the controller would
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        TlvEncoder::new()
            .add_byte(request_types::SESSION_COMMAND_TYPE, 0)
            .add_byte(request_types::TRANSPORT_TYPE, 0)
            .add(request_types::CONTROLLER_KEY_SALT, &self.controller_salt)
            .build()
    }
}

/// Setup response parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupTransportResponse {
    /// Status
    pub status: SetupStatus,
    /// Listener port and accessory salt, present on success
    pub session: Option<(u16, [u8; KEY_SALT_LENGTH])>,
}

impl SetupTransportResponse {
    /// Successful response
    #[must_use]
    pub fn success(port: u16, accessory_salt: [u8; KEY_SALT_LENGTH]) -> Self {
        Self {
            status: SetupStatus::Success,
            session: Some((port, accessory_salt)),
        }
    }

    /// Failure response
    #[must_use]
    pub fn failure(status: SetupStatus) -> Self {
        Self {
            status,
            session: None,
        }
    }

    /// Encode the response TLV
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = TlvEncoder::new().add_byte(response_types::STATUS, self.status as u8);
        if let Some((port, salt)) = &self.session {
            let parameters = TlvEncoder::new()
                .add_u16(parameter_types::TCP_LISTENING_PORT, *port)
                .add(parameter_types::ACCESSORY_KEY_SALT, salt);
            encoder = encoder.add_tlv(response_types::TRANSPORT_SESSION_PARAMETERS, parameters);
        }
        encoder.build()
    }

    /// Parse a response TLV
    ///
    /// # Errors
    /// Returns error for a malformed TLV or unknown status.
    pub fn parse(data: &[u8]) -> Result<Self, DataStreamError> {
        let tlv = TlvDecoder::decode(data)?;
        let status = match tlv.get_u8(response_types::STATUS) {
            Some(0) => SetupStatus::Success,
            Some(1) => SetupStatus::GenericError,
            Some(2) => SetupStatus::Busy,
            other => {
                return Err(DataStreamError::InvalidSetup(format!("unknown status {other:?}")));
            }
        };
        let session = match tlv.get(response_types::TRANSPORT_SESSION_PARAMETERS) {
            Some(raw) => {
                let parameters = TlvDecoder::decode(raw)?;
                let port = parameters
                    .get_u16(parameter_types::TCP_LISTENING_PORT)
                    .ok_or_else(|| DataStreamError::InvalidSetup("missing port".into()))?;
                let salt = parameters
                    .get_required(parameter_types::ACCESSORY_KEY_SALT)?
                    .try_into()
                    .map_err(|_| DataStreamError::InvalidSetup("bad accessory salt".into()))?;
                Some((port, salt))
            }
            None => None,
        };
        Ok(Self { status, session })
    }
}

/// Supported Data Stream Transport Configuration value
#[must_use]
pub fn supported_configuration() -> Vec<u8> {
    let transport = TlvEncoder::new().add_byte(configuration_types::TRANSPORT_TYPE, 0);
    TlvEncoder::new()
        .add_tlv(configuration_types::TRANSFER_TRANSPORT_CONFIGURATION, transport)
        .build()
}
