//! Data stream messages
//!
//! A frame payload is `[header_len:u8][header][body]` where header and body are
//! HDS dictionaries encoded independently.

use std::fmt;

use super::DataStreamError;
use crate::protocol::hds::{self, HdsDict, HdsValue};

/// Header keys
mod keys {
    pub const PROTOCOL: &str = "protocol";
    pub const EVENT: &str = "event";
    pub const REQUEST: &str = "request";
    pub const RESPONSE: &str = "response";
    pub const ID: &str = "id";
    pub const STATUS: &str = "status";
}

/// Data stream protocol names
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    /// Connection control (`hello`)
    Control,
    /// Bulk data transfer
    DataSend,
    /// Any other protocol
    Other(String),
}

impl Protocol {
    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Control => "control",
            Self::DataSend => "dataSend",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for Protocol {
    fn from(name: &str) -> Self {
        match name {
            "control" => Self::Control,
            "dataSend" => Self::DataSend,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Request handled
    Success,
    /// Out of memory
    OutOfMemory,
    /// Timed out
    Timeout,
    /// Header could not be processed
    HeaderError,
    /// Body could not be processed
    PayloadError,
    /// No handler for the protocol
    MissingProtocol,
    /// Protocol-defined failure
    ProtocolSpecificError,
}

impl ResponseStatus {
    /// Wire code
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Success => 0,
            Self::OutOfMemory => 1,
            Self::Timeout => 2,
            Self::HeaderError => 3,
            Self::PayloadError => 4,
            Self::MissingProtocol => 5,
            Self::ProtocolSpecificError => 6,
        }
    }

    /// Parse a wire code
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::Success,
            1 => Self::OutOfMemory,
            2 => Self::Timeout,
            3 => Self::HeaderError,
            4 => Self::PayloadError,
            5 => Self::MissingProtocol,
            6 => Self::ProtocolSpecificError,
            _ => return None,
        })
    }
}

/// A decoded data stream message
#[derive(Debug, Clone, PartialEq)]
pub enum DataStreamMessage {
    /// Fire-and-forget notification
    Event {
        /// Protocol
        protocol: Protocol,
        /// Event name
        topic: String,
        /// Body dictionary
        body: HdsDict,
    },
    /// Request expecting a response with the same id
    Request {
        /// Protocol
        protocol: Protocol,
        /// Request name
        topic: String,
        /// Request id
        id: i64,
        /// Body dictionary
        body: HdsDict,
    },
    /// Response to an earlier request
    Response {
        /// Protocol
        protocol: Protocol,
        /// Request name being answered
        topic: String,
        /// Id of the answered request
        id: i64,
        /// Outcome
        status: ResponseStatus,
        /// Body dictionary
        body: HdsDict,
    },
}

impl DataStreamMessage {
    /// Protocol the message belongs to
    #[must_use]
    pub fn protocol(&self) -> &Protocol {
        match self {
            Self::Event { protocol, .. }
            | Self::Request { protocol, .. }
            | Self::Response { protocol, .. } => protocol,
        }
    }

    /// Event, request or response name
    #[must_use]
    pub fn topic(&self) -> &str {
        match self {
            Self::Event { topic, .. }
            | Self::Request { topic, .. }
            | Self::Response { topic, .. } => topic,
        }
    }

    /// True for the `control`/`hello` request
    #[must_use]
    pub fn is_hello(&self) -> bool {
        matches!(self, Self::Request { protocol: Protocol::Control, topic, .. } if topic == "hello")
    }

    /// Encode to a frame payload
    ///
    /// # Errors
    /// Returns error if the header exceeds 255 bytes or a value cannot be encoded.
    pub fn encode(&self) -> Result<Vec<u8>, DataStreamError> {
        let mut header = HdsDict::new();
        let body = match self {
            Self::Event {
                protocol,
                topic,
                body,
            } => {
                header.insert(keys::PROTOCOL.into(), protocol.as_str().into());
                header.insert(keys::EVENT.into(), topic.as_str().into());
                body
            }
            Self::Request {
                protocol,
                topic,
                id,
                body,
            } => {
                header.insert(keys::PROTOCOL.into(), protocol.as_str().into());
                header.insert(keys::REQUEST.into(), topic.as_str().into());
                header.insert(keys::ID.into(), HdsValue::Integer(*id));
                body
            }
            Self::Response {
                protocol,
                topic,
                id,
                status,
                body,
            } => {
                header.insert(keys::PROTOCOL.into(), protocol.as_str().into());
                header.insert(keys::RESPONSE.into(), topic.as_str().into());
                header.insert(keys::ID.into(), HdsValue::Integer(*id));
                header.insert(keys::STATUS.into(), HdsValue::Integer(status.code()));
                body
            }
        };

        let header = hds::encode(&HdsValue::Dictionary(header))?;
        let header_len =
            u8::try_from(header.len()).map_err(|_| DataStreamError::HeaderTooLarge(header.len()))?;
        let body = hds::encode(&HdsValue::Dictionary(body.clone()))?;

        let mut payload = Vec::with_capacity(1 + header.len() + body.len());
        payload.push(header_len);
        payload.extend_from_slice(&header);
        payload.extend_from_slice(&body);
        Ok(payload)
    }

    /// Decode a frame payload
    ///
    /// An empty body section decodes as an empty dictionary.
    ///
    /// # Errors
    /// Returns error for truncated payloads, malformed HDS or an unrecognised header.
    pub fn decode(payload: &[u8]) -> Result<Self, DataStreamError> {
        let (&header_len, rest) = payload
            .split_first()
            .ok_or_else(|| DataStreamError::InvalidMessage("empty payload".into()))?;
        let header_len = usize::from(header_len);
        if rest.len() < header_len {
            return Err(DataStreamError::InvalidMessage("truncated header".into()));
        }
        let (header, body) = rest.split_at(header_len);

        let HdsValue::Dictionary(mut header) = hds::decode(header)? else {
            return Err(DataStreamError::InvalidMessage("header is not a dictionary".into()));
        };
        let body = if body.is_empty() {
            HdsDict::new()
        } else {
            match hds::decode(body)? {
                HdsValue::Dictionary(d) => d,
                _ => {
                    return Err(DataStreamError::InvalidMessage(
                        "body is not a dictionary".into(),
                    ));
                }
            }
        };

        let protocol = take_string(&mut header, keys::PROTOCOL)?.as_str().into();
        if let Ok(topic) = take_string(&mut header, keys::EVENT) {
            return Ok(Self::Event {
                protocol,
                topic,
                body,
            });
        }
        let id = header
            .get(keys::ID)
            .and_then(HdsValue::as_i64)
            .ok_or_else(|| DataStreamError::InvalidMessage("missing id".into()))?;
        if let Ok(topic) = take_string(&mut header, keys::REQUEST) {
            return Ok(Self::Request {
                protocol,
                topic,
                id,
                body,
            });
        }
        let topic = take_string(&mut header, keys::RESPONSE)?;
        let status = header
            .get(keys::STATUS)
            .and_then(HdsValue::as_i64)
            .and_then(ResponseStatus::from_code)
            .ok_or_else(|| DataStreamError::InvalidMessage("missing status".into()))?;
        Ok(Self::Response {
            protocol,
            topic,
            id,
            status,
            body,
        })
    }
}

fn take_string(header: &mut HdsDict, key: &str) -> Result<String, DataStreamError> {
    match header.remove(key) {
        Some(HdsValue::String(s)) => Ok(s),
        _ => Err(DataStreamError::InvalidMessage(format!("missing {key}"))),
    }
}
