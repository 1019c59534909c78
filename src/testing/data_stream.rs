//! Controller end of a data stream connection

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use super::ControllerError;
use crate::datastream::{
    DataStreamFrameCodec, DataStreamKeys, DataStreamMessage, FrameCrypto, KEY_SALT_LENGTH,
    Protocol, RawFrame, ResponseStatus,
};
use crate::protocol::hds::HdsDict;

/// Data stream client speaking the controller side of the protocol
pub struct DataStreamClient {
    framed: Framed<TcpStream, DataStreamFrameCodec>,
    crypto: FrameCrypto,
    next_request_id: i64,
}

impl DataStreamClient {
    /// Connect to the accessory's data stream listener
    ///
    /// # Errors
    /// Returns error if the socket cannot connect or key derivation fails.
    pub async fn connect(
        address: SocketAddr,
        shared_secret: &[u8],
        controller_salt: &[u8; KEY_SALT_LENGTH],
        accessory_salt: &[u8; KEY_SALT_LENGTH],
    ) -> Result<Self, ControllerError> {
        let stream = TcpStream::connect(address).await?;
        let crypto = FrameCrypto::new(&client_keys(
            shared_secret,
            controller_salt,
            accessory_salt,
        )?)?;
        Ok(Self {
            framed: Framed::new(stream, DataStreamFrameCodec::default()),
            crypto,
            next_request_id: 1,
        })
    }

    /// Seal and send a message
    ///
    /// # Errors
    /// Returns error if encoding or the write fails.
    pub async fn send(&mut self, message: &DataStreamMessage) -> Result<(), ControllerError> {
        let frame = self.crypto.seal(&message.encode()?)?;
        self.framed.send(frame).await?;
        Ok(())
    }

    /// Send an already sealed frame
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub async fn send_raw(&mut self, frame: RawFrame) -> Result<(), ControllerError> {
        self.framed.send(frame).await?;
        Ok(())
    }

    /// Seal a message without sending it
    ///
    /// # Errors
    /// Returns error if encoding fails.
    pub fn seal(&mut self, message: &DataStreamMessage) -> Result<RawFrame, ControllerError> {
        Ok(self.crypto.seal(&message.encode()?)?)
    }

    /// Send a request with a fresh id and return the id
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub async fn request(
        &mut self,
        protocol: Protocol,
        topic: &str,
        body: HdsDict,
    ) -> Result<i64, ControllerError> {
        let id = self.next_request_id;
        self.next_request_id += 1;
        self.send(&DataStreamMessage::Request {
            protocol,
            topic: topic.to_string(),
            id,
            body,
        })
        .await?;
        Ok(id)
    }

    /// Perform the `control`/`hello` exchange
    ///
    /// # Errors
    /// Returns error if the accessory does not answer with success.
    pub async fn hello(&mut self) -> Result<(), ControllerError> {
        let id = self
            .request(Protocol::Control, "hello", HdsDict::new())
            .await?;
        match self.recv().await? {
            DataStreamMessage::Response {
                id: answered,
                status: ResponseStatus::Success,
                ..
            } if answered == id => Ok(()),
            other => Err(ControllerError::Protocol(format!(
                "unexpected hello answer: {other:?}"
            ))),
        }
    }

    /// Receive the next message
    ///
    /// # Errors
    /// Returns `ControllerError::Closed` if the accessory closed the socket.
    pub async fn recv(&mut self) -> Result<DataStreamMessage, ControllerError> {
        let frame = self.framed.next().await.ok_or(ControllerError::Closed)??;
        let payload = self.crypto.open(&frame)?;
        Ok(DataStreamMessage::decode(&payload)?)
    }

    /// Receive with a deadline
    ///
    /// # Errors
    /// Returns `ControllerError::Timeout` if nothing arrives in time.
    pub async fn recv_timeout(
        &mut self,
        limit: Duration,
    ) -> Result<DataStreamMessage, ControllerError> {
        tokio::time::timeout(limit, self.recv())
            .await
            .map_err(|_| ControllerError::Timeout)?
    }

    /// True once the accessory has closed the connection
    pub async fn is_closed(&mut self) -> bool {
        matches!(self.framed.next().await, None | Some(Err(_)))
    }
}

/// Controller-side keys for a prepared session
///
/// # Errors
/// Returns error if HKDF expansion fails.
pub fn client_keys(
    shared_secret: &[u8],
    controller_salt: &[u8; KEY_SALT_LENGTH],
    accessory_salt: &[u8; KEY_SALT_LENGTH],
) -> Result<DataStreamKeys, ControllerError> {
    let mut salt = controller_salt.to_vec();
    salt.extend_from_slice(accessory_salt);
    Ok(DataStreamKeys::controller(shared_secret, &salt)?)
}
