//! HTTP controller over a real socket

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use zeroize::Zeroizing;

use super::ControllerError;
use super::pairing::{ControllerIdentity, PairSetupClient, PairVerifyClient, PairedAccessory};
use crate::protocol::http::{
    HttpClientCodec, HttpResponse, Method, content_types, encode_request,
};
use crate::server::{SecureSession, TrafficKeys, paths};

/// A controller connection to an accessory server
pub struct TestController {
    stream: TcpStream,
    codec: HttpClientCodec,
    secure: Option<SecureSession>,
    events: VecDeque<HttpResponse>,
    shared_secret: Option<Zeroizing<[u8; 32]>>,
}

impl TestController {
    /// Connect in plaintext
    ///
    /// # Errors
    /// Returns error if the socket cannot connect.
    pub async fn connect(address: SocketAddr) -> Result<Self, ControllerError> {
        Ok(Self {
            stream: TcpStream::connect(address).await?,
            codec: HttpClientCodec::new(),
            secure: None,
            events: VecDeque::new(),
            shared_secret: None,
        })
    }

    /// Pair-Verify shared secret, once verified
    #[must_use]
    pub fn shared_secret(&self) -> Option<&[u8]> {
        self.shared_secret.as_ref().map(|s| &s[..])
    }

    /// True after Pair-Verify
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.secure.is_some()
    }

    /// Send a request and wait for its response
    ///
    /// Events that arrive first are kept for [`next_event`](Self::next_event).
    ///
    /// # Errors
    /// Returns error if the socket fails or the accessory closes it.
    pub async fn request(
        &mut self,
        method: Method,
        uri: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<HttpResponse, ControllerError> {
        self.send_raw(&encode_request(method, uri, content_type, body))
            .await?;
        self.read_response().await
    }

    /// `GET` helper
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn get(&mut self, uri: &str) -> Result<HttpResponse, ControllerError> {
        self.request(Method::Get, uri, None, &[]).await
    }

    /// `PUT` with a JSON body
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn put_json(
        &mut self,
        uri: &str,
        body: &serde_json::Value,
    ) -> Result<HttpResponse, ControllerError> {
        self.request(
            Method::Put,
            uri,
            Some(content_types::HAP_JSON),
            body.to_string().as_bytes(),
        )
        .await
    }

    /// `POST` a TLV8 body
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn post_tlv(
        &mut self,
        uri: &str,
        body: &[u8],
    ) -> Result<HttpResponse, ControllerError> {
        self.request(Method::Post, uri, Some(content_types::PAIRING_TLV8), body)
            .await
    }

    /// Write bytes, encrypting them once the session is secure
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub async fn send_raw(&mut self, plaintext: &[u8]) -> Result<(), ControllerError> {
        let bytes = match self.secure.as_mut() {
            Some(secure) => secure.encrypt(plaintext)?,
            None => plaintext.to_vec(),
        };
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    /// Write bytes exactly as given, bypassing encryption
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub async fn send_unencrypted(&mut self, bytes: &[u8]) -> Result<(), ControllerError> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Wait for the next response, buffering events
    ///
    /// # Errors
    /// Returns error if the socket fails or the accessory closes it.
    pub async fn read_response(&mut self) -> Result<HttpResponse, ControllerError> {
        loop {
            let message = self.read_message().await?;
            if message.is_event() {
                self.events.push_back(message);
            } else {
                return Ok(message);
            }
        }
    }

    /// Wait for the next `EVENT/1.0` message
    ///
    /// # Errors
    /// Returns `ControllerError::Timeout` if none arrives within `limit`.
    pub async fn next_event(
        &mut self,
        limit: Duration,
    ) -> Result<serde_json::Value, ControllerError> {
        let event = match self.events.pop_front() {
            Some(event) => event,
            None => tokio::time::timeout(limit, self.read_event())
                .await
                .map_err(|_| ControllerError::Timeout)??,
        };
        serde_json::from_slice(&event.body)
            .map_err(|e| ControllerError::Protocol(format!("event body: {e}")))
    }

    /// True once the accessory has closed the socket
    pub async fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 1024];
        loop {
            match self.stream.read(&mut buf).await {
                Ok(0) | Err(_) => return true,
                Ok(_) => {}
            }
        }
    }

    /// Run Pair-Setup
    ///
    /// # Errors
    /// Returns error if the accessory rejects any step.
    pub async fn pair_setup(
        &mut self,
        identity: &ControllerIdentity,
        setup_code: &str,
    ) -> Result<PairedAccessory, ControllerError> {
        let mut client = PairSetupClient::new(identity.clone(), setup_code);
        let m2 = self.post_tlv(paths::PAIR_SETUP, &client.start()).await?;
        let m3 = client.process_m2(&m2.body)?;
        let m4 = self.post_tlv(paths::PAIR_SETUP, &m3).await?;
        let m5 = client.process_m4(&m4.body)?;
        let m6 = self.post_tlv(paths::PAIR_SETUP, &m5).await?;
        client.process_m6(&m6.body)
    }

    /// Run Pair-Verify and switch to encrypted framing
    ///
    /// # Errors
    /// Returns error if the accessory rejects any step.
    pub async fn pair_verify(
        &mut self,
        identity: &ControllerIdentity,
        accessory: &PairedAccessory,
    ) -> Result<(), ControllerError> {
        let mut client = PairVerifyClient::new(identity.clone());
        let m2 = self.post_tlv(paths::PAIR_VERIFY, &client.start()).await?;
        let m3 = client.process_m2(&m2.body, accessory)?;
        let m4 = self.post_tlv(paths::PAIR_VERIFY, &m3).await?;
        let shared_secret = client.process_m4(&m4.body)?;
        self.install_keys(shared_secret)
    }

    /// Switch to encrypted framing with keys from a Pair-Verify shared secret
    ///
    /// # Errors
    /// Returns error if key derivation fails.
    pub fn install_keys(
        &mut self,
        shared_secret: Zeroizing<[u8; 32]>,
    ) -> Result<(), ControllerError> {
        let keys = TrafficKeys::controller(&shared_secret[..])?;
        let mut secure = SecureSession::new(&keys)?;
        let leftover = self.codec.take_buffer();
        if !leftover.is_empty() {
            secure.feed(&leftover);
            let plaintext = secure.decrypt()?;
            self.codec.feed(&plaintext);
        }
        self.secure = Some(secure);
        self.shared_secret = Some(shared_secret);
        Ok(())
    }

    async fn read_event(&mut self) -> Result<HttpResponse, ControllerError> {
        let message = self.read_message().await?;
        if message.is_event() {
            Ok(message)
        } else {
            Err(ControllerError::Protocol(format!(
                "unexpected response {} while waiting for an event",
                message.status.as_u16()
            )))
        }
    }

    async fn read_message(&mut self) -> Result<HttpResponse, ControllerError> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(message) = self.codec.decode()? {
                return Ok(message);
            }
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(ControllerError::Closed);
            }
            match self.secure.as_mut() {
                Some(secure) => {
                    secure.feed(&buf[..n]);
                    let plaintext = secure.decrypt()?;
                    self.codec.feed(&plaintext);
                }
                None => self.codec.feed(&buf[..n]),
            }
        }
    }
}

impl std::fmt::Debug for TestController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestController")
            .field("encrypted", &self.secure.is_some())
            .field("buffered_events", &self.events.len())
            .finish_non_exhaustive()
    }
}
