//! Handles to primary connections

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::events::{CharacteristicEvent, EventMode};
use crate::error::{HapError, Result};

/// Primary connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket accepted, plaintext
    Connecting,
    /// Request loop running, no pairing yet
    FullySetUp,
    /// Pair-Verify completed, traffic encrypted
    Authenticated,
    /// Will close once the in-flight response is written
    ToBeTornDown,
    /// Closing
    Closing,
    /// Closed
    Closed,
}

/// Result of Pair-Verify on a connection
pub(crate) struct AuthInfo {
    pub username: String,
    pub shared_secret: Zeroizing<[u8; 32]>,
}

pub(crate) enum ConnectionCommand {
    SendEvent(CharacteristicEvent, EventMode),
    Close,
}

/// Handle to a primary connection
#[derive(Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    peer: SocketAddr,
    commands: mpsc::UnboundedSender<ConnectionCommand>,
    state: watch::Receiver<ConnectionState>,
    auth: Arc<OnceLock<AuthInfo>>,
    last_activity: Arc<Mutex<Instant>>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: Uuid,
        peer: SocketAddr,
        commands: mpsc::UnboundedSender<ConnectionCommand>,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            id,
            peer,
            commands,
            state,
            auth: Arc::new(OnceLock::new()),
            last_activity: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Connection id
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remote address
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Authenticated controller username, once Pair-Verify has completed
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.auth.get().map(|a| a.username.as_str())
    }

    /// True after Pair-Verify
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.auth.get().is_some()
    }

    /// Time of the last socket read or write
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a characteristic event for delivery
    ///
    /// Dropped silently by the connection unless the controller subscribed to it.
    ///
    /// # Errors
    ///
    /// Returns `HapError::ConnectionClosed` once the connection task has exited.
    pub fn send_event(&self, event: CharacteristicEvent, mode: EventMode) -> Result<()> {
        self.commands
            .send(ConnectionCommand::SendEvent(event, mode))
            .map_err(|_| HapError::ConnectionClosed)
    }

    /// Close the connection now
    pub fn close(&self) {
        let _ = self.commands.send(ConnectionCommand::Close);
    }

    /// Wait until the connection has closed
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    pub(crate) fn set_auth(&self, auth: AuthInfo) -> bool {
        self.auth.set(auth).is_ok()
    }

    pub(crate) fn shared_secret(&self) -> Option<&[u8]> {
        self.auth.get().map(|a| &a.shared_secret[..])
    }

    pub(crate) fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("username", &self.username())
            .finish()
    }
}
