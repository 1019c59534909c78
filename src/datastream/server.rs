//! Lazily started data stream listener

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use rand::RngCore;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection::{self, DataStreamHandle};
use super::frame::DataStreamKeys;
use super::session::{ClaimedSession, PreparedSession, SessionPool};
use super::transport::{
    KEY_SALT_LENGTH, SetupStatus, SetupTransportRequest, SetupTransportResponse,
};
use super::{
    DataStreamConfig, DataStreamError, DataStreamHandler, HandlerRegistry, Protocol, RawFrame,
};
use crate::timer::TimerGuard;

/// Listener lifecycle and connection events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataStreamEvent {
    /// Listener bound
    Listening {
        /// Listening port
        port: u16,
    },
    /// A connection claimed a prepared session
    ConnectionOpened {
        /// Data stream connection id
        id: Uuid,
        /// Primary connection the session was prepared on
        anchor: Uuid,
    },
    /// A data stream connection closed
    ConnectionClosed {
        /// Data stream connection id
        id: Uuid,
    },
    /// Listener shut down, nothing left to serve
    Closed,
}

/// What the controller needs to connect to a prepared session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSessionInfo {
    /// Listener port
    pub port: u16,
    /// Accessory half of the key salt
    pub accessory_salt: [u8; KEY_SALT_LENGTH],
}

struct Listener {
    port: u16,
    _task: TimerGuard,
}

pub(crate) struct DataStreamShared {
    pub config: DataStreamConfig,
    pub handlers: Arc<RwLock<HandlerRegistry>>,
    pub connections: RwLock<HashMap<Uuid, DataStreamHandle>>,
    pool: Mutex<SessionPool>,
    listener: Mutex<Option<Listener>>,
    events: broadcast::Sender<DataStreamEvent>,
}

impl DataStreamShared {
    pub fn emit(&self, event: DataStreamEvent) {
        let _ = self.events.send(event);
    }

    /// Claim the session `frame` belongs to and register its connection
    ///
    /// Both happen under the pool lock, so `close_anchor` sees either the
    /// pending session or the registered connection.
    pub async fn claim(
        &self,
        frame: &RawFrame,
        register: impl FnOnce(&ClaimedSession) -> DataStreamHandle,
    ) -> Option<(ClaimedSession, DataStreamHandle)> {
        let mut pool = self.pool.lock().await;
        let claimed = pool.claim(frame)?;
        let handle = register(&claimed);
        self.connections
            .write()
            .await
            .insert(handle.id(), handle.clone());
        drop(pool);
        Some((claimed, handle))
    }

    /// Close the listener if no session is pending and no connection is open
    pub async fn close_if_idle(&self) {
        let mut listener = self.listener.lock().await;
        if listener.is_none() {
            return;
        }
        if !self.pool.lock().await.is_empty() || !self.connections.read().await.is_empty() {
            return;
        }
        if let Some(closed) = listener.take() {
            info!("data stream listener on port {} closed", closed.port);
            self.emit(DataStreamEvent::Closed);
        }
    }

    async fn ensure_listener(
        self: &Arc<Self>,
        listener: &mut Option<Listener>,
    ) -> Result<u16, DataStreamError> {
        if let Some(active) = listener.as_ref() {
            return Ok(active.port);
        }

        let socket = TcpListener::bind(SocketAddr::new(self.config.bind_address, 0)).await?;
        let port = socket.local_addr()?.port();
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(accept_loop(socket, weak));

        info!("data stream listening on port {}", port);
        *listener = Some(Listener {
            port,
            _task: TimerGuard::from_task(task),
        });
        self.emit(DataStreamEvent::Listening { port });
        Ok(port)
    }
}

async fn accept_loop(socket: TcpListener, shared: Weak<DataStreamShared>) {
    loop {
        match socket.accept().await {
            Ok((stream, peer)) => {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                debug!("data stream connection from {}", peer);
                tokio::spawn(connection::run(stream, peer, shared));
            }
            Err(e) => {
                warn!("data stream accept error: {}", e);
            }
        }
    }
}

/// The data stream subsystem of one accessory server
#[derive(Clone)]
pub struct DataStreamServer {
    shared: Arc<DataStreamShared>,
}

impl DataStreamServer {
    /// Create the subsystem; nothing listens until a session is prepared
    #[must_use]
    pub fn new(config: DataStreamConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(DataStreamShared {
                config,
                handlers: Arc::new(RwLock::new(HandlerRegistry::new())),
                connections: RwLock::new(HashMap::new()),
                pool: Mutex::new(SessionPool::default()),
                listener: Mutex::new(None),
                events,
            }),
        }
    }

    /// Subscribe to listener and connection events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DataStreamEvent> {
        self.shared.events.subscribe()
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &DataStreamConfig {
        &self.shared.config
    }

    /// Register a server-wide handler, used when a connection has none
    pub async fn register_handler(
        &self,
        protocol: Protocol,
        topic: Option<&str>,
        handler: Arc<dyn DataStreamHandler>,
    ) {
        self.shared
            .handlers
            .write()
            .await
            .register(protocol, topic, handler);
    }

    /// Derive keys for a new session and make sure the listener runs
    ///
    /// `anchor` is the authenticated primary connection, `shared_secret` its
    /// Pair-Verify secret.
    ///
    /// # Errors
    /// Returns `DataStreamError::Busy` when `max_pending_sessions` are already
    /// waiting, or an error if the listener cannot bind or key derivation fails.
    pub async fn prepare_session(
        &self,
        anchor: Uuid,
        shared_secret: &[u8],
        controller_salt: [u8; KEY_SALT_LENGTH],
    ) -> Result<PreparedSessionInfo, DataStreamError> {
        let mut accessory_salt = [0u8; KEY_SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut accessory_salt);

        let mut salt = Vec::with_capacity(2 * KEY_SALT_LENGTH);
        salt.extend_from_slice(&controller_salt);
        salt.extend_from_slice(&accessory_salt);
        let keys = DataStreamKeys::accessory(shared_secret, &salt)?;

        let mut listener = self.shared.listener.lock().await;
        let mut pool = self.shared.pool.lock().await;
        if pool.len() >= self.shared.config.max_pending_sessions {
            return Err(DataStreamError::Busy(pool.len()));
        }
        let port = self.shared.ensure_listener(&mut listener).await?;

        let id = Uuid::new_v4();
        let weak = Arc::downgrade(&self.shared);
        let expiry = TimerGuard::after(self.shared.config.connect_timeout, async move {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.pool.lock().await.expire(id) {
                debug!("prepared data stream session {} expired", id);
                shared.close_if_idle().await;
            }
        });

        pool.insert(PreparedSession {
            id,
            anchor,
            keys,
            expiry: Some(expiry),
        });
        drop(pool);
        drop(listener);

        debug!("prepared data stream session {} for {} on port {}", id, anchor, port);
        Ok(PreparedSessionInfo {
            port,
            accessory_salt,
        })
    }

    /// Answer a Setup Data Stream Transport write
    ///
    /// Always returns a response TLV; failures are reported in its status.
    pub async fn handle_setup_transport(
        &self,
        anchor: Uuid,
        shared_secret: &[u8],
        request: &[u8],
    ) -> Vec<u8> {
        let response = match SetupTransportRequest::parse(request) {
            Ok(request) => {
                match self
                    .prepare_session(anchor, shared_secret, request.controller_salt)
                    .await
                {
                    Ok(info) => SetupTransportResponse::success(info.port, info.accessory_salt),
                    Err(e @ DataStreamError::Busy(_)) => {
                        warn!("[{}] data stream setup refused: {}", anchor, e);
                        SetupTransportResponse::failure(SetupStatus::Busy)
                    }
                    Err(e) => {
                        warn!("[{}] data stream setup failed: {}", anchor, e);
                        SetupTransportResponse::failure(SetupStatus::GenericError)
                    }
                }
            }
            Err(e) => {
                warn!("[{}] invalid data stream setup request: {}", anchor, e);
                SetupTransportResponse::failure(SetupStatus::GenericError)
            }
        };
        response.encode()
    }

    /// Drop pending sessions and close data streams anchored to a primary connection
    pub async fn close_anchor(&self, anchor: Uuid) {
        let mut pool = self.shared.pool.lock().await;
        let dropped = pool.drop_anchor(anchor);
        if dropped > 0 {
            debug!("[{}] dropped {} prepared data stream sessions", anchor, dropped);
        }
        let anchored: Vec<DataStreamHandle> = self
            .shared
            .connections
            .read()
            .await
            .values()
            .filter(|c| c.anchor() == anchor)
            .cloned()
            .collect();
        drop(pool);

        for connection in anchored {
            connection.close().await;
        }
        self.shared.close_if_idle().await;
    }

    /// Listener port, if running
    pub async fn port(&self) -> Option<u16> {
        self.shared.listener.lock().await.as_ref().map(|l| l.port)
    }

    /// Prepared sessions not yet claimed
    pub async fn pending_sessions(&self) -> usize {
        self.shared.pool.lock().await.len()
    }

    /// Open data stream connections
    pub async fn connections(&self) -> Vec<DataStreamHandle> {
        self.shared.connections.read().await.values().cloned().collect()
    }

    /// Close everything, including the listener
    pub async fn shutdown(&self) {
        *self.shared.pool.lock().await = SessionPool::default();
        for connection in self.connections().await {
            connection.close().await;
        }
        if self.shared.listener.lock().await.take().is_some() {
            self.shared.emit(DataStreamEvent::Closed);
        }
    }
}

impl std::fmt::Debug for DataStreamServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStreamServer")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}
