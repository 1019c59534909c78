//! Accessory server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::time::{Instant, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::HapConfig;
use super::connection;
use super::events::{CharacteristicEvent, EventMode};
use super::handle::ConnectionHandle;
use super::registry::ConnectionRegistry;
use super::router::RequestHandler;
use crate::datastream::DataStreamServer;
use crate::error::{HapError, Result};
use crate::pairing::{AccessoryIdentity, IdentityStore, SetupCoordinator};
use crate::protocol::crypto::Ed25519KeyPair;
use crate::timer::TimerGuard;

/// How long `stop` waits for connection tasks to finish
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Server lifecycle and connection events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Listener bound
    Listening(SocketAddr),
    /// Socket accepted
    ConnectionOpened {
        /// Connection id
        id: Uuid,
        /// Remote address
        peer: SocketAddr,
    },
    /// Connection closed
    ConnectionClosed {
        /// Connection id
        id: Uuid,
    },
    /// Pair-Verify completed
    Authenticated {
        /// Connection id
        id: Uuid,
        /// Controller username
        username: String,
    },
    /// Pair-Setup stored a new pairing
    PairingAdded {
        /// Controller username
        username: String,
    },
    /// A pairing was removed
    PairingRemoved {
        /// Controller username
        username: String,
    },
}

/// Server lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not listening
    Stopped,
    /// Accepting connections
    Running,
}

pub(crate) struct ServerShared {
    pub config: HapConfig,
    pub identity: AccessoryIdentity,
    pub store: Arc<dyn IdentityStore>,
    pub setup: SetupCoordinator,
    pub handler: Arc<dyn RequestHandler>,
    pub registry: ConnectionRegistry,
    pub data_stream: DataStreamServer,
    events: broadcast::Sender<ServerEvent>,
}

impl ServerShared {
    pub fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }
}

/// HAP accessory server
pub struct HapServer {
    shared: Arc<ServerShared>,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl HapServer {
    /// Create a server
    ///
    /// `keypair` is the accessory's long-term identity, `store` holds the
    /// controller pairings and `handler` answers authenticated requests.
    ///
    /// # Errors
    ///
    /// Returns `HapError::Config` if the configuration is invalid.
    pub fn new(
        config: HapConfig,
        keypair: Ed25519KeyPair,
        store: Arc<dyn IdentityStore>,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(64);
        let identity = AccessoryIdentity::with_keypair(
            config.device_id.clone(),
            config.setup_code.clone(),
            keypair,
        );
        let data_stream = DataStreamServer::new(config.data_stream.clone());

        Ok(Self {
            shared: Arc::new(ServerShared {
                config,
                identity,
                store,
                setup: SetupCoordinator::new(),
                handler,
                registry: ConnectionRegistry::new(),
                data_stream,
                events,
            }),
            state: Arc::new(RwLock::new(ServerState::Stopped)),
            shutdown_tx: None,
        })
    }

    /// Subscribe to server events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.shared.events.subscribe()
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &HapConfig {
        &self.shared.config
    }

    /// Accessory identity
    #[must_use]
    pub fn identity(&self) -> &AccessoryIdentity {
        &self.shared.identity
    }

    /// Data stream subsystem
    #[must_use]
    pub fn data_stream(&self) -> &DataStreamServer {
        &self.shared.data_stream
    }

    /// Current state
    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Bind and start accepting connections
    ///
    /// # Errors
    ///
    /// Returns `HapError::AlreadyRunning` if started twice, or an I/O error if
    /// the port cannot be bound.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let mut state = self.state.write().await;
        if *state != ServerState::Stopped {
            return Err(HapError::AlreadyRunning);
        }

        let listener = TcpListener::bind(SocketAddr::new(
            self.shared.config.bind_address,
            self.shared.config.port,
        ))
        .await?;
        let address = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);
        *state = ServerState::Running;
        drop(state);

        info!(
            "accessory {} listening on {}",
            self.shared.identity.device_id, address
        );
        self.shared.emit(ServerEvent::Listening(address));
        tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.shared),
            Arc::clone(&self.state),
            shutdown_rx,
        ));
        Ok(address)
    }

    /// Stop accepting and close every connection
    ///
    /// # Errors
    ///
    /// Returns `HapError::NotRunning` if the server is not running, or
    /// `HapError::Timeout` if a connection task is still busy after the
    /// listener and data stream have been shut down.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(tx) = self.shutdown_tx.take() else {
            return Err(HapError::NotRunning);
        };
        let _ = tx.send(()).await;

        let connections = self.shared.registry.all().await;
        for connection in &connections {
            connection.close();
        }
        let drained = timeout(STOP_TIMEOUT, async {
            for connection in &connections {
                connection.closed().await;
            }
        })
        .await;
        self.shared.data_stream.shutdown().await;
        *self.state.write().await = ServerState::Stopped;

        drained.map_err(|_| {
            warn!("connections still open {:?} after stop", STOP_TIMEOUT);
            HapError::Timeout {
                operation: "connection shutdown",
            }
        })
    }

    /// Push a characteristic change to every subscribed controller
    ///
    /// `origin` is skipped, typically the connection whose write caused the change.
    pub async fn broadcast_event(
        &self,
        event: &CharacteristicEvent,
        mode: EventMode,
        origin: Option<Uuid>,
    ) {
        for connection in self.shared.registry.all().await {
            if Some(connection.id()) == origin || !connection.is_authenticated() {
                continue;
            }
            if let Err(e) = connection.send_event(event.clone(), mode) {
                debug!("[{}] event not queued: {}", connection.id(), e);
            }
        }
    }

    /// Open connections
    pub async fn connections(&self) -> Vec<ConnectionHandle> {
        self.shared.registry.all().await
    }

    /// Look up one connection
    pub async fn connection(&self, id: Uuid) -> Option<ConnectionHandle> {
        self.shared.registry.get(id).await
    }
}

impl std::fmt::Debug for HapServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HapServer")
            .field("device_id", &self.shared.identity.device_id)
            .finish_non_exhaustive()
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<ServerShared>,
    state: Arc<RwLock<ServerState>>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let _sweeper = TimerGuard::from_task(tokio::spawn(idle_sweep(Arc::clone(&shared))));

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    tokio::spawn(connection::run(stream, peer, Arc::clone(&shared)));
                }
                Err(e) => {
                    error!("accept error: {}", e);
                }
            },
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }

    info!("listener stopped");
    *state.write().await = ServerState::Stopped;
}

/// Close idle connections while the open count is at or above the limit
async fn idle_sweep(shared: Arc<ServerShared>) {
    let limit = shared.config.idle_connection_limit;
    let max_idle = shared.config.max_idle_time;

    loop {
        let connections = shared.registry.all().await;
        if connections.len() < limit {
            shared.registry.wait_for_insert().await;
            continue;
        }

        let now = Instant::now();
        let mut next_expiry: Option<Instant> = None;
        for connection in &connections {
            let expires = connection.last_activity() + max_idle;
            if expires <= now {
                debug!("[{}] closing idle connection", connection.id());
                connection.close();
            } else {
                next_expiry = Some(next_expiry.map_or(expires, |t| t.min(expires)));
            }
        }

        match next_expiry {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => shared.registry.wait_for_insert().await,
        }
    }
}
