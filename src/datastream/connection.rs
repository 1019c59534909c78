//! One data stream connection
//!
//! Each accepted socket runs as its own task. The task owns the framed
//! socket and the frame counters; everything else talks to it through a
//! [`DataStreamHandle`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::frame::{DataStreamFrameCodec, FrameCrypto};
use super::server::{DataStreamEvent, DataStreamShared};
use super::session::ClaimedSession;
use super::{
    DataStreamError, DataStreamHandler, DataStreamMessage, HandlerRegistry, Protocol,
    ResponseStatus,
};
use crate::protocol::hds::HdsDict;

/// Data stream connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStreamState {
    /// Accepted, no prepared session matched yet
    Unidentified,
    /// Session claimed, waiting for `control`/`hello`
    AwaitingHello,
    /// Hello answered
    Ready,
    /// Shutting down
    Closing,
    /// Socket closed
    Closed,
}

type ResponseResult = Result<(ResponseStatus, HdsDict), DataStreamError>;

enum Command {
    SendEvent {
        protocol: Protocol,
        topic: String,
        body: HdsDict,
        reply: oneshot::Sender<Result<(), DataStreamError>>,
    },
    SendRequest {
        protocol: Protocol,
        topic: String,
        body: HdsDict,
        reply: oneshot::Sender<ResponseResult>,
    },
    Close,
}

/// Handle to a data stream connection
#[derive(Clone)]
pub struct DataStreamHandle {
    id: Uuid,
    anchor: Uuid,
    peer: SocketAddr,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<DataStreamState>,
    handlers: Arc<RwLock<HandlerRegistry>>,
}

impl DataStreamHandle {
    /// Connection id
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Primary connection this stream was set up from
    #[must_use]
    pub fn anchor(&self) -> Uuid {
        self.anchor
    }

    /// Remote address
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> DataStreamState {
        *self.state.borrow()
    }

    /// Send an event
    ///
    /// # Errors
    /// Returns the encoding error if the message cannot be framed, or
    /// `DataStreamError::ConnectionClosed` if the connection is gone.
    pub async fn send_event(
        &self,
        protocol: Protocol,
        topic: &str,
        body: HdsDict,
    ) -> Result<(), DataStreamError> {
        let (reply, sent) = oneshot::channel();
        self.commands
            .send(Command::SendEvent {
                protocol,
                topic: topic.to_string(),
                body,
                reply,
            })
            .await
            .map_err(|_| DataStreamError::ConnectionClosed)?;
        sent.await.map_err(|_| DataStreamError::ConnectionClosed)?
    }

    /// Send a request and wait for its response
    ///
    /// Must not be awaited from inside a handler running on this same
    /// connection.
    ///
    /// # Errors
    /// Returns `DataStreamError::Timeout` if no response arrives in time,
    /// the encoding error if the request cannot be framed, or
    /// `DataStreamError::ConnectionClosed` if the connection closes first.
    pub async fn send_request(
        &self,
        protocol: Protocol,
        topic: &str,
        body: HdsDict,
    ) -> Result<(ResponseStatus, HdsDict), DataStreamError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::SendRequest {
                protocol,
                topic: topic.to_string(),
                body,
                reply,
            })
            .await
            .map_err(|_| DataStreamError::ConnectionClosed)?;
        response
            .await
            .map_err(|_| DataStreamError::ConnectionClosed)?
    }

    /// Bind a handler for this connection only
    pub async fn register_handler(
        &self,
        protocol: Protocol,
        topic: Option<&str>,
        handler: Arc<dyn DataStreamHandler>,
    ) {
        self.handlers
            .write()
            .await
            .register(protocol, topic, handler);
    }

    /// Remove a connection handler
    pub async fn unregister_handler(&self, protocol: &Protocol, topic: Option<&str>) -> bool {
        self.handlers.write().await.unregister(protocol, topic)
    }

    /// Ask the connection to close
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
    }

    /// Wait until the connection has closed
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == DataStreamState::Closed).await;
    }
}

impl std::fmt::Debug for DataStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStreamHandle")
            .field("id", &self.id)
            .field("anchor", &self.anchor)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}

struct Outstanding {
    reply: oneshot::Sender<ResponseResult>,
    deadline: Instant,
}

enum Flow {
    Continue,
    Close,
}

struct Connection {
    handle: DataStreamHandle,
    framed: Framed<TcpStream, DataStreamFrameCodec>,
    crypto: FrameCrypto,
    shared: Arc<DataStreamShared>,
    state: watch::Sender<DataStreamState>,
    outstanding: HashMap<i64, Outstanding>,
    next_request_id: i64,
}

/// Serve one accepted socket until it closes
pub(crate) async fn run(stream: TcpStream, peer: SocketAddr, shared: Arc<DataStreamShared>) {
    let mut framed = Framed::new(
        stream,
        DataStreamFrameCodec::new(shared.config.max_payload_length),
    );

    let first = match timeout(shared.config.hello_timeout, framed.next()).await {
        Ok(Some(Ok(frame))) => frame,
        Ok(Some(Err(e))) => {
            debug!("data stream {} sent an invalid first frame: {}", peer, e);
            return;
        }
        Ok(None) => return,
        Err(_) => {
            debug!("data stream {} sent nothing before the hello timeout", peer);
            return;
        }
    };

    let (commands, mut receiver) = mpsc::channel(32);
    let (state, state_rx) = watch::channel(DataStreamState::Unidentified);
    let register = |claimed: &ClaimedSession| DataStreamHandle {
        id: claimed.id,
        anchor: claimed.anchor,
        peer,
        commands,
        state: state_rx,
        handlers: Arc::new(RwLock::new(HandlerRegistry::new())),
    };
    let Some((claimed, handle)) = shared.claim(&first, register).await else {
        debug!("data stream {} matched no prepared session", peer);
        return;
    };

    let _ = state.send(DataStreamState::AwaitingHello);
    info!(
        "[{}] data stream {} opened from {}",
        claimed.anchor, claimed.id, peer
    );
    shared.emit(DataStreamEvent::ConnectionOpened {
        id: claimed.id,
        anchor: claimed.anchor,
    });

    let mut connection = Connection {
        handle,
        framed,
        crypto: claimed.crypto,
        shared,
        state,
        outstanding: HashMap::new(),
        next_request_id: 0,
    };

    if let Flow::Continue = connection.on_payload(&claimed.first_payload).await {
        connection.serve(&mut receiver).await;
    }
    connection.shutdown().await;
}

impl Connection {
    fn id(&self) -> Uuid {
        self.handle.id
    }

    fn current_state(&self) -> DataStreamState {
        *self.state.borrow()
    }

    async fn serve(&mut self, receiver: &mut mpsc::Receiver<Command>) {
        loop {
            let next_deadline = self.outstanding.values().map(|o| o.deadline).min();

            let flow = tokio::select! {
                frame = self.framed.next() => match frame {
                    Some(Ok(frame)) => match self.crypto.open(&frame) {
                        Ok(payload) => self.on_payload(&payload).await,
                        Err(e) => {
                            warn!("[{}] data stream frame rejected: {}", self.id(), e);
                            Flow::Close
                        }
                    },
                    Some(Err(e)) => {
                        warn!("[{}] data stream read error: {}", self.id(), e);
                        Flow::Close
                    }
                    None => {
                        debug!("[{}] data stream closed by peer", self.id());
                        Flow::Close
                    }
                },

                command = receiver.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => Flow::Close,
                },

                () = sleep_until_opt(next_deadline) => {
                    self.expire_requests();
                    Flow::Close
                }
            };

            if let Flow::Close = flow {
                return;
            }
        }
    }

    async fn on_payload(&mut self, payload: &[u8]) -> Flow {
        let message = match DataStreamMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("[{}] undecodable data stream message: {}", self.id(), e);
                return Flow::Close;
            }
        };

        if self.current_state() == DataStreamState::AwaitingHello && !message.is_hello() {
            warn!(
                "[{}] {}",
                self.id(),
                DataStreamError::NotReady(format!("{}/{}", message.protocol(), message.topic()))
            );
            return Flow::Close;
        }

        match message {
            DataStreamMessage::Request {
                protocol,
                topic,
                id,
                ..
            } if protocol == Protocol::Control && topic == "hello" => {
                let _ = self.state.send(DataStreamState::Ready);
                debug!("[{}] data stream hello", self.id());
                self.respond(protocol, topic, id, ResponseStatus::Success, HdsDict::new())
                    .await
            }
            DataStreamMessage::Event {
                protocol,
                topic,
                body,
            } => {
                match self.lookup(&protocol, &topic).await {
                    Some(handler) => handler.on_event(&self.handle, &topic, body).await,
                    None => debug!(
                        "[{}] no handler for event {}/{}",
                        self.id(),
                        protocol,
                        topic
                    ),
                }
                Flow::Continue
            }
            DataStreamMessage::Request {
                protocol,
                topic,
                id,
                body,
            } => {
                let (status, body) = match self.lookup(&protocol, &topic).await {
                    Some(handler) => match handler.on_request(&self.handle, &topic, body).await {
                        Ok(body) => (ResponseStatus::Success, body),
                        Err(status) => (status, HdsDict::new()),
                    },
                    None => {
                        debug!(
                            "[{}] no handler for request {}/{}",
                            self.id(),
                            protocol,
                            topic
                        );
                        (ResponseStatus::MissingProtocol, HdsDict::new())
                    }
                };
                self.respond(protocol, topic, id, status, body).await
            }
            DataStreamMessage::Response {
                id, status, body, ..
            } => {
                match self.outstanding.remove(&id) {
                    Some(pending) => {
                        let _ = pending.reply.send(Ok((status, body)));
                    }
                    None => debug!("[{}] dropping unmatched response {}", self.id(), id),
                }
                Flow::Continue
            }
        }
    }

    async fn on_command(&mut self, command: Command) -> Flow {
        match command {
            Command::SendEvent {
                protocol,
                topic,
                body,
                reply,
            } => {
                let message = DataStreamMessage::Event {
                    protocol,
                    topic,
                    body,
                };
                match self.send(&message).await {
                    Ok(Flow::Continue) => {
                        let _ = reply.send(Ok(()));
                        Flow::Continue
                    }
                    Ok(Flow::Close) => {
                        let _ = reply.send(Err(DataStreamError::ConnectionClosed));
                        Flow::Close
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        Flow::Continue
                    }
                }
            }
            Command::SendRequest {
                protocol,
                topic,
                body,
                reply,
            } => {
                if self.current_state() != DataStreamState::Ready {
                    let _ = reply.send(Err(DataStreamError::NotReady(topic)));
                    return Flow::Continue;
                }
                let id = self.allocate_request_id();
                let message = DataStreamMessage::Request {
                    protocol,
                    topic,
                    id,
                    body,
                };
                match self.send(&message).await {
                    Ok(Flow::Continue) => {
                        self.outstanding.insert(
                            id,
                            Outstanding {
                                reply,
                                deadline: Instant::now() + self.shared.config.request_timeout,
                            },
                        );
                        Flow::Continue
                    }
                    Ok(Flow::Close) => {
                        let _ = reply.send(Err(DataStreamError::ConnectionClosed));
                        Flow::Close
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        Flow::Continue
                    }
                }
            }
            Command::Close => Flow::Close,
        }
    }

    async fn lookup(&self, protocol: &Protocol, topic: &str) -> Option<Arc<dyn DataStreamHandler>> {
        if let Some(handler) = self.handle.handlers.read().await.lookup(protocol, topic) {
            return Some(handler);
        }
        self.shared.handlers.read().await.lookup(protocol, topic)
    }

    fn allocate_request_id(&mut self) -> i64 {
        loop {
            let id = self.next_request_id;
            self.next_request_id = self.next_request_id.wrapping_add(1);
            if !self.outstanding.contains_key(&id) {
                return id;
            }
        }
    }

    fn expire_requests(&mut self) {
        let now = Instant::now();
        let expired: Vec<i64> = self
            .outstanding
            .iter()
            .filter(|(_, o)| o.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(pending) = self.outstanding.remove(&id) {
                warn!("[{}] data stream request {} timed out", self.id(), id);
                let _ = pending.reply.send(Err(DataStreamError::Timeout));
            }
        }
    }

    async fn respond(
        &mut self,
        protocol: Protocol,
        topic: String,
        id: i64,
        status: ResponseStatus,
        body: HdsDict,
    ) -> Flow {
        let message = DataStreamMessage::Response {
            protocol,
            topic,
            id,
            status,
            body,
        };
        match self.send(&message).await {
            Ok(flow) => flow,
            Err(e) => {
                warn!("[{}] cannot encode response {}: {}", self.id(), id, e);
                Flow::Continue
            }
        }
    }

    /// Frame and write one message
    ///
    /// `Err` means nothing was written and the frame counter did not move.
    async fn send(&mut self, message: &DataStreamMessage) -> Result<Flow, DataStreamError> {
        let frame = self.crypto.seal(&message.encode()?)?;
        match self.framed.send(frame).await {
            Ok(()) => Ok(Flow::Continue),
            Err(e) => {
                warn!("[{}] data stream write error: {}", self.id(), e);
                Ok(Flow::Close)
            }
        }
    }

    async fn shutdown(mut self) {
        let _ = self.state.send(DataStreamState::Closing);
        for (_, pending) in self.outstanding.drain() {
            let _ = pending.reply.send(Err(DataStreamError::ConnectionClosed));
        }
        let _ = self.framed.close().await;

        let id = self.id();
        self.shared.connections.write().await.remove(&id);
        let _ = self.state.send(DataStreamState::Closed);
        info!("[{}] data stream {} closed", self.handle.anchor, id);
        self.shared.emit(DataStreamEvent::ConnectionClosed { id });
        self.shared.close_if_idle().await;
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
