//! Primary connection task
//!
//! Reads the socket, decrypts once Pair-Verify has installed keys, parses
//! HTTP requests straight from the plaintext and writes responses and
//! `EVENT/1.0` notifications back through the same session.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::events::{CharacteristicEvent, EventMode, EventQueue, encode_events};
use super::handle::{AuthInfo, ConnectionCommand, ConnectionHandle, ConnectionState};
use super::hap::{ServerEvent, ServerShared};
use super::router::{RequestContext, insufficient_privileges, paths};
use super::secure::{SecureSession, SecureSessionError, TrafficKeys};
use crate::pairing::{
    PairSetup, PairVerify, PairingContext, PairingEvent, PairingResponse, handle_pairings,
};
use crate::protocol::http::{
    HttpRequest, HttpResponse, HttpServerCodec, Method, ResponseBuilder, StatusCode,
    encode_response,
};
use crate::protocol::tlv::{TlvDecoder, TlvEncoder, TlvType, errors};

const READ_BUFFER: usize = 4096;

enum Flow {
    Continue,
    Close,
}

/// Work to do once the response has been written
enum AfterResponse {
    Nothing,
    InstallKeys {
        username: String,
        shared_secret: Zeroizing<[u8; 32]>,
    },
}

struct Connection {
    id: Uuid,
    handle: ConnectionHandle,
    shared: Arc<ServerShared>,
    stream: TcpStream,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedReceiver<ConnectionCommand>,
    codec: HttpServerCodec,
    secure: Option<SecureSession>,
    pair_setup: PairSetup,
    pair_verify: PairVerify,
    subscriptions: HashSet<String>,
    queue: EventQueue,
    batch_deadline: Option<Instant>,
    handshake_deadline: Option<Instant>,
    tear_down: bool,
}

/// Serve one accepted socket until it closes
pub(crate) async fn run(stream: TcpStream, peer: SocketAddr, shared: Arc<ServerShared>) {
    let id = Uuid::new_v4();
    let (commands_tx, commands) = mpsc::unbounded_channel();
    let (state, state_rx) = watch::channel(ConnectionState::Connecting);
    let handle = ConnectionHandle::new(id, peer, commands_tx, state_rx);

    shared.registry.insert(handle.clone()).await;
    info!("[{}] connection from {}", id, peer);
    shared.emit(ServerEvent::ConnectionOpened { id, peer });

    let mut connection = Connection {
        id,
        handle,
        shared,
        stream,
        state,
        commands,
        codec: HttpServerCodec::new(),
        secure: None,
        pair_setup: PairSetup::new(),
        pair_verify: PairVerify::new(),
        subscriptions: HashSet::new(),
        queue: EventQueue::new(),
        batch_deadline: None,
        handshake_deadline: None,
        tear_down: false,
    };
    let _ = connection.state.send(ConnectionState::FullySetUp);

    connection.serve().await;
    connection.shutdown().await;
}

impl Connection {
    async fn serve(&mut self) {
        let mut buf = vec![0u8; READ_BUFFER];

        loop {
            let flow = tokio::select! {
                read = self.stream.read(&mut buf) => match read {
                    Ok(0) => {
                        debug!("[{}] closed by peer", self.id);
                        Flow::Close
                    }
                    Ok(n) => {
                        self.handle.touch();
                        self.on_bytes(&buf[..n]).await
                    }
                    Err(e) => {
                        debug!("[{}] read error: {}", self.id, e);
                        Flow::Close
                    }
                },

                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => Flow::Close,
                },

                () = sleep_until_opt(self.batch_deadline) => {
                    self.batch_deadline = None;
                    self.flush_events().await
                }

                () = sleep_until_opt(self.handshake_deadline) => {
                    warn!("[{}] pairing handshake timed out", self.id);
                    Flow::Close
                }
            };

            if let Flow::Close = flow {
                return;
            }
        }
    }

    async fn on_bytes(&mut self, data: &[u8]) -> Flow {
        match self.secure.as_mut() {
            Some(secure) => {
                secure.feed(data);
                match secure.decrypt() {
                    Ok(plaintext) => self.codec.feed(&plaintext),
                    Err(e) => {
                        warn!("[{}] secure session error: {}", self.id, e);
                        return Flow::Close;
                    }
                }
            }
            None => self.codec.feed(data),
        }
        self.process_requests().await
    }

    async fn process_requests(&mut self) -> Flow {
        loop {
            let request = match self.codec.decode() {
                Ok(Some(request)) => request,
                Ok(None) => return Flow::Continue,
                Err(e) => {
                    warn!("[{}] malformed request: {}", self.id, e);
                    let response = ResponseBuilder::new(StatusCode::BAD_REQUEST).build();
                    let _ = self.write_response(&response).await;
                    return Flow::Close;
                }
            };

            debug!(
                "[{}] {} {}",
                self.id,
                request.method.as_str(),
                request.uri
            );
            let (response, after) = self.route(request).await;

            if let Flow::Close = self.write_response(&response).await {
                return Flow::Close;
            }
            if let AfterResponse::InstallKeys {
                username,
                shared_secret,
            } = after
            {
                if let Flow::Close = self.install_keys(username, shared_secret).await {
                    return Flow::Close;
                }
            }
            if let Flow::Close = self.after_response().await {
                return Flow::Close;
            }
        }
    }

    async fn route(&mut self, request: HttpRequest) -> (HttpResponse, AfterResponse) {
        let path = request.path().to_string();
        let pairing_path = matches!(
            path.as_str(),
            paths::PAIR_SETUP | paths::PAIR_VERIFY | paths::PAIRINGS
        );
        if pairing_path && request.method != Method::Post {
            return (
                ResponseBuilder::new(StatusCode::METHOD_NOT_ALLOWED).build(),
                AfterResponse::Nothing,
            );
        }

        match path.as_str() {
            paths::PAIR_SETUP => (self.pair_setup(&request.body).await, AfterResponse::Nothing),
            paths::PAIR_VERIFY => self.pair_verify(&request.body).await,
            paths::PAIRINGS => (self.pairings(&request.body).await, AfterResponse::Nothing),
            _ => (self.application(request).await, AfterResponse::Nothing),
        }
    }

    async fn pair_setup(&mut self, body: &[u8]) -> HttpResponse {
        if self.secure.is_some() {
            return reject_on_secure_session(body);
        }

        let shared = Arc::clone(&self.shared);
        let ctx = PairingContext {
            identity: &shared.identity,
            store: shared.store.as_ref(),
            setup: &shared.setup,
            allow_insecure: shared.config.allow_insecure_pairing,
            connection_id: self.id,
        };
        let response = self.pair_setup.handle(&ctx, body).await;
        self.update_handshake_deadline();

        if let Some(PairingEvent::Paired { username }) = &response.event {
            info!("[{}] paired with {}", self.id, username);
            shared.emit(ServerEvent::PairingAdded {
                username: username.clone(),
            });
        }
        pairing_http_response(response)
    }

    async fn pair_verify(&mut self, body: &[u8]) -> (HttpResponse, AfterResponse) {
        if self.secure.is_some() {
            return (reject_on_secure_session(body), AfterResponse::Nothing);
        }

        let shared = Arc::clone(&self.shared);
        let ctx = PairingContext {
            identity: &shared.identity,
            store: shared.store.as_ref(),
            setup: &shared.setup,
            allow_insecure: shared.config.allow_insecure_pairing,
            connection_id: self.id,
        };
        let mut response = self.pair_verify.handle(&ctx, body).await;
        self.update_handshake_deadline();

        let after = match response.event.take() {
            Some(PairingEvent::Verified {
                username,
                shared_secret,
            }) => AfterResponse::InstallKeys {
                username,
                shared_secret,
            },
            _ => AfterResponse::Nothing,
        };
        (pairing_http_response(response), after)
    }

    async fn pairings(&mut self, body: &[u8]) -> HttpResponse {
        let Some(username) = self.handle.username().map(str::to_string) else {
            return insufficient_privileges();
        };

        let outcome = handle_pairings(self.shared.store.as_ref(), &username, body).await;
        for removed in &outcome.removed {
            info!("[{}] pairing {} removed", self.id, removed);
            self.shared.emit(ServerEvent::PairingRemoved {
                username: removed.clone(),
            });
            for connection in self.shared.registry.by_username(removed).await {
                if connection.id() == self.id {
                    self.tear_down = true;
                    let _ = self.state.send(ConnectionState::ToBeTornDown);
                } else {
                    connection.close();
                }
            }
        }
        pairing_http_response(outcome.response)
    }

    async fn application(&mut self, request: HttpRequest) -> HttpResponse {
        let Some(username) = self.handle.username() else {
            return insufficient_privileges();
        };
        let mut ctx = RequestContext {
            connection_id: self.id,
            peer: self.handle.peer(),
            username,
            shared_secret: self.handle.shared_secret().unwrap_or_default(),
            subscriptions: &mut self.subscriptions,
            data_stream: &self.shared.data_stream,
        };
        self.shared.handler.handle(&mut ctx, request).await
    }

    async fn install_keys(&mut self, username: String, shared_secret: Zeroizing<[u8; 32]>) -> Flow {
        let session = match TrafficKeys::accessory(&shared_secret[..])
            .map_err(SecureSessionError::from)
            .and_then(|keys| SecureSession::new(&keys))
        {
            Ok(session) => session,
            Err(e) => {
                warn!("[{}] cannot set up secure session: {}", self.id, e);
                return Flow::Close;
            }
        };
        self.secure = Some(session);

        self.handle.set_auth(AuthInfo {
            username: username.clone(),
            shared_secret,
        });
        self.shared.registry.authenticate(self.id, &username).await;
        let _ = self.state.send(ConnectionState::Authenticated);
        info!("[{}] authenticated as {}", self.id, username);
        self.shared.emit(ServerEvent::Authenticated {
            id: self.id,
            username,
        });

        // Anything pipelined behind M3 is already ciphertext
        let leftover = self.codec.take_buffer();
        if leftover.is_empty() {
            return Flow::Continue;
        }
        let Some(secure) = self.secure.as_mut() else {
            return Flow::Close;
        };
        secure.feed(&leftover);
        match secure.decrypt() {
            Ok(plaintext) => {
                self.codec.feed(&plaintext);
                Flow::Continue
            }
            Err(e) => {
                warn!("[{}] secure session error: {}", self.id, e);
                Flow::Close
            }
        }
    }

    /// Apply commands that arrived while the response was being composed
    async fn after_response(&mut self) -> Flow {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                ConnectionCommand::SendEvent(event, _) => {
                    self.queue_event(event);
                }
                ConnectionCommand::Close => return Flow::Close,
            }
        }
        if self.tear_down {
            return Flow::Close;
        }
        if self.queue.is_empty() {
            return Flow::Continue;
        }
        self.batch_deadline = None;
        self.flush_events().await
    }

    async fn on_command(&mut self, command: ConnectionCommand) -> Flow {
        match command {
            ConnectionCommand::SendEvent(event, mode) => {
                if !self.queue_event(event) {
                    return Flow::Continue;
                }
                match mode {
                    EventMode::Immediate => {
                        self.batch_deadline = None;
                        self.flush_events().await
                    }
                    EventMode::Batched => {
                        if self.batch_deadline.is_none() {
                            self.batch_deadline =
                                Some(Instant::now() + self.shared.config.event_batch_delay);
                        }
                        Flow::Continue
                    }
                }
            }
            ConnectionCommand::Close => Flow::Close,
        }
    }

    /// Queue an event if this connection is authenticated and subscribed
    fn queue_event(&mut self, event: CharacteristicEvent) -> bool {
        if self.secure.is_none() || !self.subscriptions.contains(&event.name()) {
            return false;
        }
        self.queue.push(event);
        true
    }

    async fn flush_events(&mut self) -> Flow {
        let events = self.queue.drain();
        if events.is_empty() {
            return Flow::Continue;
        }
        debug!("[{}] sending {} events", self.id, events.len());
        self.write_bytes(&encode_events(&events)).await
    }

    async fn write_response(&mut self, response: &HttpResponse) -> Flow {
        self.write_bytes(&encode_response(response)).await
    }

    async fn write_bytes(&mut self, plaintext: &[u8]) -> Flow {
        let bytes = match self.secure.as_mut() {
            Some(secure) => match secure.encrypt(plaintext) {
                Ok(ciphertext) => ciphertext,
                Err(e) => {
                    warn!("[{}] cannot encrypt: {}", self.id, e);
                    return Flow::Close;
                }
            },
            None => plaintext.to_vec(),
        };
        match self.stream.write_all(&bytes).await {
            Ok(()) => {
                self.handle.touch();
                Flow::Continue
            }
            Err(e) => {
                debug!("[{}] write error: {}", self.id, e);
                Flow::Close
            }
        }
    }

    fn update_handshake_deadline(&mut self) {
        if self.pair_setup.in_progress() || self.pair_verify.in_progress() {
            if self.handshake_deadline.is_none() {
                self.handshake_deadline =
                    Some(Instant::now() + self.shared.config.handshake_timeout);
            }
        } else {
            self.handshake_deadline = None;
        }
    }

    async fn shutdown(mut self) {
        let _ = self.state.send(ConnectionState::Closing);
        self.pair_setup.abort(&self.shared.setup, self.id);
        self.pair_verify.abort();
        self.shared.registry.remove(self.id).await;
        self.shared.data_stream.close_anchor(self.id).await;
        let _ = self.stream.shutdown().await;

        let _ = self.state.send(ConnectionState::Closed);
        info!("[{}] connection closed", self.id);
        self.shared.emit(ServerEvent::ConnectionClosed { id: self.id });
    }
}

fn pairing_http_response(response: PairingResponse) -> HttpResponse {
    ResponseBuilder::new(response.status)
        .tlv_body(response.body)
        .build()
}

/// Pairing handshakes are refused once the session is encrypted
fn reject_on_secure_session(body: &[u8]) -> HttpResponse {
    let state = TlvDecoder::decode(body)
        .ok()
        .and_then(|tlv| tlv.get_u8(TlvType::State))
        .unwrap_or(0);
    ResponseBuilder::new(StatusCode::BAD_REQUEST)
        .tlv_body(
            TlvEncoder::new()
                .add_state(state.wrapping_add(1))
                .add_error(errors::UNKNOWN)
                .build(),
        )
        .build()
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
