//! Application request handling

use std::collections::HashSet;
use std::net::SocketAddr;

use async_trait::async_trait;
use uuid::Uuid;

use super::events::event_name;
use crate::datastream::{DataStreamServer, supported_configuration};
use crate::protocol::http::{HttpRequest, HttpResponse, ResponseBuilder, StatusCode};

/// Pairing endpoints handled by the server itself
pub mod paths {
    /// Pair-Setup
    pub const PAIR_SETUP: &str = "/pair-setup";
    /// Pair-Verify
    pub const PAIR_VERIFY: &str = "/pair-verify";
    /// Add, remove and list pairings
    pub const PAIRINGS: &str = "/pairings";
}

/// Status body for requests on an unauthenticated connection
pub const INSUFFICIENT_PRIVILEGES: i64 = -70401;

/// Per-request view of the connection an application handler runs on
pub struct RequestContext<'a> {
    pub(crate) connection_id: Uuid,
    pub(crate) peer: SocketAddr,
    pub(crate) username: &'a str,
    pub(crate) shared_secret: &'a [u8],
    pub(crate) subscriptions: &'a mut HashSet<String>,
    pub(crate) data_stream: &'a DataStreamServer,
}

impl RequestContext<'_> {
    /// Connection id
    #[must_use]
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Remote address
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Authenticated controller username
    #[must_use]
    pub fn username(&self) -> &str {
        self.username
    }

    /// Deliver events for a characteristic to this connection
    pub fn subscribe(&mut self, aid: u64, iid: u64) {
        self.subscriptions.insert(event_name(aid, iid));
    }

    /// Stop delivering events for a characteristic
    pub fn unsubscribe(&mut self, aid: u64, iid: u64) {
        self.subscriptions.remove(&event_name(aid, iid));
    }

    /// True if events for the characteristic reach this connection
    #[must_use]
    pub fn is_subscribed(&self, aid: u64, iid: u64) -> bool {
        self.subscriptions.contains(&event_name(aid, iid))
    }

    /// Answer a Setup Data Stream Transport write from this connection
    pub async fn setup_data_stream(&self, request: &[u8]) -> Vec<u8> {
        self.data_stream
            .handle_setup_transport(self.connection_id, self.shared_secret, request)
            .await
    }

    /// Supported Data Stream Transport Configuration value
    #[must_use]
    pub fn data_stream_configuration(&self) -> Vec<u8> {
        supported_configuration()
    }
}

/// Handles every authenticated request that is not a pairing endpoint
///
/// Runs on the connection task; events raised meanwhile are queued until the
/// returned response has been written.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Produce the response for `request`
    async fn handle(&self, ctx: &mut RequestContext<'_>, request: HttpRequest) -> HttpResponse;
}

/// Answers everything with 404
#[derive(Debug, Default, Clone, Copy)]
pub struct NotFoundHandler;

#[async_trait]
impl RequestHandler for NotFoundHandler {
    async fn handle(&self, _ctx: &mut RequestContext<'_>, _request: HttpRequest) -> HttpResponse {
        ResponseBuilder::new(StatusCode::NOT_FOUND).build()
    }
}

pub(crate) fn insufficient_privileges() -> HttpResponse {
    ResponseBuilder::new(StatusCode::CONNECTION_AUTHORIZATION_REQUIRED)
        .json_body(&serde_json::json!({ "status": INSUFFICIENT_PRIVILEGES }))
        .build()
}
