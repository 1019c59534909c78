//! Protocol handler registry

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{DataStreamHandle, Protocol, ResponseStatus};
use crate::protocol::hds::HdsDict;

/// Receives events and requests for a protocol
///
/// Handlers run on the connection task; a handler that needs to send a request
/// on the same connection and wait for the answer must do so from a spawned task.
#[async_trait]
pub trait DataStreamHandler: Send + Sync {
    /// An event arrived
    async fn on_event(&self, connection: &DataStreamHandle, topic: &str, body: HdsDict) {
        let _ = (connection, topic, body);
    }

    /// A request arrived; the result becomes the response
    async fn on_request(
        &self,
        connection: &DataStreamHandle,
        topic: &str,
        body: HdsDict,
    ) -> Result<HdsDict, ResponseStatus> {
        let _ = (connection, topic, body);
        Err(ResponseStatus::ProtocolSpecificError)
    }
}

/// Handlers keyed by protocol and, optionally, topic
///
/// A topic-specific binding wins over a protocol-wide one.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(Protocol, Option<String>), Arc<dyn DataStreamHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler; `topic: None` covers every topic of the protocol
    pub fn register(
        &mut self,
        protocol: Protocol,
        topic: Option<&str>,
        handler: Arc<dyn DataStreamHandler>,
    ) {
        self.handlers
            .insert((protocol, topic.map(str::to_string)), handler);
    }

    /// Remove a binding
    pub fn unregister(&mut self, protocol: &Protocol, topic: Option<&str>) -> bool {
        self.handlers
            .remove(&(protocol.clone(), topic.map(str::to_string)))
            .is_some()
    }

    /// Find the handler for a message
    #[must_use]
    pub fn lookup(&self, protocol: &Protocol, topic: &str) -> Option<Arc<dyn DataStreamHandler>> {
        self.handlers
            .get(&(protocol.clone(), Some(topic.to_string())))
            .or_else(|| self.handlers.get(&(protocol.clone(), None)))
            .cloned()
    }

    /// Number of bindings
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True if nothing is bound
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
