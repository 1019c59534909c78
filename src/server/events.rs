//! Characteristic change notifications

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::protocol::http::ResponseBuilder;

/// How an event is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMode {
    /// Sent as soon as no response is in flight, skipping the debounce window
    Immediate,
    /// Coalesced and flushed after the batch delay
    Batched,
}

/// A characteristic value change pushed to subscribed controllers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicEvent {
    /// Accessory instance id
    pub aid: u64,
    /// Characteristic instance id
    pub iid: u64,
    /// New value
    pub value: serde_json::Value,
}

impl CharacteristicEvent {
    /// Create an event
    #[must_use]
    pub fn new(aid: u64, iid: u64, value: serde_json::Value) -> Self {
        Self { aid, iid, value }
    }

    /// Event name, `"<aid>.<iid>"`
    #[must_use]
    pub fn name(&self) -> String {
        event_name(self.aid, self.iid)
    }
}

/// Event name for a characteristic
#[must_use]
pub fn event_name(aid: u64, iid: u64) -> String {
    format!("{aid}.{iid}")
}

/// Unsent events in arrival order, one entry per event name
///
/// A newer event for a name replaces the unsent older one and moves to the back.
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: Vec<CharacteristicEvent>,
}

impl EventQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event, coalescing with any unsent event of the same name
    pub fn push(&mut self, event: CharacteristicEvent) {
        self.pending
            .retain(|queued| queued.aid != event.aid || queued.iid != event.iid);
        self.pending.push(event);
    }

    /// Number of distinct pending events
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take every pending event
    pub fn drain(&mut self) -> Vec<CharacteristicEvent> {
        std::mem::take(&mut self.pending)
    }
}

/// Encode events as one `EVENT/1.0` message
#[must_use]
pub fn encode_events(events: &[CharacteristicEvent]) -> Vec<u8> {
    ResponseBuilder::event()
        .json_body(&json!({ "characteristics": events }))
        .encode()
}
