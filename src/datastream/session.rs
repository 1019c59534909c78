//! Prepared sessions waiting to be claimed

use tracing::debug;
use uuid::Uuid;

use super::frame::{DataStreamKeys, FrameCrypto, RawFrame};
use crate::timer::TimerGuard;

/// Keys derived for a data stream not yet connected
pub(crate) struct PreparedSession {
    pub id: Uuid,
    pub anchor: Uuid,
    pub keys: DataStreamKeys,
    pub expiry: Option<TimerGuard>,
}

/// Result of a successful trial decryption
pub(crate) struct ClaimedSession {
    pub id: Uuid,
    pub anchor: Uuid,
    pub crypto: FrameCrypto,
    pub first_payload: Vec<u8>,
}

/// Pending prepared sessions in creation order
#[derive(Default)]
pub(crate) struct SessionPool {
    sessions: Vec<PreparedSession>,
}

impl SessionPool {
    pub fn insert(&mut self, session: PreparedSession) {
        self.sessions.push(session);
    }

    /// Trial-decrypt `frame` against every pending session
    ///
    /// The first session whose inbound key authenticates the frame is removed
    /// from the pool and its expiry timer dropped.
    pub fn claim(&mut self, frame: &RawFrame) -> Option<ClaimedSession> {
        let mut matched = None;
        for (index, session) in self.sessions.iter().enumerate() {
            let Ok(mut crypto) = FrameCrypto::new(&session.keys) else {
                continue;
            };
            if let Some(payload) = crypto.try_open(frame) {
                matched = Some((index, crypto, payload));
                break;
            }
        }

        let (index, crypto, first_payload) = matched?;
        let session = self.sessions.remove(index);
        debug!(
            "data stream session {} claimed after {} candidates",
            session.id,
            index + 1
        );
        Some(ClaimedSession {
            id: session.id,
            anchor: session.anchor,
            crypto,
            first_payload,
        })
    }

    /// Drop an expired session; false if it was already claimed
    ///
    /// Called from the expiry timer itself, so the guard is detached rather
    /// than aborted.
    pub fn expire(&mut self, id: Uuid) -> bool {
        let Some(index) = self.sessions.iter().position(|s| s.id == id) else {
            return false;
        };
        let mut session = self.sessions.remove(index);
        if let Some(guard) = session.expiry.take() {
            guard.detach();
        }
        true
    }

    /// Drop every session anchored to a primary connection
    pub fn drop_anchor(&mut self, anchor: Uuid) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.anchor != anchor);
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
