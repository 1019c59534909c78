//! Storage contract for controller pairings

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Controller permission level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Permission {
    /// Regular user
    User = 0x00,
    /// Admin, may manage pairings
    Admin = 0x01,
}

impl Permission {
    /// Parse the TLV permission byte
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::User),
            0x01 => Some(Self::Admin),
            _ => None,
        }
    }

    /// True for admin controllers
    #[must_use]
    pub fn is_admin(self) -> bool {
        self == Self::Admin
    }
}

impl From<Permission> for u8 {
    fn from(p: Permission) -> Self {
        p as u8
    }
}

/// A paired controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRecord {
    /// Controller pairing username
    pub username: String,
    /// Controller long-term Ed25519 public key
    pub public_key: [u8; 32],
    /// Permission level
    pub permission: Permission,
}

/// Identity store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Username already paired with a different key
    #[error("pairing {0} exists with a different public key")]
    KeyMismatch(String),

    /// No room for another pairing
    #[error("pairing store is full")]
    Full,

    /// Backend failure
    #[error("storage not available: {0}")]
    NotAvailable(String),
}

/// Persistent pairing records, supplied by the accessory application
///
/// Methods take `&self`; implementations use interior mutability so one store
/// can be shared by every connection.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// True once at least one controller is paired
    async fn is_paired(&self) -> bool;

    /// Store the admin pairing created by a successful Pair-Setup
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be stored
    async fn accept_pairing(&self, username: &str, public_key: [u8; 32]) -> Result<(), StoreError>;

    /// Long-term public key of a paired controller
    async fn public_key(&self, username: &str) -> Option<[u8; 32]>;

    /// Permission of a paired controller
    async fn permission(&self, username: &str) -> Option<Permission>;

    /// Add a pairing, or update the permission of an existing one
    ///
    /// # Errors
    ///
    /// Returns `StoreError::KeyMismatch` if the username is paired with another key
    async fn add_pairing(
        &self,
        username: &str,
        public_key: [u8; 32],
        permission: Permission,
    ) -> Result<(), StoreError>;

    /// Remove a pairing; returns false if none existed
    ///
    /// # Errors
    ///
    /// Returns error if removal fails
    async fn remove_pairing(&self, username: &str) -> Result<bool, StoreError>;

    /// All pairings
    async fn list_pairings(&self) -> Vec<PairingRecord>;
}

/// In-memory identity store (non-persistent)
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    records: RwLock<BTreeMap<String, PairingRecord>>,
    capacity: Option<usize>,
}

impl MemoryIdentityStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the number of pairings
    #[must_use]
    pub fn with_capacity_limit(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    fn check_capacity(
        &self,
        records: &BTreeMap<String, PairingRecord>,
        username: &str,
    ) -> Result<(), StoreError> {
        match self.capacity {
            Some(max) if records.len() >= max && !records.contains_key(username) => {
                Err(StoreError::Full)
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn is_paired(&self) -> bool {
        !self.records.read().await.is_empty()
    }

    async fn accept_pairing(&self, username: &str, public_key: [u8; 32]) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        self.check_capacity(&records, username)?;
        records.insert(
            username.to_string(),
            PairingRecord {
                username: username.to_string(),
                public_key,
                permission: Permission::Admin,
            },
        );
        Ok(())
    }

    async fn public_key(&self, username: &str) -> Option<[u8; 32]> {
        self.records.read().await.get(username).map(|r| r.public_key)
    }

    async fn permission(&self, username: &str) -> Option<Permission> {
        self.records.read().await.get(username).map(|r| r.permission)
    }

    async fn add_pairing(
        &self,
        username: &str,
        public_key: [u8; 32],
        permission: Permission,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get_mut(username) {
            if existing.public_key != public_key {
                return Err(StoreError::KeyMismatch(username.to_string()));
            }
            existing.permission = permission;
            return Ok(());
        }
        self.check_capacity(&records, username)?;
        records.insert(
            username.to_string(),
            PairingRecord {
                username: username.to_string(),
                public_key,
                permission,
            },
        );
        Ok(())
    }

    async fn remove_pairing(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(username).is_some())
    }

    async fn list_pairings(&self) -> Vec<PairingRecord> {
        self.records.read().await.values().cloned().collect()
    }
}
