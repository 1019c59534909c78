//! Pair-Setup (M1 through M6)

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU32, Ordering};

use rand::RngCore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{PairingContext, PairingError, PairingEvent, PairingResponse, SETUP_USERNAME};
use crate::protocol::crypto::{
    ChaCha20Poly1305Cipher, Ed25519PublicKey, Ed25519Signature, Nonce, SessionKey, SrpParams,
    SrpServer, derive_key_fixed, lengths,
};
use crate::protocol::tlv::{TlvDecoder, TlvEncoder, TlvError, TlvType, methods};

/// Unsuccessful attempts after which Pair-Setup is refused
pub const MAX_SETUP_ATTEMPTS: u32 = 100;

/// Server-wide Pair-Setup bookkeeping
///
/// Tracks unsuccessful attempts across all connections and which connection,
/// if any, currently owns the setup exchange.
#[derive(Debug, Default)]
pub struct SetupCoordinator {
    failed_attempts: AtomicU32,
    owner: Mutex<Option<Uuid>>,
}

impl SetupCoordinator {
    /// Create a coordinator with no failed attempts
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a coordinator that has already seen `count` failed attempts
    #[must_use]
    pub fn with_failed_attempts(count: u32) -> Self {
        Self {
            failed_attempts: AtomicU32::new(count),
            owner: Mutex::new(None),
        }
    }

    /// Unsuccessful attempts so far
    #[must_use]
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts.load(Ordering::SeqCst)
    }

    fn record_failure(&self) -> u32 {
        self.failed_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn claim(&self, connection_id: Uuid) -> Result<(), PairingError> {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        match *owner {
            Some(current) if current != connection_id => Err(PairingError::Busy),
            _ => {
                *owner = Some(connection_id);
                Ok(())
            }
        }
    }

    /// Release ownership if `connection_id` holds it
    pub fn release(&self, connection_id: Uuid) {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if *owner == Some(connection_id) {
            *owner = None;
        }
    }
}

enum SetupStep {
    Idle,
    AwaitingM3 { server: SrpServer, salt: [u8; 16] },
    AwaitingM5 { session_key: SessionKey },
}

/// Per-connection Pair-Setup state machine
pub struct PairSetup {
    step: SetupStep,
}

impl Default for PairSetup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PairSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairSetup")
            .field("expected_state", &self.expected_state())
            .finish()
    }
}

impl PairSetup {
    /// Create an idle state machine
    #[must_use]
    pub fn new() -> Self {
        Self {
            step: SetupStep::Idle,
        }
    }

    /// True between M1 and M5
    #[must_use]
    pub fn in_progress(&self) -> bool {
        !matches!(self.step, SetupStep::Idle)
    }

    fn expected_state(&self) -> u8 {
        match self.step {
            SetupStep::Idle => 1,
            SetupStep::AwaitingM3 { .. } => 3,
            SetupStep::AwaitingM5 { .. } => 5,
        }
    }

    /// Drop any handshake state and release setup ownership
    pub fn abort(&mut self, setup: &SetupCoordinator, connection_id: Uuid) {
        self.step = SetupStep::Idle;
        setup.release(connection_id);
    }

    /// Process one Pair-Setup request body
    pub async fn handle(&mut self, ctx: &PairingContext<'_>, body: &[u8]) -> PairingResponse {
        let request = match TlvDecoder::decode(body) {
            Ok(r) => r,
            Err(e) => return PairingResponse::from_error(2, &PairingError::Tlv(e)),
        };
        let state = match request.get_state() {
            Ok(s) => s,
            Err(e) => return PairingResponse::from_error(2, &PairingError::Tlv(e)),
        };

        let result = match (state, &self.step) {
            (1, _) => self.handle_m1(ctx, &request).await,
            (3, SetupStep::AwaitingM3 { .. }) => self.handle_m3(ctx, &request).await,
            (5, SetupStep::AwaitingM5 { .. }) => self.handle_m5(ctx, &request).await,
            _ => {
                let error = PairingError::UnexpectedState {
                    expected: self.expected_state(),
                    received: state,
                };
                warn!("[{}] pair-setup: {}", ctx.connection_id, error);
                return PairingResponse::from_error(state.wrapping_add(1), &error);
            }
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                warn!("[{}] pair-setup M{} failed: {}", ctx.connection_id, state, e);
                self.abort(ctx.setup, ctx.connection_id);
                PairingResponse::from_error(state.wrapping_add(1), &e)
            }
        }
    }

    async fn handle_m1(
        &mut self,
        ctx: &PairingContext<'_>,
        request: &TlvDecoder,
    ) -> Result<PairingResponse, PairingError> {
        self.step = SetupStep::Idle;

        let method = request.get_u8(TlvType::Method).unwrap_or(methods::PAIR_SETUP);
        if method != methods::PAIR_SETUP && method != methods::PAIR_SETUP_AUTH {
            return Err(PairingError::UnsupportedMethod(method));
        }
        if !ctx.allow_insecure && ctx.store.is_paired().await {
            return Err(PairingError::AlreadyPaired);
        }
        if ctx.setup.failed_attempts() > MAX_SETUP_ATTEMPTS {
            return Err(PairingError::MaxTries);
        }
        ctx.setup.claim(ctx.connection_id)?;

        let mut salt = [0u8; lengths::SRP_SALT];
        rand::thread_rng().fill_bytes(&mut salt);

        let password = ctx.identity.setup_code.clone().into_bytes();
        let server = tokio::task::spawn_blocking(move || {
            let verifier = SrpServer::compute_verifier(
                SETUP_USERNAME,
                &password,
                &salt,
                &SrpParams::RFC5054_3072,
            )?;
            SrpServer::new(&verifier, &SrpParams::RFC5054_3072)
        })
        .await
        .map_err(|e| PairingError::Internal(format!("SRP task failed: {e}")))??;

        let response = TlvEncoder::new()
            .add_state(2)
            .add(TlvType::Salt, &salt)
            .add(TlvType::PublicKey, server.public_key())
            .build();

        debug!("[{}] pair-setup M2 sent", ctx.connection_id);
        self.step = SetupStep::AwaitingM3 { server, salt };
        Ok(PairingResponse::ok(response))
    }

    async fn handle_m3(
        &mut self,
        ctx: &PairingContext<'_>,
        request: &TlvDecoder,
    ) -> Result<PairingResponse, PairingError> {
        let client_public = request.get_required(TlvType::PublicKey)?.to_vec();
        let client_proof = request.get_required(TlvType::Proof)?.to_vec();

        let SetupStep::AwaitingM3 { server, salt } =
            std::mem::replace(&mut self.step, SetupStep::Idle)
        else {
            return Err(PairingError::UnexpectedState {
                expected: self.expected_state(),
                received: 3,
            });
        };

        let verified = tokio::task::spawn_blocking(move || {
            server.verify_client(SETUP_USERNAME, &salt, &client_public, &client_proof)
        })
        .await
        .map_err(|e| PairingError::Internal(format!("SRP task failed: {e}")))?;

        let (session_key, server_proof) = match verified {
            Ok(v) => v,
            Err(e) => {
                let count = ctx.setup.record_failure();
                warn!(
                    "[{}] pair-setup proof rejected ({} unsuccessful attempts): {}",
                    ctx.connection_id, count, e
                );
                return Err(PairingError::AuthenticationFailed("invalid setup proof"));
            }
        };

        let response = TlvEncoder::new()
            .add_state(4)
            .add(TlvType::Proof, &server_proof)
            .build();

        debug!("[{}] pair-setup M4 sent", ctx.connection_id);
        self.step = SetupStep::AwaitingM5 { session_key };
        Ok(PairingResponse::ok(response))
    }

    async fn handle_m5(
        &mut self,
        ctx: &PairingContext<'_>,
        request: &TlvDecoder,
    ) -> Result<PairingResponse, PairingError> {
        let encrypted = request.get_required(TlvType::EncryptedData)?;
        let SetupStep::AwaitingM5 { session_key } =
            std::mem::replace(&mut self.step, SetupStep::Idle)
        else {
            return Err(PairingError::UnexpectedState {
                expected: self.expected_state(),
                received: 5,
            });
        };
        let k = session_key.as_bytes();

        let encrypt_key = derive_key_fixed(
            b"Pair-Setup-Encrypt-Salt",
            k,
            b"Pair-Setup-Encrypt-Info",
        )?;
        let cipher = ChaCha20Poly1305Cipher::new(&encrypt_key)?;
        let plaintext = cipher
            .decrypt(&Nonce::from_label(b"PS-Msg05"), encrypted)
            .map_err(|_| PairingError::AuthenticationFailed("M5 decryption failed"))?;

        let sub = TlvDecoder::decode(&plaintext)?;
        let username_bytes = sub.get_required(TlvType::Identifier)?;
        let username = std::str::from_utf8(username_bytes)
            .map_err(|_| TlvError::InvalidValue(TlvType::Identifier.into()))?
            .to_string();
        let ltpk: [u8; 32] = sub
            .get_required(TlvType::PublicKey)?
            .try_into()
            .map_err(|_| PairingError::AuthenticationFailed("invalid controller key"))?;
        let signature = Ed25519Signature::from_bytes(sub.get_required(TlvType::Signature)?)
            .map_err(|_| PairingError::AuthenticationFailed("invalid controller signature"))?;

        let controller_x = derive_key_fixed(
            b"Pair-Setup-Controller-Sign-Salt",
            k,
            b"Pair-Setup-Controller-Sign-Info",
        )?;
        let mut controller_info = Vec::with_capacity(32 + username.len() + 32);
        controller_info.extend_from_slice(&controller_x);
        controller_info.extend_from_slice(username.as_bytes());
        controller_info.extend_from_slice(&ltpk);

        Ed25519PublicKey::from_bytes(&ltpk)
            .and_then(|key| key.verify(&controller_info, &signature))
            .map_err(|_| PairingError::AuthenticationFailed("controller signature mismatch"))?;

        ctx.store.accept_pairing(&username, ltpk).await?;

        let accessory_x = derive_key_fixed(
            b"Pair-Setup-Accessory-Sign-Salt",
            k,
            b"Pair-Setup-Accessory-Sign-Info",
        )?;
        let device_id = ctx.identity.device_id.as_bytes();
        let accessory_ltpk = ctx.identity.keypair.public_key();
        let mut accessory_info = Vec::with_capacity(32 + device_id.len() + 32);
        accessory_info.extend_from_slice(&accessory_x);
        accessory_info.extend_from_slice(device_id);
        accessory_info.extend_from_slice(accessory_ltpk.as_bytes());
        let accessory_signature = ctx.identity.keypair.sign(&accessory_info);

        let sub_response = TlvEncoder::new()
            .add(TlvType::Identifier, device_id)
            .add(TlvType::PublicKey, accessory_ltpk.as_bytes())
            .add(TlvType::Signature, &accessory_signature.to_bytes())
            .build();
        let sealed = cipher.encrypt(&Nonce::from_label(b"PS-Msg06"), &sub_response)?;

        let response = TlvEncoder::new()
            .add_state(6)
            .add(TlvType::EncryptedData, &sealed)
            .build();

        ctx.setup.release(ctx.connection_id);
        info!("[{}] paired with controller {}", ctx.connection_id, username);

        Ok(PairingResponse {
            event: Some(PairingEvent::Paired { username }),
            ..PairingResponse::ok(response)
        })
    }
}
