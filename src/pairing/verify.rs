//! Pair-Verify (M1 through M4)

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{PairingContext, PairingError, PairingEvent, PairingResponse};
use crate::protocol::crypto::{
    ChaCha20Poly1305Cipher, Ed25519PublicKey, Ed25519Signature, Nonce, X25519KeyPair,
    X25519PublicKey, derive_key_fixed,
};
use crate::protocol::tlv::{TlvDecoder, TlvEncoder, TlvError, TlvType};

enum VerifyStep {
    Idle,
    AwaitingM3 {
        accessory_public: [u8; 32],
        controller_public: [u8; 32],
        shared_secret: Zeroizing<[u8; 32]>,
        session_key: Zeroizing<[u8; 32]>,
    },
}

/// Per-connection Pair-Verify state machine
pub struct PairVerify {
    step: VerifyStep,
}

impl Default for PairVerify {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PairVerify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairVerify")
            .field("in_progress", &self.in_progress())
            .finish()
    }
}

impl PairVerify {
    /// Create an idle state machine
    #[must_use]
    pub fn new() -> Self {
        Self {
            step: VerifyStep::Idle,
        }
    }

    /// True between M1 and M3
    #[must_use]
    pub fn in_progress(&self) -> bool {
        matches!(self.step, VerifyStep::AwaitingM3 { .. })
    }

    /// Drop any handshake state
    pub fn abort(&mut self) {
        self.step = VerifyStep::Idle;
    }

    /// Process one Pair-Verify request body
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
            (1, _) => self.handle_m1(ctx, &request),
            (3, VerifyStep::AwaitingM3 { .. }) => self.handle_m3(ctx, &request).await,
            _ => {
                let error = PairingError::UnexpectedState {
                    expected: if self.in_progress() { 3 } else { 1 },
                    received: state,
                };
                warn!("[{}] pair-verify: {}", ctx.connection_id, error);
                return PairingResponse::from_error(state.wrapping_add(1), &error);
            }
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                warn!("[{}] pair-verify M{} failed: {}", ctx.connection_id, state, e);
                self.abort();
                PairingResponse::from_error(state.wrapping_add(1), &e)
            }
        }
    }

    fn handle_m1(
        &mut self,
        ctx: &PairingContext<'_>,
        request: &TlvDecoder,
    ) -> Result<PairingResponse, PairingError> {
        self.step = VerifyStep::Idle;

        let controller_public: [u8; 32] = request
            .get_required(TlvType::PublicKey)?
            .try_into()
            .map_err(|_| TlvError::InvalidValue(TlvType::PublicKey.into()))?;

        let keypair = X25519KeyPair::generate();
        let accessory_public = *keypair.public_key().as_bytes();
        let shared = keypair.diffie_hellman(&X25519PublicKey::from_bytes(&controller_public)?);
        let shared_secret = Zeroizing::new(*shared.as_bytes());

        let session_key = Zeroizing::new(derive_key_fixed(
            b"Pair-Verify-Encrypt-Salt",
            &shared_secret[..],
            b"Pair-Verify-Encrypt-Info",
        )?);

        let device_id = ctx.identity.device_id.as_bytes();
        let mut accessory_info = Vec::with_capacity(64 + device_id.len());
        accessory_info.extend_from_slice(&accessory_public);
        accessory_info.extend_from_slice(device_id);
        accessory_info.extend_from_slice(&controller_public);
        let signature = ctx.identity.keypair.sign(&accessory_info);

        let sub = TlvEncoder::new()
            .add(TlvType::Identifier, device_id)
            .add(TlvType::Signature, &signature.to_bytes())
            .build();
        let sealed = ChaCha20Poly1305Cipher::new(&session_key[..])?
            .encrypt(&Nonce::from_label(b"PV-Msg02"), &sub)?;

        let response = TlvEncoder::new()
            .add_state(2)
            .add(TlvType::PublicKey, &accessory_public)
            .add(TlvType::EncryptedData, &sealed)
            .build();

        debug!("[{}] pair-verify M2 sent", ctx.connection_id);
        self.step = VerifyStep::AwaitingM3 {
            accessory_public,
            controller_public,
            shared_secret,
            session_key,
        };
        Ok(PairingResponse::ok(response))
    }

    async fn handle_m3(
        &mut self,
        ctx: &PairingContext<'_>,
        request: &TlvDecoder,
    ) -> Result<PairingResponse, PairingError> {
        let VerifyStep::AwaitingM3 {
            accessory_public,
            controller_public,
            shared_secret,
            session_key,
        } = std::mem::replace(&mut self.step, VerifyStep::Idle)
        else {
            return Err(PairingError::UnexpectedState {
                expected: 1,
                received: 3,
            });
        };

        let encrypted = request.get_required(TlvType::EncryptedData)?;
        let plaintext = ChaCha20Poly1305Cipher::new(&session_key[..])?
            .decrypt(&Nonce::from_label(b"PV-Msg03"), encrypted)
            .map_err(|_| PairingError::AuthenticationFailed("M3 decryption failed"))?;

        let sub = TlvDecoder::decode(&plaintext)?;
        let username = std::str::from_utf8(sub.get_required(TlvType::Identifier)?)
            .map_err(|_| TlvError::InvalidValue(TlvType::Identifier.into()))?
            .to_string();
        let signature = Ed25519Signature::from_bytes(sub.get_required(TlvType::Signature)?)
            .map_err(|_| PairingError::AuthenticationFailed("invalid controller signature"))?;

        let Some(ltpk) = ctx.store.public_key(&username).await else {
            return Err(PairingError::UnknownController(username));
        };

        let mut controller_info = Vec::with_capacity(64 + username.len());
        controller_info.extend_from_slice(&controller_public);
        controller_info.extend_from_slice(username.as_bytes());
        controller_info.extend_from_slice(&accessory_public);

        Ed25519PublicKey::from_bytes(&ltpk)
            .and_then(|key| key.verify(&controller_info, &signature))
            .map_err(|_| PairingError::AuthenticationFailed("controller signature mismatch"))?;

        info!("[{}] pair-verify complete for {}", ctx.connection_id, username);

        Ok(PairingResponse {
            event: Some(PairingEvent::Verified {
                username,
                shared_secret,
            }),
            ..PairingResponse::ok(TlvEncoder::new().add_state(4).build())
        })
    }
}
