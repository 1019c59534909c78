//! Pairing management: add, remove and list pairings

use tracing::{info, warn};

use super::{IdentityStore, PairingError, PairingResponse, Permission};
use crate::protocol::tlv::{TlvDecoder, TlvEncoder, TlvError, TlvType, methods};

/// Result of a `/pairings` request
#[derive(Debug)]
pub struct PairingsOutcome {
    /// Reply to send on the requesting connection
    pub response: PairingResponse,
    /// Usernames whose pairing was removed; their connections must close
    pub removed: Vec<String>,
}

impl PairingsOutcome {
    fn reply(response: PairingResponse) -> Self {
        Self {
            response,
            removed: Vec::new(),
        }
    }
}

/// Handle a pairing-management request from the authenticated `controller`
pub async fn handle_pairings(
    store: &dyn IdentityStore,
    controller: &str,
    body: &[u8],
) -> PairingsOutcome {
    let request = match TlvDecoder::decode(body) {
        Ok(r) => r,
        Err(e) => return PairingsOutcome::reply(PairingResponse::from_error(2, &e.into())),
    };
    match request.get_state() {
        Ok(1) => {}
        Ok(state) => {
            let error = PairingError::UnexpectedState {
                expected: 1,
                received: state,
            };
            return PairingsOutcome::reply(PairingResponse::from_error(
                state.wrapping_add(1),
                &error,
            ));
        }
        Err(e) => return PairingsOutcome::reply(PairingResponse::from_error(2, &e.into())),
    }

    match dispatch(store, controller, &request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("pairings request from {} failed: {}", controller, e);
            PairingsOutcome::reply(PairingResponse::from_error(2, &e))
        }
    }
}

async fn dispatch(
    store: &dyn IdentityStore,
    controller: &str,
    request: &TlvDecoder,
) -> Result<PairingsOutcome, PairingError> {
    if !store
        .permission(controller)
        .await
        .is_some_and(Permission::is_admin)
    {
        return Err(PairingError::InsufficientPermissions);
    }

    let method = request
        .get_u8(TlvType::Method)
        .ok_or(TlvError::MissingField(TlvType::Method.into()))?;
    match method {
        methods::ADD_PAIRING => add_pairing(store, request).await,
        methods::REMOVE_PAIRING => remove_pairing(store, request).await,
        methods::LIST_PAIRINGS => Ok(list_pairings(store).await),
        other => Err(PairingError::UnsupportedMethod(other)),
    }
}

fn identifier(request: &TlvDecoder) -> Result<String, PairingError> {
    let raw = request.get_required(TlvType::Identifier)?;
    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|_| TlvError::InvalidValue(TlvType::Identifier.into()).into())
}

async fn add_pairing(
    store: &dyn IdentityStore,
    request: &TlvDecoder,
) -> Result<PairingsOutcome, PairingError> {
    let username = identifier(request)?;
    let public_key: [u8; 32] = request
        .get_required(TlvType::PublicKey)?
        .try_into()
        .map_err(|_| TlvError::InvalidValue(TlvType::PublicKey.into()))?;
    let permission = request
        .get_u8(TlvType::Permissions)
        .and_then(Permission::from_byte)
        .ok_or(TlvError::InvalidValue(TlvType::Permissions.into()))?;

    store.add_pairing(&username, public_key, permission).await?;
    info!("added pairing {} ({:?})", username, permission);

    Ok(PairingsOutcome::reply(PairingResponse::ok(
        TlvEncoder::new().add_state(2).build(),
    )))
}

async fn remove_pairing(
    store: &dyn IdentityStore,
    request: &TlvDecoder,
) -> Result<PairingsOutcome, PairingError> {
    let username = identifier(request)?;
    let mut removed = Vec::new();
    if store.remove_pairing(&username).await? {
        info!("removed pairing {}", username);
        removed.push(username);
    }

    let remaining = store.list_pairings().await;
    if !remaining.is_empty() && !remaining.iter().any(|r| r.permission.is_admin()) {
        info!("no admin pairing left, removing all {} pairings", remaining.len());
        for record in remaining {
            store.remove_pairing(&record.username).await?;
            removed.push(record.username);
        }
    }

    Ok(PairingsOutcome {
        response: PairingResponse::ok(TlvEncoder::new().add_state(2).build()),
        removed,
    })
}

async fn list_pairings(store: &dyn IdentityStore) -> PairingsOutcome {
    let mut encoder = TlvEncoder::new().add_state(2);
    for (i, record) in store.list_pairings().await.iter().enumerate() {
        if i > 0 {
            encoder = encoder.add_separator();
        }
        encoder = encoder
            .add(TlvType::Identifier, record.username.as_bytes())
            .add(TlvType::PublicKey, &record.public_key)
            .add_byte(TlvType::Permissions, record.permission.into());
    }
    PairingsOutcome::reply(PairingResponse::ok(encoder.build()))
}
