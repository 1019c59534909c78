//! Shared fixtures for the accessory integration tests

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use hap_accessory::protocol::crypto::Ed25519KeyPair;
use hap_accessory::protocol::http::{
    HttpRequest, HttpResponse, Method, ResponseBuilder, StatusCode, content_types,
};
use hap_accessory::protocol::tlv::{TlvEncoder, TlvType, methods};
use hap_accessory::server::ServerEvent;
use hap_accessory::testing::{ControllerIdentity, PairedAccessory, TestController};
use hap_accessory::{
    HapConfig, HapServer, MemoryIdentityStore, Permission, RequestContext, RequestHandler,
};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing_subscriber::{EnvFilter, fmt};

pub const SETUP_CODE: &str = "482-91-736";

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// How long `POST /identify` takes to answer
pub const IDENTIFY_TIME: Duration = Duration::from_millis(300);

/// Minimal accessory: one database, event subscriptions and data stream setup
#[derive(Debug, Default)]
pub struct TestAccessory;

#[async_trait]
impl RequestHandler for TestAccessory {
    async fn handle(&self, ctx: &mut RequestContext<'_>, request: HttpRequest) -> HttpResponse {
        match (request.method, request.path()) {
            (Method::Get, "/accessories") => ResponseBuilder::ok()
                .json_body(&json!({
                    "accessories": [{
                        "aid": 1,
                        "services": [{
                            "iid": 1,
                            "characteristics": [
                                { "iid": 10, "value": false, "perms": ["pr", "pw", "ev"] },
                                { "iid": 11, "value": 0, "perms": ["pr", "ev"] }
                            ]
                        }]
                    }]
                }))
                .build(),
            (Method::Put, "/characteristics") => {
                let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
                    return ResponseBuilder::new(StatusCode::BAD_REQUEST).build();
                };
                let entries = body["characteristics"].as_array().cloned().unwrap_or_default();
                for entry in entries {
                    let (Some(aid), Some(iid)) = (entry["aid"].as_u64(), entry["iid"].as_u64())
                    else {
                        continue;
                    };
                    match entry["ev"].as_bool() {
                        Some(true) => ctx.subscribe(aid, iid),
                        Some(false) => ctx.unsubscribe(aid, iid),
                        None => {}
                    }
                }
                ResponseBuilder::new(StatusCode::NO_CONTENT).build()
            }
            (Method::Post, "/identify") => {
                tokio::time::sleep(IDENTIFY_TIME).await;
                ResponseBuilder::new(StatusCode::NO_CONTENT).build()
            }
            (Method::Post, "/data-stream-setup") => ResponseBuilder::ok()
                .tlv_body(ctx.setup_data_stream(&request.body).await)
                .build(),
            _ => ResponseBuilder::new(StatusCode::NOT_FOUND).build(),
        }
    }
}

static INIT: Once = Once::new();

/// Route crate logs to the test writer; `RUST_LOG` overrides the default
pub fn init_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::from_default_env()
            .add_directive("hap_accessory=debug".parse().unwrap());
        fmt().with_env_filter(filter).with_test_writer().init();
    });
}

pub fn config() -> HapConfig {
    HapConfig::new(SETUP_CODE)
        .with_bind_address(LOCALHOST)
        .with_port(0)
}

pub async fn start(config: HapConfig) -> (HapServer, SocketAddr) {
    init_logging();
    let mut server = HapServer::new(
        config,
        Ed25519KeyPair::generate(),
        Arc::new(MemoryIdentityStore::new()),
        Arc::new(TestAccessory),
    )
    .unwrap();
    let address = server.start().await.unwrap();
    (server, address)
}

/// Pair `admin` on a throwaway connection and return what it learned
pub async fn pair(address: SocketAddr, admin: &ControllerIdentity) -> PairedAccessory {
    let mut controller = TestController::connect(address).await.unwrap();
    controller.pair_setup(admin, SETUP_CODE).await.unwrap()
}

/// Open a verified, encrypted connection
pub async fn verified(
    address: SocketAddr,
    identity: &ControllerIdentity,
    accessory: &PairedAccessory,
) -> TestController {
    let mut controller = TestController::connect(address).await.unwrap();
    controller.pair_verify(identity, accessory).await.unwrap();
    controller
}

pub async fn subscribe(controller: &mut TestController, aid: u64, iid: u64) {
    let response = controller
        .put_json(
            "/characteristics",
            &json!({ "characteristics": [{ "aid": aid, "iid": iid, "ev": true }] }),
        )
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::NO_CONTENT);
}

pub fn add_pairing_request(identity: &ControllerIdentity, permission: Permission) -> Vec<u8> {
    TlvEncoder::new()
        .add_state(1)
        .add_method(methods::ADD_PAIRING)
        .add(TlvType::Identifier, identity.username.as_bytes())
        .add(TlvType::PublicKey, &identity.public_key())
        .add_byte(TlvType::Permissions, permission.into())
        .build()
}

pub fn remove_pairing_request(username: &str) -> Vec<u8> {
    TlvEncoder::new()
        .add_state(1)
        .add_method(methods::REMOVE_PAIRING)
        .add(TlvType::Identifier, username.as_bytes())
        .build()
}

pub async fn post_pairings(controller: &mut TestController, body: &[u8]) -> HttpResponse {
    let response = controller
        .request(Method::Post, "/pairings", Some(content_types::PAIRING_TLV8), body)
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);
    response
}

/// Wait for the first server event matching `pick`
pub async fn wait_for<T>(
    events: &mut broadcast::Receiver<ServerEvent>,
    mut pick: impl FnMut(ServerEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(found) = pick(events.recv().await.unwrap()) {
                return found;
            }
        }
    })
    .await
    .expect("server event")
}

/// Resolve within a generous bound, or fail the test
pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}
