//! Pair-Setup against a running accessory server

mod common;

use common::{SETUP_CODE, config, start, wait_for};
use hap_accessory::protocol::http::{Method, StatusCode};
use hap_accessory::protocol::tlv::errors;
use hap_accessory::server::{INSUFFICIENT_PRIVILEGES, ServerEvent, paths};
use hap_accessory::testing::{ControllerError, ControllerIdentity, TestController};

#[tokio::test]
async fn test_pair_setup_stores_admin_pairing() {
    let (server, address) = start(config()).await;
    let mut events = server.subscribe();
    let admin = ControllerIdentity::new("admin-controller");

    let mut controller = TestController::connect(address).await.unwrap();
    let accessory = controller.pair_setup(&admin, SETUP_CODE).await.unwrap();

    assert_eq!(accessory.device_id, server.config().device_id);
    assert_eq!(
        accessory.public_key.as_bytes(),
        server.identity().keypair.public_key().as_bytes()
    );
    let username = wait_for(&mut events, |event| match event {
        ServerEvent::PairingAdded { username } => Some(username),
        _ => None,
    })
    .await;
    assert_eq!(username, "admin-controller");
}

#[tokio::test]
async fn test_wrong_setup_code_is_rejected() {
    let (_server, address) = start(config()).await;
    let mut controller = TestController::connect(address).await.unwrap();

    let result = controller
        .pair_setup(&ControllerIdentity::new("intruder"), "482-91-737")
        .await;
    assert!(matches!(
        result,
        Err(ControllerError::Rejected {
            state: 4,
            code: errors::AUTHENTICATION
        })
    ));
}

#[tokio::test]
async fn test_second_pair_setup_is_unavailable() {
    let (_server, address) = start(config()).await;
    common::pair(address, &ControllerIdentity::new("first")).await;

    let mut controller = TestController::connect(address).await.unwrap();
    let result = controller
        .pair_setup(&ControllerIdentity::new("second"), SETUP_CODE)
        .await;
    assert!(matches!(
        result,
        Err(ControllerError::Rejected {
            state: 2,
            code: errors::UNAVAILABLE
        })
    ));
}

#[tokio::test]
async fn test_insecure_pairing_allows_second_setup() {
    let (_server, address) = start(config().with_insecure_pairing()).await;
    common::pair(address, &ControllerIdentity::new("first")).await;

    let mut controller = TestController::connect(address).await.unwrap();
    controller
        .pair_setup(&ControllerIdentity::new("second"), SETUP_CODE)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_pairing_endpoints_require_post() {
    let (_server, address) = start(config()).await;
    let mut controller = TestController::connect(address).await.unwrap();

    for path in [paths::PAIR_SETUP, paths::PAIR_VERIFY, paths::PAIRINGS] {
        let response = controller.request(Method::Get, path, None, &[]).await.unwrap();
        assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED, "{path}");
    }
}

#[tokio::test]
async fn test_unauthenticated_requests_need_authorization() {
    let (_server, address) = start(config()).await;
    let mut controller = TestController::connect(address).await.unwrap();

    let response = controller.get("/accessories").await.unwrap();
    assert_eq!(response.status, StatusCode::CONNECTION_AUTHORIZATION_REQUIRED);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["status"], INSUFFICIENT_PRIVILEGES);

    let response = controller.post_tlv(paths::PAIRINGS, &[]).await.unwrap();
    assert_eq!(response.status, StatusCode::CONNECTION_AUTHORIZATION_REQUIRED);
}
