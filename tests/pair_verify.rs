//! Pair-Verify and the encrypted session that follows it

mod common;

use common::{config, pair, start, verified, wait_for};
use hap_accessory::protocol::http::{
    Method, StatusCode, content_types, encode_request,
};
use hap_accessory::protocol::tlv::{TlvDecoder, TlvType, errors};
use hap_accessory::server::{
    ConnectionState, SecureSession, ServerEvent, TrafficKeys, paths,
};
use hap_accessory::testing::{ControllerError, ControllerIdentity, PairVerifyClient, TestController};

#[tokio::test]
async fn test_verified_session_is_encrypted() {
    let (server, address) = start(config()).await;
    let mut events = server.subscribe();
    let admin = ControllerIdentity::new("admin");
    let accessory = pair(address, &admin).await;

    let mut controller = verified(address, &admin, &accessory).await;
    assert!(controller.is_encrypted());

    let response = controller.get("/accessories").await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["accessories"][0]["aid"], 1);

    let (id, username) = wait_for(&mut events, |event| match event {
        ServerEvent::Authenticated { id, username } => Some((id, username)),
        _ => None,
    })
    .await;
    assert_eq!(username, "admin");
    let handle = server.connection(id).await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Authenticated);
    assert_eq!(handle.username(), Some("admin"));
}

#[tokio::test]
async fn test_unknown_controller_is_rejected() {
    let (_server, address) = start(config()).await;
    let accessory = pair(address, &ControllerIdentity::new("admin")).await;

    let mut controller = TestController::connect(address).await.unwrap();
    let result = controller
        .pair_verify(&ControllerIdentity::new("stranger"), &accessory)
        .await;
    assert!(matches!(
        result,
        Err(ControllerError::Rejected {
            state: 4,
            code: errors::AUTHENTICATION
        })
    ));
    assert!(!controller.is_encrypted());
}

#[tokio::test]
async fn test_pair_verify_on_secure_session_is_refused() {
    let (_server, address) = start(config()).await;
    let admin = ControllerIdentity::new("admin");
    let accessory = pair(address, &admin).await;
    let mut controller = verified(address, &admin, &accessory).await;

    let m1 = PairVerifyClient::new(admin.clone()).start();
    let response = controller.post_tlv(paths::PAIR_VERIFY, &m1).await.unwrap();
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let tlv = TlvDecoder::decode(&response.body).unwrap();
    assert_eq!(tlv.get_u8(TlvType::State), Some(2));
    assert_eq!(tlv.get_error(), Some(errors::UNKNOWN));

    // The session stays usable
    let response = controller.get("/accessories").await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_tampered_frame_closes_connection() {
    let (_server, address) = start(config()).await;
    let admin = ControllerIdentity::new("admin");
    let accessory = pair(address, &admin).await;
    let mut controller = verified(address, &admin, &accessory).await;

    let mut frame = vec![16, 0];
    frame.extend_from_slice(&[0xAB; 32]);
    controller.send_unencrypted(&frame).await.unwrap();
    assert!(common::within(controller.is_closed()).await);
}

#[tokio::test]
async fn test_request_pipelined_behind_m3() {
    let (_server, address) = start(config()).await;
    let admin = ControllerIdentity::new("admin");
    let accessory = pair(address, &admin).await;

    let mut controller = TestController::connect(address).await.unwrap();
    let mut client = PairVerifyClient::new(admin.clone());
    let m2 = controller.post_tlv(paths::PAIR_VERIFY, &client.start()).await.unwrap();
    let m3 = client.process_m2(&m2.body, &accessory).unwrap();

    let keys = TrafficKeys::controller(client.shared_secret().unwrap()).unwrap();
    let mut secure = SecureSession::new(&keys).unwrap();
    let mut bytes = encode_request(
        Method::Post,
        paths::PAIR_VERIFY,
        Some(content_types::PAIRING_TLV8),
        &m3,
    );
    bytes.extend(
        secure
            .encrypt(&encode_request(Method::Get, "/accessories", None, &[]))
            .unwrap(),
    );
    controller.send_unencrypted(&bytes).await.unwrap();

    let m4 = controller.read_response().await.unwrap();
    let shared_secret = client.process_m4(&m4.body).unwrap();
    controller.install_keys(shared_secret).unwrap();

    let response = common::within(controller.read_response()).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert!(!response.body.is_empty());
}
