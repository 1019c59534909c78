use super::*;
use crate::protocol::tlv::{TlvEncoder, TlvType};

#[tokio::test]
async fn test_pair_setup_end_to_end() {
    let fixture = Fixture::new();
    let controller = ControllerIdentity::new("controller-1");

    let accessory = fixture.pair(&controller).await;

    assert_eq!(accessory.device_id, "AA:BB:CC:DD:EE:FF");
    assert_eq!(accessory.public_key, fixture.identity.keypair.public_key());

    let records = fixture.store.list_pairings().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].username, "controller-1");
    assert_eq!(records[0].public_key, controller.public_key());
    assert_eq!(records[0].permission, Permission::Admin);
    assert_eq!(fixture.setup.failed_attempts(), 0);
}

#[tokio::test]
async fn test_pair_setup_m6_reports_paired_event() {
    let fixture = Fixture::new();
    let controller = ControllerIdentity::new("controller-1");
    let mut machine = PairSetup::new();
    let mut client = PairSetupClient::new(controller, SETUP_CODE);
    let ctx = fixture.ctx();

    let m2 = machine.handle(&ctx, &client.start()).await;
    assert!(m2.event.is_none());
    assert!(machine.in_progress());
    let m4 = machine.handle(&ctx, &client.process_m2(&m2.body).unwrap()).await;
    let m6 = machine
        .handle(&ctx, &client.process_m4(&m4.body).unwrap())
        .await;

    assert!(matches!(
        m6.event,
        Some(PairingEvent::Paired { ref username }) if username == "controller-1"
    ));
    assert!(!machine.in_progress());
}

#[tokio::test]
async fn test_wrong_setup_code_counts_failure() {
    let fixture = Fixture::new();
    let mut machine = PairSetup::new();
    let mut client = PairSetupClient::new(ControllerIdentity::new("c"), "111-11-111");
    let ctx = fixture.ctx();

    let m2 = machine.handle(&ctx, &client.start()).await;
    let m4 = machine.handle(&ctx, &client.process_m2(&m2.body).unwrap()).await;

    assert_eq!(m4.status, StatusCode::OK);
    assert_eq!(error_of(&m4.body), (4, Some(errors::AUTHENTICATION)));
    assert_eq!(fixture.setup.failed_attempts(), 1);
    assert!(!machine.in_progress());
    assert!(!fixture.store.is_paired().await);
}

#[tokio::test]
async fn test_max_tries_refuses_m1() {
    let fixture = Fixture::with_setup(SetupCoordinator::with_failed_attempts(
        MAX_SETUP_ATTEMPTS + 1,
    ));
    let mut machine = PairSetup::new();
    let client = PairSetupClient::new(ControllerIdentity::new("c"), SETUP_CODE);

    let m2 = machine.handle(&fixture.ctx(), &client.start()).await;
    assert_eq!(error_of(&m2.body), (2, Some(errors::MAX_TRIES)));
}

#[tokio::test]
async fn test_attempt_limit_is_inclusive() {
    let fixture =
        Fixture::with_setup(SetupCoordinator::with_failed_attempts(MAX_SETUP_ATTEMPTS));
    let mut machine = PairSetup::new();
    let client = PairSetupClient::new(ControllerIdentity::new("c"), SETUP_CODE);

    let m2 = machine.handle(&fixture.ctx(), &client.start()).await;
    assert_eq!(error_of(&m2.body), (2, None));
}

#[tokio::test]
async fn test_already_paired_is_unavailable() {
    let mut fixture = Fixture::new();
    fixture
        .store
        .accept_pairing("existing", [1u8; 32])
        .await
        .unwrap();
    let client = PairSetupClient::new(ControllerIdentity::new("c"), SETUP_CODE);

    let m2 = PairSetup::new().handle(&fixture.ctx(), &client.start()).await;
    assert_eq!(error_of(&m2.body), (2, Some(errors::UNAVAILABLE)));

    fixture.allow_insecure = true;
    let m2 = PairSetup::new().handle(&fixture.ctx(), &client.start()).await;
    assert_eq!(error_of(&m2.body), (2, None));
}

#[tokio::test]
async fn test_out_of_order_step_is_rejected() {
    let fixture = Fixture::new();
    let mut machine = PairSetup::new();
    let m3 = TlvEncoder::new()
        .add_state(3)
        .add(TlvType::PublicKey, &[1u8; 384])
        .add(TlvType::Proof, &[2u8; 64])
        .build();

    let response = machine.handle(&fixture.ctx(), &m3).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&response.body), (4, Some(errors::UNKNOWN)));
    assert_eq!(fixture.setup.failed_attempts(), 0);
}

#[tokio::test]
async fn test_out_of_order_step_keeps_session() {
    let fixture = Fixture::new();
    let mut machine = PairSetup::new();
    let mut client = PairSetupClient::new(ControllerIdentity::new("c"), SETUP_CODE);
    let ctx = fixture.ctx();

    let m2 = machine.handle(&ctx, &client.start()).await;
    let early_m5 = TlvEncoder::new()
        .add_state(5)
        .add(TlvType::EncryptedData, &[0u8; 32])
        .build();
    let rejected = machine.handle(&ctx, &early_m5).await;
    assert_eq!(rejected.status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&rejected.body), (6, Some(errors::UNKNOWN)));

    let m4 = machine.handle(&ctx, &client.process_m2(&m2.body).unwrap()).await;
    assert_eq!(error_of(&m4.body), (4, None));
}

#[tokio::test]
async fn test_concurrent_setup_is_busy() {
    let fixture = Fixture::new();
    let client = PairSetupClient::new(ControllerIdentity::new("c"), SETUP_CODE);
    let other = Uuid::new_v4();

    let mut first = PairSetup::new();
    let m2 = first.handle(&fixture.ctx(), &client.start()).await;
    assert_eq!(error_of(&m2.body), (2, None));

    let mut second = PairSetup::new();
    let busy = second.handle(&fixture.ctx_for(other), &client.start()).await;
    assert_eq!(error_of(&busy.body), (2, Some(errors::BUSY)));

    first.abort(&fixture.setup, fixture.connection_id);
    let m2 = second.handle(&fixture.ctx_for(other), &client.start()).await;
    assert_eq!(error_of(&m2.body), (2, None));
}

#[tokio::test]
async fn test_tampered_m5_is_rejected() {
    let fixture = Fixture::new();
    let mut machine = PairSetup::new();
    let mut client = PairSetupClient::new(ControllerIdentity::new("c"), SETUP_CODE);
    let ctx = fixture.ctx();

    let m2 = machine.handle(&ctx, &client.start()).await;
    let m4 = machine.handle(&ctx, &client.process_m2(&m2.body).unwrap()).await;
    let m5 = client.process_m4(&m4.body).unwrap();

    let tlv = TlvDecoder::decode(&m5).unwrap();
    let mut sealed = tlv.get(TlvType::EncryptedData).unwrap().to_vec();
    sealed[0] ^= 0x01;
    let tampered = TlvEncoder::new()
        .add_state(5)
        .add(TlvType::EncryptedData, &sealed)
        .build();

    let m6 = machine.handle(&ctx, &tampered).await;
    assert_eq!(error_of(&m6.body), (6, Some(errors::AUTHENTICATION)));
    assert!(m6.event.is_none());
    assert!(!fixture.store.is_paired().await);
}

#[tokio::test]
async fn test_unsupported_method() {
    let fixture = Fixture::new();
    let m1 = TlvEncoder::new().add_state(1).add_method(7).build();
    let response = PairSetup::new().handle(&fixture.ctx(), &m1).await;
    assert_eq!(error_of(&response.body), (2, Some(errors::UNKNOWN)));
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let fixture = Fixture::new();
    let response = PairSetup::new().handle(&fixture.ctx(), &[0x06, 0x05, 0x01]).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}
