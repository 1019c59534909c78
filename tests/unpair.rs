//! Pairing management and the connection teardown it triggers

mod common;

use common::{
    add_pairing_request, config, pair, post_pairings, remove_pairing_request, start, verified,
    wait_for, within,
};
use hap_accessory::Permission;
use hap_accessory::protocol::http::StatusCode;
use hap_accessory::protocol::tlv::{TlvDecoder, TlvEncoder, TlvType, errors, methods};
use hap_accessory::server::{ServerEvent, paths};
use hap_accessory::testing::ControllerIdentity;

#[tokio::test]
async fn test_list_pairings() {
    let (_server, address) = start(config()).await;
    let admin = ControllerIdentity::new("admin");
    let guest = ControllerIdentity::new("guest");
    let accessory = pair(address, &admin).await;
    let mut controller = verified(address, &admin, &accessory).await;
    post_pairings(&mut controller, &add_pairing_request(&guest, Permission::User)).await;

    let list = TlvEncoder::new()
        .add_state(1)
        .add_method(methods::LIST_PAIRINGS)
        .build();
    let response = post_pairings(&mut controller, &list).await;
    // Leading State record, then one entry per pairing
    assert_eq!(&response.body[..3], &[TlvType::State as u8, 1, 2]);
    let entries = TlvDecoder::decode_list(&response.body[3..], TlvType::Identifier).unwrap();
    let usernames: Vec<_> = entries
        .iter()
        .filter_map(|entry| entry.get(TlvType::Identifier))
        .collect();
    assert_eq!(usernames, [b"admin".as_slice(), b"guest".as_slice()]);
}

#[tokio::test]
async fn test_user_cannot_manage_pairings() {
    let (_server, address) = start(config()).await;
    let admin = ControllerIdentity::new("admin");
    let guest = ControllerIdentity::new("guest");
    let accessory = pair(address, &admin).await;
    let mut controller = verified(address, &admin, &accessory).await;
    post_pairings(&mut controller, &add_pairing_request(&guest, Permission::User)).await;

    let mut guest_connection = verified(address, &guest, &accessory).await;
    let response = guest_connection
        .post_tlv(paths::PAIRINGS, &remove_pairing_request("admin"))
        .await
        .unwrap();
    let tlv = TlvDecoder::decode(&response.body).unwrap();
    assert_eq!(tlv.get_error(), Some(errors::AUTHENTICATION));
}

#[tokio::test]
async fn test_removing_other_controller_closes_its_connections() {
    let (server, address) = start(config()).await;
    let mut events = server.subscribe();
    let admin = ControllerIdentity::new("admin");
    let guest = ControllerIdentity::new("guest");
    let accessory = pair(address, &admin).await;
    let mut controller = verified(address, &admin, &accessory).await;
    post_pairings(&mut controller, &add_pairing_request(&guest, Permission::Admin)).await;
    let mut first = verified(address, &guest, &accessory).await;
    let mut second = verified(address, &guest, &accessory).await;

    post_pairings(&mut controller, &remove_pairing_request("guest")).await;

    assert!(within(first.is_closed()).await);
    assert!(within(second.is_closed()).await);
    let removed = wait_for(&mut events, |event| match event {
        ServerEvent::PairingRemoved { username } => Some(username),
        _ => None,
    })
    .await;
    assert_eq!(removed, "guest");

    // The remover keeps its session
    let response = controller.get("/accessories").await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_removing_self_closes_after_response() {
    let (_server, address) = start(config()).await;
    let admin = ControllerIdentity::new("admin");
    let backup = ControllerIdentity::new("backup");
    let accessory = pair(address, &admin).await;
    let mut controller = verified(address, &admin, &accessory).await;
    post_pairings(&mut controller, &add_pairing_request(&backup, Permission::Admin)).await;

    let response = post_pairings(&mut controller, &remove_pairing_request("admin")).await;
    let tlv = TlvDecoder::decode(&response.body).unwrap();
    assert_eq!(tlv.get_state().unwrap(), 2);
    assert_eq!(tlv.get_error(), None);
    assert!(within(controller.is_closed()).await);

    // The remaining admin is untouched
    let mut other = verified(address, &backup, &accessory).await;
    let response = other.get("/accessories").await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_removing_last_admin_removes_everyone() {
    let (server, address) = start(config()).await;
    let mut events = server.subscribe();
    let admin = ControllerIdentity::new("admin");
    let guest = ControllerIdentity::new("guest");
    let accessory = pair(address, &admin).await;
    let mut controller = verified(address, &admin, &accessory).await;
    post_pairings(&mut controller, &add_pairing_request(&guest, Permission::User)).await;
    let mut guest_connection = verified(address, &guest, &accessory).await;

    post_pairings(&mut controller, &remove_pairing_request("admin")).await;

    assert!(within(controller.is_closed()).await);
    assert!(within(guest_connection.is_closed()).await);
    let mut removed = Vec::new();
    while removed.len() < 2 {
        removed.push(
            wait_for(&mut events, |event| match event {
                ServerEvent::PairingRemoved { username } => Some(username),
                _ => None,
            })
            .await,
        );
    }
    removed.sort();
    assert_eq!(removed, ["admin", "guest"]);

    // Unpaired again, so Pair-Setup is available
    pair(address, &ControllerIdentity::new("new-admin")).await;
}
