use std::time::Duration;

use uuid::Uuid;

use crate::datastream::session::{PreparedSession, SessionPool};
use crate::datastream::{DataStreamKeys, FrameCrypto};
use crate::timer::TimerGuard;

const SECRET: [u8; 32] = [1; 32];

fn salt(n: u8) -> Vec<u8> {
    vec![n; 64]
}

fn prepared(anchor: Uuid, n: u8) -> PreparedSession {
    PreparedSession {
        id: Uuid::new_v4(),
        anchor,
        keys: DataStreamKeys::accessory(&SECRET, &salt(n)).unwrap(),
        expiry: None,
    }
}

fn controller(n: u8) -> FrameCrypto {
    FrameCrypto::new(&DataStreamKeys::controller(&SECRET, &salt(n)).unwrap()).unwrap()
}

#[test]
fn test_claim_finds_matching_session() {
    let anchor = Uuid::new_v4();
    let mut pool = SessionPool::default();
    let sessions: Vec<PreparedSession> = (1..=3).map(|n| prepared(anchor, n)).collect();
    let second = sessions[1].id;
    for session in sessions {
        pool.insert(session);
    }

    let frame = controller(2).seal(b"hello").unwrap();
    let claimed = pool.claim(&frame).unwrap();
    assert_eq!(claimed.id, second);
    assert_eq!(claimed.anchor, anchor);
    assert_eq!(claimed.first_payload, b"hello");
    assert_eq!(claimed.crypto.decrypt_count(), 1);
    assert_eq!(pool.len(), 2);

    // Claimed sessions cannot be claimed twice
    let frame = controller(2).seal(b"hello").unwrap();
    assert!(pool.claim(&frame).is_none());
}

#[test]
fn test_claim_without_match() {
    let mut pool = SessionPool::default();
    pool.insert(prepared(Uuid::new_v4(), 1));
    let frame = controller(9).seal(b"hello").unwrap();
    assert!(pool.claim(&frame).is_none());
    assert_eq!(pool.len(), 1);
}

#[test]
fn test_claimed_crypto_continues_counters() {
    let mut pool = SessionPool::default();
    pool.insert(prepared(Uuid::new_v4(), 4));
    let mut client = controller(4);

    let first = client.seal(b"one").unwrap();
    let mut claimed = pool.claim(&first).unwrap();
    let second = client.seal(b"two").unwrap();
    assert_eq!(claimed.crypto.open(&second).unwrap(), b"two");

    let reply = claimed.crypto.seal(b"three").unwrap();
    assert_eq!(client.open(&reply).unwrap(), b"three");
}

#[test]
fn test_drop_anchor() {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let mut pool = SessionPool::default();
    pool.insert(prepared(a, 1));
    pool.insert(prepared(b, 2));
    pool.insert(prepared(a, 3));

    assert_eq!(pool.drop_anchor(a), 2);
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.drop_anchor(a), 0);
}

#[tokio::test(start_paused = true)]
async fn test_expire_and_claim_race() {
    let mut pool = SessionPool::default();
    let mut session = prepared(Uuid::new_v4(), 5);
    let id = session.id;
    session.expiry = Some(TimerGuard::after(Duration::from_secs(10), async {}));
    pool.insert(session);

    assert!(pool.expire(id));
    assert!(!pool.expire(id));
    assert!(pool.is_empty());
}
