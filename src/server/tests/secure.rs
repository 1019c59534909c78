use crate::server::{MAX_FRAME_PLAINTEXT, SecureSession, SecureSessionError, TrafficKeys};

const SHARED_SECRET: [u8; 32] = [0x42; 32];

fn pair() -> (SecureSession, SecureSession) {
    let accessory = SecureSession::new(&TrafficKeys::accessory(&SHARED_SECRET).unwrap()).unwrap();
    let controller = SecureSession::new(&TrafficKeys::controller(&SHARED_SECRET).unwrap()).unwrap();
    (accessory, controller)
}

#[test]
fn test_both_directions() {
    let (mut accessory, mut controller) = pair();

    let request = b"GET /accessories HTTP/1.1\r\n\r\n";
    let sealed = controller.encrypt(request).unwrap();
    accessory.feed(&sealed);
    assert_eq!(accessory.decrypt().unwrap(), request);

    let response = b"HTTP/1.1 204 No Content\r\n\r\n";
    let sealed = accessory.encrypt(response).unwrap();
    controller.feed(&sealed);
    assert_eq!(controller.decrypt().unwrap(), response);
}

#[test]
fn test_frame_layout() {
    let (mut accessory, _) = pair();
    let sealed = accessory.encrypt(b"hello").unwrap();
    assert_eq!(sealed.len(), 2 + 5 + 16);
    assert_eq!(&sealed[..2], &[5, 0]);
}

#[test]
fn test_large_payload_split_into_frames() {
    let (mut accessory, mut controller) = pair();
    let payload: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();

    let sealed = accessory.encrypt(&payload).unwrap();
    assert_eq!(accessory.encrypt_count(), 3);
    assert_eq!(sealed.len(), 2500 + 3 * 18);
    assert_eq!(&sealed[..2], &(MAX_FRAME_PLAINTEXT as u16).to_le_bytes());

    controller.feed(&sealed);
    assert_eq!(controller.decrypt().unwrap(), payload);
    assert_eq!(controller.decrypt_count(), 3);
}

#[test]
fn test_partial_frames_are_buffered() {
    let (mut accessory, mut controller) = pair();
    let sealed = accessory.encrypt(b"partial delivery").unwrap();

    controller.feed(&sealed[..1]);
    assert!(controller.decrypt().unwrap().is_empty());
    controller.feed(&sealed[1..10]);
    assert!(controller.decrypt().unwrap().is_empty());
    assert_eq!(controller.pending_len(), 10);
    controller.feed(&sealed[10..]);
    assert_eq!(controller.decrypt().unwrap(), b"partial delivery");
    assert_eq!(controller.pending_len(), 0);
}

#[test]
fn test_tampered_frame_fails() {
    let (mut accessory, mut controller) = pair();
    let mut sealed = accessory.encrypt(b"payload").unwrap();
    sealed[4] ^= 0x01;
    controller.feed(&sealed);
    assert!(matches!(
        controller.decrypt(),
        Err(SecureSessionError::Authentication { counter: 0 })
    ));
}

#[test]
fn test_tampered_length_fails() {
    let (mut accessory, mut controller) = pair();
    let mut sealed = accessory.encrypt(&[0u8; 20]).unwrap();
    sealed.extend_from_slice(&[0u8; 8]);
    sealed[0] = 28;
    controller.feed(&sealed);
    assert!(controller.decrypt().is_err());
}

#[test]
fn test_oversize_length_rejected() {
    let (_, mut controller) = pair();
    controller.feed(&[0x01, 0x04]);
    assert!(matches!(
        controller.decrypt(),
        Err(SecureSessionError::FrameTooLarge(1025))
    ));
}

#[test]
fn test_replayed_frame_fails() {
    let (mut accessory, mut controller) = pair();
    let first = accessory.encrypt(b"one").unwrap();
    controller.feed(&first);
    controller.decrypt().unwrap();

    controller.feed(&first);
    assert!(matches!(
        controller.decrypt(),
        Err(SecureSessionError::Authentication { counter: 1 })
    ));
}

#[test]
fn test_wrong_direction_key_fails() {
    let (mut accessory, _) = pair();
    let mut other_accessory =
        SecureSession::new(&TrafficKeys::accessory(&SHARED_SECRET).unwrap()).unwrap();
    let sealed = accessory.encrypt(b"to controller").unwrap();
    other_accessory.feed(&sealed);
    assert!(other_accessory.decrypt().is_err());
}
