use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::datastream::{
    DataStreamError, DataStreamFrameCodec, DataStreamKeys, FRAME_TYPE_ENCRYPTED, FrameCrypto,
    RawFrame,
};

const SECRET: [u8; 32] = [7; 32];
const SALT: [u8; 64] = [3; 64];

fn crypto_pair() -> (FrameCrypto, FrameCrypto) {
    let accessory = FrameCrypto::new(&DataStreamKeys::accessory(&SECRET, &SALT).unwrap()).unwrap();
    let controller =
        FrameCrypto::new(&DataStreamKeys::controller(&SECRET, &SALT).unwrap()).unwrap();
    (accessory, controller)
}

#[test]
fn test_seal_header() {
    let (mut accessory, _) = crypto_pair();
    let frame = accessory.seal(&[0xAB; 300]).unwrap();
    assert_eq!(frame.header, [FRAME_TYPE_ENCRYPTED, 0x00, 0x01, 0x2C]);
    assert_eq!(frame.sealed.len(), 300 + 16);
    assert_eq!(frame.frame_type(), FRAME_TYPE_ENCRYPTED);
}

#[test]
fn test_seal_and_open_both_directions() {
    let (mut accessory, mut controller) = crypto_pair();

    let frame = controller.seal(b"from controller").unwrap();
    assert_eq!(accessory.open(&frame).unwrap(), b"from controller");

    let frame = accessory.seal(b"from accessory").unwrap();
    assert_eq!(controller.open(&frame).unwrap(), b"from accessory");
    assert_eq!(accessory.encrypt_count(), 1);
    assert_eq!(accessory.decrypt_count(), 1);
}

#[test]
fn test_header_is_authenticated() {
    let (mut accessory, mut controller) = crypto_pair();
    let mut frame = controller.seal(b"payload").unwrap();
    frame.header[0] = 0x02;
    assert!(matches!(
        accessory.open(&frame),
        Err(DataStreamError::Authentication)
    ));
}

#[test]
fn test_failed_trial_keeps_counter() {
    let (mut accessory, mut controller) = crypto_pair();
    let other_salt = [9u8; 64];
    let mut stranger =
        FrameCrypto::new(&DataStreamKeys::controller(&SECRET, &other_salt).unwrap()).unwrap();

    assert!(accessory.try_open(&stranger.seal(b"x").unwrap()).is_none());
    assert_eq!(accessory.decrypt_count(), 0);
    let frame = controller.seal(b"y").unwrap();
    assert_eq!(accessory.try_open(&frame).unwrap(), b"y");
}

#[test]
fn test_replay_rejected() {
    let (mut accessory, mut controller) = crypto_pair();
    let frame = controller.seal(b"once").unwrap();
    accessory.open(&frame).unwrap();
    assert!(accessory.open(&frame).is_err());
}

#[test]
fn test_codec_reassembles_split_frames() {
    let (_, mut controller) = crypto_pair();
    let frame = controller.seal(&[1, 2, 3, 4, 5]).unwrap();
    let mut codec = DataStreamFrameCodec::default();
    let mut wire = BytesMut::new();
    codec.encode(frame.clone(), &mut wire).unwrap();

    let mut buf = BytesMut::new();
    buf.extend_from_slice(&wire[..3]);
    assert!(codec.decode(&mut buf).unwrap().is_none());
    buf.extend_from_slice(&wire[3..10]);
    assert!(codec.decode(&mut buf).unwrap().is_none());
    buf.extend_from_slice(&wire[10..]);
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(frame));
    assert!(buf.is_empty());
}

#[test]
fn test_codec_skips_unknown_frame_types() {
    let mut codec = DataStreamFrameCodec::default();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[0x07, 0x00, 0x00, 0x02, 0xAA, 0xBB]);
    buf.extend_from_slice(&[0u8; 16]);
    buf.extend_from_slice(&[FRAME_TYPE_ENCRYPTED, 0x00, 0x00, 0x01, 0xCC]);
    buf.extend_from_slice(&[1u8; 16]);

    let frame = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(frame.header, [FRAME_TYPE_ENCRYPTED, 0, 0, 1]);
    assert_eq!(frame.sealed.len(), 17);
}

#[test]
fn test_codec_rejects_oversize_length() {
    let mut codec = DataStreamFrameCodec::new(1024);
    let mut buf = BytesMut::from(&[FRAME_TYPE_ENCRYPTED, 0x00, 0x04, 0x01][..]);
    assert!(matches!(
        codec.decode(&mut buf),
        Err(DataStreamError::FrameTooLarge(1025))
    ));
}

#[test]
fn test_short_frame_does_not_open() {
    let (mut accessory, _) = crypto_pair();
    let frame = RawFrame {
        header: [FRAME_TYPE_ENCRYPTED, 0, 0, 0],
        sealed: vec![0; 8],
    };
    assert!(accessory.try_open(&frame).is_none());
}
