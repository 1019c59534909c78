use crate::datastream::{DataStreamError, DataStreamMessage, Protocol, ResponseStatus};
use crate::protocol::hds::{HdsDict, HdsValue};

fn body(pairs: &[(&str, HdsValue)]) -> HdsDict {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

#[test]
fn test_request_roundtrip() {
    let message = DataStreamMessage::Request {
        protocol: Protocol::DataSend,
        topic: "open".into(),
        id: 7,
        body: body(&[("target", "controller".into()), ("type", "audio.siri".into())]),
    };
    let decoded = DataStreamMessage::decode(&message.encode().unwrap()).unwrap();
    assert_eq!(decoded, message);
    assert_eq!(decoded.protocol(), &Protocol::DataSend);
    assert_eq!(decoded.topic(), "open");
}

#[test]
fn test_response_roundtrip() {
    let message = DataStreamMessage::Response {
        protocol: Protocol::Control,
        topic: "hello".into(),
        id: 1,
        status: ResponseStatus::Success,
        body: HdsDict::new(),
    };
    assert_eq!(
        DataStreamMessage::decode(&message.encode().unwrap()).unwrap(),
        message
    );
}

#[test]
fn test_event_has_no_id() {
    let message = DataStreamMessage::Event {
        protocol: Protocol::Other("target-control".into()),
        topic: "whoami".into(),
        body: body(&[("identifier", HdsValue::Integer(3))]),
    };
    let payload = message.encode().unwrap();
    let decoded = DataStreamMessage::decode(&payload).unwrap();
    assert_eq!(decoded, message);
    assert_eq!(decoded.protocol().as_str(), "target-control");
}

#[test]
fn test_hello_detection() {
    let hello = DataStreamMessage::Request {
        protocol: Protocol::Control,
        topic: "hello".into(),
        id: 0,
        body: HdsDict::new(),
    };
    assert!(hello.is_hello());

    let event = DataStreamMessage::Event {
        protocol: Protocol::Control,
        topic: "hello".into(),
        body: HdsDict::new(),
    };
    assert!(!event.is_hello());
}

#[test]
fn test_empty_body_section_decodes_as_empty_dict() {
    let message = DataStreamMessage::Event {
        protocol: Protocol::Control,
        topic: "ping".into(),
        body: HdsDict::new(),
    };
    let mut payload = message.encode().unwrap();
    let header_len = usize::from(payload[0]);
    payload.truncate(1 + header_len);
    assert_eq!(DataStreamMessage::decode(&payload).unwrap(), message);
}

#[test]
fn test_decode_errors() {
    assert!(matches!(
        DataStreamMessage::decode(&[]),
        Err(DataStreamError::InvalidMessage(_))
    ));
    assert!(matches!(
        DataStreamMessage::decode(&[10, 0xE0]),
        Err(DataStreamError::InvalidMessage(_))
    ));

    // Header without a protocol key
    assert!(DataStreamMessage::decode(&[1, 0xE0, 0xE0]).is_err());
}

#[test]
fn test_header_over_255_bytes_rejected() {
    let message = DataStreamMessage::Event {
        protocol: Protocol::Other("p".repeat(300)),
        topic: "t".into(),
        body: HdsDict::new(),
    };
    assert!(matches!(
        message.encode(),
        Err(DataStreamError::HeaderTooLarge(_))
    ));
}

#[test]
fn test_status_codes() {
    for code in 0..=6 {
        assert_eq!(ResponseStatus::from_code(code).unwrap().code(), code);
    }
    assert_eq!(ResponseStatus::MissingProtocol.code(), 5);
    assert!(ResponseStatus::from_code(7).is_none());
}

#[test]
fn test_protocol_names() {
    assert_eq!(Protocol::from("control"), Protocol::Control);
    assert_eq!(Protocol::from("dataSend"), Protocol::DataSend);
    assert_eq!(Protocol::DataSend.to_string(), "dataSend");
}
