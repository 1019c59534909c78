use crate::protocol::hds::{
    HdsDecodeError, HdsDict, HdsEncodeError, HdsValue, MAX_DEPTH, decode, encode,
};
use uuid::Uuid;

fn roundtrip(value: &HdsValue) -> HdsValue {
    decode(&encode(value).unwrap()).unwrap()
}

#[test]
fn test_simple_tags() {
    assert_eq!(encode(&HdsValue::Bool(true)).unwrap(), vec![0x01]);
    assert_eq!(encode(&HdsValue::Bool(false)).unwrap(), vec![0x02]);
    assert_eq!(encode(&HdsValue::Null).unwrap(), vec![0x04]);
    assert_eq!(encode(&HdsValue::Integer(-1)).unwrap(), vec![0x07]);
    assert_eq!(encode(&HdsValue::Integer(0)).unwrap(), vec![0x08]);
    assert_eq!(encode(&HdsValue::Integer(39)).unwrap(), vec![0x2F]);
}

#[test]
fn test_integer_widths() {
    assert_eq!(encode(&HdsValue::Integer(40)).unwrap(), vec![0x30, 40]);
    assert_eq!(encode(&HdsValue::Integer(-2)).unwrap(), vec![0x30, 0xFE]);
    assert_eq!(encode(&HdsValue::Integer(300)).unwrap(), vec![0x31, 0x2C, 0x01]);
    assert_eq!(
        encode(&HdsValue::Integer(70_000)).unwrap(),
        vec![0x32, 0x70, 0x11, 0x01, 0x00]
    );
    assert_eq!(encode(&HdsValue::Integer(i64::MIN)).unwrap()[0], 0x33);
    assert_eq!(roundtrip(&HdsValue::Integer(i64::MAX)), HdsValue::Integer(i64::MAX));
}

#[test]
fn test_float_narrowing() {
    assert_eq!(encode(&HdsValue::Float(1.5)).unwrap()[0], 0x35);
    assert_eq!(encode(&HdsValue::Float(0.1)).unwrap()[0], 0x36);
    assert_eq!(roundtrip(&HdsValue::Float(0.1)), HdsValue::Float(0.1));
    // Integers and floats never share a tag
    assert_ne!(
        encode(&HdsValue::Float(1.0)).unwrap(),
        encode(&HdsValue::Integer(1)).unwrap()
    );
}

#[test]
fn test_strings_and_data() {
    assert_eq!(encode(&HdsValue::from("hi")).unwrap(), vec![0x42, b'h', b'i']);
    assert_eq!(encode(&HdsValue::from("")).unwrap(), vec![0x40]);
    let long = "x".repeat(33);
    let encoded = encode(&HdsValue::from(long.as_str())).unwrap();
    assert_eq!(&encoded[..2], &[0x61, 33]);
    let big = vec![7u8; 300];
    let encoded = encode(&HdsValue::Data(big.clone())).unwrap();
    assert_eq!(&encoded[..3], &[0x92, 0x2C, 0x01]);
    assert_eq!(roundtrip(&HdsValue::Data(big.clone())), HdsValue::Data(big));
    assert_eq!(encode(&HdsValue::Data(vec![1, 2])).unwrap(), vec![0x72, 1, 2]);
}

#[test]
fn test_terminated_forms_decode() {
    assert_eq!(
        decode(&[0x6F, b'a', b'b', 0x00]).unwrap(),
        HdsValue::from("ab")
    );
    assert_eq!(
        decode(&[0x9F, 9, 9, 0x03]).unwrap(),
        HdsValue::Data(vec![9, 9])
    );
    assert_eq!(
        decode(&[0xDF, 0x08, 0x09, 0x03]).unwrap(),
        HdsValue::Array(vec![HdsValue::Integer(0), HdsValue::Integer(1)])
    );
    let dict = decode(&[0xEF, 0x41, b'k', 0x01, 0x03]).unwrap();
    assert_eq!(dict.get("k"), Some(&HdsValue::Bool(true)));
}

#[test]
fn test_large_containers_use_terminated_form() {
    let items: Vec<HdsValue> = (0..20).map(HdsValue::Integer).collect();
    let encoded = encode(&HdsValue::Array(items.clone())).unwrap();
    assert_eq!(encoded[0], 0xDF);
    assert_eq!(*encoded.last().unwrap(), 0x03);
    assert_eq!(decode(&encoded).unwrap(), HdsValue::Array(items));

    let dict: HdsDict = (0..15)
        .map(|i| (format!("key{i}"), HdsValue::Integer(i)))
        .collect();
    let encoded = encode(&HdsValue::Dictionary(dict.clone())).unwrap();
    assert_eq!(encoded[0], 0xEF);
    assert_eq!(decode(&encoded).unwrap(), HdsValue::Dictionary(dict));
}

#[test]
fn test_back_reference_compression() {
    let value = HdsValue::Array(vec![
        HdsValue::from("protocol"),
        HdsValue::from("protocol"),
    ]);
    let encoded = encode(&value).unwrap();
    // array header, full string, back-reference to slot 0
    assert_eq!(encoded.len(), 1 + 9 + 1);
    assert_eq!(*encoded.last().unwrap(), 0xA0);
    assert_eq!(decode(&encoded).unwrap(), value);
}

#[test]
fn test_back_reference_skips_one_byte_values() {
    let value = HdsValue::Array(vec![HdsValue::Integer(3), HdsValue::Integer(3)]);
    assert_eq!(encode(&value).unwrap(), vec![0xD2, 0x0B, 0x0B]);
}

#[test]
fn test_back_reference_distinguishes_types() {
    let value = HdsValue::Array(vec![
        HdsValue::Float(100.0),
        HdsValue::Integer(100),
        HdsValue::Date(100.0),
        HdsValue::Float(-0.0),
        HdsValue::Float(0.0),
    ]);
    assert_eq!(roundtrip(&value), value);
    let decoded = roundtrip(&value);
    let items = decoded.as_array().unwrap();
    assert!(items[3].as_f64().unwrap().is_sign_negative());
    assert!(items[4].as_f64().unwrap().is_sign_positive());
}

#[test]
fn test_back_reference_window_is_bounded() {
    let mut items: Vec<HdsValue> = (0..60).map(|i| HdsValue::from(format!("s{i:03}"))).collect();
    items.push(HdsValue::from("s055"));
    items.push(HdsValue::from("s010"));
    let value = HdsValue::Array(items);
    let encoded = encode(&value).unwrap();
    // s010 is inside the window, s055 is not; the array is terminator-closed
    assert_eq!(encoded[encoded.len() - 2], 0xA0 + 10);
    assert_eq!(&encoded[encoded.len() - 7..encoded.len() - 2], &[0x44, b's', b'0', b'5', b'5']);
    assert_eq!(decode(&encoded).unwrap(), value);
}

#[test]
fn test_uuid_and_date() {
    let id = Uuid::from_bytes([0xAB; 16]);
    let encoded = encode(&HdsValue::Uuid(id)).unwrap();
    assert_eq!(encoded.len(), 17);
    assert_eq!(encoded[0], 0x05);
    assert_eq!(roundtrip(&HdsValue::Uuid(id)), HdsValue::Uuid(id));
    assert_eq!(roundtrip(&HdsValue::Date(6.5e8)), HdsValue::Date(6.5e8));
}

#[test]
fn test_decode_errors() {
    assert_eq!(decode(&[0x34]), Err(HdsDecodeError::UnknownTag(0x34)));
    assert_eq!(decode(&[0x45, b'a']), Err(HdsDecodeError::UnexpectedEnd(2)));
    assert_eq!(decode(&[0xA3]), Err(HdsDecodeError::InvalidBackReference(3)));
    assert_eq!(decode(&[0x03]), Err(HdsDecodeError::UnexpectedTerminator));
    assert_eq!(decode(&[0xE1, 0x08, 0x01]), Err(HdsDecodeError::NonStringKey));
    assert_eq!(decode(&[0x42, 0xFF, 0xFE]), Err(HdsDecodeError::InvalidUtf8));
    assert_eq!(decode(&[0x01, 0x01]), Err(HdsDecodeError::TrailingBytes(1)));
    assert_eq!(decode(&[0xD2, 0x01, 0x03]), Err(HdsDecodeError::UnexpectedTerminator));
}

#[test]
fn test_depth_limits() {
    let mut value = HdsValue::Null;
    for _ in 0..=MAX_DEPTH {
        value = HdsValue::Array(vec![value]);
    }
    assert_eq!(encode(&value), Err(HdsEncodeError::NestingTooDeep));

    let mut bytes = vec![0xD1; MAX_DEPTH + 1];
    bytes.push(0x04);
    assert_eq!(decode(&bytes), Err(HdsDecodeError::NestingTooDeep));
}

#[test]
fn test_message_style_dictionary() {
    let mut header = HdsDict::new();
    header.insert("protocol".into(), "control".into());
    header.insert("request".into(), "hello".into());
    header.insert("id".into(), HdsValue::Integer(1));
    let value = HdsValue::Dictionary(header);
    assert_eq!(roundtrip(&value), value);
}
