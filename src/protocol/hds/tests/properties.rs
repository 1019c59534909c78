use proptest::prelude::*;

use crate::protocol::hds::{HdsValue, decode, encode};

fn scalar() -> impl Strategy<Value = HdsValue> {
    prop_oneof![
        Just(HdsValue::Null),
        any::<bool>().prop_map(HdsValue::Bool),
        any::<i8>().prop_map(|v| HdsValue::Integer(i64::from(v))),
        any::<i16>().prop_map(|v| HdsValue::Integer(i64::from(v))),
        any::<i32>().prop_map(|v| HdsValue::Integer(i64::from(v))),
        any::<i64>().prop_map(HdsValue::Integer),
        any::<f32>()
            .prop_filter("finite", |f| f.is_finite())
            .prop_map(|f| HdsValue::Float(f64::from(f))),
        any::<f64>().prop_filter("finite", |f| f.is_finite()).prop_map(HdsValue::Float),
        ".{0,40}".prop_map(HdsValue::String),
        proptest::collection::vec(any::<u8>(), 0..300).prop_map(HdsValue::Data),
        any::<[u8; 16]>().prop_map(|b| HdsValue::Uuid(uuid::Uuid::from_bytes(b))),
    ]
}

fn value() -> impl Strategy<Value = HdsValue> {
    scalar().prop_recursive(5, 64, 16, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..20).prop_map(HdsValue::Array),
            proptest::collection::btree_map("[a-z]{0,6}", inner, 0..18)
                .prop_map(HdsValue::Dictionary),
        ]
    })
}

proptest! {
    #[test]
    fn test_roundtrip(v in value()) {
        let encoded = encode(&v).unwrap();
        prop_assert_eq!(decode(&encoded).unwrap(), v);
    }

    // Repeated scalars exercise the back-reference window
    #[test]
    fn test_roundtrip_with_repeats(
        items in proptest::collection::vec(scalar(), 1..8),
        reps in 1usize..10,
    ) {
        let repeated: Vec<HdsValue> =
            items.iter().cycle().take(items.len() * reps).cloned().collect();
        let v = HdsValue::Array(repeated);
        prop_assert_eq!(decode(&encode(&v).unwrap()).unwrap(), v);
    }

    #[test]
    fn test_decode_no_panic(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = decode(&bytes);
    }
}
