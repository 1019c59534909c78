use proptest::prelude::*;

use crate::protocol::tlv::{TlvDecoder, TlvEncoder};

proptest! {
    #[test]
    fn test_short_values_roundtrip(
        tlv_type in any::<u8>(),
        value in proptest::collection::vec(any::<u8>(), 0..=255),
    ) {
        let encoded = TlvEncoder::new().add(tlv_type, &value).build();
        prop_assert_eq!(encoded.len(), value.len() + 2);
        let decoded = TlvDecoder::decode(&encoded).unwrap();
        prop_assert_eq!(decoded.get(tlv_type), Some(&value[..]));
        prop_assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn test_long_values_reassemble(
        tlv_type in any::<u8>(),
        value in proptest::collection::vec(any::<u8>(), 256..2048),
    ) {
        let encoded = TlvEncoder::new().add(tlv_type, &value).build();
        let decoded = TlvDecoder::decode(&encoded).unwrap();
        prop_assert_eq!(decoded.get(tlv_type), Some(&value[..]));
    }

    // Random input must never panic
    #[test]
    fn test_decode_no_panic(bytes in proptest::collection::vec(any::<u8>(), 0..1024)) {
        let _ = TlvDecoder::decode(&bytes);
        let _ = TlvDecoder::decode_list(&bytes, 0x01u8);
    }
}
