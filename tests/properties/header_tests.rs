//! Property-based tests for header encoding.

use proptest::prelude::*;

use msgstore::core::{HeaderValue, Headers, decode_headers, encode_headers};

fn arb_value() -> impl Strategy<Value = HeaderValue> {
    prop_oneof![
        any::<bool>().prop_map(HeaderValue::Bool),
        any::<i64>().prop_map(HeaderValue::Int),
        any::<f64>().prop_map(HeaderValue::Float),
        prop_oneof![
            Just(f64::INFINITY),
            Just(f64::NEG_INFINITY),
            Just(f64::NAN),
            Just(-0.0),
        ]
        .prop_map(HeaderValue::Float),
        ".{0,24}".prop_map(HeaderValue::Text),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(HeaderValue::Bytes),
    ]
}

proptest! {
    #[test]
    fn headers_survive_encoding(
        headers in prop::collection::btree_map("[a-zA-Z_][a-zA-Z0-9_.]{0,16}", arb_value(), 0..8)
    ) {
        let headers: Headers = headers;
        let encoded = encode_headers(&headers).unwrap();
        prop_assert_eq!(encoded.is_none(), headers.is_empty());
        let decoded = decode_headers(encoded.as_deref()).unwrap();
        prop_assert_eq!(decoded, headers);
    }

    #[test]
    fn decoding_arbitrary_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = decode_headers(Some(&bytes));
    }
}
