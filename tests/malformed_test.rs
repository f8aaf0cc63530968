use bytes::Bytes;
use tagwire::{unmarshal, Reader, Value, WireError};

#[test]
fn oversized_bytes_length_prefix_is_rejected() {
    let mut r = Reader::new(Bytes::from_static(b"b18446744073709551615\"x\""), false);
    assert!(matches!(
        r.read_bytes().unwrap_err(),
        WireError::InsufficientData
    ));
}

#[test]
fn oversized_list_count_does_not_overallocate() {
    let data = Bytes::from_static(b"a18446744073709551615{1}");
    assert!(unmarshal::<Vec<i64>>(data.clone()).is_err());
    assert!(unmarshal::<Value>(data).is_err());
}

#[test]
fn oversized_class_field_count_does_not_overallocate() {
    let data = Bytes::from_static(b"c5\"Point\"18446744073709551615{1\"x\"}o0{1}");
    assert!(unmarshal::<Value>(data).is_err());
}

#[test]
fn string_length_prefix_must_cover_whole_scalars() {
    // One declared UTF-16 unit over an astral scalar that needs two.
    let mut r = Reader::new(Bytes::from_static(b"s1\"\xf0\x9f\xa6\x80\""), false);
    assert!(matches!(r.read_string().unwrap_err(), WireError::Format(_)));
}

#[test]
fn truncated_string_payload_reports_insufficient_data() {
    let mut r = Reader::new(Bytes::from_static(b"s5\"he"), false);
    assert!(matches!(
        r.read_string().unwrap_err(),
        WireError::InsufficientData
    ));
}

#[test]
fn length_prefix_overflowing_usize_is_a_format_error() {
    let mut r = Reader::new(Bytes::from_static(b"b99999999999999999999\"x\""), false);
    assert!(matches!(r.read_bytes().unwrap_err(), WireError::Format(_)));
}
