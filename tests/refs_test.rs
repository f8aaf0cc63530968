use std::rc::Rc;

use bytes::Bytes;
use tagwire::{marshal, unmarshal, Reader, Value, WireError, Writer};

#[test]
fn repeated_strings_intern_by_content() {
    let mut w = Writer::new(false);
    w.serialize("hello").unwrap();
    w.serialize("hello").unwrap();
    assert_eq!(&w.bytes()[..], b"s5\"hello\"r0;");

    let mut r = Reader::new(w.bytes(), false);
    assert_eq!(r.read_string().unwrap(), "hello");
    assert_eq!(r.read_string().unwrap(), "hello");
}

#[test]
fn short_strings_are_not_interned() {
    let mut w = Writer::new(false);
    w.serialize("a").unwrap();
    w.serialize("a").unwrap();
    assert_eq!(&w.bytes()[..], b"uaua");
}

#[test]
fn repeated_containers_share_by_identity() {
    let items = vec![1i64, 2, 3];
    let mut w = Writer::new(false);
    w.serialize(&items).unwrap();
    w.serialize(&items).unwrap();
    assert_eq!(&w.bytes()[..], b"a3{123}r0;");

    let mut r = Reader::new(w.bytes(), false);
    assert_eq!(r.unserialize::<Vec<i64>>().unwrap(), items);
    assert_eq!(r.unserialize::<Vec<i64>>().unwrap(), items);
}

#[test]
fn equal_but_distinct_containers_do_not_share() {
    let a = vec![1i64, 2];
    let b = vec![1i64, 2];
    let mut w = Writer::new(false);
    w.serialize(&a).unwrap();
    w.serialize(&b).unwrap();
    assert_eq!(&w.bytes()[..], b"a2{12}a2{12}");
}

#[test]
fn back_reference_coerces_to_a_new_destination() {
    let mut w = Writer::new(false);
    w.serialize("42").unwrap();
    w.serialize("42").unwrap();

    let mut r = Reader::new(w.bytes(), false);
    assert_eq!(r.read_string().unwrap(), "42");
    // The second occurrence is a back-reference; it re-decodes under the
    // integer rules rather than replaying the string result.
    assert_eq!(r.read_i64().unwrap(), 42);
}

#[test]
fn cyclic_value_graph_round_trips() {
    let list = Value::list(vec![]);
    if let Value::List(rc) = &list {
        rc.borrow_mut().push(list.clone());
    }
    let bytes = marshal(&list).unwrap();
    assert_eq!(&bytes[..], b"a1{r0;}");

    let back: Value = unmarshal(bytes).unwrap();
    match &back {
        Value::List(rc) => {
            let inner = rc.borrow();
            assert_eq!(inner.len(), 1);
            match &inner[0] {
                Value::List(child) => assert!(Rc::ptr_eq(rc, child)),
                other => panic!("expected list, got {}", other.type_name()),
            }
        }
        other => panic!("expected list, got {}", other.type_name()),
    }
}

#[test]
fn cyclic_stream_cannot_decode_into_a_typed_list() {
    let list = Value::list(vec![]);
    if let Value::List(rc) = &list {
        rc.borrow_mut().push(list.clone());
    }
    let bytes = marshal(&list).unwrap();
    // A growable typed destination cannot hold a self-referential node;
    // this must surface as an error, not unbounded recursion.
    let err = unmarshal::<Vec<Value>>(bytes.clone()).unwrap_err();
    assert!(matches!(err, WireError::Format(_)));
    // An element type the node cannot coerce to fails one step earlier.
    let err = unmarshal::<Vec<i64>>(bytes).unwrap_err();
    assert!(matches!(err, WireError::TypeConversion { to: "int64", .. }));
}

#[test]
fn shared_node_appears_twice_in_one_graph() {
    let shared = Value::list(vec![Value::Int(1)]);
    let outer = Value::list(vec![shared.clone(), shared]);
    let back: Value = unmarshal(marshal(&outer).unwrap()).unwrap();
    match back {
        Value::List(rc) => {
            let items = rc.borrow();
            match (&items[0], &items[1]) {
                (Value::List(a), Value::List(b)) => assert!(Rc::ptr_eq(a, b)),
                _ => panic!("expected two lists"),
            }
        }
        other => panic!("expected list, got {}", other.type_name()),
    }
}

#[test]
fn ref_to_string_does_not_convert_to_complex() {
    let mut w = Writer::new(false);
    w.serialize("hello").unwrap();
    w.serialize("hello").unwrap();

    let mut r = Reader::new(w.bytes(), false);
    assert_eq!(r.read_string().unwrap(), "hello");
    match r.read_complex64().unwrap_err() {
        WireError::TypeConversion { from, to } => {
            assert_eq!(from, "string");
            assert_eq!(to, "complex64");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn simple_mode_writer_never_emits_references() {
    let mut w = Writer::new(true);
    w.serialize("hello").unwrap();
    w.serialize("hello").unwrap();
    assert_eq!(&w.bytes()[..], b"s5\"hello\"s5\"hello\"");
}

#[test]
fn simple_mode_reader_rejects_references() {
    let mut r = Reader::new(Bytes::from_static(b"s5\"hello\"r0;"), true);
    assert_eq!(r.read_string().unwrap(), "hello");
    assert!(matches!(
        r.read_string().unwrap_err(),
        WireError::InvalidRef(0)
    ));
}

#[test]
fn reset_clears_the_reference_table() {
    let mut w = Writer::new(false);
    w.serialize("hello").unwrap();
    w.reset();
    w.serialize("hello").unwrap();
    assert_eq!(&w.bytes()[..], b"s5\"hello\"");
}

#[test]
fn unresolved_reference_is_an_error() {
    let mut r = Reader::new(Bytes::from_static(b"r3;"), false);
    assert!(matches!(
        r.read_i64().unwrap_err(),
        WireError::InvalidRef(3)
    ));
}

#[test]
fn writers_are_isolated_across_threads() {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || {
                let text = format!("value-{i}");
                let bytes = marshal(&text).unwrap();
                let back: String = unmarshal(bytes).unwrap();
                assert_eq!(back, text);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}
