use std::sync::Arc;

use bytes::Bytes;
use tagwire::{marshal, unmarshal, Reader, Record, Registry, WireError, Writer};

#[derive(Record, Debug, Default, PartialEq)]
struct Point {
    x: i64,
    y: i64,
}

#[derive(Record, Debug, Default, PartialEq)]
struct Dot {
    x: i64,
    y: i64,
}

#[test]
fn record_round_trip() {
    let p = Point { x: 1, y: 2 };
    let bytes = marshal(&p).unwrap();
    assert_eq!(&bytes[..], b"c5\"Point\"2{1\"x\"1\"y\"}o0{12}");
    assert_eq!(unmarshal::<Point>(bytes).unwrap(), p);
}

#[test]
fn class_definition_is_emitted_once() {
    let p1 = Point { x: 1, y: 2 };
    let p2 = Point { x: 3, y: 4 };
    let mut w = Writer::new(false);
    w.serialize(&p1).unwrap();
    w.serialize(&p2).unwrap();
    assert_eq!(&w.bytes()[..], b"c5\"Point\"2{1\"x\"1\"y\"}o0{12}o0{34}");

    let mut r = Reader::new(w.bytes(), false);
    assert_eq!(r.read_record::<Point>().unwrap(), p1);
    assert_eq!(r.read_record::<Point>().unwrap(), p2);
}

#[test]
fn repeated_record_becomes_a_reference() {
    let p = Point { x: 1, y: 2 };
    let mut w = Writer::new(false);
    w.serialize(&p).unwrap();
    w.serialize(&p).unwrap();
    assert_eq!(&w.bytes()[..], b"c5\"Point\"2{1\"x\"1\"y\"}o0{12}r0;");

    let mut r = Reader::new(w.bytes(), false);
    assert_eq!(r.read_record::<Point>().unwrap(), p);
    assert_eq!(r.read_record::<Point>().unwrap(), p);
}

#[test]
fn unknown_wire_fields_are_skipped() {
    let data = Bytes::from_static(b"c5\"Point\"3{1\"x\"1\"y\"1\"z\"}o0{123}");
    assert_eq!(unmarshal::<Point>(data).unwrap(), Point { x: 1, y: 2 });
}

#[test]
fn missing_wire_fields_keep_defaults() {
    let data = Bytes::from_static(b"c5\"Point\"1{1\"y\"}o0{7}");
    assert_eq!(unmarshal::<Point>(data).unwrap(), Point { x: 0, y: 7 });
}

#[test]
fn null_decodes_to_the_default_record() {
    let data = Bytes::from_static(b"n");
    assert_eq!(unmarshal::<Point>(data).unwrap(), Point::default());
}

#[test]
fn mismatched_class_name_is_rejected() {
    let bytes = marshal(&Point { x: 1, y: 2 }).unwrap();
    let err = unmarshal::<Dot>(bytes).unwrap_err();
    match err {
        WireError::ClassMismatch { wire, expected } => {
            assert_eq!(wire, "Point");
            assert_eq!(expected, "Dot");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn registry_alias_accepts_a_foreign_class_name() {
    let registry = Arc::new(Registry::new());
    registry.register::<Dot>("Point");
    let bytes = marshal(&Point { x: 5, y: 6 }).unwrap();
    let mut r = Reader::with_registry(bytes, false, registry);
    assert_eq!(r.read_record::<Dot>().unwrap(), Dot { x: 5, y: 6 });
}

#[test]
fn registry_alias_renames_on_encode() {
    let registry = Arc::new(Registry::new());
    registry.register::<Point>("P");
    let p = Point { x: 1, y: 2 };
    let mut w = Writer::with_registry(false, registry);
    w.serialize(&p).unwrap();
    assert_eq!(&w.bytes()[..], b"c1\"P\"2{1\"x\"1\"y\"}o0{12}");
}

#[derive(Record, Debug, Default, PartialEq)]
#[tagwire(rename = "user")]
struct User {
    name: String,
    #[tagwire(rename = "years")]
    age: i64,
    #[tagwire(skip)]
    cached: bool,
}

#[test]
fn rename_and_skip_attributes() {
    let u = User {
        name: "ada".to_string(),
        age: 36,
        cached: true,
    };
    let bytes = marshal(&u).unwrap();
    assert_eq!(
        &bytes[..],
        b"c4\"user\"2{4\"name\"5\"years\"}o0{s3\"ada\"i36;}"
    );
    let back: User = unmarshal(bytes).unwrap();
    assert_eq!(
        back,
        User {
            name: "ada".to_string(),
            age: 36,
            cached: false,
        }
    );
}

#[derive(Record, Debug, Default, PartialEq)]
struct Segment {
    from: Point,
    to: Point,
}

#[test]
fn nested_records_round_trip() {
    let s = Segment {
        from: Point { x: 1, y: 2 },
        to: Point { x: 3, y: 4 },
    };
    let back: Segment = unmarshal(marshal(&s).unwrap()).unwrap();
    assert_eq!(back, s);
}

#[derive(Record, Debug, Default, PartialEq)]
struct Post {
    title: String,
    tags: Vec<String>,
    draft: Option<String>,
}

#[test]
fn record_with_container_fields_round_trips() {
    let p = Post {
        title: "release notes".to_string(),
        tags: vec!["wire".to_string(), "release notes".to_string()],
        draft: None,
    };
    let back: Post = unmarshal(marshal(&p).unwrap()).unwrap();
    assert_eq!(back, p);
}
