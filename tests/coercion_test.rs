use tagwire::{marshal, unmarshal, Complex128, Complex64, Reader, Timestamp, WireError, Writer};

#[test]
fn bool_coercion_table() {
    let mut w = Writer::new(false);
    w.serialize(&true).unwrap();
    w.serialize(&false).unwrap();
    w.write_null();
    w.serialize("").unwrap();
    w.serialize(&0i64).unwrap();
    w.serialize(&0.0f64).unwrap();
    w.serialize("f").unwrap();
    w.serialize("false").unwrap();
    w.serialize(&1i64).unwrap();
    w.serialize(&9i64).unwrap();
    w.serialize(&100_000_000_000_000i64).unwrap();
    w.serialize("t").unwrap();

    let mut r = Reader::new(w.bytes(), false);
    let expected = [
        true, false, false, false, false, false, false, false, true, true, true, true,
    ];
    for want in expected {
        assert_eq!(r.read_bool().unwrap(), want);
    }
}

#[test]
fn narrowing_keeps_twos_complement_bits() {
    let bytes = marshal(&u64::MAX).unwrap();
    assert_eq!(unmarshal::<i64>(bytes.clone()).unwrap(), -1);
    assert_eq!(unmarshal::<u64>(bytes).unwrap(), u64::MAX);

    let bytes = marshal(&(i32::MIN as i64)).unwrap();
    assert_eq!(unmarshal::<i64>(bytes).unwrap(), -2_147_483_648);

    assert_eq!(unmarshal::<u8>(marshal(&300i64).unwrap()).unwrap(), 44);
    assert_eq!(unmarshal::<i8>(marshal(&-1i64).unwrap()).unwrap(), -1);
}

#[test]
fn double_truncates_to_int() {
    assert_eq!(unmarshal::<i64>(marshal(&9.9f64).unwrap()).unwrap(), 9);
    assert_eq!(unmarshal::<i64>(marshal(&-9.9f64).unwrap()).unwrap(), -9);
}

#[test]
fn bool_widens_to_numbers() {
    assert_eq!(unmarshal::<i64>(marshal(&true).unwrap()).unwrap(), 1);
    assert_eq!(unmarshal::<u64>(marshal(&false).unwrap()).unwrap(), 0);
    assert_eq!(unmarshal::<f64>(marshal(&true).unwrap()).unwrap(), 1.0);
}

#[test]
fn strings_parse_into_numbers() {
    assert_eq!(unmarshal::<i64>(marshal("42").unwrap()).unwrap(), 42);
    assert_eq!(unmarshal::<i64>(marshal("-17").unwrap()).unwrap(), -17);
    assert_eq!(unmarshal::<u64>(marshal("42").unwrap()).unwrap(), 42);
    assert_eq!(unmarshal::<f64>(marshal("3.5").unwrap()).unwrap(), 3.5);
    assert_eq!(unmarshal::<f32>(marshal("0.25").unwrap()).unwrap(), 0.25);
    // A single digit string travels as an inline char and still parses.
    assert_eq!(unmarshal::<i64>(marshal("7").unwrap()).unwrap(), 7);
}

#[test]
fn bad_string_parse_is_a_parse_error() {
    let err = unmarshal::<i64>(marshal("abc").unwrap()).unwrap_err();
    assert!(matches!(err, WireError::Parse { target: "int64", .. }));
    let err = unmarshal::<f64>(marshal("nope").unwrap()).unwrap_err();
    assert!(matches!(err, WireError::Parse { target: "float64", .. }));
    let err = unmarshal::<u64>(marshal("-1x").unwrap()).unwrap_err();
    assert!(matches!(err, WireError::Parse { target: "uint64", .. }));
}

#[test]
fn nan_does_not_convert_to_int() {
    let err = unmarshal::<i64>(marshal(&f64::NAN).unwrap()).unwrap_err();
    assert!(matches!(err, WireError::TypeConversion { to: "int64", .. }));
}

#[test]
fn list_does_not_convert_to_int() {
    let err = unmarshal::<i64>(marshal(&vec![1i64]).unwrap()).unwrap_err();
    assert!(matches!(err, WireError::TypeConversion { to: "int64", .. }));
}

#[test]
fn time_converts_to_total_nanoseconds() {
    let bytes = marshal(&Timestamp::new(123, 456)).unwrap();
    assert_eq!(unmarshal::<i64>(bytes).unwrap(), 123_000_000_456);

    let bytes = marshal(&std::time::Duration::new(2, 5)).unwrap();
    assert_eq!(unmarshal::<i64>(bytes).unwrap(), 2_000_000_005);
}

#[test]
fn time_converts_to_fractional_seconds() {
    let bytes = marshal(&Timestamp::new(10, 500_000_000)).unwrap();
    assert_eq!(unmarshal::<f64>(bytes).unwrap(), 10.5);
}

#[test]
fn numbers_convert_to_strings() {
    assert_eq!(unmarshal::<String>(marshal(&100i64).unwrap()).unwrap(), "100");
    assert_eq!(
        unmarshal::<String>(marshal(&u64::MAX).unwrap()).unwrap(),
        "18446744073709551615"
    );
    assert_eq!(unmarshal::<String>(marshal(&0.5f64).unwrap()).unwrap(), "0.5");
    assert_eq!(unmarshal::<String>(marshal(&f64::NAN).unwrap()).unwrap(), "NaN");
    assert_eq!(
        unmarshal::<String>(marshal(&f64::INFINITY).unwrap()).unwrap(),
        "+Inf"
    );
    assert_eq!(unmarshal::<String>(marshal(&true).unwrap()).unwrap(), "true");
    assert_eq!(unmarshal::<String>(marshal(&3i64).unwrap()).unwrap(), "3");
}

#[test]
fn null_and_empty_decode_to_zero_values() {
    let mut w = Writer::new(false);
    w.write_null();
    w.serialize("").unwrap();
    let data = w.bytes();

    let mut r = Reader::new(data.clone(), false);
    assert_eq!(r.read_i64().unwrap(), 0);
    assert_eq!(r.read_f64().unwrap(), 0.0);

    let mut r = Reader::new(data, false);
    assert_eq!(r.read_string().unwrap(), "");
    assert_eq!(r.read_string().unwrap(), "");
}

#[test]
fn scalars_widen_to_complex() {
    assert_eq!(
        unmarshal::<Complex64>(marshal(&5i64).unwrap()).unwrap(),
        Complex64::new(5.0, 0.0)
    );
    assert_eq!(
        unmarshal::<Complex128>(marshal(&2.5f64).unwrap()).unwrap(),
        Complex128::new(2.5, 0.0)
    );
    assert_eq!(
        unmarshal::<Complex64>(marshal(&true).unwrap()).unwrap(),
        Complex64::new(1.0, 0.0)
    );
}

#[test]
fn pair_list_decodes_as_complex() {
    let bytes = marshal(&vec![1.5f64, -2.0]).unwrap();
    assert_eq!(
        unmarshal::<Complex128>(bytes).unwrap(),
        Complex128::new(1.5, -2.0)
    );
}

#[test]
fn wrong_arity_list_does_not_convert_to_complex() {
    let bytes = marshal(&vec![1.0f64, 2.0, 3.0]).unwrap();
    let err = unmarshal::<Complex64>(bytes).unwrap_err();
    match err {
        WireError::TypeConversion { from, to } => {
            assert_eq!(from, "3-element list");
            assert_eq!(to, "complex64");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn real_complex_collapses_to_double() {
    assert_eq!(
        &marshal(&Complex64::new(2.0, 0.0)).unwrap()[..],
        &marshal(&2.0f64).unwrap()[..]
    );
    let c = Complex128::new(1.25, -0.75);
    assert_eq!(unmarshal::<Complex128>(marshal(&c).unwrap()).unwrap(), c);
    let c = Complex64::new(0.5, 4.0);
    assert_eq!(unmarshal::<Complex64>(marshal(&c).unwrap()).unwrap(), c);
}

#[test]
fn string_does_not_convert_to_complex() {
    let err = unmarshal::<Complex64>(marshal("1+2i").unwrap()).unwrap_err();
    match err {
        WireError::TypeConversion { from, to } => {
            assert_eq!(from, "string");
            assert_eq!(to, "complex64");
        }
        other => panic!("unexpected error: {other}"),
    }
}
