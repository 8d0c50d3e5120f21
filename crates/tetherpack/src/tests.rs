use crate::*;

fn roundtrip(value: WireValue) -> WireValue {
    let bytes = value.to_bytes().expect("encode");
    WireValue::from_bytes(&bytes).expect("decode")
}

#[test]
fn test_scalars_survive() {
    assert_eq!(roundtrip(WireValue::Undefined), WireValue::Undefined);
    assert_eq!(roundtrip(WireValue::Null), WireValue::Null);
    assert_eq!(roundtrip(WireValue::Bool(false)), WireValue::Bool(false));
    assert_eq!(roundtrip(WireValue::from("héllo")), WireValue::from("héllo"));
    assert_eq!(roundtrip(WireValue::Number(-0.5)), WireValue::Number(-0.5));
}

#[test]
fn test_nan_keeps_its_bits() {
    let WireValue::Number(n) = roundtrip(WireValue::Number(f64::NAN)) else {
        panic!("expected a number");
    };
    assert!(n.is_nan());
}

#[test]
fn test_nested_containers_keep_order() {
    let handle = Handle::new();
    let value = WireValue::Map(vec![
        ("z".into(), WireValue::from(1)),
        ("a".into(), WireValue::List(vec![WireValue::Handle(handle), WireValue::Null])),
        ("m".into(), WireValue::Pairs(vec![WireValue::from(2)], vec![WireValue::Callable(handle)])),
    ]);
    let decoded = roundtrip(value.clone());
    assert_eq!(decoded, value);

    let WireValue::Map(entries) = decoded else { panic!("expected map") };
    let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, ["z", "a", "m"]);
}

#[test]
fn test_handle_text_form() {
    let handle = Handle::new();
    assert_eq!(Handle::parse(&handle.to_string()), Some(handle));
    assert_eq!(Handle::parse("not-a-handle"), None);
}

#[test]
fn test_map_rejects_bare_items() {
    let mut enc = Encoder::new();
    enc.map_begin().unwrap();
    assert_eq!(enc.bool(true), Err(Error::InvalidMapEntry));
}

#[test]
fn test_entry_requires_exactly_one_value() {
    let mut enc = Encoder::new();
    enc.map_begin().unwrap();
    enc.entry_begin("k").unwrap();
    assert_eq!(enc.entry_end(), Err(Error::MissingItems(Scope::Entry)));

    enc.null().unwrap();
    assert_eq!(enc.null(), Err(Error::TooManyItems(Scope::Entry)));
}

#[test]
fn test_pairs_only_accept_two_lists() {
    let mut enc = Encoder::new();
    enc.pairs_begin().unwrap();
    assert_eq!(enc.str("k"), Err(Error::InvalidPairsPart));
    enc.list_begin().unwrap();
    enc.list_end().unwrap();
    assert_eq!(enc.pairs_end(), Err(Error::MissingItems(Scope::Pairs)));
}

#[test]
fn test_mismatched_pairs_are_rejected() {
    let value = WireValue::Pairs(vec![WireValue::Null], vec![]);
    assert_eq!(value.to_bytes(), Err(Error::PairsLengthMismatch { keys: 1, values: 0 }));
}

#[test]
fn test_open_scope_cannot_finalize() {
    let mut enc = Encoder::new();
    enc.list_begin().unwrap();
    assert_eq!(enc.into_bytes(), Err(Error::ScopeStillOpen));
}

#[test]
fn test_truncated_input() {
    let bytes = WireValue::from("truncate me").to_bytes().unwrap();
    assert_eq!(WireValue::from_bytes(&bytes[..bytes.len() - 3]), Err(Error::UnexpectedEnd));
}

#[test]
fn test_unknown_map_fields_are_skippable() {
    let mut enc = Encoder::new();
    enc.map_begin().unwrap();
    enc.entry_begin("future").unwrap();
    WireValue::List(vec![WireValue::from(1), WireValue::from("x")]).encode(&mut enc).unwrap();
    enc.entry_end().unwrap();
    enc.entry_begin("known").unwrap();
    enc.u64(7).unwrap();
    enc.entry_end().unwrap();
    enc.map_end().unwrap();
    let bytes = enc.into_bytes().unwrap();

    let mut dec = Decoder::new(&bytes);
    let mut map = dec.map().unwrap();
    let mut known = None;
    while let Some((key, mut value)) = map.next().unwrap() {
        match key {
            "known" => known = Some(value.u64().unwrap()),
            _ => value.skip().unwrap(),
        }
    }
    assert_eq!(known, Some(7));
}

#[test]
fn test_depth_limit() {
    let mut value = WireValue::Null;
    for _ in 0..(MAX_DEPTH + 2) {
        value = WireValue::List(vec![value]);
    }
    let bytes = value.to_bytes().unwrap();
    assert_eq!(WireValue::from_bytes(&bytes), Err(Error::DepthExceeded));
}

#[test]
fn test_closing_the_wrong_container() {
    let mut enc = Encoder::new();
    assert_eq!(enc.list_end(), Err(Error::ScopeUnderflow));
    enc.list_begin().unwrap();
    assert_eq!(
        enc.map_end(),
        Err(Error::ScopeMismatch { expected: Scope::Map, actual: Scope::List })
    );
}

#[test]
fn test_unknown_tag_byte() {
    assert_eq!(WireValue::from_bytes(&[0x7f]), Err(Error::InvalidTag(0x7f)));
    assert_eq!(Tag::try_from(0x40), Ok(Tag::Handle));
}
