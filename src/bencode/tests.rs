use super::*;
use bytes::Bytes;
use std::collections::BTreeMap;

#[test]
fn decode_integer() {
    assert_eq!(decode(b"i42e").unwrap(), Value::Int(42));
    assert_eq!(decode(b"i-7e").unwrap(), Value::Int(-7));
    assert_eq!(decode(b"i0e").unwrap(), Value::Int(0));
}

#[test]
fn decode_integer_rejects_non_canonical() {
    assert_eq!(decode(b"i007e"), Err(BencodeError::BadInteger));
    assert_eq!(decode(b"i-0e"), Err(BencodeError::BadInteger));
    assert_eq!(decode(b"ie"), Err(BencodeError::BadInteger));
    assert_eq!(decode(b"i42"), Err(BencodeError::Truncated));
}

#[test]
fn decode_string() {
    assert_eq!(decode(b"4:ping").unwrap(), Value::str("ping"));
    assert_eq!(decode(b"0:").unwrap(), Value::str(""));
    assert_eq!(decode(b"5:ab"), Err(BencodeError::Truncated));
}

#[test]
fn decode_list() {
    let value = decode(b"l4:pingi2ee").unwrap();
    let items = value.as_list().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_str(), Some("ping"));
    assert_eq!(items[1].as_int(), Some(2));
}

#[test]
fn decode_dict() {
    let value = decode(b"d1:ad2:id2:xxe1:q4:ping1:y1:qe").unwrap();
    assert_eq!(value.get(b"q").and_then(Value::as_str), Some("ping"));
    assert_eq!(
        value.get(b"a").and_then(|a| a.get(b"id")).and_then(Value::as_str),
        Some("xx")
    );
}

#[test]
fn decode_rejects_trailing_bytes() {
    assert_eq!(decode(b"i42etail"), Err(BencodeError::TrailingData));
}

#[test]
fn decode_rejects_integer_dict_key() {
    assert_eq!(decode(b"di1e4:pinge"), Err(BencodeError::BadKey));
}

#[test]
fn decode_rejects_deep_nesting() {
    let mut input = Vec::new();
    input.extend(std::iter::repeat(b'l').take(64));
    input.extend(std::iter::repeat(b'e').take(64));
    assert_eq!(decode(&input), Err(BencodeError::TooDeep));
}

#[test]
fn encode_sorts_dict_keys() {
    let mut entries = BTreeMap::new();
    entries.insert(Bytes::from_static(b"zz"), Value::Int(1));
    entries.insert(Bytes::from_static(b"aa"), Value::Int(2));
    let encoded = encode(&Value::Dict(entries));
    assert_eq!(&encoded[..], b"d2:aai2e2:zzi1ee");
}

#[test]
fn round_trip_nested() {
    let raw = b"d1:rd2:id20:aaaaaaaaaaaaaaaaaaaa5:token8:secret!!e1:t2:\x00\x011:y1:re";
    let value = decode(raw).unwrap();
    assert_eq!(&encode(&value)[..], &raw[..]);
}

#[test]
fn binary_strings_survive() {
    let value = decode(b"3:\xff\x00\x80").unwrap();
    assert_eq!(
        value.as_bytes().map(|b| b.as_ref()),
        Some(&[0xff, 0x00, 0x80][..])
    );
    assert_eq!(value.as_str(), None);
}
