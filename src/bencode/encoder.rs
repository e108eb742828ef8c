//! Bencode encoding.
//!
//! Because [`BencodeValue::Dict`] is backed by a `BTreeMap`, iterating its
//! keys already yields byte-wise ascending order — encoding a dictionary is
//! just "write each entry in iteration order", with no explicit sort step.
use super::BencodeError;
use super::BencodeResult;
use super::BencodeValue;
use std::io::Write;
use tracing::instrument;

/// Encodes a byte slice as a bencode string: `<len>:<bytes>`.
#[instrument(skip(writer, s), level = "trace")]
fn encode_string<W: Write>(writer: &mut W, s: &[u8]) -> BencodeResult<()> {
    write!(writer, "{}:", s.len())?;
    writer.write_all(s)?;
    Ok(())
}

/// Encodes an integer as `i<digits>e`.
#[instrument(skip(writer), level = "trace")]
fn encode_integer<W: Write>(writer: &mut W, i: i64) -> BencodeResult<()> {
    write!(writer, "i{}e", i)?;
    Ok(())
}

/// Encodes a slice of values as `l<items>e`.
#[instrument(skip(writer, list), level = "trace")]
fn encode_list<W: Write>(writer: &mut W, list: &[BencodeValue]) -> BencodeResult<()> {
    writer.write_all(b"l")?;
    for item in list {
        encode_value(writer, item)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

/// Encodes a dictionary as `d<key><value>...e`, keys in ascending byte order.
#[instrument(skip(writer, dict), level = "trace")]
fn encode_dict<W: Write>(
    writer: &mut W,
    dict: &std::collections::BTreeMap<Vec<u8>, BencodeValue>,
) -> BencodeResult<()> {
    writer.write_all(b"d")?;
    for (key, value) in dict {
        encode_string(writer, key)?;
        encode_value(writer, value)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

#[instrument(skip(writer), level = "trace")]
fn encode_value<W: Write>(writer: &mut W, value: &BencodeValue) -> BencodeResult<()> {
    match value {
        BencodeValue::String(s) => encode_string(writer, s),
        BencodeValue::Integer(i) => encode_integer(writer, *i),
        BencodeValue::List(list) => encode_list(writer, list),
        BencodeValue::Dict(dict) => encode_dict(writer, dict),
    }
}

/// Encodes a [`BencodeValue`] into its canonical bencode representation.
#[instrument(skip(writer), level = "debug")]
pub fn encode<W: Write>(writer: &mut W, value: &BencodeValue) -> BencodeResult<()> {
    encode_value(writer, value)
}

/// Convenience wrapper returning the encoded bytes directly.
pub fn encode_to_vec(value: &BencodeValue) -> BencodeResult<Vec<u8>> {
    let mut buf = Vec::new();
    encode(&mut buf, value)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decoder::decode;
    use std::collections::BTreeMap;

    #[test]
    fn integer_encode() {
        let bytes = encode_to_vec(&BencodeValue::Integer(42)).unwrap();
        assert_eq!(bytes, b"i42e");
    }

    #[test]
    fn dict_canonical_key_order() {
        let mut dict = BTreeMap::new();
        dict.insert(
            b"peers".to_vec(),
            BencodeValue::List(vec![
                BencodeValue::String(b"hi".to_vec()),
                BencodeValue::String(b"hello".to_vec()),
            ]),
        );
        dict.insert(
            b"aorts".to_vec(),
            BencodeValue::List(vec![BencodeValue::Integer(1), BencodeValue::Integer(2)]),
        );
        let bytes = encode_to_vec(&BencodeValue::Dict(dict)).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "d5:aortsli1ei2ee5:peersl2:hi5:helloee"
        );
    }

    #[test]
    fn encode_decode_round_trip_is_deterministic() {
        let value = decode(b"d5:aortsli1ei2ee5:peersl2:hi5:helloee").unwrap();
        let once = encode_to_vec(&value).unwrap();
        let twice = encode_to_vec(&decode(&once).unwrap()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, b"d5:aortsli1ei2ee5:peersl2:hi5:helloee");
    }
}
