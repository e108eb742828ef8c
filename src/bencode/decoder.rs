//! Bencode decoding.
//!
//! Unlike a stream-of-bytes decoder, this one operates directly on a byte
//! slice and threads an explicit offset through every call. That makes it
//! possible to recover the exact byte span `[start, end)` a nested value
//! occupied in the source — the metainfo loader needs that span for the
//! `info` dictionary to compute a stable info-hash (see
//! `crate::torrent::info_hash`) without depending on the encoder being a
//! perfect round-trip of whatever the decoder produced.
use super::BencodeError;
use super::BencodeResult;
use super::BencodeValue;
use std::collections::BTreeMap;
use tracing::instrument;

/// Decodes a single bencode value starting at `pos`, returning the value and
/// the offset immediately after it.
#[instrument(skip(bytes), level = "trace")]
pub fn decode_at(bytes: &[u8], pos: usize) -> BencodeResult<(BencodeValue, usize)> {
    let first = *bytes.get(pos).ok_or(BencodeError::UnexpectedEOI)?;
    match first {
        b'0'..=b'9' => {
            let (s, next) = decode_string_at(bytes, pos)?;
            Ok((BencodeValue::String(s), next))
        }
        b'i' => {
            let (i, next) = decode_integer_at(bytes, pos)?;
            Ok((BencodeValue::Integer(i), next))
        }
        b'l' => {
            let (list, next) = decode_list_at(bytes, pos)?;
            Ok((BencodeValue::List(list), next))
        }
        b'd' => {
            let (entries, next) = decode_dict_entries_at(bytes, pos)?;
            let mut dict = BTreeMap::new();
            for (key, _, _, value) in entries {
                if dict.insert(key, value).is_some() {
                    return Err(BencodeError::DuplicateKey);
                }
            }
            Ok((BencodeValue::Dict(dict), next))
        }
        other => Err(BencodeError::InvalidFormat(format!(
            "unexpected byte {:?} at offset {pos}",
            other as char
        ))),
    }
}

/// Decodes exactly one bencode value from the start of `bytes`. Trailing
/// bytes (if any) are ignored by the caller's choosing — tracker responses
/// are a single top-level value and nothing follows it in practice.
pub fn decode(bytes: &[u8]) -> BencodeResult<BencodeValue> {
    decode_at(bytes, 0).map(|(value, _)| value)
}

/// Decodes a bencode byte-string (`<len>:<bytes>`) at `pos`.
#[instrument(skip(bytes), level = "trace")]
pub fn decode_string_at(bytes: &[u8], pos: usize) -> BencodeResult<(Vec<u8>, usize)> {
    let colon = find_byte(bytes, pos, b':')?;
    let len_str = std::str::from_utf8(&bytes[pos..colon])
        .map_err(|_| BencodeError::InvalidStringLength)?;
    if len_str.is_empty() || (len_str.len() > 1 && len_str.starts_with('0')) {
        return Err(BencodeError::InvalidStringLength);
    }
    let len: usize = len_str
        .parse()
        .map_err(|_| BencodeError::InvalidStringLength)?;
    let start = colon + 1;
    let end = start
        .checked_add(len)
        .ok_or(BencodeError::InvalidStringLength)?;
    if end > bytes.len() {
        return Err(BencodeError::UnexpectedEOI);
    }
    Ok((bytes[start..end].to_vec(), end))
}

/// Decodes a bencode integer (`i<digits>e`) at `pos`.
///
/// Rejects an empty body, a leading zero other than the literal `0`, and
/// `-0`, matching the canonical bencode grammar.
#[instrument(skip(bytes), level = "trace")]
pub fn decode_integer_at(bytes: &[u8], pos: usize) -> BencodeResult<(i64, usize)> {
    if bytes.get(pos) != Some(&b'i') {
        return Err(BencodeError::InvalidFormat(
            "integer must start with 'i'".to_string(),
        ));
    }
    let end = find_byte(bytes, pos + 1, b'e')?;
    let digits = std::str::from_utf8(&bytes[pos + 1..end])
        .map_err(|_| BencodeError::InvalidInteger)?;

    if digits.is_empty() || digits == "-" {
        return Err(BencodeError::InvalidInteger);
    }
    if digits == "-0" {
        return Err(BencodeError::InvalidInteger);
    }
    let unsigned = digits.strip_prefix('-').unwrap_or(digits);
    if unsigned.len() > 1 && unsigned.starts_with('0') {
        return Err(BencodeError::InvalidInteger);
    }

    let value: i64 = digits.parse().map_err(|_| BencodeError::InvalidInteger)?;
    Ok((value, end + 1))
}

/// Decodes a bencode list (`l<items>e`) at `pos`.
#[instrument(skip(bytes), level = "trace")]
fn decode_list_at(bytes: &[u8], pos: usize) -> BencodeResult<(Vec<BencodeValue>, usize)> {
    if bytes.get(pos) != Some(&b'l') {
        return Err(BencodeError::InvalidFormat(
            "list must start with 'l'".to_string(),
        ));
    }
    let mut list = Vec::new();
    let mut cursor = pos + 1;
    loop {
        match bytes.get(cursor) {
            None => return Err(BencodeError::UnexpectedEOI),
            Some(b'e') => return Ok((list, cursor + 1)),
            Some(_) => {
                let (item, next) = decode_at(bytes, cursor)?;
                list.push(item);
                cursor = next;
            }
        }
    }
}

/// Decodes a bencode dictionary (`d<key><value>...e`) at `pos`, returning
/// each entry as `(key, value_start, value_end, value)` in source order so
/// callers can recover the exact byte span of any nested value.
///
/// Out-of-order or duplicate keys are rejected at the `decode_at` layer
/// (which builds the canonical `BTreeMap`); this layer only enforces that
/// keys decode as byte-strings.
#[instrument(skip(bytes), level = "trace")]
pub fn decode_dict_entries_at(
    bytes: &[u8],
    pos: usize,
) -> BencodeResult<(Vec<(Vec<u8>, usize, usize, BencodeValue)>, usize)> {
    if bytes.get(pos) != Some(&b'd') {
        return Err(BencodeError::InvalidFormat(
            "dictionary must start with 'd'".to_string(),
        ));
    }
    let mut entries = Vec::new();
    let mut cursor = pos + 1;
    let mut last_key: Option<Vec<u8>> = None;
    loop {
        match bytes.get(cursor) {
            None => return Err(BencodeError::UnexpectedEOI),
            Some(b'e') => return Ok((entries, cursor + 1)),
            Some(_) => {
                let (key, after_key) = decode_string_at(bytes, cursor)?;
                if let Some(prev) = &last_key {
                    if key <= *prev {
                        return Err(BencodeError::InvalidFormat(
                            "dictionary keys out of order or duplicated".to_string(),
                        ));
                    }
                }
                let value_start = after_key;
                let (value, value_end) = decode_at(bytes, value_start)?;
                last_key = Some(key.clone());
                entries.push((key, value_start, value_end, value));
                cursor = value_end;
            }
        }
    }
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> BencodeResult<usize> {
    bytes[from..]
        .iter()
        .position(|&b| b == needle)
        .map(|i| from + i)
        .ok_or(BencodeError::UnexpectedEOI)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_round_trip() {
        assert_eq!(decode(b"i42e").unwrap(), BencodeValue::Integer(42));
        assert_eq!(decode(b"i-1e").unwrap(), BencodeValue::Integer(-1));
        assert_eq!(decode(b"i0e").unwrap(), BencodeValue::Integer(0));
    }

    #[test]
    fn integer_rejects_leading_zero() {
        assert!(decode(b"i01e").is_err());
        assert!(decode(b"i-0e").is_err());
        assert!(decode(b"ie").is_err());
    }

    #[test]
    fn string_decodes_raw_bytes() {
        let value = decode(b"5:hello").unwrap();
        assert_eq!(value.as_bytes().unwrap(), b"hello");
    }

    #[test]
    fn string_non_utf8_bytes_survive() {
        let mut input = b"4:".to_vec();
        input.extend_from_slice(&[0xff, 0xfe, 0x00, 0x01]);
        let value = decode(&input).unwrap();
        assert_eq!(value.as_bytes().unwrap(), &[0xff, 0xfe, 0x00, 0x01]);
    }

    #[test]
    fn list_of_mixed_values() {
        let value = decode(b"li1ei2ee").unwrap();
        assert_eq!(
            value.as_list().unwrap(),
            &[BencodeValue::Integer(1), BencodeValue::Integer(2)]
        );
    }

    #[test]
    fn dict_canonical_ordering_is_structural() {
        let value = decode(b"d5:aortsli1ei2ee5:peersl2:hi5:helloee").unwrap();
        let dict = value.as_dict().unwrap();
        let keys: Vec<&Vec<u8>> = dict.keys().collect();
        assert_eq!(keys, vec![&b"aorts".to_vec(), &b"peers".to_vec()]);
    }

    #[test]
    fn dict_rejects_out_of_order_keys() {
        // "peers" before "aorts" violates byte-wise ascending order.
        assert!(decode(b"d5:peersle5:aortslee").is_err());
    }

    #[test]
    fn dict_rejects_duplicate_keys() {
        assert!(decode(b"d1:ai1e1:ai2ee").is_err());
    }

    #[test]
    fn unexpected_eof_mid_token() {
        assert!(matches!(decode(b"5:hi"), Err(BencodeError::UnexpectedEOI)));
        assert!(matches!(decode(b"i42"), Err(BencodeError::UnexpectedEOI)));
    }

    #[test]
    fn unknown_leading_byte_is_malformed() {
        assert!(matches!(
            decode(b"x"),
            Err(BencodeError::InvalidFormat(_))
        ));
    }

    #[test]
    fn dict_entries_report_value_spans() {
        let bytes = b"d4:infod6:lengthi3eee";
        let (entries, end) = decode_dict_entries_at(bytes, 0).unwrap();
        assert_eq!(end, bytes.len());
        assert_eq!(entries.len(), 1);
        let (key, start, value_end, _) = &entries[0];
        assert_eq!(key, b"info");
        assert_eq!(&bytes[*start..*value_end], &b"d6:lengthi3ee"[..]);
    }
}
