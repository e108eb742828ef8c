use std::collections::BTreeMap;
use thiserror::Error;
pub mod decoder;
pub mod encoder;

/**
 * Represents a Bencode value, which is the core data structure for the Bencode encoding format.
 * Bencode is commonly used in BitTorrent protocol for encoding metadata.
 *
 * The enum contains four variants that represent all possible Bencode data types:
 *
 * 1. String(Vec<u8>):
 *    - Represents a byte string in Bencode
 *    - Stored as raw bytes (Vec<u8>) rather than UTF-8 strings
 *    - Example: "4:spam" in Bencode becomes String(b"spam")
 *
 * 2. Integer(i64):
 *    - Represents a 64-bit signed integer
 *    - Bencode integers are prefixed with 'i' and suffixed with 'e'
 *    - Example: "i42e" in Bencode becomes Integer(42)
 *
 * 3. List(Vec<BencodeValue>):
 *    - Represents an ordered sequence of Bencode values
 *    - Lists are prefixed with 'l' and suffixed with 'e'
 *    - Example: "l4:spami42ee" becomes List([String(b"spam"), Integer(42)])
 *
 * 4. Dict(BTreeMap<Vec<u8>, BencodeValue>):
 *    - Represents a key-value mapping where keys are byte strings
 *    - Dictionaries are prefixed with 'd' and suffixed with 'e'
 *    - Keys must be strings and are stored as Vec<u8>
 *    - Backed by a BTreeMap (not a HashMap) so that iteration order is
 *      byte-wise ascending key order: the canonical encode order the
 *      BitTorrent info-hash depends on falls out of iteration rather than a
 *      sort-on-encode step.
 *    - Example: "d3:foo3:bare" becomes Dict({b"foo" => String(b"bar")})
 */
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum BencodeValue {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(BTreeMap<Vec<u8>, BencodeValue>),
}

impl BencodeValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, BencodeValue>> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }
}

/// Custom error type for Bencode operations.
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed bencode: {0}")]
    InvalidFormat(String),

    #[error("invalid integer format")]
    InvalidInteger,

    #[error("invalid string length")]
    InvalidStringLength,

    #[error("unexpected end of input")]
    UnexpectedEOI,

    #[error("cannot encode type: {0}")]
    CannotEncodeType(&'static str),

    #[error("dictionary keys must be strings")]
    DictKeyNotString,

    #[error("duplicate dictionary key")]
    DuplicateKey,
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;
