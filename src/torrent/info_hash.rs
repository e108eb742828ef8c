//! Info-hash computation.
//!
//! The 20-byte info-hash is the SHA-1 of the bencoded byte sequence that
//! actually appeared in the source file for the `info` value — not a
//! re-encoding of a reconstructed dictionary. Re-marshalling would only be
//! safe if the encoder were a perfect canonical inverse of whatever the
//! decoder produced, and depending on that is fragile. Instead the metainfo
//! loader locates the exact `[start, end)` byte span of `info`'s value
//! during decode (see `bencode::decoder::decode_dict_entries_at`) and this
//! function just hashes that span directly.
use sha1::{Digest, Sha1};

/// Hashes a raw byte span (expected to be the verbatim bencoded `info`
/// dictionary as it appeared in the metainfo file).
pub fn hash_span(info_bytes: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(info_bytes);
    let digest = hasher.finalize();
    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&digest);
    info_hash
}
