//! Tracker client logic for the BitTorrent protocol.
//!
//! This module implements communication with BitTorrent trackers:
//! - building and sending an announce request
//! - decoding the bencoded response
//! - parsing the compact peer list
//!
//! Used by the download engine to discover peers for a torrent.
use crate::bencode::decoder::decode;
use crate::bencode::BencodeValue;
use crate::torrent::Torrent;
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker unreachable: {0}")]
    TrackerUnreachable(#[from] reqwest::Error),

    #[error("malformed tracker response: {0}")]
    MalformedTrackerResponse(String),

    #[error("tracker rejected announce: {0}")]
    TrackerRejected(String),

    #[error("invalid announce URL: {0}")]
    UrlParse(#[from] url::ParseError),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// The lifecycle event accompanying an announce request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Started,
    Stopped,
    Completed,
    Empty,
}

impl Event {
    fn as_query_value(self) -> Option<&'static str> {
        match self {
            Event::Started => Some("started"),
            Event::Stopped => Some("stopped"),
            Event::Completed => Some("completed"),
            Event::Empty => None,
        }
    }
}

/// A client communicating with a single BitTorrent tracker over HTTP.
#[derive(Debug)]
pub struct Client {
    http: reqwest::Client,
    peer_id: [u8; 20],
    port: u16,
}

/// The result of a successful announce: the suggested re-announce interval
/// and the list of peer addresses the tracker returned.
#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    pub interval: i64,
    pub peers: Vec<SocketAddr>,
}

impl Client {
    pub fn new(peer_id: [u8; 20], port: u16) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(ANNOUNCE_TIMEOUT)
                .build()
                .expect("reqwest client builder with only a timeout never fails"),
            peer_id,
            port,
        }
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Sends an announce request to the torrent's tracker and returns the
    /// peers it offers.
    #[instrument(skip(self, torrent), level = "debug")]
    pub async fn announce(
        &self,
        torrent: &Torrent,
        downloaded: i64,
        left: i64,
        event: Event,
    ) -> TrackerResult<AnnounceResponse> {
        let mut url = url::Url::parse(&torrent.announce)?;
        // `info_hash`/`peer_id` are raw 20-byte fields, not text — build the
        // query string ourselves rather than going through `query_pairs_mut`
        // (designed for text key/value pairs), which would double-encode
        // the percent-escapes we already produced.
        let query =
            build_raw_query(&torrent.info_hash, &self.peer_id, self.port, downloaded, left, event);
        url.set_query(Some(query.as_str()));

        tracing::debug!(%url, "sending announce request");
        let response = self.http.get(url).send().await?;
        let body = response.bytes().await?;
        Self::parse_announce_response(&body)
    }

    /// Parses a bencoded tracker response body.
    fn parse_announce_response(body: &[u8]) -> TrackerResult<AnnounceResponse> {
        let value = decode(body)
            .map_err(|e| TrackerError::MalformedTrackerResponse(e.to_string()))?;
        let dict = value.as_dict().ok_or_else(|| {
            TrackerError::MalformedTrackerResponse("response is not a dictionary".to_string())
        })?;

        if let Some(reason) = dict.get(b"failure reason".as_slice()).and_then(BencodeValue::as_bytes) {
            return Err(TrackerError::TrackerRejected(
                String::from_utf8_lossy(reason).into_owned(),
            ));
        }

        let interval = dict
            .get(b"interval".as_slice())
            .and_then(BencodeValue::as_integer)
            .ok_or_else(|| {
                TrackerError::MalformedTrackerResponse("missing field: interval".to_string())
            })?;

        let peers_bytes = dict
            .get(b"peers".as_slice())
            .and_then(BencodeValue::as_bytes)
            .ok_or_else(|| {
                TrackerError::MalformedTrackerResponse(
                    "missing field: peers (non-compact peer lists are not supported)".to_string(),
                )
            })?;

        if peers_bytes.len() % 6 != 0 {
            return Err(TrackerError::MalformedTrackerResponse(
                "peers field length is not a multiple of 6".to_string(),
            ));
        }

        let peers = peers_bytes
            .chunks_exact(6)
            .map(|chunk| {
                let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                SocketAddr::new(IpAddr::V4(ip), port)
            })
            .collect();

        Ok(AnnounceResponse { interval, peers })
    }
}

/// Builds the query string by hand: `info_hash` and `peer_id` are raw
/// 20-byte fields that must be percent-encoded exactly once, which
/// `url::Url::query_pairs_mut` (designed for text key/value pairs) doesn't
/// guarantee for arbitrary byte strings.
fn build_raw_query(
    info_hash: &[u8; 20],
    peer_id: &[u8; 20],
    port: u16,
    downloaded: i64,
    left: i64,
    event: Event,
) -> String {
    let mut query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded={}&left={}&compact=1",
        url_encode(info_hash),
        url_encode(peer_id),
        port,
        downloaded,
        left,
    );
    if let Some(event) = event.as_query_value() {
        query.push_str("&event=");
        query.push_str(event);
    }
    query
}

/// Generates a 20-byte peer-id: an 8-byte client identifier prefix
/// (`-RT0001-`, "RT" for "Rust torrent") followed by 12 random bytes.
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    let prefix = b"-RT0001-";
    peer_id[..prefix.len()].copy_from_slice(prefix);
    rand::rng().fill(&mut peer_id[prefix.len()..]);
    peer_id
}

/// URL-encodes a byte slice per RFC 3986: unreserved characters pass
/// through, everything else becomes `%XX`.
fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_peer_id_has_client_prefix() {
        let id = generate_peer_id();
        assert_eq!(&id[..8], b"-RT0001-");
    }

    #[test]
    fn url_encode_escapes_reserved_bytes() {
        assert_eq!(url_encode(b"Hello World!"), "Hello%20World%21");
        assert_eq!(url_encode(b"abc-._~"), "abc-._~");
    }

    #[test]
    fn parses_compact_peer_list() {
        let mut body = std::collections::BTreeMap::new();
        body.insert(b"interval".to_vec(), BencodeValue::Integer(1800));
        body.insert(
            b"peers".to_vec(),
            BencodeValue::String(vec![0xC0, 0xA8, 0x01, 0x02, 0x1A, 0xE1]),
        );
        let encoded =
            crate::bencode::encoder::encode_to_vec(&BencodeValue::Dict(body)).unwrap();

        let response = Client::parse_announce_response(&encoded).unwrap();
        assert_eq!(response.interval, 1800);
        assert_eq!(response.peers.len(), 1);
        assert_eq!(
            response.peers[0],
            "192.168.1.2:6881".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn surfaces_tracker_failure_reason() {
        let mut body = std::collections::BTreeMap::new();
        body.insert(
            b"failure reason".to_vec(),
            BencodeValue::String(b"unregistered torrent".to_vec()),
        );
        let encoded =
            crate::bencode::encoder::encode_to_vec(&BencodeValue::Dict(body)).unwrap();

        let err = Client::parse_announce_response(&encoded).unwrap_err();
        assert!(matches!(err, TrackerError::TrackerRejected(_)));
    }

    #[test]
    fn rejects_peers_field_not_a_multiple_of_six() {
        let mut body = std::collections::BTreeMap::new();
        body.insert(b"interval".to_vec(), BencodeValue::Integer(60));
        body.insert(b"peers".to_vec(), BencodeValue::String(vec![1, 2, 3]));
        let encoded =
            crate::bencode::encoder::encode_to_vec(&BencodeValue::Dict(body)).unwrap();

        assert!(Client::parse_announce_response(&encoded).is_err());
    }
}
