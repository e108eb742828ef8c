//! Projects a decoded metainfo dictionary into a typed [`Torrent`].
//!
//! Unknown keys at the top level and inside `info` are tolerated — only the
//! fields this client actually uses are extracted.
use super::info_hash;
use super::{TorrentError, TorrentResult};
use crate::bencode::decoder::decode_dict_entries_at;
use crate::bencode::BencodeValue;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::instrument;

/// Default cap on how large a metainfo file we'll read into memory.
pub const DEFAULT_MAX_METAINFO_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub length: i64,
    pub path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoDict {
    pub name: String,
    pub piece_length: i64,
    pub pieces: Vec<[u8; 20]>,
    pub private: bool,
    /// Single-file mode.
    pub length: Option<i64>,
    /// Multi-file mode. Empty when `length` is `Some`.
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Torrent {
    pub announce: String,
    pub announce_list: Vec<Vec<String>>,
    pub info_hash: [u8; 20],
    pub info: InfoDict,
    pub creation_date: Option<Duration>,
    pub comment: String,
    pub created_by: String,
    pub encoding: String,
}

impl Torrent {
    /// Reads and parses a metainfo file from disk, bounded by `max_bytes`.
    #[instrument(level = "debug")]
    pub fn load_from_path<P: AsRef<Path> + std::fmt::Debug>(
        path: P,
        max_bytes: u64,
    ) -> TorrentResult<Torrent> {
        let metadata = std::fs::metadata(path.as_ref())?;
        if metadata.len() > max_bytes {
            return Err(TorrentError::FileTooLarge(max_bytes));
        }
        let data = std::fs::read(path.as_ref())?;
        Self::parse(&data)
    }

    /// Parses a metainfo dictionary from raw bencoded bytes.
    #[instrument(skip(bytes), level = "debug")]
    pub fn parse(bytes: &[u8]) -> TorrentResult<Torrent> {
        let (entries, _) = decode_dict_entries_at(bytes, 0)?;

        let mut fields: BTreeMap<Vec<u8>, BencodeValue> = BTreeMap::new();
        let mut info_span: Option<(usize, usize)> = None;
        for (key, start, end, value) in entries {
            if key == b"info" {
                info_span = Some((start, end));
            }
            fields.insert(key, value);
        }

        let announce = required_string(&fields, "announce")?;

        let info_value = fields
            .get(b"info".as_slice())
            .ok_or_else(|| TorrentError::InvalidMetainfo("missing field: info".to_string()))?;
        let (span_start, span_end) = info_span
            .ok_or_else(|| TorrentError::InvalidMetainfo("missing field: info".to_string()))?;
        let info_hash = info_hash::hash_span(&bytes[span_start..span_end]);

        let info = parse_info_dict(info_value)?;

        let announce_list = match fields.get(b"announce-list".as_slice()) {
            Some(value) => parse_announce_list(value)?,
            None => Vec::new(),
        };

        let creation_date = match fields.get(b"creation date".as_slice()) {
            Some(BencodeValue::Integer(secs)) if *secs >= 0 => {
                Some(Duration::from_secs(*secs as u64))
            }
            Some(_) => {
                return Err(TorrentError::InvalidMetainfo(
                    "creation date is not a non-negative integer".to_string(),
                ))
            }
            None => None,
        };

        let comment = optional_string(&fields, "comment");
        let created_by = optional_string(&fields, "created by");
        let encoding = optional_string(&fields, "encoding");

        Ok(Torrent {
            announce,
            announce_list,
            info_hash,
            info,
            creation_date,
            comment,
            created_by,
            encoding,
        })
    }

    /// Total payload length across every file (or the single file).
    pub fn total_length(&self) -> i64 {
        match self.info.length {
            Some(len) => len,
            None => self.info.files.iter().map(|f| f.length).sum(),
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.info.pieces.len()
    }

    pub fn is_multi_file(&self) -> bool {
        self.info.length.is_none()
    }

    /// Length of piece `index`: `piece_length` for every piece except
    /// possibly the last, which may be shorter.
    pub fn piece_size(&self, index: usize) -> i64 {
        if index >= self.num_pieces() {
            return 0;
        }
        if index < self.num_pieces() - 1 {
            self.info.piece_length
        } else {
            let preceding = (self.num_pieces() - 1) as i64 * self.info.piece_length;
            self.total_length() - preceding
        }
    }

    /// Human-readable creation date, if present.
    pub fn creation_date_system_time(&self) -> Option<SystemTime> {
        self.creation_date.map(|d| UNIX_EPOCH + d)
    }
}

fn parse_info_dict(value: &BencodeValue) -> TorrentResult<InfoDict> {
    let dict = value
        .as_dict()
        .ok_or_else(|| TorrentError::InvalidMetainfo("info is not a dictionary".to_string()))?;

    let name = required_string(dict, "name")?;

    let piece_length = dict
        .get(b"piece length".as_slice())
        .and_then(BencodeValue::as_integer)
        .ok_or_else(|| TorrentError::InvalidMetainfo("missing field: piece length".to_string()))?;
    if piece_length <= 0 {
        return Err(TorrentError::InvalidMetainfo(
            "piece length must be positive".to_string(),
        ));
    }

    let pieces_bytes = dict
        .get(b"pieces".as_slice())
        .and_then(BencodeValue::as_bytes)
        .ok_or_else(|| TorrentError::InvalidMetainfo("missing field: pieces".to_string()))?;
    let pieces = parse_pieces(pieces_bytes)?;

    let private = matches!(
        dict.get(b"private".as_slice()).and_then(BencodeValue::as_integer),
        Some(1)
    );

    let length = dict.get(b"length".as_slice()).and_then(BencodeValue::as_integer);
    let files_value = dict.get(b"files".as_slice());

    let (length, files) = match (length, files_value) {
        (Some(length), None) => (Some(length), Vec::new()),
        (None, Some(list_value)) => (None, parse_files(list_value)?),
        (Some(_), Some(_)) => {
            return Err(TorrentError::UnsupportedMetainfo(
                "both length and files present".to_string(),
            ))
        }
        (None, None) => {
            return Err(TorrentError::UnsupportedMetainfo(
                "neither length nor files present".to_string(),
            ))
        }
    };

    let total_pieces = pieces.len();
    let declared_total = match length {
        Some(l) => l,
        None => files.iter().map(|f| f.length).sum(),
    };
    let expected_pieces = declared_total
        .checked_add(piece_length - 1)
        .map(|v| (v / piece_length) as usize)
        .unwrap_or(0);
    if expected_pieces != total_pieces {
        return Err(TorrentError::InvalidMetainfo(format!(
            "piece count mismatch: pieces array has {total_pieces}, \
             ceil(total_length/piece_length) is {expected_pieces}"
        )));
    }

    Ok(InfoDict {
        name,
        piece_length,
        pieces,
        private,
        length,
        files,
    })
}

fn parse_pieces(bytes: &[u8]) -> TorrentResult<Vec<[u8; 20]>> {
    if bytes.len() % 20 != 0 {
        return Err(TorrentError::InvalidPiecesHashLength);
    }
    Ok(bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

fn parse_files(value: &BencodeValue) -> TorrentResult<Vec<FileEntry>> {
    let list = value
        .as_list()
        .ok_or_else(|| TorrentError::InvalidMetainfo("files is not a list".to_string()))?;
    list.iter()
        .map(|entry| {
            let dict = entry.as_dict().ok_or_else(|| {
                TorrentError::InvalidMetainfo("file entry is not a dictionary".to_string())
            })?;
            let length = dict
                .get(b"length".as_slice())
                .and_then(BencodeValue::as_integer)
                .ok_or_else(|| {
                    TorrentError::InvalidMetainfo("file entry missing length".to_string())
                })?;
            let path_list = dict
                .get(b"path".as_slice())
                .and_then(BencodeValue::as_list)
                .ok_or_else(|| {
                    TorrentError::InvalidMetainfo("file entry missing path".to_string())
                })?;
            let path = path_list
                .iter()
                .map(|component| {
                    component
                        .as_bytes()
                        .and_then(|b| std::str::from_utf8(b).ok())
                        .map(str::to_owned)
                        .ok_or_else(|| {
                            TorrentError::InvalidMetainfo(
                                "file path component is not a UTF-8 string".to_string(),
                            )
                        })
                })
                .collect::<TorrentResult<Vec<_>>>()?;
            Ok(FileEntry { length, path })
        })
        .collect()
}

fn parse_announce_list(value: &BencodeValue) -> TorrentResult<Vec<Vec<String>>> {
    let tiers = value
        .as_list()
        .ok_or_else(|| TorrentError::InvalidMetainfo("announce-list is not a list".to_string()))?;
    tiers
        .iter()
        .map(|tier| {
            let trackers = tier.as_list().ok_or_else(|| {
                TorrentError::InvalidMetainfo("announce-list tier is not a list".to_string())
            })?;
            trackers
                .iter()
                .map(|tracker| {
                    tracker
                        .as_bytes()
                        .and_then(|b| std::str::from_utf8(b).ok())
                        .map(str::to_owned)
                        .ok_or_else(|| {
                            TorrentError::InvalidMetainfo(
                                "announce-list entry is not a UTF-8 string".to_string(),
                            )
                        })
                })
                .collect::<TorrentResult<Vec<_>>>()
        })
        .collect()
}

fn required_string(dict: &BTreeMap<Vec<u8>, BencodeValue>, key: &str) -> TorrentResult<String> {
    dict.get(key.as_bytes())
        .and_then(BencodeValue::as_bytes)
        .ok_or_else(|| TorrentError::InvalidMetainfo(format!("missing field: {key}")))
        .and_then(|bytes| {
            String::from_utf8(bytes.to_vec())
                .map_err(|e| TorrentError::InvalidMetainfo(format!("{key} is not UTF-8: {e}")))
        })
}

fn optional_string(dict: &BTreeMap<Vec<u8>, BencodeValue>, key: &str) -> String {
    dict.get(key.as_bytes())
        .and_then(BencodeValue::as_bytes)
        .and_then(|b| String::from_utf8(b.to_vec()).ok())
        .unwrap_or_default()
}
