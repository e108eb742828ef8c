//! Torrent file parsing and error handling logic.
//!
//! This module provides types and error handling for working with .torrent
//! files, including parsing, validation, and info-hash computation.
use thiserror::Error;

pub mod info_hash;
pub mod metainfo;

pub use metainfo::{FileEntry, InfoDict, Torrent};

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    /// Required fields missing or ill-typed.
    #[error("invalid metainfo: {0}")]
    InvalidMetainfo(String),

    /// Both or neither of `length`/`files` present.
    #[error("unsupported metainfo: {0}")]
    UnsupportedMetainfo(String),

    #[error("invalid pieces hash length")]
    InvalidPiecesHashLength,

    #[error("metainfo file exceeds the configured size limit ({0} bytes)")]
    FileTooLarge(u64),
}

/// Result type for torrent operations derived from `std::result`
pub type TorrentResult<T> = std::result::Result<T, TorrentError>;
