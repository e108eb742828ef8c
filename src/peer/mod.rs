//! Peer wire protocol: handshake, message framing, bitfield bookkeeping,
//! and the per-peer session task that drives a single connection.
pub mod bitfield;
pub mod handshake;
pub mod message;
pub mod session;

use thiserror::Error;

pub use bitfield::Bitfield;
pub use handshake::Handshake;
pub use message::{Message, BLOCK_SIZE};

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("I/O error: {0}")]
    PeerIoError(#[from] std::io::Error),

    #[error("protocol violation: {0}")]
    PeerProtocolViolation(String),

    #[error("peer timed out")]
    PeerTimeout,

    #[error("piece {index} failed its hash check")]
    PieceHashMismatch { index: u32 },
}

impl From<message::MessageError> for PeerError {
    fn from(err: message::MessageError) -> Self {
        match err {
            message::MessageError::Io(e) => PeerError::PeerIoError(e),
            message::MessageError::ProtocolViolation(msg) => PeerError::PeerProtocolViolation(msg),
        }
    }
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
