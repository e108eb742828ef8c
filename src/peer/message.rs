//! BitTorrent peer wire messages: framing is `length:u32-be` followed by
//! `length` bytes of `id` + payload. A frame with `length == 0` is a
//! keep-alive and carries no `id`.
use std::io;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const BLOCK_SIZE: u32 = 1 << 14; // 16 KiB

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

impl Message {
    fn id(&self) -> Option<u8> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(0),
            Message::Unchoke => Some(1),
            Message::Interested => Some(2),
            Message::NotInterested => Some(3),
            Message::Have(_) => Some(4),
            Message::Bitfield(_) => Some(5),
            Message::Request { .. } => Some(6),
            Message::Piece { .. } => Some(7),
            Message::Cancel { .. } => Some(8),
        }
    }

    /// Serializes this message into its on-the-wire frame.
    pub fn encode(&self) -> Vec<u8> {
        let Some(id) = self.id() else {
            return vec![0, 0, 0, 0];
        };
        let mut payload = Vec::new();
        payload.push(id);
        match self {
            Message::Have(index) => payload.extend_from_slice(&index.to_be_bytes()),
            Message::Bitfield(bits) => payload.extend_from_slice(bits),
            Message::Request { index, begin, length } => {
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(&length.to_be_bytes());
            }
            Message::Piece { index, begin, block } => {
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(block);
            }
            Message::Cancel { index, begin, length } => {
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(&length.to_be_bytes());
            }
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => {}
            Message::KeepAlive => unreachable!("handled above"),
        }
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        frame
    }

    /// Writes this message's frame to `writer`.
    pub async fn write_to<W: AsyncWriteExt + Unpin>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.encode()).await
    }

    /// Reads one framed message from `reader`.
    pub async fn read_from<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Message, MessageError> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf);
        if len == 0 {
            return Ok(Message::KeepAlive);
        }
        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await?;
        Self::decode_payload(&payload)
    }

    fn decode_payload(payload: &[u8]) -> Result<Message, MessageError> {
        let id = *payload
            .first()
            .ok_or_else(|| MessageError::ProtocolViolation("empty non-keep-alive frame".into()))?;
        let body = &payload[1..];
        match id {
            0 => Ok(Message::Choke),
            1 => Ok(Message::Unchoke),
            2 => Ok(Message::Interested),
            3 => Ok(Message::NotInterested),
            4 => Ok(Message::Have(read_u32(body, "have")?)),
            5 => Ok(Message::Bitfield(body.to_vec())),
            6 => {
                let (index, begin, length) = read_three_u32(body, "request")?;
                Ok(Message::Request { index, begin, length })
            }
            7 => {
                if body.len() < 8 {
                    return Err(MessageError::ProtocolViolation(
                        "piece message too short".into(),
                    ));
                }
                let index = u32::from_be_bytes(body[0..4].try_into().unwrap());
                let begin = u32::from_be_bytes(body[4..8].try_into().unwrap());
                Ok(Message::Piece {
                    index,
                    begin,
                    block: body[8..].to_vec(),
                })
            }
            8 => {
                let (index, begin, length) = read_three_u32(body, "cancel")?;
                Ok(Message::Cancel { index, begin, length })
            }
            other => Err(MessageError::ProtocolViolation(format!(
                "unknown message id {other}"
            ))),
        }
    }
}

fn read_u32(body: &[u8], what: &str) -> Result<u32, MessageError> {
    body.try_into()
        .map(u32::from_be_bytes)
        .map_err(|_| MessageError::ProtocolViolation(format!("{what} message has wrong length")))
}

fn read_three_u32(body: &[u8], what: &str) -> Result<(u32, u32, u32), MessageError> {
    if body.len() != 12 {
        return Err(MessageError::ProtocolViolation(format!(
            "{what} message should be 12 bytes of payload"
        )));
    }
    let index = u32::from_be_bytes(body[0..4].try_into().unwrap());
    let begin = u32::from_be_bytes(body[4..8].try_into().unwrap());
    let length = u32::from_be_bytes(body[8..12].try_into().unwrap());
    Ok((index, begin, length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keep_alive_round_trips() {
        let encoded = Message::KeepAlive.encode();
        assert_eq!(encoded, vec![0, 0, 0, 0]);
        let mut cursor = std::io::Cursor::new(encoded);
        let decoded = Message::read_from(&mut cursor).await.unwrap();
        assert_eq!(decoded, Message::KeepAlive);
    }

    #[tokio::test]
    async fn choke_round_trips() {
        let encoded = Message::Choke.encode();
        assert_eq!(encoded, vec![0, 0, 0, 1, 0]);
        let mut cursor = std::io::Cursor::new(encoded);
        assert_eq!(Message::read_from(&mut cursor).await.unwrap(), Message::Choke);
    }

    #[tokio::test]
    async fn request_round_trips() {
        let msg = Message::Request { index: 1, begin: 2, length: BLOCK_SIZE };
        let mut cursor = std::io::Cursor::new(msg.encode());
        assert_eq!(Message::read_from(&mut cursor).await.unwrap(), msg);
    }

    #[tokio::test]
    async fn piece_round_trips_with_block_payload() {
        let msg = Message::Piece { index: 3, begin: 0, block: vec![1, 2, 3, 4] };
        let mut cursor = std::io::Cursor::new(msg.encode());
        assert_eq!(Message::read_from(&mut cursor).await.unwrap(), msg);
    }

    #[tokio::test]
    async fn unknown_id_is_protocol_violation() {
        let frame: Vec<u8> = vec![0, 0, 0, 1, 200];
        let mut cursor = std::io::Cursor::new(frame);
        assert!(matches!(
            Message::read_from(&mut cursor).await,
            Err(MessageError::ProtocolViolation(_))
        ));
    }
}
