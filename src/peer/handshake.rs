//! The BitTorrent peer handshake: the first 68 bytes exchanged on every
//! peer connection, verifying both sides share a protocol and info-hash
//! before any peer messages are framed.
use super::PeerError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::instrument;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/// How long to wait for the TCP connection to a peer to complete.
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the peer's 68-byte handshake to arrive.
const HANDSHAKE_READ_TIMEOUT: Duration = Duration::from_secs(15);

/// A BitTorrent handshake message: protocol identifier, reserved
/// extension bytes, info-hash, and peer-id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Serializes the handshake into its 68-byte wire form:
    /// `19 | "BitTorrent protocol" | reserved[8] | info_hash[20] | peer_id[20]`.
    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = 19;
        buf[1..20].copy_from_slice(PROTOCOL);
        buf[20..28].copy_from_slice(&[0u8; 8]);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Reads and validates a handshake from `stream`, checking the
    /// protocol length/string but not yet the info-hash (callers do that
    /// separately with `validate`, against whichever torrent they expect).
    #[instrument(level = "trace", skip(stream))]
    pub async fn read(stream: &mut TcpStream) -> Result<Self, PeerError> {
        let mut buf = [0u8; 68];
        timeout(HANDSHAKE_READ_TIMEOUT, stream.read_exact(&mut buf))
            .await
            .map_err(|_| PeerError::HandshakeFailed("timed out waiting for handshake".to_string()))??;

        let protocol_len = buf[0];
        if protocol_len != 19 {
            return Err(PeerError::HandshakeFailed(format!(
                "invalid protocol length: {protocol_len}"
            )));
        }
        if &buf[1..20] != PROTOCOL {
            return Err(PeerError::HandshakeFailed(
                "unexpected protocol string".to_string(),
            ));
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Self { info_hash, peer_id })
    }

    /// Writes this handshake's 68-byte wire form to `stream`.
    pub async fn write(&self, stream: &mut TcpStream) -> Result<(), PeerError> {
        stream.write_all(&self.serialize()).await?;
        Ok(())
    }

    pub fn validate(&self, expected_info_hash: [u8; 20]) -> Result<(), PeerError> {
        if self.info_hash != expected_info_hash {
            return Err(PeerError::HandshakeFailed(
                "info hash mismatch with expected torrent".to_string(),
            ));
        }
        Ok(())
    }

    /// Connects to `peer_addr`, exchanges handshakes, and returns the
    /// peer's handshake once its info-hash has been validated.
    #[instrument(level = "debug", skip(info_hash, peer_id))]
    pub async fn perform(
        peer_addr: std::net::SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> Result<(TcpStream, Handshake), PeerError> {
        let mut stream = timeout(DIAL_TIMEOUT, TcpStream::connect(peer_addr))
            .await
            .map_err(|_| PeerError::HandshakeFailed("timed out dialing peer".to_string()))??;
        Handshake::new(info_hash, peer_id).write(&mut stream).await?;
        let peer_handshake = Handshake::read(&mut stream).await?;
        peer_handshake.validate(info_hash)?;
        Ok((stream, peer_handshake))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_has_expected_layout() {
        let hs = Handshake::new([1u8; 20], [2u8; 20]);
        let bytes = hs.serialize();
        assert_eq!(bytes.len(), 68);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], PROTOCOL);
        assert_eq!(&bytes[20..28], &[0u8; 8]);
        assert_eq!(&bytes[28..48], &[1u8; 20]);
        assert_eq!(&bytes[48..68], &[2u8; 20]);
    }

    #[tokio::test]
    async fn read_round_trips_through_a_real_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let info_hash = [7u8; 20];
        let peer_id = [9u8; 20];

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            Handshake::read(&mut stream).await.unwrap()
        });

        let mut client_stream = TcpStream::connect(addr).await.unwrap();
        Handshake::new(info_hash, peer_id)
            .write(&mut client_stream)
            .await
            .unwrap();

        let received = server.await.unwrap();
        assert_eq!(received.info_hash, info_hash);
        assert_eq!(received.peer_id, peer_id);
    }

    #[test]
    fn validate_rejects_mismatched_info_hash() {
        let hs = Handshake::new([1u8; 20], [2u8; 20]);
        assert!(hs.validate([9u8; 20]).is_err());
        assert!(hs.validate([1u8; 20]).is_ok());
    }
}
