//! The per-peer session task: one TCP connection, one task owning the
//! whole stream. Each loop iteration tops up the request pipeline (if
//! the peer isn't choking us) and then blocks on the next inbound
//! message — no separate reader/writer halves, no `select!`. A session
//! pulls piece jobs from a shared work queue, downloads and verifies
//! them, and reports results back to the engine. Any session death
//! requeues its in-flight piece rather than losing it.
use super::{Bitfield, Handshake, Message, PeerError, PeerResult, BLOCK_SIZE};
use sha1::{Digest, Sha1};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, instrument, warn};

/// Multiple peer sessions pull from the same piece queue; the receiver
/// is shared behind a mutex rather than cloned, since `mpsc` is
/// single-consumer.
pub type WorkQueue = Arc<Mutex<mpsc::UnboundedReceiver<PieceWork>>>;

/// Maximum number of block requests this session keeps outstanding with
/// its peer at once.
const PIPELINE_DEPTH: usize = 25;

/// How long to wait for any single message before treating the peer as
/// dead.
const PEER_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// A unit of work handed to a session: download and verify one piece.
#[derive(Debug, Clone)]
pub struct PieceWork {
    pub index: u32,
    pub length: u32,
    pub hash: [u8; 20],
}

/// A successfully downloaded and hash-verified piece.
#[derive(Debug)]
pub struct PieceResult {
    pub index: u32,
    pub data: Vec<u8>,
}

struct InFlightBlock {
    begin: u32,
    length: u32,
}

/// Drives a single peer connection for the lifetime of the download.
pub struct PeerSession {
    stream: TcpStream,
    peer_addr: SocketAddr,
    peer_choking: bool,
    remote_bitfield: Bitfield,
    num_pieces: usize,
}

impl PeerSession {
    /// Connects to `peer_addr`, performs the handshake, and returns a
    /// session ready to run. `num_pieces` sizes the bitfield used to
    /// track what the remote peer has.
    #[instrument(level = "debug", skip(info_hash, our_peer_id))]
    pub async fn connect(
        peer_addr: SocketAddr,
        info_hash: [u8; 20],
        our_peer_id: [u8; 20],
        num_pieces: usize,
    ) -> PeerResult<Self> {
        let (stream, _their_handshake) =
            Handshake::perform(peer_addr, info_hash, our_peer_id).await?;
        Ok(Self {
            stream,
            peer_addr,
            peer_choking: true,
            remote_bitfield: Bitfield::empty(num_pieces),
            num_pieces,
        })
    }

    /// Runs this session until the peer connection dies or the work
    /// queue is exhausted. Any piece this session had in flight when it
    /// dies is pushed back onto `work_tx` so another session can pick it
    /// up.
    #[instrument(level = "debug", skip(self, work_rx, work_tx, result_tx), fields(peer = %self.peer_addr))]
    pub async fn run(
        mut self,
        work_rx: WorkQueue,
        work_tx: mpsc::UnboundedSender<PieceWork>,
        result_tx: mpsc::UnboundedSender<PieceResult>,
    ) -> PeerResult<()> {
        self.send(Message::Unchoke).await?;
        self.send(Message::Interested).await?;

        let mut current: Option<PieceWork> = None;
        let result = self
            .drive(&work_rx, &work_tx, &mut current, &result_tx)
            .await;

        if let Err(ref e) = result {
            warn!(peer = %self.peer_addr, error = %e, "peer session ending");
            if let Some(piece) = current.take() {
                let _ = work_tx.send(piece);
            }
        }
        result
    }

    async fn drive(
        &mut self,
        work_rx: &WorkQueue,
        work_tx: &mpsc::UnboundedSender<PieceWork>,
        current: &mut Option<PieceWork>,
        result_tx: &mpsc::UnboundedSender<PieceResult>,
    ) -> PeerResult<()> {
        let mut buffer: Vec<u8> = Vec::new();
        let mut in_flight: Vec<InFlightBlock> = Vec::new();
        let mut next_offset: u32 = 0;

        loop {
            if current.is_none() {
                match work_rx.lock().await.recv().await {
                    Some(work) => {
                        if !self.remote_bitfield.has_piece(work.index as usize) {
                            let _ = work_tx.send(work);
                            continue;
                        }
                        buffer = vec![0u8; work.length as usize];
                        in_flight.clear();
                        next_offset = 0;
                        *current = Some(work);
                    }
                    None => return Ok(()), // work queue closed: nothing left to do
                }
            }

            if !self.peer_choking {
                while in_flight.len() < PIPELINE_DEPTH {
                    let work = current.as_ref().expect("current set above");
                    if next_offset >= work.length {
                        break;
                    }
                    let length = BLOCK_SIZE.min(work.length - next_offset);
                    self.send(Message::Request {
                        index: work.index,
                        begin: next_offset,
                        length,
                    })
                    .await?;
                    in_flight.push(InFlightBlock { begin: next_offset, length });
                    next_offset += length;
                }
            }

            let message = timeout(PEER_READ_TIMEOUT, Message::read_from(&mut self.stream))
                .await
                .map_err(|_| PeerError::PeerTimeout)??;

            match message {
                Message::KeepAlive => {}
                Message::Choke => self.peer_choking = true,
                Message::Unchoke => self.peer_choking = false,
                Message::Have(index) => self.remote_bitfield.set_piece(index as usize),
                Message::Bitfield(bits) => {
                    self.remote_bitfield = Bitfield::from_wire_bytes(bits, self.num_pieces);
                }
                Message::Piece { index, begin, block } => {
                    let work = current.as_ref().expect("current set above");
                    if index != work.index {
                        continue; // stale reply for a piece we've moved on from
                    }
                    let pos = in_flight.iter().position(|b| b.begin == begin);
                    if let Some(pos) = pos {
                        let slot = &mut buffer[begin as usize..(begin as usize + block.len())];
                        slot.copy_from_slice(&block);
                        in_flight.remove(pos);
                    }

                    if next_offset >= work.length && in_flight.is_empty() {
                        let completed = current.take().expect("current set above");
                        self.verify_and_report(completed, std::mem::take(&mut buffer), result_tx)
                            .await?;
                    }
                }
                Message::Interested
                | Message::NotInterested
                | Message::Request { .. }
                | Message::Cancel { .. } => {
                    debug!("ignoring leech-irrelevant message from peer");
                }
            }
        }
    }

    async fn verify_and_report(
        &self,
        work: PieceWork,
        data: Vec<u8>,
        result_tx: &mpsc::UnboundedSender<PieceResult>,
    ) -> PeerResult<()> {
        let mut hasher = Sha1::new();
        hasher.update(&data);
        let digest = hasher.finalize();
        if digest.as_slice() != work.hash {
            return Err(PeerError::PieceHashMismatch { index: work.index });
        }
        let _ = result_tx.send(PieceResult { index: work.index, data });
        Ok(())
    }

    async fn send(&mut self, message: Message) -> PeerResult<()> {
        message.write_to(&mut self.stream).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_block_tracks_requested_range() {
        let block = InFlightBlock { begin: 16384, length: 16384 };
        assert_eq!(block.begin, 16384);
        assert_eq!(block.length, 16384);
    }

    #[tokio::test]
    async fn verify_and_report_rejects_hash_mismatch() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let stream = TcpStream::connect(addr).await.unwrap();
        let _server_stream = accept.await.unwrap();

        let session = PeerSession {
            stream,
            peer_addr: addr,
            peer_choking: true,
            remote_bitfield: Bitfield::empty(1),
            num_pieces: 1,
        };
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let work = PieceWork { index: 0, length: 4, hash: [0u8; 20] };
        let err = session
            .verify_and_report(work, vec![1, 2, 3, 4], &result_tx)
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::PieceHashMismatch { index: 0 }));
        assert!(result_rx.try_recv().is_err());
    }
}
