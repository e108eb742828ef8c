//! The download engine: seeds the piece work queue, spawns one peer
//! session task per announced peer (bounded by `max_peers`), and
//! assembles completed pieces into the final output. If a session dies
//! mid-piece, that piece goes back on the queue for another session.
use crate::peer::session::{PeerSession, PieceResult, PieceWork, WorkQueue};
use crate::torrent::Torrent;
use crate::tracker::{self, Event};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("tracker error: {0}")]
    Tracker(#[from] tracker::TrackerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download stalled: no peers left and {0} piece(s) still missing")]
    DownloadStalled(usize),

    #[error("tracker returned no peers")]
    NoPeers,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Drives a single torrent's download to completion (or stall).
pub struct Engine {
    torrent: Torrent,
    max_peers: usize,
}

impl Engine {
    pub fn new(torrent: Torrent, max_peers: usize) -> Self {
        Self { torrent, max_peers }
    }

    /// Announces to the tracker, spawns peer sessions, and drives the
    /// download to completion. Returns the assembled file bytes in
    /// single-file order, or per-file spans when multi-file (see
    /// `write_output`).
    #[instrument(level = "info", skip(self, client), fields(name = %self.torrent.info.name))]
    pub async fn download(&self, client: &tracker::Client) -> EngineResult<Vec<u8>> {
        let num_pieces = self.torrent.num_pieces();
        let total_length = self.torrent.total_length();

        let announce = client
            .announce(&self.torrent, 0, total_length, Event::Started)
            .await?;
        if announce.peers.is_empty() {
            return Err(EngineError::NoPeers);
        }
        info!(peers = announce.peers.len(), pieces = num_pieces, "starting download");

        let (work_tx, work_rx) = mpsc::unbounded_channel();
        for index in 0..num_pieces {
            work_tx
                .send(PieceWork {
                    index: index as u32,
                    length: self.torrent.piece_size(index) as u32,
                    hash: self.torrent.info.pieces[index],
                })
                .expect("receiver held below; channel can't be closed yet");
        }
        let work_rx: WorkQueue = Arc::new(Mutex::new(work_rx));

        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<PieceResult>();

        let info_hash = self.torrent.info_hash;
        let our_peer_id = client.peer_id();
        let peers: Vec<_> = announce.peers.into_iter().take(self.max_peers).collect();

        let mut handles = Vec::with_capacity(peers.len());
        for peer_addr in peers {
            let work_rx = Arc::clone(&work_rx);
            let work_tx = work_tx.clone();
            let result_tx = result_tx.clone();
            handles.push(tokio::spawn(async move {
                match PeerSession::connect(peer_addr, info_hash, our_peer_id, num_pieces).await {
                    Ok(session) => {
                        if let Err(e) = session.run(work_rx, work_tx, result_tx).await {
                            warn!(peer = %peer_addr, error = %e, "peer session failed");
                        }
                    }
                    Err(e) => warn!(peer = %peer_addr, error = %e, "peer connection failed"),
                }
            }));
        }
        drop(work_tx);
        drop(result_tx);

        let mut buffer = vec![0u8; total_length as usize];
        let mut received: HashSet<u32> = HashSet::with_capacity(num_pieces);

        while received.len() < num_pieces {
            match result_rx.recv().await {
                Some(piece) => {
                    let offset = piece.index as i64 * self.torrent.info.piece_length;
                    let start = offset as usize;
                    buffer[start..start + piece.data.len()].copy_from_slice(&piece.data);
                    received.insert(piece.index);
                }
                None => {
                    // All senders dropped: every session has exited, but we
                    // may still be short pieces those sessions requeued.
                    let missing = num_pieces - received.len();
                    if missing > 0 {
                        return Err(EngineError::DownloadStalled(missing));
                    }
                    break;
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        Ok(buffer)
    }

    /// Writes the assembled buffer to disk, splitting along `info.files`
    /// boundaries for multi-file torrents rather than writing one
    /// contiguous blob under the torrent's name.
    pub fn write_output(&self, buffer: &[u8], output_dir: &Path) -> EngineResult<()> {
        if !self.torrent.is_multi_file() {
            std::fs::create_dir_all(output_dir)?;
            let path = output_dir.join(&self.torrent.info.name);
            std::fs::write(path, buffer)?;
            return Ok(());
        }

        let root = output_dir.join(&self.torrent.info.name);
        std::fs::create_dir_all(&root)?;
        let mut offset = 0usize;
        for file in &self.torrent.info.files {
            let length = file.length as usize;
            let path = file
                .path
                .iter()
                .fold(PathBuf::new(), |acc, component| acc.join(component));
            let full_path = root.join(path);
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(full_path, &buffer[offset..offset + length])?;
            offset += length;
        }
        Ok(())
    }
}
