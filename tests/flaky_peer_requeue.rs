//! A peer that disconnects mid-piece must not lose that piece: the
//! session dies, the piece goes back on the work queue, and a second
//! peer finishes it.
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use torrent_leech::bencode::{encoder, BencodeValue};
use torrent_leech::peer::message::BLOCK_SIZE;
use torrent_leech::peer::session::{PeerSession, PieceWork};
use torrent_leech::peer::{Handshake, Message};
use torrent_leech::torrent::Torrent;

const INFO_HASH: [u8; 20] = [0x42; 20];
const OUR_PEER_ID: [u8; 20] = [0x01; 20];

fn piece_data() -> Vec<u8> {
    // Two full 16 KiB blocks.
    (0..(BLOCK_SIZE as usize * 2)).map(|i| (i % 256) as u8).collect()
}

fn piece_hash(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

fn build_single_piece_torrent(data: &[u8]) -> Torrent {
    let hash = piece_hash(data);
    let mut info = BTreeMap::new();
    info.insert(b"name".to_vec(), BencodeValue::String(b"flaky.bin".to_vec()));
    info.insert(
        b"piece length".to_vec(),
        BencodeValue::Integer(data.len() as i64),
    );
    info.insert(b"pieces".to_vec(), BencodeValue::String(hash.to_vec()));
    info.insert(b"length".to_vec(), BencodeValue::Integer(data.len() as i64));

    let mut top = BTreeMap::new();
    top.insert(
        b"announce".to_vec(),
        BencodeValue::String(b"http://tracker.example/announce".to_vec()),
    );
    top.insert(b"info".to_vec(), BencodeValue::Dict(info));

    let bytes = encoder::encode_to_vec(&BencodeValue::Dict(top)).unwrap();
    Torrent::parse(&bytes).unwrap()
}

/// Performs the server side of a handshake, echoing back the client's
/// info_hash with a peer-id of our own choosing.
async fn accept_handshake(stream: &mut tokio::net::TcpStream) {
    let incoming = Handshake::read(stream).await.unwrap();
    Handshake::new(incoming.info_hash, [0xAB; 20])
        .write(stream)
        .await
        .unwrap();
}

/// A peer that unchokes us, answers exactly one block request, then
/// drops the connection without answering the second.
async fn spawn_flaky_peer() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let data = piece_data();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        accept_handshake(&mut stream).await;
        Message::Bitfield(vec![0x80]).write_to(&mut stream).await.unwrap();
        Message::Unchoke.write_to(&mut stream).await.unwrap();

        // Skip the client's own Unchoke/Interested control messages and
        // wait for the first real block request.
        let (index, begin, length) = loop {
            match Message::read_from(&mut stream).await.unwrap() {
                Message::Request { index, begin, length } => break (index, begin, length),
                _ => continue,
            }
        };
        let block = data[begin as usize..(begin + length) as usize].to_vec();
        Message::Piece { index, begin, block }
            .write_to(&mut stream)
            .await
            .unwrap();
        // Second request (if the peer sent it before we closed) is left
        // unanswered; dropping `stream` here closes the connection.
    });
    addr
}

/// A peer that answers every request it receives, faithfully.
async fn spawn_reliable_peer() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let data = piece_data();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        accept_handshake(&mut stream).await;
        Message::Bitfield(vec![0x80]).write_to(&mut stream).await.unwrap();
        Message::Unchoke.write_to(&mut stream).await.unwrap();

        loop {
            match Message::read_from(&mut stream).await {
                Ok(Message::Request { index, begin, length }) => {
                    let block = data[begin as usize..(begin + length) as usize].to_vec();
                    Message::Piece { index, begin, block }
                        .write_to(&mut stream)
                        .await
                        .unwrap();
                }
                // Ignore the client's own Unchoke/Interested control
                // messages; only a closed connection ends this peer.
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    });
    addr
}

#[tokio::test]
async fn piece_dropped_by_a_dying_peer_is_recovered_by_the_next_one() {
    let data = piece_data();
    let torrent = build_single_piece_torrent(&data);
    let hash = torrent.info.pieces[0];

    let (work_tx, work_rx) = mpsc::unbounded_channel();
    work_tx
        .send(PieceWork { index: 0, length: data.len() as u32, hash })
        .unwrap();
    let work_rx = Arc::new(Mutex::new(work_rx));
    let (result_tx, mut result_rx) = mpsc::unbounded_channel();

    let flaky_addr = spawn_flaky_peer().await;
    let flaky_session = PeerSession::connect(flaky_addr, INFO_HASH, OUR_PEER_ID, 1)
        .await
        .unwrap();
    let outcome = flaky_session
        .run(Arc::clone(&work_rx), work_tx.clone(), result_tx.clone())
        .await;
    assert!(outcome.is_err(), "flaky peer's session should end in an error");
    assert!(
        result_rx.try_recv().is_err(),
        "no piece should have completed through the flaky peer"
    );

    let reliable_addr = spawn_reliable_peer().await;
    let reliable_session = PeerSession::connect(reliable_addr, INFO_HASH, OUR_PEER_ID, 1)
        .await
        .unwrap();
    tokio::spawn(reliable_session.run(work_rx, work_tx, result_tx));

    let result = tokio::time::timeout(Duration::from_secs(5), result_rx.recv())
        .await
        .expect("reliable peer should complete the requeued piece in time")
        .expect("result channel should not close before delivering the piece");

    assert_eq!(result.index, 0);
    assert_eq!(result.data, data);
}
