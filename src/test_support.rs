//! Scripted peers for exercising the engine without a real swarm.

use crate::client::ClientConfig;
use crate::error::Result;
use crate::peer::{BlockInfo, Handshake, Message, MessageId, PeerConnection};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{duplex, AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub const MOCK_PEER_ID: [u8; 20] = *b"-MK0001-mockmockmock";

/// How long the mock waits for more requests before answering the batch.
const BATCH_WINDOW: Duration = Duration::from_millis(20);

/// How long a `SlowStart` peer holds back its first answers.
const SLOW_START: Duration = Duration::from_millis(300);

pub fn test_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6881))
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        peer_id: *b"-BD0001-testtesttest",
        connect_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_millis(500),
        bitfield_timeout: Duration::from_millis(500),
        piece_timeout: Duration::from_secs(5),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    /// Flip a byte in the very first block served, then behave.
    CorruptFirstBlock,
    /// Answer every request with the next piece's index.
    WrongIndex,
    /// Accept requests but never answer them.
    Silent,
    /// Hold back the first batch of answers for a while, then behave.
    SlowStart,
}

/// What the mock observed of the client.
#[derive(Debug, Default)]
pub struct MockStats {
    pub requests: Vec<BlockInfo>,
    pub max_outstanding: usize,
    pub haves: Vec<u32>,
    pub interested: bool,
}

impl MockStats {
    pub fn requested_bytes(&self, piece_index: u32) -> u64 {
        self.requests
            .iter()
            .filter(|b| b.piece_index == piece_index)
            .map(|b| b.length as u64)
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct MockPeer {
    pub info_hash: [u8; 20],
    pub data: Vec<u8>,
    pub piece_length: usize,
    pub bitfield: Vec<u8>,
    pub unchoke: bool,
    pub fault: Fault,
}

impl MockPeer {
    /// A peer holding every piece of `data` that unchokes right away.
    pub fn seeding(info_hash: [u8; 20], data: &[u8], piece_length: usize) -> Self {
        let pieces = data.len().div_ceil(piece_length);
        Self {
            info_hash,
            data: data.to_vec(),
            piece_length,
            bitfield: crate::peer::Bitfield::full(pieces).as_bytes().to_vec(),
            unchoke: true,
            fault: Fault::None,
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = fault;
        self
    }

    /// Accept a single TCP connection on a loopback port and serve it.
    pub async fn listen(self) -> (SocketAddr, JoinHandle<Result<MockStats>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await?;
            self.serve(stream).await
        });
        (addr, handle)
    }

    /// Open an in-memory connection to this peer.
    pub async fn connect(
        self,
        config: &ClientConfig,
        cancel: CancellationToken,
    ) -> (
        PeerConnection<DuplexStream>,
        JoinHandle<Result<MockStats>>,
    ) {
        let info_hash = self.info_hash;
        let (client, server) = duplex(256 * 1024);
        let handle = tokio::spawn(self.serve(server));
        let conn = PeerConnection::establish(client, test_addr(), info_hash, config, cancel)
            .await
            .unwrap();
        (conn, handle)
    }

    pub async fn serve<S>(self, mut stream: S) -> Result<MockStats>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Handshake::read_from(&mut stream).await?;
        stream
            .write_all(&Handshake::new(self.info_hash, MOCK_PEER_ID).to_bytes())
            .await?;
        stream
            .write_all(&Message::bitfield(&self.bitfield).to_bytes())
            .await?;
        if self.unchoke {
            stream
                .write_all(&Message::signal(MessageId::Unchoke).to_bytes())
                .await?;
        }

        // Reads go through a channel so a batch window never cuts a frame.
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok(Some(message)) = Message::read_from(&mut reader).await {
                if tx.send(message).is_err() {
                    break;
                }
            }
        });

        let mut stats = MockStats::default();
        let mut pending: Vec<BlockInfo> = Vec::new();
        let mut corrupted = false;
        let mut started = self.fault != Fault::SlowStart;

        loop {
            let next = if pending.is_empty() || self.fault == Fault::Silent {
                rx.recv().await
            } else {
                match timeout(BATCH_WINDOW, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        if !started {
                            tokio::time::sleep(SLOW_START).await;
                            started = true;
                        }
                        for block in pending.drain(..) {
                            let mut index = block.piece_index;
                            if self.fault == Fault::WrongIndex {
                                index += 1;
                            }
                            let begin =
                                block.piece_index as usize * self.piece_length + block.offset as usize;
                            let mut data = self.data[begin..begin + block.length as usize].to_vec();
                            if self.fault == Fault::CorruptFirstBlock && !corrupted {
                                data[0] ^= 0xff;
                                corrupted = true;
                            }
                            writer
                                .write_all(&Message::piece(index, block.offset, &data).to_bytes())
                                .await?;
                        }
                        continue;
                    }
                }
            };

            let Some(message) = next else {
                return Ok(stats);
            };
            match message.id {
                MessageId::Request => {
                    let block = message.parse_block()?;
                    stats.requests.push(block);
                    pending.push(block);
                    stats.max_outstanding = stats.max_outstanding.max(pending.len());
                }
                MessageId::Have => stats.haves.push(message.parse_have()?),
                MessageId::Interested => stats.interested = true,
                _ => {}
            }
        }
    }
}
