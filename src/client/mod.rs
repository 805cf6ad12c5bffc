mod worker;

use crate::error::{BittorrentError, Result};
use crate::peer::generate_peer_id;
use crate::storage::OutputFile;
use crate::torrent::TorrentMeta;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use worker::{Worker, WorkerEvent};

/// Configuration for the BitTorrent client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Our 20-byte peer id, sent in every handshake
    pub peer_id: [u8; 20],
    /// Time allowed to open the TCP connection
    pub connect_timeout: Duration,
    /// Time allowed for the handshake exchange
    pub handshake_timeout: Duration,
    /// Time allowed for the peer's initial bitfield
    pub bitfield_timeout: Duration,
    /// Time allowed for one attempt at one piece
    pub piece_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            peer_id: generate_peer_id(),
            connect_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(3),
            bitfield_timeout: Duration::from_secs(5),
            piece_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters gathered while downloading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Pieces verified and copied into the output
    pub pieces: usize,
    /// Attempts rejected by the hash check
    pub integrity_failures: usize,
    /// Peers whose worker gave up
    pub failed_peers: usize,
}

/// A finished download
#[derive(Debug)]
pub struct Download {
    pub data: Vec<u8>,
    pub stats: DownloadStats,
}

/// Main BitTorrent client
pub struct TorrentClient {
    config: ClientConfig,
}

impl TorrentClient {
    pub fn new(config: ClientConfig) -> Self {
        info!("Client initialized with peer_id: {}", hex::encode(config.peer_id));
        Self { config }
    }

    /// Download the whole torrent into memory.
    ///
    /// One worker is spawned per peer. Workers pull pieces from a shared
    /// queue and push verified pieces back over a channel; this task is the
    /// only one that touches the output buffer. Returns once every piece has
    /// arrived, when `cancel` fires, or when every worker has given up.
    pub async fn download(
        &self,
        meta: &TorrentMeta,
        peers: &[SocketAddr],
        cancel: CancellationToken,
    ) -> Result<Download> {
        meta.validate()?;
        if peers.is_empty() {
            return Err(BittorrentError::NoPeers);
        }

        let total = meta.piece_count();
        let mut output = vec![0u8; meta.length as usize];
        let mut stats = DownloadStats::default();
        if total == 0 {
            return Ok(Download {
                data: output,
                stats,
            });
        }

        info!(
            "Starting download for {} ({} bytes, {} pieces, info hash {})",
            meta.name,
            meta.length,
            total,
            meta.info_hash_hex()
        );

        let (work_tx, work_rx) = async_channel::bounded(total);
        for work in meta.work_items() {
            work_tx
                .try_send(work)
                .map_err(|_| BittorrentError::QueueClosed)?;
        }
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let workers_cancel = cancel.child_token();
        let _stop_workers = workers_cancel.clone().drop_guard();
        let mut workers = JoinSet::new();
        for &addr in peers {
            let worker = Worker {
                addr,
                info_hash: meta.info_hash,
                config: self.config.clone(),
                work_tx: work_tx.clone(),
                work_rx: work_rx.clone(),
                events: events_tx.clone(),
                cancel: workers_cancel.clone(),
            };
            workers.spawn(worker.run().instrument(info_span!("peer", %addr)));
        }
        drop(events_tx);

        let mut done = vec![false; total];
        let mut live_peers = peers.len();

        while stats.pieces < total {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BittorrentError::Cancelled),
                event = events_rx.recv() => event,
            };

            match event {
                Some(WorkerEvent::Piece(result)) => {
                    let index = result.index as usize;
                    if done[index] {
                        continue;
                    }
                    let (begin, end) = meta.piece_bounds(index);
                    output[begin as usize..end as usize].copy_from_slice(&result.data);
                    done[index] = true;
                    stats.pieces += 1;

                    let percent = stats.pieces as f64 / total as f64 * 100.0;
                    info!(
                        "({:.2}%) Downloaded piece #{} from {} peers",
                        percent, index, live_peers
                    );
                }
                Some(WorkerEvent::IntegrityFailure { addr, index }) => {
                    stats.integrity_failures += 1;
                    warn!("Piece #{} from {} was corrupt, retrying", index, addr);
                }
                Some(WorkerEvent::Exited { addr, error }) => {
                    live_peers = live_peers.saturating_sub(1);
                    stats.failed_peers += 1;
                    warn!("Lost peer {} ({} left): {}", addr, live_peers, error);
                }
                // workers also drop their senders when cancelled
                None if cancel.is_cancelled() => return Err(BittorrentError::Cancelled),
                None => return Err(BittorrentError::PeersExhausted(total - stats.pieces)),
            }
        }

        work_tx.close();
        workers_cancel.cancel();
        while workers.join_next().await.is_some() {}

        info!("Download of {} complete", meta.name);
        Ok(Download {
            data: output,
            stats,
        })
    }

    /// Download the torrent and write it to `sink`.
    pub async fn download_to<W>(
        &self,
        meta: &TorrentMeta,
        peers: &[SocketAddr],
        sink: &mut W,
        cancel: CancellationToken,
    ) -> Result<DownloadStats>
    where
        W: AsyncWrite + Unpin,
    {
        let download = self.download(meta, peers, cancel).await?;
        sink.write_all(&download.data).await?;
        sink.flush().await?;
        Ok(download.stats)
    }

    /// Download the torrent into a file. The file is created before any peer
    /// is contacted and removed again if the download fails.
    pub async fn download_to_file(
        &self,
        meta: &TorrentMeta,
        peers: &[SocketAddr],
        path: &Path,
        cancel: CancellationToken,
    ) -> Result<DownloadStats> {
        let mut output = OutputFile::create(path).await?;
        let download = match self.download(meta, peers, cancel).await {
            Ok(download) => download,
            Err(e) => {
                output.discard().await;
                return Err(e);
            }
        };
        output.write_all(&download.data).await?;
        Ok(download.stats)
    }
}

impl Default for TorrentClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}
