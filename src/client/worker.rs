use super::ClientConfig;
use crate::error::{BittorrentError, Result};
use crate::peer::PeerConnection;
use crate::piece::{download_piece, PieceResult, PieceWork};
use async_channel::{Receiver, Sender};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a worker reports back to the coordinator
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Piece(PieceResult),
    IntegrityFailure { addr: SocketAddr, index: u32 },
    Exited { addr: SocketAddr, error: BittorrentError },
}

/// Downloads pieces from a single peer until the queue closes, the peer
/// fails, or the download is cancelled. Never reconnects.
pub(crate) struct Worker {
    pub addr: SocketAddr,
    pub info_hash: [u8; 20],
    pub config: ClientConfig,
    pub work_tx: Sender<PieceWork>,
    pub work_rx: Receiver<PieceWork>,
    pub events: UnboundedSender<WorkerEvent>,
    pub cancel: CancellationToken,
}

impl Worker {
    pub async fn run(self) {
        let conn = match PeerConnection::connect(
            self.addr,
            self.info_hash,
            &self.config,
            self.cancel.clone(),
        )
        .await
        {
            Ok(conn) => conn,
            Err(e) => return self.exit(e),
        };

        if let Err(e) = self.serve(conn).await {
            self.exit(e);
        }
    }

    /// The work loop over an established connection.
    pub async fn serve<S>(&self, mut conn: PeerConnection<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        conn.send_unchoke().await?;
        conn.send_interested().await?;

        loop {
            let work = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                work = self.work_rx.recv() => match work {
                    Ok(work) => work,
                    Err(_) => return Ok(()),
                },
            };

            if !conn.has_piece(work.index as usize) {
                if !self.requeue(work) {
                    return Ok(());
                }
                tokio::task::yield_now().await;
                continue;
            }

            match download_piece(&mut conn, &work, self.config.piece_timeout).await {
                Ok(result) => {
                    let index = result.index;
                    if self.events.send(WorkerEvent::Piece(result)).is_err() {
                        return Ok(());
                    }
                    conn.send_have(index).await?;
                }
                Err(BittorrentError::Cancelled) => return Ok(()),
                Err(e) if e.is_recoverable() => {
                    warn!("Piece #{} from {} failed integrity check", work.index, self.addr);
                    let index = work.index;
                    if !self.requeue(work) {
                        return Ok(());
                    }
                    let _ = self.events.send(WorkerEvent::IntegrityFailure {
                        addr: self.addr,
                        index,
                    });
                }
                Err(e) => {
                    self.requeue(work);
                    return Err(e);
                }
            }
        }
    }

    /// Put `work` back at the tail of the queue. False once the queue is closed.
    fn requeue(&self, work: PieceWork) -> bool {
        debug!("Requeueing piece #{}", work.index);
        self.work_tx.try_send(work).is_ok()
    }

    fn exit(&self, error: BittorrentError) {
        if matches!(error, BittorrentError::Cancelled) {
            info!("Disconnecting from {}: cancelled", self.addr);
            return;
        }
        warn!("Disconnecting from {}: {}", self.addr, error);
        let _ = self.events.send(WorkerEvent::Exited {
            addr: self.addr,
            error,
        });
    }
}
