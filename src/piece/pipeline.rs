use super::{PieceResult, PieceWork, BLOCK_SIZE, MAX_BACKLOG};
use crate::error::{BittorrentError, Result};
use crate::peer::{BlockInfo, Message, MessageId, PeerConnection};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Bookkeeping for a single attempt at one piece
#[derive(Debug)]
pub struct PieceProgress {
    index: u32,
    buf: Vec<u8>,
    downloaded: usize,
    requested: usize,
    backlog: usize,
}

impl PieceProgress {
    pub fn new(work: &PieceWork) -> Self {
        Self {
            index: work.index,
            buf: vec![0u8; work.length as usize],
            downloaded: 0,
            requested: 0,
            backlog: 0,
        }
    }

    /// Claim the next block to request, if the backlog has room and part of
    /// the piece is still unrequested.
    pub fn next_request(&mut self) -> Option<BlockInfo> {
        if self.backlog >= MAX_BACKLOG || self.requested >= self.buf.len() {
            return None;
        }

        let length = (BLOCK_SIZE as usize).min(self.buf.len() - self.requested);
        let block = BlockInfo::new(self.index, self.requested as u32, length as u32);
        self.backlog += 1;
        self.requested += length;
        Some(block)
    }

    /// Copy a received block into the piece buffer.
    pub fn accept(&mut self, message: &Message) -> Result<usize> {
        let n = message.parse_piece(self.index, &mut self.buf)?;
        self.downloaded += n;
        self.backlog = self.backlog.saturating_sub(1);
        Ok(n)
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded >= self.buf.len()
    }

    pub fn backlog(&self) -> usize {
        self.backlog
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn downloaded(&self) -> usize {
        self.downloaded
    }

    pub fn into_buf(self) -> Vec<u8> {
        self.buf
    }
}

/// Download and verify one piece over `conn`.
///
/// The whole attempt shares one deadline of `timeout`. An integrity failure
/// leaves the connection usable; any other error means the stream can no
/// longer be trusted.
pub async fn download_piece<S>(
    conn: &mut PeerConnection<S>,
    work: &PieceWork,
    timeout: Duration,
) -> Result<PieceResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.set_deadline(Some(Instant::now() + timeout));
    let result = fetch_blocks(conn, work).await;
    conn.set_deadline(None);

    let data = result?;
    check_integrity(work, &data)?;

    debug!("Piece {} verified ({} bytes)", work.index, data.len());
    Ok(PieceResult {
        index: work.index,
        data,
    })
}

async fn fetch_blocks<S>(conn: &mut PeerConnection<S>, work: &PieceWork) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut progress = PieceProgress::new(work);

    while !progress.is_complete() {
        if !conn.is_choked() {
            while let Some(block) = progress.next_request() {
                conn.send_request(block.piece_index, block.offset, block.length)
                    .await?;
            }
        }

        let Some(message) = conn.receive_message().await? else {
            continue;
        };
        conn.observe(&message)?;
        if message.id == MessageId::Piece {
            progress.accept(&message)?;
        }
    }

    Ok(progress.into_buf())
}

/// Verify the SHA1 of an assembled piece
pub fn check_integrity(work: &PieceWork, buf: &[u8]) -> Result<()> {
    if !work.hash.matches(buf) {
        warn!("Piece {} failed verification", work.index);
        return Err(BittorrentError::IntegrityError(work.index));
    }
    Ok(())
}
