mod pipeline;

pub use pipeline::{check_integrity, download_piece, PieceProgress};

use crate::torrent::PieceHash;

/// Standard block size (16 KB)
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// Maximum number of unanswered block requests per connection
pub const MAX_BACKLOG: usize = 5;

/// One piece waiting to be downloaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceWork {
    pub index: u32,
    pub hash: PieceHash,
    pub length: u32,
}

/// A downloaded and verified piece
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceResult {
    pub index: u32,
    pub data: Vec<u8>,
}
