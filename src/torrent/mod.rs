mod piece;

pub use piece::{PieceHash, Pieces};

use crate::error::{BittorrentError, Result};
use crate::piece::PieceWork;

/// Everything the download engine needs to know about a torrent.
///
/// Produced by whatever parses the metainfo file; this crate never reads
/// bencode itself.
#[derive(Debug, Clone)]
pub struct TorrentMeta {
    /// URL of the tracker
    pub announce: String,
    /// SHA1 hash of the bencoded info dictionary
    pub info_hash: [u8; 20],
    /// SHA1 hashes of all pieces
    pub piece_hashes: Pieces,
    /// Number of bytes in each piece
    pub piece_length: u64,
    /// Total length of the file
    pub length: u64,
    /// Suggested name for the file
    pub name: String,
}

impl TorrentMeta {
    /// Check that piece length, total length and hash count agree.
    pub fn validate(&self) -> Result<()> {
        if self.piece_length == 0 {
            return Err(BittorrentError::InvalidMetadata(
                "Piece length must be positive".to_string(),
            ));
        }
        if self.piece_length > u32::MAX as u64 {
            return Err(BittorrentError::InvalidMetadata(format!(
                "Piece length {} does not fit the wire format",
                self.piece_length
            )));
        }

        let expected = self.length.div_ceil(self.piece_length);
        if self.piece_hashes.len() as u64 != expected {
            return Err(BittorrentError::InvalidMetadata(format!(
                "{} bytes in pieces of {} need {} hashes, got {}",
                self.length,
                self.piece_length,
                expected,
                self.piece_hashes.len()
            )));
        }
        Ok(())
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Byte range `[begin, end)` of a piece within the file.
    pub fn piece_bounds(&self, index: usize) -> (u64, u64) {
        let begin = index as u64 * self.piece_length;
        let end = (begin + self.piece_length).min(self.length);
        (begin, end)
    }

    pub fn piece_size(&self, index: usize) -> u64 {
        let (begin, end) = self.piece_bounds(index);
        end - begin
    }

    /// One work item per piece, in index order.
    pub fn work_items(&self) -> Vec<PieceWork> {
        self.piece_hashes
            .iter()
            .enumerate()
            .map(|(index, hash)| PieceWork {
                index: index as u32,
                hash: *hash,
                length: self.piece_size(index) as u32,
            })
            .collect()
    }

    /// Get the info hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }
}
