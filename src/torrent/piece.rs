use crate::error::{BittorrentError, Result};
use sha1::{Digest, Sha1};

/// A 20-byte SHA1 hash representing a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PieceHash([u8; 20]);

impl PieceHash {
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Parse a 40-character hex digest.
    pub fn from_hex(hex_digest: &str) -> Result<Self> {
        let bytes = hex::decode(hex_digest).map_err(|e| {
            BittorrentError::InvalidMetadata(format!("Invalid hex digest {:?}: {}", hex_digest, e))
        })?;
        let hash: [u8; 20] = bytes.as_slice().try_into().map_err(|_| {
            BittorrentError::InvalidMetadata(format!(
                "Piece hash must be 20 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(hash))
    }

    /// SHA1 of `data`.
    pub fn digest(data: &[u8]) -> Self {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&Sha1::digest(data));
        Self(hash)
    }

    /// Whether `data` hashes to this digest.
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::digest(data) == *self
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

/// Collection of piece hashes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pieces {
    hashes: Vec<PieceHash>,
}

impl Pieces {
    pub fn new(hashes: Vec<PieceHash>) -> Self {
        Self { hashes }
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PieceHash> {
        self.hashes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_known_value() {
        let hash = PieceHash::digest(b"abc");
        assert_eq!(
            hex::encode(hash.as_bytes()),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            PieceHash::from_hex("a9993e364706816aba3e25717850c26c9cd0d89d").unwrap(),
            hash
        );
    }

    #[test]
    fn test_matches_detects_any_mutation() {
        let data = b"the quick brown fox".to_vec();
        let hash = PieceHash::digest(&data);
        assert!(hash.matches(&data));

        for i in 0..data.len() {
            let mut mutated = data.clone();
            mutated[i] ^= 0x01;
            assert!(!hash.matches(&mutated), "mutation at {} went unnoticed", i);
        }
    }

    #[test]
    fn test_from_hex_rejects_garbage() {
        assert!(PieceHash::from_hex("zz").is_err());
        assert!(PieceHash::from_hex("abcd").is_err());
    }
}
