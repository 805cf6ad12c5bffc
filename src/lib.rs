//! Peer-wire engine and piece download pipeline for single-file torrents.
//!
//! Given the torrent metadata and a list of peer addresses, [`TorrentClient`]
//! connects to every peer, spreads the pieces across them and returns the
//! assembled, SHA1-verified content.

pub mod cli;
pub mod client;
pub mod error;
pub mod peer;
pub mod piece;
pub mod storage;
pub mod torrent;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{ClientConfig, Download, DownloadStats, TorrentClient};
pub use error::{BittorrentError, Result};
pub use torrent::TorrentMeta;
