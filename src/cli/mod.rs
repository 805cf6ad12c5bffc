use crate::client::{ClientConfig, TorrentClient};
use crate::error::{BittorrentError, Result};
use crate::peer::PeerConnection;
use crate::torrent::{PieceHash, Pieces, TorrentMeta};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "bittorrent-dl")]
#[command(about = "Download a single-file torrent from a known set of peers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a torrent from the given peers
    Download {
        /// Info hash of the torrent (40 hex characters)
        #[arg(long)]
        info_hash: String,

        /// Piece length in bytes
        #[arg(long)]
        piece_length: u64,

        /// Total length in bytes
        #[arg(long)]
        length: u64,

        /// SHA1 of each piece in order (40 hex characters, repeatable)
        #[arg(long = "piece-hash", required = true)]
        piece_hashes: Vec<String>,

        /// Peer address (repeatable)
        #[arg(short, long = "peer", required = true)]
        peers: Vec<SocketAddr>,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Name shown in logs
        #[arg(long, default_value = "download")]
        name: String,

        /// Seconds allowed for a single piece attempt
        #[arg(long, default_value = "30")]
        piece_timeout: u64,
    },

    /// Handshake with one peer and show what it advertises
    Handshake {
        /// Peer address
        #[arg(short, long)]
        peer: SocketAddr,

        /// Info hash of the torrent (40 hex characters)
        #[arg(long)]
        info_hash: String,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        match &self.command {
            Commands::Download {
                info_hash,
                piece_length,
                length,
                piece_hashes,
                peers,
                output,
                name,
                piece_timeout,
            } => {
                let hashes = piece_hashes
                    .iter()
                    .map(|h| PieceHash::from_hex(h))
                    .collect::<Result<Vec<_>>>()?;
                let meta = TorrentMeta {
                    announce: String::new(),
                    info_hash: parse_info_hash(info_hash)?,
                    piece_hashes: Pieces::new(hashes),
                    piece_length: *piece_length,
                    length: *length,
                    name: name.clone(),
                };

                let config = ClientConfig {
                    piece_timeout: Duration::from_secs(*piece_timeout),
                    ..ClientConfig::default()
                };

                let client = TorrentClient::new(config);
                let stats = client
                    .download_to_file(&meta, peers, output, cancel)
                    .await?;

                println!(
                    "Saved {} to {} ({} pieces, {} corrupt attempts, {} failed peers)",
                    meta.name,
                    output.display(),
                    stats.pieces,
                    stats.integrity_failures,
                    stats.failed_peers
                );
            }

            Commands::Handshake { peer, info_hash } => {
                self.show_peer(*peer, parse_info_hash(info_hash)?, cancel)
                    .await?;
            }
        }

        Ok(())
    }

    async fn show_peer(
        &self,
        addr: SocketAddr,
        info_hash: [u8; 20],
        cancel: CancellationToken,
    ) -> Result<()> {
        let config = ClientConfig::default();
        let conn = PeerConnection::connect(addr, info_hash, &config, cancel).await?;

        println!("Peer: {}", conn.addr());
        println!("Peer ID: {}", hex::encode(conn.peer_id()));
        println!("Advertised pieces: {}", conn.bitfield().count());
        Ok(())
    }
}

fn parse_info_hash(value: &str) -> Result<[u8; 20]> {
    let hash = PieceHash::from_hex(value)
        .map_err(|_| BittorrentError::InvalidMetadata(format!("Invalid info hash: {}", value)))?;
    Ok(*hash.as_bytes())
}
