use thiserror::Error;

#[derive(Error, Debug)]
pub enum BittorrentError {
    /// Dial failure, expired deadline or a peer that hung up.
    #[error("Peer connection error: {0}")]
    ConnectionError(String),

    /// The peer broke the protocol (wrong info hash, missing mandatory message).
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Malformed message payload.
    #[error("Malformed message: {0}")]
    FormatError(String),

    /// Assembled piece does not match its expected SHA1 digest.
    #[error("Piece #{0} failed integrity check")]
    IntegrityError(u32),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("No peers to download from")]
    NoPeers,

    #[error("All peers disconnected with {0} pieces missing")]
    PeersExhausted(usize),

    #[error("Work queue closed")]
    QueueClosed,

    #[error("Invalid torrent metadata: {0}")]
    InvalidMetadata(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl BittorrentError {
    /// Whether the connection that produced this error can keep serving pieces.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BittorrentError::IntegrityError(_))
    }
}

pub type Result<T> = std::result::Result<T, BittorrentError>;
