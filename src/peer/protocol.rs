use crate::error::{BittorrentError, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Length of everything after the protocol string.
const HANDSHAKE_TAIL_LEN: usize = 8 + 20 + 20;

/// Handshake message for peer wire protocol
/// Format: <pstrlen><pstr><reserved><info_hash><peer_id>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol: Vec<u8>,
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            protocol: PROTOCOL_STRING.to_vec(),
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    /// Serialize handshake to bytes
    /// Total for the standard protocol string: 1 + 19 + 8 + 20 + 20 = 68 bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.protocol.len() + HANDSHAKE_TAIL_LEN);
        buf.push(self.protocol.len() as u8);
        buf.extend_from_slice(&self.protocol);
        buf.extend_from_slice(&self.reserved);
        buf.extend_from_slice(&self.info_hash);
        buf.extend_from_slice(&self.peer_id);
        buf
    }

    /// Read a handshake whose protocol string length is taken from the wire.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let pstrlen = reader.read_u8().await? as usize;
        if pstrlen == 0 {
            return Err(BittorrentError::ProtocolError(
                "Protocol string length cannot be 0".to_string(),
            ));
        }

        let mut buf = vec![0u8; pstrlen + HANDSHAKE_TAIL_LEN];
        reader.read_exact(&mut buf).await?;

        let tail = buf.split_off(pstrlen);
        Ok(Self::from_parts(buf, &tail))
    }

    fn from_parts(protocol: Vec<u8>, tail: &[u8]) -> Self {
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&tail[..8]);

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&tail[8..28]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&tail[28..48]);

        Self {
            protocol,
            reserved,
            info_hash,
            peer_id,
        }
    }

    /// Fails with a protocol error unless the peer serves `expected`.
    pub fn verify_info_hash(&self, expected: &[u8; 20]) -> Result<()> {
        if &self.info_hash != expected {
            return Err(BittorrentError::ProtocolError(format!(
                "Expected info hash {} but got {}",
                hex::encode(expected),
                hex::encode(self.info_hash)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_serialization() {
        let info_hash = [1u8; 20];
        let peer_id = [2u8; 20];

        let handshake = Handshake::new(info_hash, peer_id);
        let bytes = handshake.to_bytes();

        assert_eq!(bytes.len(), 68);
        assert_eq!(bytes[0], 19); // pstrlen
        assert_eq!(&bytes[1..20], PROTOCOL_STRING);
        assert_eq!(&bytes[20..28], &[0u8; 8]);

        let mut stream = tokio_test::io::Builder::new().read(&bytes).build();
        let decoded = Handshake::read_from(&mut stream).await.unwrap();
        assert_eq!(decoded, handshake);
    }

    #[tokio::test]
    async fn test_read_truncated_handshake() {
        let bytes = Handshake::new([1u8; 20], [2u8; 20]).to_bytes();
        let mut stream = tokio_test::io::Builder::new().read(&bytes[..67]).build();

        let err = Handshake::read_from(&mut stream).await.unwrap_err();
        assert!(matches!(err, BittorrentError::IoError(_)));
    }

    #[tokio::test]
    async fn test_read_custom_protocol_string() {
        let mut theirs = Handshake::new([3u8; 20], [4u8; 20]);
        theirs.protocol = b"Foo".to_vec();
        theirs.reserved = [0, 0, 0, 0, 0, 0x10, 0, 0x05];

        let mut stream = tokio_test::io::Builder::new()
            .read(&theirs.to_bytes())
            .build();

        let read = Handshake::read_from(&mut stream).await.unwrap();
        assert_eq!(read, theirs);
    }

    #[tokio::test]
    async fn test_read_zero_length_protocol() {
        let mut stream = tokio_test::io::Builder::new().read(&[0]).build();
        let err = Handshake::read_from(&mut stream).await.unwrap_err();
        assert!(matches!(err, BittorrentError::ProtocolError(_)));
    }

    #[test]
    fn test_verify_info_hash() {
        let handshake = Handshake::new([7u8; 20], [0u8; 20]);
        assert!(handshake.verify_info_hash(&[7u8; 20]).is_ok());

        let err = handshake.verify_info_hash(&[8u8; 20]).unwrap_err();
        assert!(matches!(err, BittorrentError::ProtocolError(_)));
    }
}
