use crate::error::{BittorrentError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest frame we are willing to allocate for.
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

/// Message type IDs of the peer wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have,
    Bitfield,
    Request,
    Piece,
    Cancel,
    /// Any id this client does not speak (extensions and the like).
    Other(u8),
}

impl From<u8> for MessageId {
    fn from(id: u8) -> Self {
        match id {
            0 => MessageId::Choke,
            1 => MessageId::Unchoke,
            2 => MessageId::Interested,
            3 => MessageId::NotInterested,
            4 => MessageId::Have,
            5 => MessageId::Bitfield,
            6 => MessageId::Request,
            7 => MessageId::Piece,
            8 => MessageId::Cancel,
            other => MessageId::Other(other),
        }
    }
}

impl From<MessageId> for u8 {
    fn from(id: MessageId) -> Self {
        match id {
            MessageId::Choke => 0,
            MessageId::Unchoke => 1,
            MessageId::Interested => 2,
            MessageId::NotInterested => 3,
            MessageId::Have => 4,
            MessageId::Bitfield => 5,
            MessageId::Request => 6,
            MessageId::Piece => 7,
            MessageId::Cancel => 8,
            MessageId::Other(other) => other,
        }
    }
}

/// Information about a block within a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Piece index
    pub piece_index: u32,
    /// Byte offset within the piece
    pub offset: u32,
    /// Length of the block
    pub length: u32,
}

impl BlockInfo {
    pub fn new(piece_index: u32, offset: u32, length: u32) -> Self {
        Self {
            piece_index,
            offset,
            length,
        }
    }
}

/// A single framed message. Keep-alives carry no id and are represented as
/// `None` wherever a message is read.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub payload: Bytes,
}

impl Message {
    pub fn new(id: MessageId, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// A message without payload (choke, unchoke, interested, not interested).
    pub fn signal(id: MessageId) -> Self {
        Self::new(id, Bytes::new())
    }

    pub fn have(piece_index: u32) -> Self {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u32(piece_index);
        Self::new(MessageId::Have, payload.freeze())
    }

    pub fn request(block: BlockInfo) -> Self {
        Self::new(MessageId::Request, encode_block(&block))
    }

    pub fn cancel(block: BlockInfo) -> Self {
        Self::new(MessageId::Cancel, encode_block(&block))
    }

    pub fn bitfield(bits: &[u8]) -> Self {
        Self::new(MessageId::Bitfield, Bytes::copy_from_slice(bits))
    }

    pub fn piece(piece_index: u32, offset: u32, data: &[u8]) -> Self {
        let mut payload = BytesMut::with_capacity(8 + data.len());
        payload.put_u32(piece_index);
        payload.put_u32(offset);
        payload.put_slice(data);
        Self::new(MessageId::Piece, payload.freeze())
    }

    /// Serialize message to bytes
    /// Format: <length prefix><message ID><payload>
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5 + self.payload.len());
        buf.put_u32((1 + self.payload.len()) as u32);
        buf.put_u8(self.id.into());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// The four zero bytes of a keep-alive.
    pub fn keep_alive_bytes() -> Bytes {
        Bytes::from_static(&[0, 0, 0, 0])
    }

    /// Deserialize one complete frame, length prefix included.
    pub fn from_bytes(mut data: &[u8]) -> Result<Option<Self>> {
        if data.len() < 4 {
            return Err(BittorrentError::FormatError("Message too short".to_string()));
        }

        let length = data.get_u32() as usize;
        if length == 0 {
            return Ok(None);
        }
        if data.len() != length {
            return Err(BittorrentError::FormatError(format!(
                "Frame declares {} bytes but holds {}",
                length,
                data.len()
            )));
        }

        let id = MessageId::from(data.get_u8());
        Ok(Some(Self::new(id, Bytes::copy_from_slice(data))))
    }

    /// Read exactly one frame from the stream.
    pub async fn read_from<R>(reader: &mut R) -> Result<Option<Self>>
    where
        R: AsyncRead + Unpin,
    {
        let length = reader.read_u32().await? as usize;

        // Handle keep-alive
        if length == 0 {
            return Ok(None);
        }
        if length > MAX_FRAME_LEN {
            return Err(BittorrentError::FormatError(format!(
                "Frame of {} bytes exceeds limit of {}",
                length, MAX_FRAME_LEN
            )));
        }

        let mut frame = vec![0u8; length];
        reader.read_exact(&mut frame).await?;

        let mut frame = Bytes::from(frame);
        let id = MessageId::from(frame.get_u8());
        Ok(Some(Self::new(id, frame)))
    }

    pub fn parse_have(&self) -> Result<u32> {
        if self.id != MessageId::Have {
            return Err(BittorrentError::FormatError(format!(
                "Expected have, got {:?}",
                self.id
            )));
        }
        if self.payload.len() != 4 {
            return Err(BittorrentError::FormatError(format!(
                "Have payload must be 4 bytes, got {}",
                self.payload.len()
            )));
        }
        Ok((&self.payload[..]).get_u32())
    }

    /// Decode the body of a `request` or `cancel`.
    pub fn parse_block(&self) -> Result<BlockInfo> {
        if !matches!(self.id, MessageId::Request | MessageId::Cancel) {
            return Err(BittorrentError::FormatError(format!(
                "Expected request or cancel, got {:?}",
                self.id
            )));
        }
        if self.payload.len() != 12 {
            return Err(BittorrentError::FormatError(format!(
                "Block payload must be 12 bytes, got {}",
                self.payload.len()
            )));
        }
        let mut payload = &self.payload[..];
        Ok(BlockInfo::new(
            payload.get_u32(),
            payload.get_u32(),
            payload.get_u32(),
        ))
    }

    /// Copy the block carried by a `piece` message into `buf` at the offset
    /// the message declares. Returns the number of bytes copied.
    pub fn parse_piece(&self, piece_index: u32, buf: &mut [u8]) -> Result<usize> {
        if self.id != MessageId::Piece {
            return Err(BittorrentError::FormatError(format!(
                "Expected piece, got {:?}",
                self.id
            )));
        }
        if self.payload.len() < 8 {
            return Err(BittorrentError::FormatError(format!(
                "Piece payload too short: {} < 8",
                self.payload.len()
            )));
        }

        let mut header = &self.payload[..8];
        let index = header.get_u32();
        if index != piece_index {
            return Err(BittorrentError::FormatError(format!(
                "Expected piece #{}, got #{}",
                piece_index, index
            )));
        }

        let begin = header.get_u32() as usize;
        if begin >= buf.len() {
            return Err(BittorrentError::FormatError(format!(
                "Begin offset {} outside piece of {} bytes",
                begin,
                buf.len()
            )));
        }

        let data = &self.payload[8..];
        if begin + data.len() > buf.len() {
            return Err(BittorrentError::FormatError(format!(
                "Block of {} bytes at offset {} overflows piece of {} bytes",
                data.len(),
                begin,
                buf.len()
            )));
        }

        buf[begin..begin + data.len()].copy_from_slice(data);
        Ok(data.len())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} [{}]", self.id, self.payload.len())
    }
}

fn encode_block(block: &BlockInfo) -> Bytes {
    let mut payload = BytesMut::with_capacity(12);
    payload.put_u32(block.piece_index);
    payload.put_u32(block.offset);
    payload.put_u32(block.length);
    payload.freeze()
}
