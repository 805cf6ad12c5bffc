/// Which pieces a peer claims to hold.
///
/// Bits are numbered from the high bit of the first byte. The set only ever
/// grows: a peer's initial bitfield is refined by later `have` messages and
/// nothing clears a bit. Indices past the end of the backing bytes read as
/// missing and are ignored on write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
}

impl Bitfield {
    /// An empty bitfield large enough for `piece_count` pieces.
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: vec![0; piece_count.div_ceil(8)],
        }
    }

    /// Wrap the raw payload of a `bitfield` message.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bits: bytes.into() }
    }

    /// A bitfield with every one of `piece_count` pieces set.
    pub fn full(piece_count: usize) -> Self {
        let mut bitfield = Self::new(piece_count);
        for index in 0..piece_count {
            bitfield.set_piece(index);
        }
        bitfield
    }

    pub fn has_piece(&self, index: usize) -> bool {
        let byte_index = index / 8;
        let bit_index = 7 - (index % 8);

        match self.bits.get(byte_index) {
            Some(byte) => (byte >> bit_index) & 1 == 1,
            None => false,
        }
    }

    pub fn set_piece(&mut self, index: usize) {
        let byte_index = index / 8;
        let bit_index = 7 - (index % 8);

        if let Some(byte) = self.bits.get_mut(byte_index) {
            *byte |= 1 << bit_index;
        }
    }

    /// Number of pieces the peer advertises.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Number of addressable bits.
    pub fn capacity(&self) -> usize {
        self.bits.len() * 8
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}
