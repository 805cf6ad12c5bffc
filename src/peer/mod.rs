mod bitfield;
mod connection;
mod message;
mod protocol;

pub use bitfield::Bitfield;
pub use connection::PeerConnection;
pub use message::{BlockInfo, Message, MessageId, MAX_FRAME_LEN};
pub use protocol::{Handshake, PROTOCOL_STRING};

use rand::Rng;

// Peer connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerState {
    /// Whether we are choking the peer
    pub am_choking: bool,
    /// Whether we are interested in the peer
    pub am_interested: bool,
    /// Whether the peer is choking us
    pub peer_choking: bool,
}

impl Default for PeerState {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
        }
    }
}

/// Generate a random peer ID
/// Format: -BD0001-<12 random chars>
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    peer_id[0..8].copy_from_slice(b"-BD0001-");

    let mut rng = rand::thread_rng();
    for byte in &mut peer_id[8..] {
        *byte = rng.gen_range(b'0'..=b'z');
    }

    peer_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_peer_id() {
        let peer_id = generate_peer_id();
        assert_eq!(peer_id.len(), 20);
        assert_eq!(&peer_id[0..8], b"-BD0001-");
        assert!(peer_id[8..].iter().all(|b| (b'0'..=b'z').contains(b)));
    }

    #[test]
    fn test_initial_state_is_choked() {
        let state = PeerState::default();
        assert!(state.peer_choking);
        assert!(state.am_choking);
        assert!(!state.am_interested);
    }
}
