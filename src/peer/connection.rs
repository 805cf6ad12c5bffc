use super::{Bitfield, BlockInfo, Handshake, Message, MessageId, PeerState};
use crate::client::ClientConfig;
use crate::error::{BittorrentError, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Manages a connection to a peer
///
/// A connection is only handed out after the handshake succeeded and the
/// peer's initial bitfield arrived. Every read and write races the
/// cancellation token and, when one is set, the current deadline.
pub struct PeerConnection<S = TcpStream> {
    addr: SocketAddr,
    stream: S,
    state: PeerState,
    peer_id: [u8; 20],
    bitfield: Bitfield,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl PeerConnection<TcpStream> {
    /// Connect to a peer, perform the handshake and receive its bitfield
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        config: &ClientConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        info!("Connecting to peer: {}", addr);

        let deadline = Instant::now() + config.connect_timeout;
        let stream = guard(&cancel, Some(deadline), async {
            TcpStream::connect(addr).await.map_err(|e| {
                BittorrentError::ConnectionError(format!("Failed to connect to {}: {}", addr, e))
            })
        })
        .await?;

        Self::establish(stream, addr, info_hash, config, cancel).await
    }
}

impl<S> PeerConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the handshake and bitfield exchange over an already open stream
    pub async fn establish(
        stream: S,
        addr: SocketAddr,
        info_hash: [u8; 20],
        config: &ClientConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut conn = Self {
            addr,
            stream,
            state: PeerState::default(),
            peer_id: [0u8; 20],
            bitfield: Bitfield::default(),
            deadline: None,
            cancel,
        };

        let handshake = conn
            .handshake(info_hash, config.peer_id, config.handshake_timeout)
            .await?;
        conn.peer_id = handshake.peer_id;
        info!("Completed handshake with {}", addr);

        conn.bitfield = conn.receive_bitfield(config.bitfield_timeout).await?;
        debug!(
            "Peer {} advertises {} pieces",
            addr,
            conn.bitfield.count()
        );

        Ok(conn)
    }

    async fn handshake(
        &mut self,
        info_hash: [u8; 20],
        our_peer_id: [u8; 20],
        timeout: Duration,
    ) -> Result<Handshake> {
        self.set_deadline(Some(Instant::now() + timeout));
        let result = self.exchange_handshake(info_hash, our_peer_id).await;
        self.set_deadline(None);
        result
    }

    async fn exchange_handshake(
        &mut self,
        info_hash: [u8; 20],
        our_peer_id: [u8; 20],
    ) -> Result<Handshake> {
        let request = Handshake::new(info_hash, our_peer_id).to_bytes();
        let Self {
            stream,
            cancel,
            deadline,
            ..
        } = &mut *self;

        guard(cancel, *deadline, async move {
            stream.write_all(&request).await?;
            debug!("Sent handshake");
            Handshake::read_from(stream).await
        })
        .await
        .and_then(|peer| {
            peer.verify_info_hash(&info_hash)?;
            Ok(peer)
        })
    }

    async fn receive_bitfield(&mut self, timeout: Duration) -> Result<Bitfield> {
        self.set_deadline(Some(Instant::now() + timeout));
        let result = self.receive_message().await;
        self.set_deadline(None);

        match result? {
            Some(message) if message.id == MessageId::Bitfield => {
                Ok(Bitfield::from_bytes(message.payload.to_vec()))
            }
            Some(message) => Err(BittorrentError::ProtocolError(format!(
                "Expected bitfield but got {:?}",
                message.id
            ))),
            None => Err(BittorrentError::ProtocolError(
                "Expected bitfield but got keep-alive".to_string(),
            )),
        }
    }

    /// Send a message to the peer
    pub async fn send_message(&mut self, message: &Message) -> Result<()> {
        let bytes = message.to_bytes();
        let Self {
            stream,
            cancel,
            deadline,
            ..
        } = &mut *self;

        guard(cancel, *deadline, async move {
            stream.write_all(&bytes).await?;
            Ok::<_, BittorrentError>(())
        })
        .await?;

        // Update our state based on what we sent
        match message.id {
            MessageId::Choke => self.state.am_choking = true,
            MessageId::Unchoke => self.state.am_choking = false,
            MessageId::Interested => self.state.am_interested = true,
            MessageId::NotInterested => self.state.am_interested = false,
            _ => {}
        }

        debug!("Sent message to {}: {:?}", self.addr, message);
        Ok(())
    }

    /// Receive a message from the peer. `None` is a keep-alive.
    pub async fn receive_message(&mut self) -> Result<Option<Message>> {
        let Self {
            stream,
            cancel,
            deadline,
            ..
        } = &mut *self;

        let message = guard(cancel, *deadline, Message::read_from(stream)).await?;
        debug!("Received message from {}: {:?}", self.addr, message);
        Ok(message)
    }

    /// Apply the peer-side effects of an incoming message (choke state and `have`)
    pub fn observe(&mut self, message: &Message) -> Result<()> {
        match message.id {
            MessageId::Choke => self.state.peer_choking = true,
            MessageId::Unchoke => self.state.peer_choking = false,
            MessageId::Have => {
                let index = message.parse_have()?;
                self.bitfield.set_piece(index as usize);
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn send_request(&mut self, index: u32, begin: u32, length: u32) -> Result<()> {
        self.send_message(&Message::request(BlockInfo::new(index, begin, length)))
            .await
    }

    pub async fn send_have(&mut self, index: u32) -> Result<()> {
        self.send_message(&Message::have(index)).await
    }

    pub async fn send_interested(&mut self) -> Result<()> {
        self.send_message(&Message::signal(MessageId::Interested))
            .await
    }

    pub async fn send_unchoke(&mut self) -> Result<()> {
        self.send_message(&Message::signal(MessageId::Unchoke)).await
    }

    /// Apply `deadline` to every following read and write until cleared
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Check if peer has a specific piece
    pub fn has_piece(&self, piece_index: usize) -> bool {
        self.bitfield.has_piece(piece_index)
    }

    pub fn is_choked(&self) -> bool {
        self.state.peer_choking
    }

    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    pub fn state(&self) -> &PeerState {
        &self.state
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn peer_id(&self) -> &[u8; 20] {
        &self.peer_id
    }
}

/// Drive `fut` unless cancellation or the deadline comes first.
async fn guard<T, F>(cancel: &CancellationToken, deadline: Option<Instant>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let bounded = async {
        match deadline {
            Some(deadline) => match timeout_at(deadline, fut).await {
                Ok(result) => result,
                Err(_) => Err(BittorrentError::ConnectionError(
                    "Deadline exceeded".to_string(),
                )),
            },
            None => fut.await,
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(BittorrentError::Cancelled),
        result = bounded => result,
    }
}
