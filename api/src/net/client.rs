//! Client side of a session: the link a viewer uses to talk to the broker

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::net::framing::{self, FramingError, MessageError};
use crate::net::protocol::{now_millis, ClientMessage, DecodeError, EncodeError, ServerMessage};
use crate::sim::node::Identity;

/// Inbound messages buffered before the reader stops pulling from the stream
const INBOUND_CAPACITY: usize = 256;
const OUTBOUND_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Ready,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("link is not ready")]
    NotReady,
    #[error("link closed")]
    Closed,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("expected Welcome, got {0}")]
    UnexpectedHandshake(&'static str),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl From<MessageError> for ProtocolError {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::Framing(FramingError::ConnectionClosed) => ProtocolError::Closed,
            MessageError::Framing(e) => ProtocolError::Framing(e),
            MessageError::Encode(e) => ProtocolError::Encode(e),
            MessageError::Decode(e) => ProtocolError::Decode(e),
        }
    }
}

/// What the broker told us on arrival
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Welcome {
    pub identity: Identity,
    pub roster: Vec<Identity>,
    pub count: u32,
}

/// A session link to the broker.
///
/// Sends go through a writer task; received messages are read by a reader
/// task and handed out by [`ReactionClient::next_message`].
pub struct ReactionClient {
    state: LinkState,
    identity: Option<Identity>,
    outbound: Option<mpsc::Sender<ClientMessage>>,
    inbound: Option<mpsc::Receiver<ServerMessage>>,
    connection: Option<wtransport::Connection>,
}

impl ReactionClient {
    pub fn new() -> Self {
        Self {
            state: LinkState::Idle,
            identity: None,
            outbound: None,
            inbound: None,
            connection: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == LinkState::Ready
    }

    /// Identity assigned by the broker, once ready
    pub fn identity(&self) -> Option<Identity> {
        self.identity
    }

    /// Open a WebTransport session to `url`.
    ///
    /// With `cert_digest` the server certificate is pinned by its SHA-256
    /// hash (self-signed dev certificates); otherwise native roots are used.
    pub async fn connect(
        &mut self,
        url: &str,
        cert_digest: Option<[u8; 32]>,
    ) -> Result<Welcome, ProtocolError> {
        use wtransport::tls::Sha256Digest;
        use wtransport::{ClientConfig, Endpoint};

        self.state = LinkState::Connecting;

        let config = match cert_digest {
            Some(digest) => ClientConfig::builder()
                .with_bind_default()
                .with_server_certificate_hashes([Sha256Digest::new(digest)])
                .build(),
            None => ClientConfig::builder()
                .with_bind_default()
                .with_native_certs()
                .build(),
        };

        let result = async {
            let endpoint = Endpoint::client(config).map_err(|e| ProtocolError::Connect(e.to_string()))?;
            let connection = endpoint
                .connect(url)
                .await
                .map_err(|e| ProtocolError::Connect(e.to_string()))?;
            let (send, recv) = connection
                .open_bi()
                .await
                .map_err(|e| ProtocolError::Connect(e.to_string()))?
                .await
                .map_err(|e| ProtocolError::Connect(e.to_string()))?;
            Ok::<_, ProtocolError>((connection, send, recv))
        }
        .await;

        match result {
            Ok((connection, send, recv)) => {
                info!("Connected to {}", url);
                self.connection = Some(connection);
                self.attach(recv, send).await
            }
            Err(e) => {
                self.state = LinkState::Closed;
                Err(e)
            }
        }
    }

    /// Run the session over an already-open stream pair and wait for the
    /// broker's Welcome
    pub async fn attach<R, W>(&mut self, mut recv: R, send: W) -> Result<Welcome, ProtocolError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.state = LinkState::Connecting;

        let welcome = match framing::recv::<_, ServerMessage>(&mut recv).await {
            Ok((ServerMessage::Welcome { identity, roster, count }, _)) => Welcome {
                identity,
                roster,
                count,
            },
            Ok((other, _)) => {
                self.state = LinkState::Closed;
                return Err(ProtocolError::UnexpectedHandshake(other.kind()));
            }
            Err(e) => {
                self.state = LinkState::Closed;
                return Err(e.into());
            }
        };

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(INBOUND_CAPACITY);
        tokio::spawn(read_inbound(recv, in_tx));
        tokio::spawn(write_outbound(send, out_rx));

        self.outbound = Some(out_tx);
        self.inbound = Some(in_rx);
        self.identity = Some(welcome.identity);
        self.state = LinkState::Ready;

        debug!("Joined as {} with {} others", welcome.identity, welcome.roster.len());
        Ok(welcome)
    }

    async fn send(&mut self, message: ClientMessage) -> Result<(), ProtocolError> {
        if self.state != LinkState::Ready {
            return Err(ProtocolError::NotReady);
        }
        let outbound = self.outbound.as_ref().ok_or(ProtocolError::NotReady)?;
        if outbound.send(message).await.is_err() {
            self.close_local();
            return Err(ProtocolError::Closed);
        }
        Ok(())
    }

    /// Tell the broker we reacted
    pub async fn send_reaction(&mut self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::SendReaction).await
    }

    pub async fn ping(&mut self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Ping { timestamp: now_millis() }).await
    }

    /// Say goodbye and close the link
    pub async fn leave(&mut self) -> Result<(), ProtocolError> {
        let result = self.send(ClientMessage::Leave).await;
        self.close_local();
        result
    }

    /// Next message from the broker. `None` once the link is closed.
    pub async fn next_message(&mut self) -> Option<ServerMessage> {
        let inbound = self.inbound.as_mut()?;
        match inbound.recv().await {
            Some(message) => Some(message),
            None => {
                self.close_local();
                None
            }
        }
    }

    fn close_local(&mut self) {
        self.state = LinkState::Closed;
        // Dropping the sender lets the writer flush and finish the stream
        self.outbound = None;
    }
}

impl Default for ReactionClient {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_inbound<R>(mut recv: R, inbound: mpsc::Sender<ServerMessage>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match framing::recv::<_, ServerMessage>(&mut recv).await {
            Ok((message, _)) => {
                if inbound.send(message).await.is_err() {
                    break;
                }
            }
            Err(MessageError::Decode(e)) => {
                warn!("Dropping undecodable message: {}", e);
            }
            Err(e) => {
                debug!("Inbound stream ended: {}", e);
                break;
            }
        }
    }
}

async fn write_outbound<W>(mut send: W, mut outbound: mpsc::Receiver<ClientMessage>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        if let Err(e) = framing::send(&mut send, &message).await {
            debug!("Outbound stream failed: {}", e);
            break;
        }
    }
    let _ = send.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::broker::SessionBroker;
    use crate::net::transport::serve_session;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::RwLock;

    async fn attach(broker: &Arc<RwLock<SessionBroker>>) -> (ReactionClient, Welcome) {
        let (client, server) = tokio::io::duplex(4096);
        let (server_recv, server_send) = tokio::io::split(server);
        tokio::spawn(serve_session(server_recv, server_send, broker.clone(), None, 16));

        let (recv, send) = tokio::io::split(client);
        let mut link = ReactionClient::new();
        let welcome = link.attach(recv, send).await.unwrap();
        (link, welcome)
    }

    async fn next(link: &mut ReactionClient) -> Option<ServerMessage> {
        tokio::time::timeout(Duration::from_secs(2), link.next_message())
            .await
            .expect("timed out")
    }

    #[tokio::test]
    async fn test_not_ready_before_attach() {
        let mut link = ReactionClient::new();
        assert_eq!(link.state(), LinkState::Idle);
        assert!(!link.is_ready());
        assert!(matches!(link.send_reaction().await, Err(ProtocolError::NotReady)));
        assert!(link.next_message().await.is_none());
    }

    #[tokio::test]
    async fn test_two_clients_exchange_reactions() {
        let broker = Arc::new(RwLock::new(SessionBroker::new(10)));
        let (mut a, welcome_a) = attach(&broker).await;
        let (mut b, welcome_b) = attach(&broker).await;

        assert_eq!(welcome_a.identity, Identity(0));
        assert_eq!(welcome_b.roster, vec![Identity(0)]);
        assert!(a.is_ready());
        assert_eq!(b.identity(), Some(Identity(1)));

        assert_eq!(next(&mut a).await, Some(ServerMessage::Join { identity: Identity(1), count: 2 }));

        b.send_reaction().await.unwrap();
        assert_eq!(next(&mut a).await, Some(ServerMessage::ReceiveReaction { from: Identity(1) }));

        b.leave().await.unwrap();
        assert_eq!(b.state(), LinkState::Closed);
        assert!(matches!(b.send_reaction().await, Err(ProtocolError::NotReady)));
        assert_eq!(next(&mut a).await, Some(ServerMessage::Leave { identity: Identity(1), count: 1 }));
    }

    #[tokio::test]
    async fn test_ping() {
        let broker = Arc::new(RwLock::new(SessionBroker::new(10)));
        let (mut a, _) = attach(&broker).await;
        a.ping().await.unwrap();
        assert!(matches!(next(&mut a).await, Some(ServerMessage::Pong { .. })));
    }

    #[tokio::test]
    async fn test_handshake_must_be_welcome() {
        let (client, mut server) = tokio::io::duplex(1024);
        framing::send(&mut server, &ServerMessage::ReceiveReaction { from: Identity(3) })
            .await
            .unwrap();

        let (recv, send) = tokio::io::split(client);
        let mut link = ReactionClient::new();
        let result = link.attach(recv, send).await;
        assert!(matches!(result, Err(ProtocolError::UnexpectedHandshake("receive-reaction"))));
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[tokio::test]
    async fn test_closed_when_server_goes_away() {
        let (client, mut server) = tokio::io::duplex(1024);
        framing::send(
            &mut server,
            &ServerMessage::Welcome { identity: Identity(0), roster: vec![], count: 1 },
        )
        .await
        .unwrap();

        let (recv, send) = tokio::io::split(client);
        let mut link = ReactionClient::new();
        link.attach(recv, send).await.unwrap();
        drop(server);

        assert_eq!(next(&mut link).await, None);
        assert_eq!(link.state(), LinkState::Closed);
        assert!(matches!(link.send_reaction().await, Err(ProtocolError::NotReady)));
    }
}
