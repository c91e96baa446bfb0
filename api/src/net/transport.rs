//! WebTransport server implementation
//!
//! Each accepted connection opens one bidirectional stream. The read half
//! feeds [`SessionBroker`]; a writer task drains the session's outbox onto
//! the send half.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::metrics::Metrics;
use crate::net::broker::SessionBroker;
use crate::net::framing::{self, FramingError, MessageError};
use crate::net::protocol::{now_millis, ClientMessage};
use crate::net::session::outbox;
use crate::net::tls::TlsConfig;
use crate::sim::node::Identity;

/// How long a closing session may spend flushing its outbox
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// WebTransport server
pub struct WebTransportServer {
    config: ServerConfig,
    tls_config: TlsConfig,
    broker: Arc<RwLock<SessionBroker>>,
    metrics: Arc<Metrics>,
}

impl WebTransportServer {
    pub async fn new(
        config: ServerConfig,
        broker: Arc<RwLock<SessionBroker>>,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let tls_config = TlsConfig::load(&config).await?;

        Ok(Self {
            config,
            tls_config,
            broker,
            metrics,
        })
    }

    /// Get the certificate hash for client configuration
    pub fn cert_hash(&self) -> &str {
        self.tls_config.cert_hash()
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind_address, self.config.port)
    }

    /// Accept connections until the endpoint fails
    pub async fn run(self) -> anyhow::Result<()> {
        use wtransport::Endpoint;

        // Unspecified address: dual-stack (IPv4 + IPv6) bind
        let builder = if self.config.bind_address.is_unspecified() {
            wtransport::ServerConfig::builder().with_bind_default(self.config.port)
        } else {
            wtransport::ServerConfig::builder().with_bind_address(self.bind_addr())
        };
        let server_config = builder
            .with_identity(self.tls_config.identity)
            .keep_alive_interval(Some(Duration::from_secs(3)))
            .build();

        let server = Endpoint::server(server_config)?;

        info!("WebTransport server listening on port {}", self.config.port);

        loop {
            let incoming = server.accept().await;

            let broker = self.broker.clone();
            let metrics = self.metrics.clone();
            let capacity = self.config.outbox_capacity;

            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, broker, metrics, capacity).await {
                    warn!("Connection error: {}", e);
                }
            });
        }
    }
}

/// Handle a single WebTransport connection
async fn handle_connection(
    incoming: wtransport::endpoint::IncomingSession,
    broker: Arc<RwLock<SessionBroker>>,
    metrics: Arc<Metrics>,
    outbox_capacity: usize,
) -> anyhow::Result<()> {
    let session_request = incoming.await?;

    debug!(
        "New connection from: {:?}, path: {}",
        session_request.authority(),
        session_request.path()
    );

    let connection = session_request.accept().await?;
    let (send, recv) = connection.accept_bi().await?;

    serve_session(recv, send, broker, Some(metrics), outbox_capacity).await?;
    Ok(())
}

/// Run one session over an already-open stream pair until either side closes.
///
/// Registers with the broker, relays inbound client messages and always
/// unregisters on the way out. Returns the identity the session had.
pub async fn serve_session<R, W>(
    mut recv: R,
    send: W,
    broker: Arc<RwLock<SessionBroker>>,
    metrics: Option<Arc<Metrics>>,
    outbox_capacity: usize,
) -> anyhow::Result<Identity>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = outbox(outbox_capacity);
    let identity = broker.write().await.on_connect(tx)?;

    let mut writer = tokio::spawn(write_outbox(send, rx, metrics.clone(), identity));
    let mut writer_finished = false;

    loop {
        let received = tokio::select! {
            received = framing::recv::<_, ClientMessage>(&mut recv) => received,
            // Outbox closed by an eviction, or the send half failed
            _ = &mut writer => {
                writer_finished = true;
                debug!("Outbound stream for {} ended", identity);
                break;
            }
        };

        let message = match received {
            Ok((message, size)) => {
                if let Some(metrics) = &metrics {
                    metrics.record_received(size + 4);
                }
                message
            }
            Err(MessageError::Decode(e)) => {
                warn!("Failed to decode message from {}: {}", identity, e);
                if let Some(metrics) = &metrics {
                    metrics.malformed_frames.fetch_add(1, Ordering::Relaxed);
                }
                continue;
            }
            Err(MessageError::Framing(FramingError::ConnectionClosed)) => {
                debug!("{} closed its stream", identity);
                break;
            }
            Err(MessageError::Framing(FramingError::MessageTooLarge(len, max))) => {
                warn!("Rejected oversized message from {}: {} bytes (max {})", identity, len, max);
                break;
            }
            Err(e) => {
                debug!("Stream read error for {}: {}", identity, e);
                break;
            }
        };

        match message {
            ClientMessage::SendReaction => {
                let report = broker.write().await.on_reaction_send(identity);
                debug!(
                    "{} reacted: {} delivered, {} dropped",
                    identity,
                    report.delivered,
                    report.dropped.len()
                );
            }
            ClientMessage::Ping { timestamp } => {
                broker.write().await.on_ping(identity, timestamp, now_millis());
            }
            ClientMessage::Leave => {
                debug!("{} asked to leave", identity);
                break;
            }
        }
    }

    // Dropping the session closes its outbox, which lets the writer finish
    broker.write().await.on_disconnect(identity);

    if !writer_finished && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        debug!("Writer for {} did not drain in time", identity);
        writer.abort();
    }

    Ok(identity)
}

/// Drain a session's outbox onto its send stream until the outbox closes or
/// the stream fails
async fn write_outbox<W>(
    mut send: W,
    mut rx: tokio::sync::mpsc::Receiver<crate::net::protocol::ServerMessage>,
    metrics: Option<Arc<Metrics>>,
    identity: Identity,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        match framing::send(&mut send, &message).await {
            Ok(size) => {
                if let Some(metrics) = &metrics {
                    metrics.record_sent(size + 4);
                }
            }
            Err(e) => {
                debug!("Failed to send {} to {}: {}", message.kind(), identity, e);
                break;
            }
        }
    }
    if let Err(e) = send.shutdown().await {
        debug!("Failed to finish stream for {}: {}", identity, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::ServerMessage;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    /// Client side of an in-memory session
    struct TestClient {
        recv: ReadHalf<DuplexStream>,
        send: WriteHalf<DuplexStream>,
        task: JoinHandle<anyhow::Result<Identity>>,
    }

    impl TestClient {
        fn connect(broker: &Arc<RwLock<SessionBroker>>) -> Self {
            Self::connect_with(broker, 4096, 16)
        }

        /// Connect over a stream of `buffer` bytes with an outbox of `capacity`
        fn connect_with(broker: &Arc<RwLock<SessionBroker>>, buffer: usize, capacity: usize) -> Self {
            let (client, server) = tokio::io::duplex(buffer);
            let (server_recv, server_send) = tokio::io::split(server);
            let (recv, send) = tokio::io::split(client);
            let task = tokio::spawn(serve_session(server_recv, server_send, broker.clone(), None, capacity));
            Self { recv, send, task }
        }

        async fn next(&mut self) -> ServerMessage {
            let (message, _) = tokio::time::timeout(Duration::from_secs(2), framing::recv(&mut self.recv))
                .await
                .expect("timed out waiting for a message")
                .unwrap();
            message
        }

        async fn nothing_pending(&mut self) -> bool {
            tokio::time::timeout(
                Duration::from_millis(100),
                framing::recv::<_, ServerMessage>(&mut self.recv),
            )
            .await
            .is_err()
        }

        async fn send(&mut self, message: ClientMessage) {
            framing::send(&mut self.send, &message).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_reaction_reaches_others_only() {
        let broker = Arc::new(RwLock::new(SessionBroker::new(10)));

        let mut a = TestClient::connect(&broker);
        assert_eq!(
            a.next().await,
            ServerMessage::Welcome { identity: Identity(0), roster: vec![], count: 1 }
        );

        let mut b = TestClient::connect(&broker);
        assert_eq!(
            b.next().await,
            ServerMessage::Welcome { identity: Identity(1), roster: vec![Identity(0)], count: 2 }
        );
        assert_eq!(a.next().await, ServerMessage::Join { identity: Identity(1), count: 2 });

        a.send(ClientMessage::SendReaction).await;
        assert_eq!(b.next().await, ServerMessage::ReceiveReaction { from: Identity(0) });
        assert!(b.nothing_pending().await);
        assert!(a.nothing_pending().await);

        // B goes away; A hears about it
        b.send.shutdown().await.unwrap();
        let b_identity = b.task.await.unwrap().unwrap();
        assert_eq!(b_identity, Identity(1));
        assert_eq!(a.next().await, ServerMessage::Leave { identity: Identity(1), count: 1 });
        assert_eq!(broker.read().await.count(), 1);
    }

    #[tokio::test]
    async fn test_explicit_leave() {
        let broker = Arc::new(RwLock::new(SessionBroker::new(10)));
        let mut a = TestClient::connect(&broker);
        a.next().await;
        let mut b = TestClient::connect(&broker);
        b.next().await;
        a.next().await;

        b.send(ClientMessage::Leave).await;
        assert_eq!(b.task.await.unwrap().unwrap(), Identity(1));
        assert_eq!(a.next().await, ServerMessage::Leave { identity: Identity(1), count: 1 });
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let broker = Arc::new(RwLock::new(SessionBroker::new(10)));
        let mut a = TestClient::connect(&broker);
        a.next().await;

        a.send(ClientMessage::Ping { timestamp: 1234 }).await;
        match a.next().await {
            ServerMessage::Pong { client_timestamp, server_timestamp } => {
                assert_eq!(client_timestamp, 1234);
                assert!(server_timestamp > 0);
            }
            other => panic!("expected Pong, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let broker = Arc::new(RwLock::new(SessionBroker::new(10)));
        let metrics = Arc::new(Metrics::new());

        let (client, server) = tokio::io::duplex(4096);
        let (server_recv, server_send) = tokio::io::split(server);
        let (mut recv, mut send) = tokio::io::split(client);
        let task = tokio::spawn(serve_session(
            server_recv,
            server_send,
            broker.clone(),
            Some(metrics.clone()),
            16,
        ));
        let _welcome: (ServerMessage, usize) = framing::recv(&mut recv).await.unwrap();

        framing::write_message(&mut send, &[0xff, 0xff, 0xff, 0xff]).await.unwrap();
        framing::send(&mut send, &ClientMessage::Ping { timestamp: 1 }).await.unwrap();

        let (pong, _): (ServerMessage, usize) = framing::recv(&mut recv).await.unwrap();
        assert!(matches!(pong, ServerMessage::Pong { client_timestamp: 1, .. }));
        assert_eq!(metrics.malformed_frames.load(Ordering::Relaxed), 1);
        assert!(broker.read().await.contains(Identity(0)));

        send.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(broker.read().await.count(), 0);
        assert!(metrics.messages_received.load(Ordering::Relaxed) >= 1);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_session() {
        let broker = Arc::new(RwLock::new(SessionBroker::new(10)));
        let (client, server) = tokio::io::duplex(4096);
        let (server_recv, server_send) = tokio::io::split(server);
        let (_recv, mut send) = tokio::io::split(client);
        let task = tokio::spawn(serve_session(server_recv, server_send, broker.clone(), None, 16));

        send.write_all(&(framing::MAX_MESSAGE_SIZE as u32 + 1).to_le_bytes())
            .await
            .unwrap();

        assert_eq!(task.await.unwrap().unwrap(), Identity(0));
        assert_eq!(broker.read().await.count(), 0);
    }

    #[tokio::test]
    async fn test_stalled_reader_is_evicted_on_join() {
        let broker = Arc::new(RwLock::new(SessionBroker::new(10)));
        let mut a = TestClient::connect(&broker);
        a.next().await;

        // B never reads: its stream holds the Welcome and a reaction or two
        let mut b = TestClient::connect_with(&broker, 64, 1);
        assert_eq!(a.next().await, ServerMessage::Join { identity: Identity(1), count: 2 });

        for _ in 0..10 {
            a.send(ClientMessage::SendReaction).await;
        }
        a.send(ClientMessage::Ping { timestamp: 1 }).await;
        assert!(matches!(a.next().await, ServerMessage::Pong { .. }));

        let mut c = TestClient::connect(&broker);
        assert_eq!(
            c.next().await,
            ServerMessage::Welcome {
                identity: Identity(2),
                roster: vec![Identity(0), Identity(1)],
                count: 3
            }
        );
        assert_eq!(c.next().await, ServerMessage::Leave { identity: Identity(1), count: 2 });
        assert_eq!(a.next().await, ServerMessage::Join { identity: Identity(2), count: 3 });
        assert_eq!(a.next().await, ServerMessage::Leave { identity: Identity(1), count: 2 });
        assert!(!broker.read().await.contains(Identity(1)));

        // B gets what was already queued, then the stream ends without the Join
        let mut seen = Vec::new();
        loop {
            let received = tokio::time::timeout(
                Duration::from_secs(2),
                framing::recv::<_, ServerMessage>(&mut b.recv),
            )
            .await
            .expect("stream of an evicted session should end");
            match received {
                Ok((message, _)) => seen.push(message),
                Err(_) => break,
            }
        }
        assert!(matches!(seen[0], ServerMessage::Welcome { identity: Identity(1), .. }));
        assert!(seen.iter().all(|m| !matches!(m, ServerMessage::Join { .. })));
        assert_eq!(b.task.await.unwrap().unwrap(), Identity(1));
    }

    #[tokio::test]
    async fn test_rejected_at_capacity() {
        let broker = Arc::new(RwLock::new(SessionBroker::new(1)));
        let mut a = TestClient::connect(&broker);
        a.next().await;

        let b = TestClient::connect(&broker);
        assert!(b.task.await.unwrap().is_err());
        assert_eq!(broker.read().await.count(), 1);
    }
}
