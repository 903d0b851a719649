//! Transport abstraction for the reconciliation protocol.
//!
//! A transport moves text frames. [`Connector::connect`] yields a [`Link`]:
//! a writable [`FrameSink`] and a readable [`FrameStream`], which
//! [`RelayConnection`](crate::connection::RelayConnection) drives from two
//! background tasks. Implementations may use WebSockets
//! ([`WsConnector`](crate::ws::WsConnector)) or in-process channels
//! ([`memory::MemoryNetwork`]).

use async_trait::async_trait;

use crate::error::Result;

/// The writable half of a link.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Close the link. Further sends fail.
    async fn close(&mut self) -> Result<()>;
}

/// The readable half of a link.
#[async_trait]
pub trait FrameStream: Send {
    /// Next text frame. `None` once the peer has closed the link.
    async fn next_frame(&mut self) -> Option<Result<String>>;
}

/// An open, bidirectional frame link.
pub struct Link {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

/// Opens links to endpoints.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a link to `url`. Failure maps to `SyncError::Connection`.
    async fn connect(&self, url: &str) -> Result<Link>;
}

/// An in-process transport.
///
/// Uses channels to simulate connections between a client and endpoints
/// that registered themselves with [`MemoryNetwork::listen`].
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, RwLock};

    use crate::error::SyncError;

    /// Shared state for the memory transport network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        /// Accept queues for each listening url.
        listeners: RwLock<HashMap<String, mpsc::UnboundedSender<MemoryPeer>>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Start accepting connections for `url`, replacing any prior listener.
        pub async fn listen(&self, url: &str) -> MemoryListener {
            let (tx, rx) = mpsc::unbounded_channel();
            self.listeners.write().await.insert(url.to_string(), tx);
            MemoryListener {
                url: url.to_string(),
                accept: rx,
            }
        }

        /// Stop accepting connections for `url`. Open connections stay up.
        pub async fn unlisten(&self, url: &str) {
            self.listeners.write().await.remove(url);
        }
    }

    #[async_trait]
    impl Connector for MemoryNetwork {
        async fn connect(&self, url: &str) -> Result<Link> {
            let listeners = self.listeners.read().await;
            let accept = listeners
                .get(url)
                .ok_or_else(|| SyncError::Connection(format!("connection refused: {url}")))?;

            let (to_peer, from_client) = mpsc::unbounded_channel();
            let (to_client, from_peer) = mpsc::unbounded_channel();

            accept
                .send(MemoryPeer {
                    url: url.to_string(),
                    outbound: Some(to_client),
                    inbound: from_client,
                })
                .map_err(|_| SyncError::Connection(format!("connection refused: {url}")))?;

            Ok(Link {
                sink: Box::new(MemorySink {
                    tx: Some(to_peer),
                }),
                stream: Box::new(MemoryStream { rx: from_peer }),
            })
        }
    }

    /// Accepts connections made to one url.
    pub struct MemoryListener {
        url: String,
        accept: mpsc::UnboundedReceiver<MemoryPeer>,
    }

    impl MemoryListener {
        pub fn url(&self) -> &str {
            &self.url
        }

        /// Wait for the next incoming connection.
        pub async fn accept(&mut self) -> Option<MemoryPeer> {
            self.accept.recv().await
        }
    }

    /// The endpoint side of an in-memory connection.
    pub struct MemoryPeer {
        url: String,
        outbound: Option<mpsc::UnboundedSender<String>>,
        inbound: mpsc::UnboundedReceiver<String>,
    }

    impl MemoryPeer {
        pub fn url(&self) -> &str {
            &self.url
        }

        /// Send a frame to the client. Fails once either side closed.
        pub fn send(&self, frame: impl Into<String>) -> Result<()> {
            self.outbound
                .as_ref()
                .ok_or_else(|| SyncError::Connection("closed".into()))?
                .send(frame.into())
                .map_err(|_| SyncError::Connection("client disconnected".into()))
        }

        /// Next frame from the client; `None` once the client closed.
        pub async fn recv(&mut self) -> Option<String> {
            self.inbound.recv().await
        }

        /// Drop the connection. The client observes end-of-stream.
        pub fn close(&mut self) {
            self.outbound = None;
            self.inbound.close();
        }
    }

    struct MemorySink {
        tx: Option<mpsc::UnboundedSender<String>>,
    }

    #[async_trait]
    impl FrameSink for MemorySink {
        async fn send(&mut self, frame: String) -> Result<()> {
            self.tx
                .as_ref()
                .ok_or_else(|| SyncError::Connection("closed".into()))?
                .send(frame)
                .map_err(|_| SyncError::Connection("peer disconnected".into()))
        }

        async fn close(&mut self) -> Result<()> {
            self.tx = None;
            Ok(())
        }
    }

    struct MemoryStream {
        rx: mpsc::UnboundedReceiver<String>,
    }

    #[async_trait]
    impl FrameStream for MemoryStream {
        async fn next_frame(&mut self) -> Option<Result<String>> {
            self.rx.recv().await.map(Ok)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;
    use crate::error::SyncError;

    #[tokio::test]
    async fn test_memory_connect_send_recv() {
        let network = MemoryNetwork::new();
        let mut listener = network.listen("mem://relay-a").await;

        let mut link = network.connect("mem://relay-a").await.unwrap();
        let mut peer = listener.accept().await.unwrap();
        assert_eq!(peer.url(), "mem://relay-a");

        link.sink.send("hello".into()).await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("hello"));

        peer.send("world").unwrap();
        assert_eq!(link.stream.next_frame().await.unwrap().unwrap(), "world");
    }

    #[tokio::test]
    async fn test_memory_connect_refused() {
        let network = MemoryNetwork::new();
        let err = network.connect("mem://nowhere").await.err().unwrap();
        assert!(matches!(err, SyncError::Connection(_)));
    }

    #[tokio::test]
    async fn test_peer_close_ends_stream() {
        let network = MemoryNetwork::new();
        let mut listener = network.listen("mem://relay-a").await;

        let mut link = network.connect("mem://relay-a").await.unwrap();
        let mut peer = listener.accept().await.unwrap();
        peer.close();

        assert!(link.stream.next_frame().await.is_none());
        assert!(link.sink.send("late".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_client_close_seen_by_peer() {
        let network = MemoryNetwork::new();
        let mut listener = network.listen("mem://relay-a").await;

        let mut link = network.connect("mem://relay-a").await.unwrap();
        let mut peer = listener.accept().await.unwrap();
        link.sink.close().await.unwrap();

        assert!(peer.recv().await.is_none());
    }
}
