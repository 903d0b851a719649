//! Connection-level demultiplexer.
//!
//! A [`RelayConnection`] owns one [`Link`]. A reader task decodes inbound
//! frames and routes each to the channel registered for its subscription id;
//! frames for unknown ids are discarded. A writer task drains an outbound
//! queue in order, so frames queued before [`RelayConnection::close`] are
//! still delivered.
//!
//! When the peer closes the link every registered channel is dropped, which
//! subscribers observe as end-of-stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{MessageParseError, Result, SyncError};
use crate::messages::NegFrame;
use crate::transport::{FrameSink, FrameStream, Link};

/// Inbound frames for one subscription.
pub type Subscription = mpsc::UnboundedReceiver<NegFrame>;

#[derive(Default)]
struct Routes {
    closed: bool,
    subscribers: HashMap<String, mpsc::UnboundedSender<NegFrame>>,
}

/// One open connection to an endpoint.
pub struct RelayConnection {
    url: String,
    outbound: Option<mpsc::UnboundedSender<String>>,
    routes: Arc<Mutex<Routes>>,
    reader: JoinHandle<()>,
    writer: Option<JoinHandle<()>>,
}

impl RelayConnection {
    /// Take ownership of `link` and start the reader and writer tasks.
    pub fn spawn(url: &str, link: Link) -> Self {
        let routes = Arc::new(Mutex::new(Routes::default()));
        let (outbound, queue) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(
            url.to_string(),
            link.stream,
            Arc::clone(&routes),
        ));
        let writer = tokio::spawn(write_loop(url.to_string(), link.sink, queue));

        Self {
            url: url.to_string(),
            outbound: Some(outbound),
            routes,
            reader,
            writer: Some(writer),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Register a channel for frames carrying `subscription_id`.
    ///
    /// Re-registering an id replaces the previous channel. On a connection
    /// the peer already closed, the returned channel is immediately at
    /// end-of-stream.
    pub fn subscribe(&self, subscription_id: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        if !routes.closed {
            routes.subscribers.insert(subscription_id.to_string(), tx);
        }
        rx
    }

    /// Remove the channel for `subscription_id`. Later frames for it are
    /// discarded.
    pub fn unsubscribe(&self, subscription_id: &str) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes.subscribers.remove(subscription_id);
    }

    /// Queue a frame for sending.
    pub fn send(&self, frame: &NegFrame) -> Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| SyncError::Connection("connection closed".into()))?;
        trace!(url = %self.url, frame = frame.type_tag(), sub_id = frame.subscription_id(), "send");
        outbound
            .send(frame.encode())
            .map_err(|_| SyncError::Connection("connection closed".into()))
    }

    /// Whether the peer side is still open.
    pub fn is_open(&self) -> bool {
        let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        self.outbound.is_some() && !routes.closed
    }

    /// Flush queued frames, close the link and stop the reader.
    pub async fn close(&mut self) {
        self.outbound = None;
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        self.reader.abort();
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes.closed = true;
        routes.subscribers.clear();
        debug!(url = %self.url, "connection closed");
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        // Dropping `outbound` lets the writer flush and close on its own.
        self.reader.abort();
    }
}

async fn read_loop(url: String, mut stream: Box<dyn FrameStream>, routes: Arc<Mutex<Routes>>) {
    while let Some(next) = stream.next_frame().await {
        let text = match next {
            Ok(text) => text,
            Err(e) => {
                warn!(url = %url, error = %e, "read failed");
                break;
            }
        };
        trace!(url = %url, frame = %text, "recv");

        match NegFrame::decode(&text) {
            Ok(frame) => route(&url, &routes, frame),
            Err(MessageParseError::UnknownType(kind)) => {
                debug!(url = %url, kind = %kind, "ignoring frame of unhandled type");
            }
            Err(e) => {
                let e = SyncError::from(e);
                warn!(url = %url, error = %e, "dropping malformed frame");
            }
        }
    }

    debug!(url = %url, "peer closed connection");
    let mut routes = routes.lock().unwrap_or_else(PoisonError::into_inner);
    routes.closed = true;
    routes.subscribers.clear();
}

fn route(url: &str, routes: &Mutex<Routes>, frame: NegFrame) {
    let routes = routes.lock().unwrap_or_else(PoisonError::into_inner);
    match routes.subscribers.get(frame.subscription_id()) {
        Some(tx) => {
            if tx.send(frame).is_err() {
                trace!(url = %url, "subscriber gone, frame discarded");
            }
        }
        None => {
            trace!(
                url = %url,
                sub_id = frame.subscription_id(),
                "no subscriber for frame, discarded"
            );
        }
    }
}

async fn write_loop(
    url: String,
    mut sink: Box<dyn FrameSink>,
    mut queue: mpsc::UnboundedReceiver<String>,
) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = sink.send(frame).await {
            warn!(url = %url, error = %e, "write failed");
            break;
        }
    }
    if let Err(e) = sink.close().await {
        debug!(url = %url, error = %e, "close failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryNetwork, MemoryPeer};
    use crate::transport::Connector;
    use proptest::prelude::*;

    async fn connect() -> (RelayConnection, MemoryPeer) {
        let network = MemoryNetwork::new();
        let mut listener = network.listen("mem://relay").await;
        let link = network.connect("mem://relay").await.unwrap();
        let peer = listener.accept().await.unwrap();
        (RelayConnection::spawn("mem://relay", link), peer)
    }

    fn msg(sub: &str, body: &str) -> String {
        NegFrame::Msg {
            subscription_id: sub.into(),
            message: body.into(),
        }
        .encode()
    }

    #[tokio::test]
    async fn test_routes_by_subscription_id() {
        let (conn, peer) = connect().await;
        let mut a = conn.subscribe("sub-a");
        let mut b = conn.subscribe("sub-b");

        peer.send(msg("sub-b", "for-b")).unwrap();
        peer.send(msg("sub-a", "for-a")).unwrap();

        let got_a = a.recv().await.unwrap();
        let got_b = b.recv().await.unwrap();
        assert_eq!(got_a.subscription_id(), "sub-a");
        assert_eq!(got_b.subscription_id(), "sub-b");
    }

    #[tokio::test]
    async fn test_foreign_and_malformed_frames_discarded() {
        let (conn, peer) = connect().await;
        let mut sub = conn.subscribe("mine");

        peer.send(msg("someone-else", "x")).unwrap();
        peer.send("{not json").unwrap();
        peer.send(r#"["NOTICE","hi"]"#).unwrap();
        peer.send(msg("mine", "ok")).unwrap();

        let frame = sub.recv().await.unwrap();
        assert_eq!(
            frame,
            NegFrame::Msg {
                subscription_id: "mine".into(),
                message: "ok".into()
            }
        );
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let (conn, peer) = connect().await;
        let mut sub = conn.subscribe("mine");
        conn.unsubscribe("mine");

        peer.send(msg("mine", "late")).unwrap();
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_peer_close_ends_subscriptions() {
        let (conn, mut peer) = connect().await;
        let mut sub = conn.subscribe("mine");
        peer.close();

        assert!(sub.recv().await.is_none());
        assert!(!conn.is_open());
        assert!(conn.subscribe("after").recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_flushes_queued_frames() {
        let (mut conn, mut peer) = connect().await;
        conn.send(&NegFrame::Close {
            subscription_id: "mine".into(),
        })
        .unwrap();
        conn.close().await;

        assert_eq!(peer.recv().await.as_deref(), Some(r#"["NEG-CLOSE","mine"]"#));
        assert!(peer.recv().await.is_none());
        assert!(conn
            .send(&NegFrame::Close {
                subscription_id: "mine".into()
            })
            .is_err());
    }

    proptest! {
        #[test]
        fn prop_demux_isolation(subs in prop::collection::vec(prop_oneof![Just("mine"), Just("other"), Just("third")], 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let (conn, peer) = connect().await;
                let mut mine = conn.subscribe("mine");
                for (i, sub) in subs.iter().enumerate() {
                    peer.send(msg(sub, &i.to_string())).unwrap();
                }
                peer.send(msg("mine", "end")).unwrap();

                let expected: Vec<String> = subs
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| **s == "mine")
                    .map(|(i, _)| i.to_string())
                    .chain(std::iter::once("end".to_string()))
                    .collect();
                let mut got = Vec::new();
                while let Some(NegFrame::Msg { subscription_id, message }) = mine.recv().await {
                    assert_eq!(subscription_id, "mine");
                    let done = message.as_str() == "end";
                    got.push(message.into_inner());
                    if done {
                        break;
                    }
                }
                assert_eq!(got, expected);
            });
        }
    }
}
