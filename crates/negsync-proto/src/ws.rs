//! WebSocket transport.
//!
//! Text frames map one-to-one onto WebSocket text messages. Binary messages
//! holding UTF-8 are accepted as text; ping/pong are handled by the
//! WebSocket layer. `wss://` urls are secured with rustls on the ring
//! provider, trusting the webpki root set.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector as TlsConnector};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::{Result, SyncError};
use crate::transport::{Connector, FrameSink, FrameStream, Link};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket links.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Link> {
        let tls = TlsConnector::Rustls(Arc::new(client_config()?));
        let (ws, response) = connect_async_tls_with_config(url, None, false, Some(tls))
            .await
            .map_err(|e| SyncError::Connection(format!("{url}: {e}")))?;
        debug!(url = %url, status = %response.status(), "websocket connected");

        let (sink, stream) = ws.split();
        Ok(Link {
            sink: Box::new(WsSink { inner: sink }),
            stream: Box::new(WsFrames { inner: stream }),
        })
    }
}

fn client_config() -> Result<rustls::ClientConfig> {
    let roots = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| SyncError::Connection(format!("tls setup: {e}")))?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(config)
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.inner
            .send(Message::Text(frame))
            .await
            .map_err(|e| SyncError::Connection(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.inner
            .close()
            .await
            .map_err(|e| SyncError::Connection(e.to_string()))
    }
}

struct WsFrames {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsFrames {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => trace!("skipping non-UTF-8 binary message"),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(SyncError::Connection(e.to_string()))),
            }
        }
    }
}
