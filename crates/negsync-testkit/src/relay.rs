//! Mock endpoints on the in-memory network.
//!
//! A [`RelayHub`] starts [`MockRelay`]s on a [`MemoryNetwork`] and doubles as
//! the [`RecordTransport`] for them, so uploads land in the relay's record
//! set and downloads are served from it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use negsync_core::{Record, RecordId};
use negsync_proto::{MemoryNetwork, MemoryPeer, NegFrame, RecordTransport, Result, SyncError};

use crate::engines::ListResponder;

/// What a scripted relay does with the next OPEN or MSG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Answer with a [`ListResponder`] over the relay's records.
    Respond,
    /// Send a MSG with this body.
    Msg(String),
    /// Send an ERR with this reason.
    Err(String),
    /// Say nothing.
    Silence,
    /// Drop the connection.
    Drop,
    /// Send a MSG under another subscription id.
    WrongSub(String),
}

/// How a relay answers.
#[derive(Debug, Clone)]
pub enum RelayMode {
    /// Always [`Reply::Respond`].
    Responder,
    /// Replay these replies in order, then stay silent.
    Scripted(Vec<Reply>),
}

#[derive(Default)]
struct RelayState {
    records: BTreeMap<RecordId, Record>,
    frames: Vec<String>,
    connections: usize,
    reject_publish: bool,
    stall_fetch: bool,
}

/// Handle to a running mock relay.
#[derive(Clone)]
pub struct MockRelay {
    url: String,
    state: Arc<Mutex<RelayState>>,
}

impl MockRelay {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ids the relay currently holds.
    pub fn ids(&self) -> Vec<RecordId> {
        self.lock().records.keys().copied().collect()
    }

    pub fn has(&self, id: &RecordId) -> bool {
        self.lock().records.contains_key(id)
    }

    /// Every raw frame received, across all connections.
    pub fn frames(&self) -> Vec<String> {
        self.lock().frames.clone()
    }

    /// Received frames that decode.
    pub fn received(&self) -> Vec<NegFrame> {
        self.frames()
            .iter()
            .filter_map(|f| NegFrame::decode(f).ok())
            .collect()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    /// Make every publish to this relay fail.
    pub fn reject_publish(&self) {
        self.lock().reject_publish = true;
    }

    /// Make fetches serve what they have and then never return.
    pub fn stall_fetch(&self) {
        self.lock().stall_fetch = true;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Starts relays and moves records to and from them.
pub struct RelayHub {
    network: Arc<MemoryNetwork>,
    relays: Mutex<HashMap<String, MockRelay>>,
}

impl RelayHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            network: MemoryNetwork::new(),
            relays: Mutex::new(HashMap::new()),
        })
    }

    /// The network to hand to a session as its connector.
    pub fn network(&self) -> Arc<MemoryNetwork> {
        Arc::clone(&self.network)
    }

    /// Start a relay at `url` holding `records`.
    pub async fn start(&self, url: &str, records: Vec<Record>, mode: RelayMode) -> MockRelay {
        let state = RelayState {
            records: records.into_iter().map(|r| (r.id, r)).collect(),
            ..RelayState::default()
        };
        let relay = MockRelay {
            url: url.to_string(),
            state: Arc::new(Mutex::new(state)),
        };

        let mut listener = self.network.listen(url).await;
        let handle = relay.clone();
        tokio::spawn(async move {
            while let Some(peer) = listener.accept().await {
                handle.lock().connections += 1;
                tokio::spawn(serve(handle.clone(), peer, mode.clone()));
            }
        });

        self.relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), relay.clone());
        relay
    }

    fn relay(&self, url: &str) -> Result<MockRelay> {
        self.relays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| SyncError::Connection(format!("no relay at {url}")))
    }
}

async fn serve(relay: MockRelay, mut peer: MemoryPeer, mode: RelayMode) {
    let scripted = matches!(mode, RelayMode::Scripted(_));
    let mut script: VecDeque<Reply> = match mode {
        RelayMode::Responder => VecDeque::new(),
        RelayMode::Scripted(replies) => replies.into(),
    };
    let mut responders: HashMap<String, ListResponder> = HashMap::new();

    while let Some(text) = peer.recv().await {
        relay.lock().frames.push(text.clone());
        let (sub, message) = match NegFrame::decode(&text) {
            Ok(NegFrame::Open {
                subscription_id,
                filter,
                message,
            }) => {
                let held: Vec<RecordId> = relay
                    .lock()
                    .records
                    .values()
                    .filter(|r| filter.matches(r))
                    .map(|r| r.id)
                    .collect();
                responders.insert(subscription_id.clone(), ListResponder::new(held));
                (subscription_id, message)
            }
            Ok(NegFrame::Msg {
                subscription_id,
                message,
            }) => (subscription_id, message),
            Ok(NegFrame::Close { subscription_id }) => {
                responders.remove(&subscription_id);
                continue;
            }
            Ok(NegFrame::Err { .. }) | Err(_) => continue,
        };

        let reply = if scripted {
            script.pop_front().unwrap_or(Reply::Silence)
        } else {
            Reply::Respond
        };
        debug!(url = %relay.url, sub_id = %sub, ?reply, "relay reply");

        let frame = match reply {
            Reply::Respond => match responders.get_mut(&sub) {
                Some(responder) => match responder.respond(message.as_str()) {
                    Ok(body) => NegFrame::Msg {
                        subscription_id: sub,
                        message: body.into(),
                    },
                    Err(e) => NegFrame::Err {
                        subscription_id: sub,
                        reason: e.to_string(),
                    },
                },
                None => NegFrame::Err {
                    subscription_id: sub,
                    reason: "closed: unknown subscription".into(),
                },
            },
            Reply::Msg(body) => NegFrame::Msg {
                subscription_id: sub,
                message: body.into(),
            },
            Reply::Err(reason) => NegFrame::Err {
                subscription_id: sub,
                reason,
            },
            Reply::WrongSub(body) => NegFrame::Msg {
                subscription_id: format!("{sub}-other"),
                message: body.into(),
            },
            Reply::Silence => continue,
            Reply::Drop => {
                peer.close();
                return;
            }
        };
        if peer.send(frame.encode()).is_err() {
            return;
        }
    }
}

#[async_trait]
impl RecordTransport for RelayHub {
    async fn publish(&self, endpoint: &str, record: &Record) -> Result<()> {
        let relay = self.relay(endpoint)?;
        let mut state = relay.lock();
        if state.reject_publish {
            return Err(SyncError::Transport(format!("{endpoint} rejected {}", record.id)));
        }
        state.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn fetch(
        &self,
        endpoint: &str,
        ids: &[RecordId],
        arrivals: mpsc::UnboundedSender<Record>,
    ) -> Result<()> {
        let relay = self.relay(endpoint)?;
        let (found, stall): (Vec<Record>, bool) = {
            let state = relay.lock();
            let found = ids
                .iter()
                .filter_map(|id| state.records.get(id).cloned())
                .collect();
            (found, state.stall_fetch)
        };
        for record in found {
            let _ = arrivals.send(record);
        }
        if stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}
