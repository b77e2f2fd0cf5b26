//! Connection registry and channel index.
//!
//! One hub per process. It owns every live connection's bounded send queue,
//! the refcounted channel subscriptions (first subscriber opens the bus
//! subscription and its dispatcher task, last one closes them), the
//! heartbeat/idle sweep, and slow-consumer eviction.
//!
//! The hub never blocks on a socket: writes go through `try_send` into the
//! per-connection queue, and the writer task owned by the ws handler drains
//! it with a bounded write timeout.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tatami_store::MatchStore;
use tatami_types::{ChannelId, MatchState, Role};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RealtimeConfig;
use crate::dispatcher;
use crate::error::close_code;
use crate::frames::{ConnectionStatusData, ServerFrame};
use crate::metrics as m;
use crate::router::CommandRouter;
use crate::state::Bus;
use crate::ticker;

pub type ConnectionId = u64;

/// Close requested for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseDirective {
    pub code: u16,
    pub reason: String,
}

/// Registry entry for one live connection.
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub subject_id: String,
    pub roles: Vec<Role>,
    pub channel: ChannelId,
    pub is_referee: bool,
    tx: mpsc::Sender<String>,
    close_tx: watch::Sender<Option<CloseDirective>>,
    last_activity_ms: AtomicI64,
}

impl ConnectionInfo {
    /// Queue a frame without blocking. A `Full` error means the consumer
    /// is not draining; the caller decides about eviction.
    pub fn try_send(&self, payload: String) -> Result<(), mpsc::error::TrySendError<String>> {
        self.tx.try_send(payload)
    }

    pub fn request_close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.close_tx.send(Some(CloseDirective {
            code,
            reason: reason.into(),
        }));
    }

    /// A fresh receiver for the close directive, so the reader side can
    /// stop waiting on a socket that is being torn down.
    pub fn close_signal(&self) -> watch::Receiver<Option<CloseDirective>> {
        self.close_tx.subscribe()
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn idle_ms(&self) -> i64 {
        Utc::now().timestamp_millis() - self.last_activity_ms.load(Ordering::Relaxed)
    }
}

/// Everything the ws handler needs to drive one registered connection.
pub struct ConnectionHandles {
    pub info: Arc<ConnectionInfo>,
    pub outbound: mpsc::Receiver<String>,
    pub close: watch::Receiver<Option<CloseDirective>>,
}

/// Snapshot of match state kept per channel, fed by the dispatcher from
/// frames passing through. It is a read-only hint for the ticker; writes
/// always go through the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedMatch {
    pub state: MatchState,
    pub time_remaining_seconds: u32,
    pub version: u64,
}

#[derive(Default)]
pub struct ChannelCache {
    inner: RwLock<Option<CachedMatch>>,
}

impl ChannelCache {
    pub fn get(&self) -> Option<CachedMatch> {
        *self.inner.read()
    }

    /// Adopt a newer observation; stale versions are ignored.
    pub fn observe(&self, observed: CachedMatch) {
        let mut inner = self.inner.write();
        if inner.map_or(true, |c| observed.version >= c.version) {
            *inner = Some(observed);
        }
    }
}

struct ChannelEntry {
    members: HashSet<ConnectionId>,
    stop: watch::Sender<bool>,
    cache: Arc<ChannelCache>,
}

/// Per-process connection hub.
pub struct Hub {
    config: RealtimeConfig,
    bus: Arc<dyn Bus>,
    store: Arc<dyn MatchStore>,
    router: Arc<CommandRouter>,
    process_id: String,
    next_id: AtomicU64,
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionInfo>>>,
    channels: RwLock<HashMap<ChannelId, ChannelEntry>>,
}

impl Hub {
    pub fn new(
        config: RealtimeConfig,
        bus: Arc<dyn Bus>,
        store: Arc<dyn MatchStore>,
        router: Arc<CommandRouter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            bus,
            store,
            router,
            process_id: Uuid::new_v4().to_string(),
            next_id: AtomicU64::new(1),
            connections: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn MatchStore> {
        &self.store
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    /// Stable identity of this process, used as the lease owner token.
    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Register a connection on a channel.
    ///
    /// The first subscriber of a channel opens the bus subscription (one
    /// dispatcher task per channel per process) and, for match channels,
    /// the countdown ticker.
    pub fn register(
        self: &Arc<Self>,
        subject_id: impl Into<String>,
        roles: Vec<Role>,
        channel: ChannelId,
        is_referee: bool,
    ) -> ConnectionHandles {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, outbound) = mpsc::channel(self.config.send_queue_size);
        let (close_tx, close) = watch::channel(None);

        let info = Arc::new(ConnectionInfo {
            id,
            subject_id: subject_id.into(),
            roles,
            channel: channel.clone(),
            is_referee,
            tx,
            close_tx,
            last_activity_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        });

        self.connections.write().insert(id, info.clone());

        let first_subscriber = {
            let mut channels = self.channels.write();
            let entry = channels.entry(channel.clone()).or_insert_with(|| {
                let (stop, _) = watch::channel(false);
                ChannelEntry {
                    members: HashSet::new(),
                    stop,
                    cache: Arc::new(ChannelCache::default()),
                }
            });
            entry.members.insert(id);
            entry.members.len() == 1
        };

        if first_subscriber {
            self.open_channel_tasks(&channel);
        }

        metrics::gauge!(m::CURRENT_WS_CONNECTIONS).set(self.connections.read().len() as f64);
        info!(
            conn_id = id,
            subject = %info.subject_id,
            channel = %channel,
            referee = is_referee,
            "ws connected"
        );

        ConnectionHandles {
            info,
            outbound,
            close,
        }
    }

    fn open_channel_tasks(self: &Arc<Self>, channel: &ChannelId) {
        let (stop_rx, cache) = {
            let channels = self.channels.read();
            let entry = match channels.get(channel) {
                Some(e) => e,
                None => return,
            };
            (entry.stop.subscribe(), entry.cache.clone())
        };

        tokio::spawn(dispatcher::run(
            self.clone(),
            channel.clone(),
            cache.clone(),
            stop_rx.clone(),
        ));

        if let ChannelId::Match(match_id) = channel {
            tokio::spawn(ticker::run(
                self.clone(),
                match_id.clone(),
                cache,
                stop_rx,
            ));
        }
        debug!(channel = %channel, "channel opened");
    }

    /// Remove a connection; closes the channel subscription when the last
    /// local member leaves. Idempotent, and safe under abnormal teardown.
    pub fn unregister(&self, id: ConnectionId) {
        let info = match self.connections.write().remove(&id) {
            Some(i) => i,
            None => return,
        };

        let channel_closed = {
            let mut channels = self.channels.write();
            let emptied = match channels.get_mut(&info.channel) {
                Some(entry) => {
                    entry.members.remove(&id);
                    entry.members.is_empty()
                }
                None => false,
            };
            if emptied {
                if let Some(entry) = channels.remove(&info.channel) {
                    let _ = entry.stop.send(true);
                }
            }
            emptied
        };

        metrics::gauge!(m::CURRENT_WS_CONNECTIONS).set(self.connections.read().len() as f64);
        if channel_closed {
            debug!(channel = %info.channel, "last local subscriber left, channel closed");
        }
        info!(conn_id = id, channel = %info.channel, "ws disconnected");
    }

    /// Record inbound traffic for the idle sweep.
    pub fn mark_activity(&self, id: ConnectionId) {
        if let Some(info) = self.connections.read().get(&id) {
            info.touch();
        }
    }

    /// Local members of a channel, for fan-out.
    pub fn local_members(&self, channel: &ChannelId) -> Vec<Arc<ConnectionInfo>> {
        let channels = self.channels.read();
        let connections = self.connections.read();
        channels
            .get(channel)
            .map(|entry| {
                entry
                    .members
                    .iter()
                    .filter_map(|id| connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn cache_of(&self, channel: &ChannelId) -> Option<Arc<ChannelCache>> {
        self.channels.read().get(channel).map(|e| e.cache.clone())
    }

    /// Evict one connection with a close code; other connections are never
    /// affected.
    pub fn evict(&self, id: ConnectionId, code: u16, reason: &str) {
        if let Some(info) = self.connections.read().get(&id) {
            warn!(conn_id = id, code, reason, "evicting connection");
            info.request_close(code, reason);
        }
        self.unregister(id);
    }

    /// Deliver a payload to every local member of a channel, in order.
    /// A member whose queue is full is evicted as a slow consumer; the rest
    /// are unaffected.
    pub fn deliver_local(&self, channel: &ChannelId, payload: &str) {
        for conn in self.local_members(channel) {
            match conn.try_send(payload.to_string()) {
                Ok(()) => {
                    metrics::counter!(m::WS_MESSAGES_BROADCASTED).increment(1);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.evict(conn.id, close_code::TRY_AGAIN_LATER, "slow_consumer");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.unregister(conn.id);
                }
            }
        }
    }

    /// Broadcast local connection counts to a match channel. Counts are
    /// per-process: each instance reports its own sockets.
    pub fn broadcast_connection_status(&self, channel: &ChannelId) {
        let match_id = match channel {
            ChannelId::Match(id) => id.clone(),
            ChannelId::Tournament(_) => return,
        };
        let members = self.local_members(channel);
        let referee_count = members.iter().filter(|c| c.is_referee).count();
        let frame = ServerFrame::ConnectionStatus {
            match_id,
            data: ConnectionStatusData {
                connected: true,
                client_count: members.len(),
                referee_count,
                viewer_count: members.len() - referee_count,
            },
            timestamp: Utc::now(),
        };
        if let Ok(payload) = frame.to_json() {
            self.deliver_local(channel, &payload);
        }
    }

    /// Spawn the heartbeat/idle sweep for this hub.
    pub fn spawn_heartbeat(self: &Arc<Self>) {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(hub.config.ping_interval());
            interval.tick().await; // immediate first tick is a no-op
            loop {
                interval.tick().await;
                hub.heartbeat_sweep();
                metrics::gauge!(m::PUBSUB_BACKLOG).set(hub.bus.backlog() as f64);
            }
        });
    }

    fn heartbeat_sweep(&self) {
        let idle_limit_ms = self.config.idle_timeout().as_millis() as i64;
        let ping = ServerFrame::Ping {
            timestamp: Utc::now(),
        };
        let payload = match ping.to_json() {
            Ok(p) => p,
            Err(_) => return,
        };

        let conns: Vec<Arc<ConnectionInfo>> =
            self.connections.read().values().cloned().collect();
        for conn in conns {
            if conn.idle_ms() > idle_limit_ms {
                self.evict(conn.id, close_code::IDLE, "idle");
                continue;
            }
            // Ping loss on a full queue is fine; the slow-consumer path
            // will deal with that connection.
            let _ = conn.try_send(payload.clone());
        }
    }
}
