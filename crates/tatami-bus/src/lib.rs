//! Tatami Bus - Cross-Instance Pub/Sub
//!
//! Horizontally scaled replicas reconcile through this bus: every accepted
//! command is published to its channel, and each process fans the stream
//! out to its local sockets. Within one channel the bus preserves publish
//! order, which is what lets all surviving subscribers observe the same
//! frame order.
//!
//! The bus also hands out short-TTL leases so exactly one process owns the
//! countdown ticker for any given match (§ timer ownership in the design
//! notes).
//!
//! `RedisBus` is the production implementation; `MemoryBus` gives the hub
//! and dispatcher tests the same contract in-process.

mod error;
mod memory;
mod redis_bus;

pub use error::{BusError, BusResult};
pub use memory::MemoryBus;
pub use redis_bus::{BusConfig, RedisBus};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tatami_types::ChannelId;
use tokio::sync::mpsc;

/// A live subscription to one channel. Dropping it tears the subscription
/// down; payloads arrive in publish order.
pub struct Subscription {
    channel: ChannelId,
    rx: mpsc::Receiver<String>,
    backlog: Arc<AtomicU64>,
}

impl Subscription {
    pub(crate) fn new(
        channel: ChannelId,
        rx: mpsc::Receiver<String>,
        backlog: Arc<AtomicU64>,
    ) -> Self {
        Self {
            channel,
            rx,
            backlog,
        }
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Next payload, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<String> {
        let msg = self.rx.recv().await;
        if msg.is_some() {
            self.backlog.fetch_sub(1, Ordering::Relaxed);
        }
        msg
    }
}

/// Publish/subscribe contract.
#[async_trait]
pub trait PubSubBus: Send + Sync {
    /// Publish a payload to a channel, reaching every process including
    /// this one.
    async fn publish(&self, channel: &ChannelId, payload: String) -> BusResult<()>;

    /// Open a subscription to a channel.
    async fn subscribe(&self, channel: &ChannelId) -> BusResult<Subscription>;

    /// Liveness probe for the health endpoint.
    async fn ping(&self) -> BusResult<()>;

    /// Payloads received but not yet consumed by local subscribers, summed
    /// across this process's subscriptions.
    fn backlog(&self) -> u64;
}

/// Short-TTL lease manager for per-match ticker ownership. Acquire wins at
/// most one owner; renew and release are no-ops for a non-owner.
#[async_trait]
pub trait LeaseManager: Send + Sync {
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> BusResult<bool>;
    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> BusResult<bool>;
    async fn release(&self, key: &str, owner: &str) -> BusResult<()>;
}

/// Lease key for a match ticker.
pub fn ticker_lease_key(match_id: &str) -> String {
    format!("tatami:ticker-lease:{match_id}")
}
