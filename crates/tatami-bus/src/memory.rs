//! In-process bus for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tatami_types::ChannelId;
use tokio::sync::mpsc;

use crate::{BusError, BusResult, LeaseManager, PubSubBus, Subscription};

const BUFFER: usize = 1024;

/// Single-process bus with the same ordering contract as Redis pub/sub.
#[derive(Default)]
pub struct MemoryBus {
    senders: Mutex<HashMap<ChannelId, Vec<mpsc::Sender<String>>>>,
    leases: Mutex<HashMap<String, (String, Instant)>>,
    backlog: Arc<AtomicU64>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active subscriber count for a channel, for refcount assertions.
    pub fn subscriber_count(&self, channel: &ChannelId) -> usize {
        self.senders
            .lock()
            .get(channel)
            .map(|v| v.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl PubSubBus for MemoryBus {
    async fn publish(&self, channel: &ChannelId, payload: String) -> BusResult<()> {
        let mut senders = self.senders.lock();
        if let Some(subs) = senders.get_mut(channel) {
            subs.retain(|tx| {
                if tx.is_closed() {
                    return false;
                }
                match tx.try_send(payload.clone()) {
                    Ok(()) => {
                        self.backlog.fetch_add(1, Ordering::Relaxed);
                        true
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => true,
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            });
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &ChannelId) -> BusResult<Subscription> {
        let (tx, rx) = mpsc::channel(BUFFER);
        self.senders
            .lock()
            .entry(channel.clone())
            .or_default()
            .push(tx);
        Ok(Subscription::new(channel.clone(), rx, self.backlog.clone()))
    }

    async fn ping(&self) -> BusResult<()> {
        Ok(())
    }

    fn backlog(&self) -> u64 {
        self.backlog.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LeaseManager for MemoryBus {
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> BusResult<bool> {
        let mut leases = self.leases.lock();
        let now = Instant::now();
        match leases.get(key) {
            Some((_, expires)) if *expires > now => Ok(false),
            _ => {
                leases.insert(key.to_string(), (owner.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> BusResult<bool> {
        let mut leases = self.leases.lock();
        let now = Instant::now();
        match leases.get_mut(key) {
            Some((held_by, expires)) if held_by == owner && *expires > now => {
                *expires = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, owner: &str) -> BusResult<()> {
        let mut leases = self.leases.lock();
        if matches!(leases.get(key), Some((held_by, _)) if held_by == owner) {
            leases.remove(key);
        }
        Ok(())
    }
}
