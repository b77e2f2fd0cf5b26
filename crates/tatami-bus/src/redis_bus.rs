//! Redis-backed bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Config as PoolConfig, Pool, Runtime};
use futures_util::StreamExt;
use redis::Script;
use serde::{Deserialize, Serialize};
use tatami_types::ChannelId;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{BusError, BusResult, LeaseManager, PubSubBus, Subscription};

/// Bus configuration, sourced from `PUBSUB_URL`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub url: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Capacity of the per-subscription buffer between the Redis reader
    /// task and the dispatcher.
    #[serde(default = "default_subscription_buffer")]
    pub subscription_buffer: usize,
}

impl BusConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_size: default_pool_size(),
            subscription_buffer: default_subscription_buffer(),
        }
    }
}

fn default_pool_size() -> usize {
    16
}

fn default_subscription_buffer() -> usize {
    1024
}

/// Pub/sub bus on Redis: a pooled connection set for commands, plus one
/// dedicated pub/sub connection per subscription.
pub struct RedisBus {
    pool: Pool,
    client: redis::Client,
    subscription_buffer: usize,
    backlog: Arc<AtomicU64>,
}

impl RedisBus {
    /// Connect and verify the server answers PING.
    pub async fn connect(config: &BusConfig) -> BusResult<Self> {
        let pool = PoolConfig::from_url(&config.url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BusError::Connection(e.to_string()))?;
        let client =
            redis::Client::open(config.url.as_str()).map_err(|e| BusError::Connection(e.to_string()))?;

        let bus = Self {
            pool,
            client,
            subscription_buffer: config.subscription_buffer,
            backlog: Arc::new(AtomicU64::new(0)),
        };
        bus.ping().await?;
        info!("connected to Redis pub/sub");
        Ok(bus)
    }
}

#[async_trait]
impl PubSubBus for RedisBus {
    async fn publish(&self, channel: &ChannelId, payload: String) -> BusResult<()> {
        let mut conn = self.pool.get().await?;
        let _: i64 = conn.publish(channel.to_string(), payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &ChannelId) -> BusResult<Subscription> {
        let name = channel.to_string();
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Subscribe(name.clone(), e.to_string()))?;
        pubsub
            .subscribe(&name)
            .await
            .map_err(|e| BusError::Subscribe(name.clone(), e.to_string()))?;

        let (tx, rx) = mpsc::channel(self.subscription_buffer);
        let backlog = self.backlog.clone();
        let counter = backlog.clone();
        let task_name = name.clone();

        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(channel = %task_name, error = %e, "undecodable pub/sub payload");
                        continue;
                    }
                };
                counter.fetch_add(1, Ordering::Relaxed);
                if tx.send(payload).await.is_err() {
                    // Subscriber dropped; the message was never consumed.
                    counter.fetch_sub(1, Ordering::Relaxed);
                    break;
                }
            }
            // Dropping `pubsub` here closes the Redis subscription.
        });

        Ok(Subscription::new(channel.clone(), rx, backlog))
    }

    async fn ping(&self) -> BusResult<()> {
        let mut conn = self.pool.get().await?;
        let pong: String = deadpool_redis::redis::cmd("PING")
            .query_async(&mut *conn)
            .await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(BusError::Redis(format!("unexpected PING reply: {pong}")))
        }
    }

    fn backlog(&self) -> u64 {
        self.backlog.load(Ordering::Relaxed)
    }
}

// Compare-owner-then-expire / compare-owner-then-delete, atomically.
const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

#[async_trait]
impl LeaseManager for RedisBus {
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> BusResult<bool> {
        let mut conn = self.pool.get().await?;
        let reply: Option<String> = deadpool_redis::redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut *conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> BusResult<bool> {
        let mut conn = self.pool.get().await?;
        let renewed: i64 = Script::new(RENEW_SCRIPT)
            .key(key)
            .arg(owner)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut *conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn release(&self, key: &str, owner: &str) -> BusResult<()> {
        let mut conn = self.pool.get().await?;
        let _: i64 = Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(owner)
            .invoke_async(&mut *conn)
            .await?;
        Ok(())
    }
}
