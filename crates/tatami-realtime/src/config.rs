//! Control-plane configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the hub, router, and ticker. Field names follow the
/// `WS_*`/`COMMAND_*` environment variables documented in the deployment
/// guide; the server binary maps them in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Server-initiated ping cadence.
    #[serde(default = "default_ping_interval_seconds")]
    pub ping_interval_seconds: u64,

    /// A connection silent for this long is evicted with code 4000.
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,

    /// Bounded outbound queue per connection.
    #[serde(default = "default_send_queue_size")]
    pub send_queue_size: usize,

    /// A socket write stalled past this evicts the connection with 1013.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Optimistic-concurrency retries before a command fails with Conflict.
    #[serde(default = "default_command_retry_max")]
    pub command_retry_max: u32,

    /// Match duration when creation did not specify one.
    #[serde(default = "default_match_duration_seconds")]
    pub default_match_duration_seconds: u32,

    /// Cadence of durable timer reconciliation while a match runs.
    #[serde(default = "default_timer_reconcile_seconds")]
    pub timer_reconcile_seconds: u64,

    /// Deadline on every store call issued for a command.
    #[serde(default = "default_store_deadline_ms")]
    pub store_deadline_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ping_interval_seconds: default_ping_interval_seconds(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            send_queue_size: default_send_queue_size(),
            send_timeout_ms: default_send_timeout_ms(),
            command_retry_max: default_command_retry_max(),
            default_match_duration_seconds: default_match_duration_seconds(),
            timer_reconcile_seconds: default_timer_reconcile_seconds(),
            store_deadline_ms: default_store_deadline_ms(),
        }
    }
}

impl RealtimeConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn store_deadline(&self) -> Duration {
        Duration::from_millis(self.store_deadline_ms)
    }

    /// Ticker lease TTL; renewed at half the ping interval, so the lease
    /// survives one missed renewal but not two.
    pub fn ticker_lease_ttl(&self) -> Duration {
        Duration::from_secs(self.ping_interval_seconds)
    }

    pub fn ticker_lease_renew_every(&self) -> Duration {
        Duration::from_secs((self.ping_interval_seconds / 2).max(1))
    }
}

fn default_ping_interval_seconds() -> u64 {
    25
}

fn default_idle_timeout_seconds() -> u64 {
    90
}

fn default_send_queue_size() -> usize {
    256
}

fn default_send_timeout_ms() -> u64 {
    2000
}

fn default_command_retry_max() -> u32 {
    3
}

fn default_match_duration_seconds() -> u32 {
    300
}

fn default_timer_reconcile_seconds() -> u64 {
    10
}

fn default_store_deadline_ms() -> u64 {
    2000
}
