//! Broadcast dispatcher: one task per active bus subscription.
//!
//! Frames arrive in the bus's channel order and are handed to every local
//! subscriber's queue in that order, so all surviving connections observe
//! the same sequence. Delivery is best-effort per connection: a full queue
//! evicts that connection, never stalls the others, and never drops a
//! frame for a healthy one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tatami_types::ChannelId;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::frames::FrameProbe;
use crate::hub::{CachedMatch, ChannelCache, Hub};
use crate::metrics as m;

pub async fn run(
    hub: Arc<Hub>,
    channel: ChannelId,
    cache: Arc<ChannelCache>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            return;
        }

        let mut sub = match hub.bus().subscribe(&channel).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(channel = %channel, error = %e, "bus subscribe failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    _ = stop.changed() => return,
                }
            }
        };
        debug!(channel = %channel, "dispatcher running");

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!(channel = %channel, "dispatcher stopped");
                        return;
                    }
                }
                msg = sub.recv() => {
                    match msg {
                        Some(payload) => {
                            observe(&payload, &cache);
                            hub.deliver_local(&channel, &payload);
                        }
                        // Subscription lost (e.g. Redis hiccup): resubscribe.
                        None => {
                            warn!(channel = %channel, "bus subscription ended, reconnecting");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Record broadcast latency and refresh the channel's state cache from the
/// frame, without a full deserialize.
fn observe(payload: &str, cache: &ChannelCache) {
    let probe: FrameProbe = match serde_json::from_str(payload) {
        Ok(p) => p,
        Err(_) => return,
    };

    if let Some(published_at) = probe.timestamp {
        let latency_ms = (Utc::now() - published_at).num_milliseconds().max(0);
        metrics::histogram!(m::BROADCAST_LATENCY_MS).record(latency_ms as f64);
    }

    if probe.frame_type == "MATCH_UPDATE" {
        if let (Some(version), Some(data)) = (probe.version, probe.data) {
            if let Some(snapshot) = data.match_ {
                cache.observe(CachedMatch {
                    state: snapshot.state,
                    time_remaining_seconds: snapshot.time_remaining_seconds,
                    version,
                });
            }
        }
    }
}
