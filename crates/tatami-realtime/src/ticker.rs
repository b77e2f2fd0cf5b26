//! Per-match countdown ticker.
//!
//! Runs for every match channel with at least one local subscriber, but
//! only ticks while this process holds the match's lease, so a horizontally
//! scaled deployment emits exactly one tick stream per match. The in-memory
//! countdown is advisory; a durable `TIMER_UPDATE` event reconciles the
//! store every `timer_reconcile_seconds` and at zero, where the synthetic
//! timer-expired command finishes the match.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tatami_bus::ticker_lease_key;
use tatami_engine::Command;
use tatami_types::{ChannelId, MatchState};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ErrorKind;
use crate::frames::{ServerFrame, TimerFrameData};
use crate::hub::{CachedMatch, ChannelCache, Hub};
use crate::metrics as m;

pub async fn run(
    hub: Arc<Hub>,
    match_id: String,
    cache: Arc<ChannelCache>,
    mut stop: watch::Receiver<bool>,
) {
    let lease_key = ticker_lease_key(&match_id);
    let owner = hub.process_id().to_string();
    let ttl = hub.config().ticker_lease_ttl();
    let renew_every = hub.config().ticker_lease_renew_every();
    let reconcile_every = hub.config().timer_reconcile_seconds.max(1);
    let channel = ChannelId::for_match(&match_id);

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    // Consume the interval's immediate first fire; the first countdown
    // tick lands one second after the channel opens.
    interval.tick().await;
    let mut owned = false;
    let mut last_renew = Instant::now();
    let mut local: Option<CachedMatch> = None;
    let mut ticks_since_reconcile: u64 = 0;

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {}
        }
        if *stop.borrow() {
            break;
        }

        // Lease management first: only the owner may tick.
        if !owned {
            match hub.bus().acquire(&lease_key, &owner, ttl).await {
                Ok(true) => {
                    owned = true;
                    last_renew = Instant::now();
                    local = load_snapshot(&hub, &match_id).await;
                    info!(match_id = %match_id, "ticker lease acquired");
                }
                Ok(false) => continue,
                Err(e) => {
                    warn!(match_id = %match_id, error = %e, "lease acquire failed");
                    continue;
                }
            }
        } else if last_renew.elapsed() >= renew_every {
            match hub.bus().renew(&lease_key, &owner, ttl).await {
                Ok(true) => last_renew = Instant::now(),
                Ok(false) | Err(_) => {
                    // Lost the lease; another instance takes over.
                    warn!(match_id = %match_id, "ticker lease lost");
                    owned = false;
                    local = None;
                    continue;
                }
            }
        }

        // Adopt anything newer the dispatcher observed (a referee may have
        // paused or reset the match from any instance).
        if let Some(observed) = cache.get() {
            if local.map_or(true, |l| observed.version > l.version) {
                local = Some(observed);
                ticks_since_reconcile = 0;
            }
        }

        let Some(mut current) = local else {
            continue;
        };
        if current.state != MatchState::InProgress || current.time_remaining_seconds == 0 {
            continue;
        }

        current.time_remaining_seconds -= 1;
        ticks_since_reconcile += 1;
        local = Some(current);
        publish_advisory(&hub, &channel, &match_id, current).await;

        if current.time_remaining_seconds == 0 {
            match hub
                .router()
                .execute_system(&match_id, &Command::TimerExpired)
                .await
            {
                Ok(outcome) => {
                    debug!(match_id = %match_id, "timer expired, match finished");
                    local = Some(CachedMatch {
                        state: outcome.match_.state,
                        time_remaining_seconds: outcome.match_.time_remaining_seconds,
                        version: outcome.match_.version,
                    });
                }
                // Someone else already closed the match; drop the stale
                // snapshot and re-learn from the next broadcast.
                Err(e) if e.kind == ErrorKind::Conflict => {
                    local = None;
                }
                Err(e) => {
                    warn!(match_id = %match_id, error = %e, "timer expiry command failed");
                    local = None;
                }
            }
            ticks_since_reconcile = 0;
        } else if ticks_since_reconcile >= reconcile_every {
            let seconds = current.time_remaining_seconds;
            match hub
                .router()
                .execute_system(&match_id, &Command::TimerSet { seconds })
                .await
            {
                Ok(outcome) => {
                    local = Some(CachedMatch {
                        state: outcome.match_.state,
                        time_remaining_seconds: outcome.match_.time_remaining_seconds,
                        version: outcome.match_.version,
                    });
                }
                Err(e) => {
                    warn!(match_id = %match_id, error = %e, "durable timer reconcile failed");
                    local = None;
                }
            }
            ticks_since_reconcile = 0;
        }
    }

    if owned {
        if let Err(e) = hub.bus().release(&lease_key, &owner).await {
            warn!(match_id = %match_id, error = %e, "lease release failed");
        }
    }
    debug!(match_id = %match_id, "ticker stopped");
}

async fn load_snapshot(hub: &Arc<Hub>, match_id: &str) -> Option<CachedMatch> {
    match hub.store().load_match(match_id).await {
        Ok(m) => Some(CachedMatch {
            state: m.state,
            time_remaining_seconds: m.time_remaining_seconds,
            version: m.version,
        }),
        Err(e) => {
            warn!(match_id = %match_id, error = %e, "ticker could not load match");
            None
        }
    }
}

/// Lightweight advisory frame; clients treat it as cosmetic between durable
/// timer events, so it reuses the last durable version.
async fn publish_advisory(hub: &Arc<Hub>, channel: &ChannelId, match_id: &str, c: CachedMatch) {
    let frame = ServerFrame::TimerUpdate {
        match_id: match_id.to_string(),
        data: TimerFrameData {
            time_remaining_seconds: c.time_remaining_seconds,
        },
        timestamp: Utc::now(),
        version: c.version,
    };
    if let Ok(payload) = frame.to_json() {
        if let Err(e) = hub.bus().publish(channel, payload).await {
            warn!(match_id = %match_id, error = %e, "advisory timer publish failed");
        } else {
            metrics::counter!(m::WS_MESSAGES_PUBLISHED).increment(1);
        }
    }
}
