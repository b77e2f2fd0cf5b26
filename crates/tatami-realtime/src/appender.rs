//! Event-log appender: the optimistic-concurrency retry loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tatami_engine::{apply, ActorContext, Command};
use tatami_store::{MatchStore, StoreError};
use tatami_types::{Match, MatchEvent};
use tracing::debug;

use crate::error::{CommandError, ErrorKind};

/// An accepted command: the authoritative aggregate after the write and the
/// events that were appended, with their assigned sequences.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub match_: Match,
    pub events: Vec<MatchEvent>,
}

/// Wraps store appends with conflict retry.
///
/// On `VersionConflict` the aggregate is reloaded and the pure engine
/// re-runs against the fresh state, up to `retry_max` extra attempts. The
/// engine may legitimately reject on a later attempt (e.g. a competing
/// referee finished the match first); that rejection is returned as-is.
pub struct EventLogAppender {
    store: Arc<dyn MatchStore>,
    retry_max: u32,
    store_deadline: Duration,
}

impl EventLogAppender {
    pub fn new(store: Arc<dyn MatchStore>, retry_max: u32, store_deadline: Duration) -> Self {
        Self {
            store,
            retry_max,
            store_deadline,
        }
    }

    pub async fn execute(
        &self,
        match_id: &str,
        command: &Command,
        actor: &ActorContext,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, CommandError> {
        let mut attempt = 0u32;
        loop {
            let current = self
                .with_deadline(self.store.load_match(match_id))
                .await??;

            let applied = apply(&current, command, actor, now)?;

            let result = self
                .with_deadline(self.store.append_events(
                    &applied.next,
                    current.version,
                    &applied.events,
                ))
                .await?;

            match result {
                Ok(outcome) => {
                    return Ok(CommandOutcome {
                        match_: applied.next,
                        events: outcome.events,
                    });
                }
                Err(StoreError::VersionConflict { .. }) if attempt < self.retry_max => {
                    attempt += 1;
                    debug!(
                        match_id,
                        attempt,
                        command = command.kind_label(),
                        "version conflict, retrying against fresh state"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Apply the per-call store deadline; expiry maps to `StoreTimeout`.
    async fn with_deadline<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<Result<T, StoreError>, CommandError> {
        tokio::time::timeout(self.store_deadline, fut)
            .await
            .map_err(|_| {
                CommandError::new(ErrorKind::StoreTimeout, "store call exceeded its deadline")
            })
    }
}
