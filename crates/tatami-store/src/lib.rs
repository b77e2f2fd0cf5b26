//! Tatami Store - Match Persistence
//!
//! PostgreSQL persistence for the match aggregate and its append-only event
//! log. The store is the single source of truth: every command re-reads the
//! latest row, and writes go through a compare-and-set on `version` so
//! concurrent referees cannot lose updates.
//!
//! `append_events` is atomic across the snapshot update and the event
//! inserts; event sequences are assigned here, densely, continuing from
//! `expected_version`. That makes the two log invariants structural:
//! sequences are gap-free from 1, and the stored `version` always equals the
//! latest sequence.
//!
//! `MemoryStore` provides the same contract without a database for tests.

mod config;
mod error;
mod memory;
mod pg;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use pg::PgMatchStore;

use async_trait::async_trait;
use tatami_types::{Match, MatchEvent};

/// Result of a successful append: the new authoritative version and the
/// stored events with their assigned ids and sequences.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub new_version: u64,
    pub events: Vec<MatchEvent>,
}

/// Persistence contract for the match aggregate.
///
/// Implementations must guarantee serializability of
/// `(load_match, append_events)` per match id; the Postgres implementation
/// does this with the version compare-and-set, which linearizes writers.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Load the current aggregate.
    async fn load_match(&self, id: &str) -> StoreResult<Match>;

    /// Atomically persist `next` and append `events`, provided the stored
    /// version still equals `expected_version`. Drafts get their sequence
    /// (`expected_version + 1 ..`) and id assigned here.
    async fn append_events(
        &self,
        next: &Match,
        expected_version: u64,
        events: &[MatchEvent],
    ) -> StoreResult<AppendOutcome>;

    /// Events with `sequence > since_sequence`, ascending, at most `limit`.
    async fn recent_events(
        &self,
        match_id: &str,
        since_sequence: u64,
        limit: u32,
    ) -> StoreResult<Vec<MatchEvent>>;

    /// Trivial liveness query for the health endpoint.
    async fn ping(&self) -> StoreResult<()>;
}
