//! In-memory store for tests and local development.

use std::collections::HashMap;

use parking_lot::Mutex;
use tatami_types::{Match, MatchEvent};
use uuid::Uuid;

use crate::{AppendOutcome, MatchStore, StoreError, StoreResult};

struct Entry {
    current: Match,
    events: Vec<MatchEvent>,
}

/// Hash-map store with the same CAS semantics as the Postgres
/// implementation. The mutex makes `append_events` serializable per
/// process, which is all the contract asks of a single backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a match; the control plane itself never creates matches.
    pub fn insert(&self, m: Match) {
        self.inner.lock().insert(
            m.id.clone(),
            Entry {
                current: m,
                events: Vec::new(),
            },
        );
    }

    /// All events appended so far, for assertions.
    pub fn events_of(&self, match_id: &str) -> Vec<MatchEvent> {
        self.inner
            .lock()
            .get(match_id)
            .map(|e| e.events.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl MatchStore for MemoryStore {
    async fn load_match(&self, id: &str) -> StoreResult<Match> {
        self.inner
            .lock()
            .get(id)
            .map(|e| e.current.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn append_events(
        &self,
        next: &Match,
        expected_version: u64,
        events: &[MatchEvent],
    ) -> StoreResult<AppendOutcome> {
        let mut inner = self.inner.lock();
        let entry = inner
            .get_mut(&next.id)
            .ok_or_else(|| StoreError::NotFound(next.id.clone()))?;

        if entry.current.version != expected_version {
            return Err(StoreError::VersionConflict {
                match_id: next.id.clone(),
                expected: expected_version,
            });
        }

        let mut stored = Vec::with_capacity(events.len());
        for (i, draft) in events.iter().enumerate() {
            let mut ev = draft.clone();
            ev.id = Uuid::new_v4();
            ev.sequence = expected_version + 1 + i as u64;
            entry.events.push(ev.clone());
            stored.push(ev);
        }

        let new_version = expected_version + events.len() as u64;
        entry.current = next.clone();
        entry.current.version = new_version;

        Ok(AppendOutcome {
            new_version,
            events: stored,
        })
    }

    async fn recent_events(
        &self,
        match_id: &str,
        since_sequence: u64,
        limit: u32,
    ) -> StoreResult<Vec<MatchEvent>> {
        let inner = self.inner.lock();
        let entry = inner
            .get(match_id)
            .ok_or_else(|| StoreError::NotFound(match_id.to_string()))?;
        Ok(entry
            .events
            .iter()
            .filter(|e| e.sequence > since_sequence)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
