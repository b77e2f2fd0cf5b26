//! PostgreSQL-backed store.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tatami_types::{Match, MatchEvent, MatchEventType, MatchState, Participant, Score};
use tracing::info;
use uuid::Uuid;

use crate::{AppendOutcome, MatchStore, StoreConfig, StoreError, StoreResult};

/// Match store on a PostgreSQL pool.
pub struct PgMatchStore {
    pool: PgPool,
}

impl PgMatchStore {
    /// Connect and verify the connection with a ping.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        info!("connecting to PostgreSQL: {}", config.database_url_masked());
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let store = Self { pool };
        store.ping().await?;
        info!("connected to PostgreSQL");
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run embedded schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        info!("store migrations complete");
        Ok(())
    }
}

#[async_trait::async_trait]
impl MatchStore for PgMatchStore {
    async fn load_match(&self, id: &str) -> StoreResult<Match> {
        let row = sqlx::query_as::<_, MatchRow>("SELECT * FROM matches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        row.try_into()
    }

    async fn append_events(
        &self,
        next: &Match,
        expected_version: u64,
        events: &[MatchEvent],
    ) -> StoreResult<AppendOutcome> {
        let new_version = expected_version + events.len() as u64;
        let mut tx = self.pool.begin().await?;

        // The WHERE version clause is the compare-and-set that linearizes
        // concurrent writers on the same match.
        let updated = sqlx::query(
            r#"
            UPDATE matches SET
                score1 = $2, score2 = $3,
                time_remaining_seconds = $4, state = $5,
                winner_participant_id = $6, updated_at = $7,
                started_at = $8, finished_at = $9, version = $10
            WHERE id = $1 AND version = $11
            "#,
        )
        .bind(&next.id)
        .bind(serde_json::to_value(next.score1)?)
        .bind(serde_json::to_value(next.score2)?)
        .bind(next.time_remaining_seconds as i32)
        .bind(next.state.to_string())
        .bind(&next.winner_participant_id)
        .bind(next.updated_at)
        .bind(next.started_at)
        .bind(next.finished_at)
        .bind(new_version as i64)
        .bind(expected_version as i64)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT version FROM matches WHERE id = $1")
                    .bind(&next.id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Err(match exists {
                None => StoreError::NotFound(next.id.clone()),
                Some(_) => StoreError::VersionConflict {
                    match_id: next.id.clone(),
                    expected: expected_version,
                },
            });
        }

        let mut stored = Vec::with_capacity(events.len());
        for (i, draft) in events.iter().enumerate() {
            let mut ev = draft.clone();
            ev.id = Uuid::new_v4();
            ev.sequence = expected_version + 1 + i as u64;
            sqlx::query(
                r#"
                INSERT INTO match_events
                    (id, match_id, sequence, timestamp, actor_id,
                     participant_id, event_type, value, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(ev.id)
            .bind(&ev.match_id)
            .bind(ev.sequence as i64)
            .bind(ev.timestamp)
            .bind(&ev.actor_id)
            .bind(&ev.participant_id)
            .bind(ev.event_type.to_string())
            .bind(&ev.value)
            .bind(&ev.metadata)
            .execute(&mut *tx)
            .await?;
            stored.push(ev);
        }

        tx.commit().await?;
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
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT * FROM match_events
            WHERE match_id = $1 AND sequence > $2
            ORDER BY sequence ASC
            LIMIT $3
            "#,
        )
        .bind(match_id)
        .bind(since_sequence as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        let row = sqlx::query("SELECT 1 AS one").fetch_one(&self.pool).await?;
        let _: i32 = row.try_get("one")?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct MatchRow {
    id: String,
    tournament_id: String,
    participant1: serde_json::Value,
    participant2: serde_json::Value,
    score1: serde_json::Value,
    score2: serde_json::Value,
    duration_seconds: i32,
    time_remaining_seconds: i32,
    state: String,
    winner_participant_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    version: i64,
}

impl TryFrom<MatchRow> for Match {
    type Error = StoreError;

    fn try_from(row: MatchRow) -> Result<Self, Self::Error> {
        let participant1: Participant = serde_json::from_value(row.participant1)?;
        let participant2: Participant = serde_json::from_value(row.participant2)?;
        let score1: Score = serde_json::from_value(row.score1)?;
        let score2: Score = serde_json::from_value(row.score2)?;
        let state = MatchState::from_str(&row.state).map_err(StoreError::Serialization)?;
        Ok(Match {
            id: row.id,
            tournament_id: row.tournament_id,
            participant1,
            participant2,
            score1,
            score2,
            duration_seconds: row.duration_seconds as u32,
            time_remaining_seconds: row.time_remaining_seconds as u32,
            state,
            winner_participant_id: row.winner_participant_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            version: row.version as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    match_id: String,
    sequence: i64,
    timestamp: DateTime<Utc>,
    actor_id: String,
    participant_id: Option<String>,
    event_type: String,
    value: Option<String>,
    metadata: Option<serde_json::Value>,
}

impl TryFrom<EventRow> for MatchEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let event_type =
            MatchEventType::from_str(&row.event_type).map_err(StoreError::Serialization)?;
        Ok(MatchEvent {
            id: row.id,
            match_id: row.match_id,
            sequence: row.sequence as u64,
            timestamp: row.timestamp,
            actor_id: row.actor_id,
            participant_id: row.participant_id,
            event_type,
            value: row.value,
            metadata: row.metadata,
        })
    }
}
