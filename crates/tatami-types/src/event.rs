//! Immutable match event records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of an appended match event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchEventType {
    #[serde(rename = "POINTS_2")]
    Points2,
    Advantage,
    Penalty,
    Submission,
    Start,
    Stop,
    Reset,
    Comment,
    MatchCreated,
    StateChange,
    TimerUpdate,
    AutoFinish,
}

impl std::fmt::Display for MatchEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Points2 => "POINTS_2",
            Self::Advantage => "ADVANTAGE",
            Self::Penalty => "PENALTY",
            Self::Submission => "SUBMISSION",
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::Reset => "RESET",
            Self::Comment => "COMMENT",
            Self::MatchCreated => "MATCH_CREATED",
            Self::StateChange => "STATE_CHANGE",
            Self::TimerUpdate => "TIMER_UPDATE",
            Self::AutoFinish => "AUTO_FINISH",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MatchEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "POINTS_2" => Ok(Self::Points2),
            "ADVANTAGE" => Ok(Self::Advantage),
            "PENALTY" => Ok(Self::Penalty),
            "SUBMISSION" => Ok(Self::Submission),
            "START" => Ok(Self::Start),
            "STOP" => Ok(Self::Stop),
            "RESET" => Ok(Self::Reset),
            "COMMENT" => Ok(Self::Comment),
            "MATCH_CREATED" => Ok(Self::MatchCreated),
            "STATE_CHANGE" => Ok(Self::StateChange),
            "TIMER_UPDATE" => Ok(Self::TimerUpdate),
            "AUTO_FINISH" => Ok(Self::AutoFinish),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// One entry in a match's append-only audit log.
///
/// `sequence` is dense per match, starting at 1; the match's `version`
/// always equals the sequence of its latest event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEvent {
    pub id: Uuid,
    pub match_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    pub event_type: MatchEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl MatchEvent {
    /// A draft event carries `sequence = 0` and a nil `id` until the store
    /// assigns both at append time. Drafts are deterministic so the engine
    /// stays a pure function of its inputs.
    pub fn draft(
        match_id: impl Into<String>,
        actor_id: impl Into<String>,
        event_type: MatchEventType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::nil(),
            match_id: match_id.into(),
            sequence: 0,
            timestamp: now,
            actor_id: actor_id.into(),
            participant_id: None,
            event_type,
            value: None,
            metadata: None,
        }
    }

    pub fn with_participant(mut self, participant_id: impl Into<String>) -> Self {
        self.participant_id = Some(participant_id.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
