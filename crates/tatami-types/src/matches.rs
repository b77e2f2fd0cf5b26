//! Match aggregate and its value types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a match.
///
/// `Finished` and `Cancelled` are terminal: no command may move a match out
/// of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchState {
    Scheduled,
    InProgress,
    Paused,
    Finished,
    Cancelled,
}

impl MatchState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

impl std::fmt::Display for MatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Scheduled => "SCHEDULED",
            Self::InProgress => "IN_PROGRESS",
            Self::Paused => "PAUSED",
            Self::Finished => "FINISHED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MatchState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(Self::Scheduled),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "PAUSED" => Ok(Self::Paused),
            "FINISHED" => Ok(Self::Finished),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown match state: {other}")),
        }
    }
}

/// Scoreboard for one side of a match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub points: u32,
    pub advantages: u32,
    pub penalties: u32,
    pub submissions: u32,
}

impl Score {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Denormalized participant info carried on the match row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
}

/// Authoritative match aggregate.
///
/// `version` equals the sequence of the most recent accepted event and is
/// the compare-and-set token for every write; clients use it to discard
/// stale broadcasts on reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: String,
    pub tournament_id: String,
    pub participant1: Participant,
    pub participant2: Participant,
    pub score1: Score,
    pub score2: Score,
    pub duration_seconds: u32,
    pub time_remaining_seconds: u32,
    pub state: MatchState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_participant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Match {
    /// Whether `participant_id` names one of the two sides.
    pub fn has_participant(&self, participant_id: &str) -> bool {
        self.participant1.id == participant_id || self.participant2.id == participant_id
    }

    /// The score of the named participant, if on this match.
    pub fn score_of(&self, participant_id: &str) -> Option<Score> {
        if self.participant1.id == participant_id {
            Some(self.score1)
        } else if self.participant2.id == participant_id {
            Some(self.score2)
        } else {
            None
        }
    }

    /// The id of the opponent of `participant_id`, if on this match.
    pub fn opponent_of(&self, participant_id: &str) -> Option<&str> {
        if self.participant1.id == participant_id {
            Some(self.participant2.id.as_str())
        } else if self.participant2.id == participant_id {
            Some(self.participant1.id.as_str())
        } else {
            None
        }
    }
}
