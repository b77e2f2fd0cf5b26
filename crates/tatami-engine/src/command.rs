//! Commands, actors, and rejections.

use serde::{Deserialize, Serialize};
use tatami_types::{MatchState, Role};
use thiserror::Error;

/// Scoreboard mutation kinds a referee can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreKind {
    #[serde(rename = "POINTS_2")]
    Points2,
    Advantage,
    Penalty,
    Submission,
}

impl std::fmt::Display for ScoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Points2 => "POINTS_2",
            Self::Advantage => "ADVANTAGE",
            Self::Penalty => "PENALTY",
            Self::Submission => "SUBMISSION",
        };
        write!(f, "{s}")
    }
}

/// An intent to mutate one match.
///
/// `TimerExpired` is synthetic: only the hub ticker issues it, when the
/// in-memory countdown reaches zero.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Pause,
    Reset,
    End,
    Cancel,
    Score {
        kind: ScoreKind,
        participant_id: String,
    },
    TimerSet {
        seconds: u32,
    },
    TimerExpired,
    Comment {
        text: String,
    },
}

impl Command {
    /// Stable label used for metrics and logs.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Reset => "reset",
            Self::End => "end",
            Self::Cancel => "cancel",
            Self::Score { .. } => "score",
            Self::TimerSet { .. } => "timer_set",
            Self::TimerExpired => "timer_expired",
            Self::Comment { .. } => "comment",
        }
    }
}

/// The principal a command is applied on behalf of.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorContext {
    pub actor_id: String,
    pub roles: Vec<Role>,
}

impl ActorContext {
    pub fn new(actor_id: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            actor_id: actor_id.into(),
            roles,
        }
    }

    /// The ticker and other internal machinery act as `system`, which holds
    /// full mutation privilege.
    pub fn system() -> Self {
        Self::new("system", vec![Role::Admin])
    }

    pub fn can_mutate(&self) -> bool {
        self.roles.iter().any(Role::can_mutate)
    }
}

/// Why the engine refused a command. A rejected command produces no events
/// and leaves the aggregate untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("command {command} is not valid in state {from}")]
    InvalidTransition {
        from: MatchState,
        command: &'static str,
    },

    #[error("actor lacks mutation privilege")]
    Unauthorized,

    #[error("participant {0} is not on this match")]
    UnknownParticipant(String),

    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("match is in a terminal state")]
    MatchTerminal,
}
