//! Wire frames.
//!
//! Every frame is a JSON object with a `type` discriminator. Unknown tags
//! fail deserialization and surface as `MalformedCommand`; there is no
//! silent pass-through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tatami_engine::ScoreKind;
use tatami_types::{Match, MatchEvent, MatchState, Score};

use crate::error::ErrorKind;

// =============================================================================
// Client -> Server
// =============================================================================

/// State-machine verbs a referee can issue through `MATCH_STATE_UPDATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateAction {
    Start,
    Pause,
    Reset,
    End,
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreUpdateData {
    pub action: ScoreKind,
    #[serde(rename = "participantId")]
    pub participant_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateUpdateData {
    pub action: StateAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerSetData {
    #[serde(rename = "timeRemaining")]
    pub time_remaining: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentData {
    pub text: String,
}

/// Inbound frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "PING")]
    Ping {
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },

    #[serde(rename = "SCORE_UPDATE")]
    ScoreUpdate {
        #[serde(rename = "matchId")]
        match_id: String,
        data: ScoreUpdateData,
        #[serde(default, rename = "correlationId")]
        correlation_id: Option<String>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },

    #[serde(rename = "MATCH_STATE_UPDATE")]
    MatchStateUpdate {
        #[serde(rename = "matchId")]
        match_id: String,
        data: StateUpdateData,
        #[serde(default, rename = "correlationId")]
        correlation_id: Option<String>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },

    #[serde(rename = "TIMER_UPDATE")]
    TimerUpdate {
        #[serde(rename = "matchId")]
        match_id: String,
        data: TimerSetData,
        #[serde(default, rename = "correlationId")]
        correlation_id: Option<String>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },

    #[serde(rename = "COMMENT")]
    Comment {
        #[serde(rename = "matchId")]
        match_id: String,
        data: CommentData,
        #[serde(default, rename = "correlationId")]
        correlation_id: Option<String>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
}

impl ClientFrame {
    /// The correlation id the client attached, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Ping { .. } => None,
            Self::ScoreUpdate { correlation_id, .. }
            | Self::MatchStateUpdate { correlation_id, .. }
            | Self::TimerUpdate { correlation_id, .. }
            | Self::Comment { correlation_id, .. } => correlation_id.as_deref(),
        }
    }

    /// The match the frame addresses, if any.
    pub fn match_id(&self) -> Option<&str> {
        match self {
            Self::Ping { .. } => None,
            Self::ScoreUpdate { match_id, .. }
            | Self::MatchStateUpdate { match_id, .. }
            | Self::TimerUpdate { match_id, .. }
            | Self::Comment { match_id, .. } => Some(match_id),
        }
    }
}

// =============================================================================
// Server -> Client
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchUpdateData {
    #[serde(rename = "match")]
    pub match_: Match,
    #[serde(rename = "emittedEvents")]
    pub emitted_events: Vec<MatchEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerFrameData {
    pub time_remaining_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatusData {
    pub connected: bool,
    pub client_count: usize,
    pub referee_count: usize,
    pub viewer_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Outbound frames for match and tournament subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Server-initiated heartbeat.
    #[serde(rename = "PING")]
    Ping { timestamp: DateTime<Utc> },

    #[serde(rename = "PONG")]
    Pong { timestamp: DateTime<Utc> },

    #[serde(rename = "MATCH_UPDATE")]
    MatchUpdate {
        #[serde(rename = "matchId")]
        match_id: String,
        data: MatchUpdateData,
        timestamp: DateTime<Utc>,
        version: u64,
    },

    #[serde(rename = "TIMER_UPDATE")]
    TimerUpdate {
        #[serde(rename = "matchId")]
        match_id: String,
        data: TimerFrameData,
        timestamp: DateTime<Utc>,
        version: u64,
    },

    #[serde(rename = "EVENT_APPENDED")]
    EventAppended {
        #[serde(rename = "matchId")]
        match_id: String,
        data: MatchEvent,
        timestamp: DateTime<Utc>,
        version: u64,
    },

    #[serde(rename = "CONNECTION_STATUS")]
    ConnectionStatus {
        #[serde(rename = "matchId")]
        match_id: String,
        data: ConnectionStatusData,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "ERROR")]
    Error {
        data: ErrorData,
        timestamp: DateTime<Utc>,
    },
}

impl ServerFrame {
    pub fn pong(now: DateTime<Utc>) -> Self {
        Self::Pong { timestamp: now }
    }

    pub fn error(
        kind: ErrorKind,
        message: impl Into<String>,
        correlation_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::Error {
            data: ErrorData {
                kind,
                message: message.into(),
                correlation_id,
            },
            timestamp: now,
        }
    }

    pub fn match_update(m: Match, emitted_events: Vec<MatchEvent>, now: DateTime<Utc>) -> Self {
        Self::MatchUpdate {
            match_id: m.id.clone(),
            version: m.version,
            data: MatchUpdateData {
                match_: m,
                emitted_events,
            },
            timestamp: now,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Tournament summary feed
// =============================================================================

/// Compact per-match delta carried on `tournament:{id}` channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub match_id: String,
    pub state: MatchState,
    pub score1: Score,
    pub score2: Score,
    pub time_remaining_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_participant_id: Option<String>,
    pub version: u64,
}

impl From<&Match> for MatchSummary {
    fn from(m: &Match) -> Self {
        Self {
            match_id: m.id.clone(),
            state: m.state,
            score1: m.score1,
            score2: m.score2,
            time_remaining_seconds: m.time_remaining_seconds,
            winner_participant_id: m.winner_participant_id.clone(),
            version: m.version,
        }
    }
}

/// Envelope for the tournament feed; the `type` stays `MATCH_UPDATE` so
/// dashboards reuse one reconciler for both channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentDeltaFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(rename = "tournamentId")]
    pub tournament_id: String,
    #[serde(rename = "matchId")]
    pub match_id: String,
    pub data: MatchSummary,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
}

impl TournamentDeltaFrame {
    pub fn new(m: &Match, now: DateTime<Utc>) -> Self {
        Self {
            frame_type: "MATCH_UPDATE".to_string(),
            tournament_id: m.tournament_id.clone(),
            match_id: m.id.clone(),
            data: MatchSummary::from(m),
            timestamp: now,
            version: m.version,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Frame probe
// =============================================================================

/// Minimal view of any frame on the bus, used by the dispatcher for the
/// latency histogram and the per-channel state cache without paying for a
/// full deserialize.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameProbe {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub data: Option<ProbeData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeData {
    #[serde(default, rename = "match")]
    pub match_: Option<ProbeMatch>,
    #[serde(default, rename = "timeRemainingSeconds")]
    pub time_remaining_seconds: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeMatch {
    pub state: MatchState,
    #[serde(rename = "timeRemainingSeconds")]
    pub time_remaining_seconds: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_parse() {
        let json = r#"{
            "type": "SCORE_UPDATE",
            "matchId": "m-1",
            "data": { "action": "POINTS_2", "participantId": "p1" },
            "timestamp": "2025-06-01T10:00:00Z",
            "correlationId": "c-9"
        }"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match &frame {
            ClientFrame::ScoreUpdate { match_id, data, .. } => {
                assert_eq!(match_id, "m-1");
                assert_eq!(data.action, ScoreKind::Points2);
                assert_eq!(data.participant_id, "p1");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(frame.correlation_id(), Some("c-9"));
        assert_eq!(frame.match_id(), Some("m-1"));
    }

    #[test]
    fn unknown_type_is_an_error() {
        let json = r#"{"type": "SELF_DESTRUCT", "matchId": "m-1", "data": {}}"#;
        assert!(serde_json::from_str::<ClientFrame>(json).is_err());
    }

    #[test]
    fn unknown_state_action_is_an_error() {
        let json = r#"{
            "type": "MATCH_STATE_UPDATE",
            "matchId": "m-1",
            "data": { "action": "EXPLODE" }
        }"#;
        assert!(serde_json::from_str::<ClientFrame>(json).is_err());
    }

    #[test]
    fn ping_without_fields_parses() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"PING"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Ping { .. }));
    }

    #[test]
    fn error_frame_shape() {
        let frame = ServerFrame::error(
            ErrorKind::Unauthorized,
            "nope",
            Some("c-1".into()),
            Utc::now(),
        );
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["type"], "ERROR");
        assert_eq!(v["data"]["kind"], "Unauthorized");
        assert_eq!(v["data"]["correlationId"], "c-1");
    }

    #[test]
    fn tournament_delta_keeps_match_update_type() {
        let m = sample_match();
        let frame = TournamentDeltaFrame::new(&m, Utc::now());
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["type"], "MATCH_UPDATE");
        assert_eq!(v["tournamentId"], "t-1");
        assert_eq!(v["data"]["matchId"], "m-1");
        // Compact: no participant blobs, no event list.
        assert!(v["data"].get("match").is_none());
        assert!(v["data"].get("emittedEvents").is_none());
    }

    #[test]
    fn probe_reads_match_update() {
        let m = sample_match();
        let full = ServerFrame::match_update(m, vec![], Utc::now());
        let probe: FrameProbe = serde_json::from_str(&full.to_json().unwrap()).unwrap();
        assert_eq!(probe.frame_type, "MATCH_UPDATE");
        let pm = probe.data.unwrap().match_.unwrap();
        assert_eq!(pm.state, MatchState::InProgress);
        assert_eq!(pm.time_remaining_seconds, 300);
    }

    fn sample_match() -> Match {
        use tatami_types::Participant;
        let now = Utc::now();
        Match {
            id: "m-1".into(),
            tournament_id: "t-1".into(),
            participant1: Participant {
                id: "p1".into(),
                display_name: "Ana".into(),
                team: None,
                weight: None,
                grade: None,
            },
            participant2: Participant {
                id: "p2".into(),
                display_name: "Bea".into(),
                team: None,
                weight: None,
                grade: None,
            },
            score1: Score::default(),
            score2: Score::default(),
            duration_seconds: 300,
            time_remaining_seconds: 300,
            state: MatchState::InProgress,
            winner_participant_id: None,
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            finished_at: None,
            version: 1,
        }
    }
}
