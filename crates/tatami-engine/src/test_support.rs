//! Fixtures shared by the engine's unit and integration tests.

use chrono::{TimeZone, Utc};
use tatami_types::{Match, MatchState, Participant, Role, Score};

use crate::ActorContext;

pub fn scheduled_match() -> Match {
    let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
    Match {
        id: "m-1".into(),
        tournament_id: "t-1".into(),
        participant1: Participant {
            id: "p1".into(),
            display_name: "Ana Souza".into(),
            team: Some("Atos".into()),
            weight: Some(58.5),
            grade: Some("brown".into()),
        },
        participant2: Participant {
            id: "p2".into(),
            display_name: "Bea Tanaka".into(),
            team: None,
            weight: None,
            grade: Some("brown".into()),
        },
        score1: Score::default(),
        score2: Score::default(),
        duration_seconds: 300,
        time_remaining_seconds: 300,
        state: MatchState::Scheduled,
        winner_participant_id: None,
        created_at: t0,
        updated_at: t0,
        started_at: None,
        finished_at: None,
        version: 0,
    }
}

pub fn in_progress_match() -> Match {
    let mut m = scheduled_match();
    m.state = MatchState::InProgress;
    m.started_at = Some(m.created_at);
    m.version = 1;
    m
}

pub fn referee() -> ActorContext {
    ActorContext::new("ref-1", vec![Role::Referee])
}

pub fn viewer() -> ActorContext {
    ActorContext::new("fan-1", vec![Role::Competitor])
}
