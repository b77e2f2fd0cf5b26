//! End-to-end flows over the in-memory store and bus: referee commands in
//! one end, ordered broadcasts out the other.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tatami_bus::{MemoryBus, PubSubBus};
use tatami_engine::ScoreKind;
use tatami_realtime::appender::EventLogAppender;
use tatami_realtime::frames::{ClientFrame, ScoreUpdateData};
use tatami_realtime::hub::{ConnectionHandles, Hub};
use tatami_realtime::router::{CommandContext, CommandRouter};
use tatami_realtime::{close_code, ErrorKind, RealtimeConfig};
use tatami_store::{MatchStore, MemoryStore};
use tatami_types::{ChannelId, Match, MatchState, Participant, Role, Score};

fn scheduled_match(id: &str) -> Match {
    let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
    Match {
        id: id.into(),
        tournament_id: "t-1".into(),
        participant1: Participant {
            id: "p1".into(),
            display_name: "Ana Souza".into(),
            team: None,
            weight: None,
            grade: None,
        },
        participant2: Participant {
            id: "p2".into(),
            display_name: "Bea Tanaka".into(),
            team: None,
            weight: None,
            grade: None,
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

fn in_progress_match(id: &str) -> Match {
    let mut m = scheduled_match(id);
    m.state = MatchState::InProgress;
    m.started_at = Some(m.created_at);
    m.version = 1;
    m
}

struct Fixture {
    store: Arc<MemoryStore>,
    bus: Arc<MemoryBus>,
    hub: Arc<Hub>,
}

fn fixture() -> Fixture {
    fixture_with(RealtimeConfig::default())
}

fn fixture_with(config: RealtimeConfig) -> Fixture {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let bus = Arc::new(MemoryBus::new());
    let appender = EventLogAppender::new(store.clone(), config.command_retry_max, Duration::from_secs(2));
    let router = Arc::new(CommandRouter::new(appender, bus.clone()));
    let hub = Hub::new(config, bus.clone(), store.clone(), router);
    Fixture { store, bus, hub }
}

fn score_frame(match_id: &str, kind: ScoreKind, participant_id: &str) -> ClientFrame {
    ClientFrame::ScoreUpdate {
        match_id: match_id.into(),
        data: ScoreUpdateData {
            action: kind,
            participant_id: participant_id.into(),
        },
        correlation_id: None,
        timestamp: None,
    }
}

/// Receive frames from a connection's queue until one of the wanted type
/// shows up; advisory ticker frames interleave freely.
async fn next_frame_of_type(
    handles: &mut ConnectionHandles,
    wanted: &str,
) -> serde_json::Value {
    loop {
        let payload = tokio::time::timeout(Duration::from_secs(2), handles.outbound.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("queue closed");
        let v: serde_json::Value = serde_json::from_str(&payload).unwrap();
        if v["type"] == wanted {
            return v;
        }
    }
}

#[tokio::test]
async fn submission_finishes_and_reaches_all_subscribers() {
    let f = fixture();
    let m = in_progress_match("m-sub");
    f.store.insert(m.clone());
    let channel = ChannelId::for_match(&m.id);

    let mut viewer_a = f.hub.register("fan-1", vec![], channel.clone(), false);
    let mut viewer_b = f.hub.register("fan-2", vec![], channel.clone(), false);

    let ctx = CommandContext {
        subject_id: "r1",
        roles: &[Role::Referee],
        channel: &channel,
    };
    let outcome = f
        .hub
        .router()
        .handle(&ctx, &score_frame(&m.id, ScoreKind::Submission, "p1"))
        .await
        .unwrap();

    assert_eq!(outcome.match_.state, MatchState::Finished);
    assert_eq!(outcome.match_.winner_participant_id.as_deref(), Some("p1"));
    assert_eq!(outcome.match_.score1.submissions, 1);
    assert_eq!(outcome.events.len(), 2);
    assert_eq!(outcome.events[0].sequence, m.version + 1);
    assert_eq!(outcome.events[1].sequence, m.version + 2);

    for viewer in [&mut viewer_a, &mut viewer_b] {
        let update = next_frame_of_type(viewer, "MATCH_UPDATE").await;
        assert_eq!(update["data"]["match"]["state"], "FINISHED");
        assert_eq!(update["data"]["match"]["winnerParticipantId"], "p1");
        let events = update["data"]["emittedEvents"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["eventType"], "SUBMISSION");
        assert_eq!(events[1]["eventType"], "AUTO_FINISH");
    }
}

#[tokio::test]
async fn third_penalty_disqualifies() {
    let f = fixture();
    let mut m = in_progress_match("m-dq");
    m.score2.penalties = 2;
    f.store.insert(m.clone());
    let channel = ChannelId::for_match(&m.id);

    let ctx = CommandContext {
        subject_id: "r1",
        roles: &[Role::Referee],
        channel: &channel,
    };
    let outcome = f
        .hub
        .router()
        .handle(&ctx, &score_frame(&m.id, ScoreKind::Penalty, "p2"))
        .await
        .unwrap();

    assert_eq!(outcome.match_.state, MatchState::Finished);
    assert_eq!(outcome.match_.winner_participant_id.as_deref(), Some("p1"));
    let types: Vec<_> = outcome
        .events
        .iter()
        .map(|e| e.event_type.to_string())
        .collect();
    assert_eq!(types, ["PENALTY", "AUTO_FINISH"]);

    // Terminal from here: the next penalty is refused, no event appended.
    let before = f.store.events_of(&m.id).len();
    let err = f
        .hub
        .router()
        .handle(&ctx, &score_frame(&m.id, ScoreKind::Penalty, "p2"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MatchTerminal);
    assert_eq!(f.store.events_of(&m.id).len(), before);
}

#[tokio::test]
async fn viewer_score_is_rejected_without_broadcast() {
    let f = fixture();
    let m = in_progress_match("m-authz");
    f.store.insert(m.clone());
    let channel = ChannelId::for_match(&m.id);
    let mut other = f.hub.register("fan-2", vec![], channel.clone(), false);

    let ctx = CommandContext {
        subject_id: "fan-1",
        roles: &[Role::Competitor],
        channel: &channel,
    };
    let err = f
        .hub
        .router()
        .handle(&ctx, &score_frame(&m.id, ScoreKind::Points2, "p1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unauthorized);

    assert!(f.store.events_of(&m.id).is_empty());
    // The other subscriber sees nothing but a sentinel we publish ourselves.
    f.bus
        .publish(&channel, "\"sentinel\"".into())
        .await
        .unwrap();
    let payload = tokio::time::timeout(Duration::from_secs(2), other.outbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload, "\"sentinel\"");
}

#[tokio::test]
async fn two_referees_do_not_lose_updates() {
    let f = fixture();
    let m = in_progress_match("m-race");
    f.store.insert(m.clone());
    let channel = ChannelId::for_match(&m.id);

    let r1 = CommandContext {
        subject_id: "r1",
        roles: &[Role::Referee],
        channel: &channel,
    };
    let r2 = CommandContext {
        subject_id: "r2",
        roles: &[Role::Referee],
        channel: &channel,
    };
    let frame = score_frame(&m.id, ScoreKind::Points2, "p1");

    let (a, b) = tokio::join!(
        f.hub.router().handle(&r1, &frame),
        f.hub.router().handle(&r2, &frame),
    );
    a.unwrap();
    b.unwrap();

    let final_match = f.store.load_match(&m.id).await.unwrap();
    assert_eq!(final_match.score1.points, 4);
    assert_eq!(final_match.version, m.version + 2);
    let sequences: Vec<_> = f
        .store
        .events_of(&m.id)
        .iter()
        .map(|e| e.sequence)
        .collect();
    assert_eq!(sequences, vec![m.version + 1, m.version + 2]);
}

#[tokio::test]
async fn slow_consumer_is_evicted_others_get_every_frame() {
    let f = fixture();
    // Tournament channel: pure fan-out, no ticker in the mix.
    let channel = ChannelId::for_tournament("t-big");
    let slow = f.hub.register("slow", vec![], channel.clone(), false);
    let mut healthy = f.hub.register("healthy", vec![], channel.clone(), false);

    // Drain the healthy connection concurrently.
    let collector = tokio::spawn(async move {
        let mut got = Vec::new();
        while got.len() < 300 {
            match tokio::time::timeout(Duration::from_secs(5), healthy.outbound.recv()).await {
                Ok(Some(p)) => got.push(p),
                _ => break,
            }
        }
        got
    });

    for i in 0..300 {
        f.bus
            .publish(&channel, format!("frame-{i}"))
            .await
            .unwrap();
    }

    let got = collector.await.unwrap();
    assert_eq!(got.len(), 300);
    for (i, p) in got.iter().enumerate() {
        assert_eq!(p, &format!("frame-{i}"));
    }

    // The stalled consumer was closed with 1013.
    let directive = slow.close.borrow().clone().expect("close directive");
    assert_eq!(directive.code, close_code::TRY_AGAIN_LATER);
    assert_eq!(directive.reason, "slow_consumer");
    assert_eq!(f.hub.local_members(&channel).len(), 1);
}

#[tokio::test]
async fn resume_returns_exactly_the_missed_events() {
    let f = fixture();
    let m = in_progress_match("m-resume");
    f.store.insert(m.clone());
    let channel = ChannelId::for_match(&m.id);
    let ctx = CommandContext {
        subject_id: "r1",
        roles: &[Role::Referee],
        channel: &channel,
    };

    for _ in 0..4 {
        f.hub
            .router()
            .handle(&ctx, &score_frame(&m.id, ScoreKind::Advantage, "p2"))
            .await
            .unwrap();
    }

    // A client that saw version V asks for everything after it.
    let seen_version = m.version + 1;
    let missed = f
        .store
        .recent_events(&m.id, seen_version, 500)
        .await
        .unwrap();
    let sequences: Vec<_> = missed.iter().map(|e| e.sequence).collect();
    assert_eq!(
        sequences,
        vec![m.version + 2, m.version + 3, m.version + 4]
    );
    let current = f.store.load_match(&m.id).await.unwrap();
    assert_eq!(current.version, *sequences.last().unwrap());
}

#[tokio::test(start_paused = true)]
async fn ticker_counts_down_and_reconciles() {
    let f = fixture();
    let mut m = in_progress_match("m-tick");
    m.time_remaining_seconds = 30;
    f.store.insert(m.clone());
    let channel = ChannelId::for_match(&m.id);

    // First subscriber opens dispatcher + ticker.
    let mut viewer = f.hub.register("fan", vec![], channel.clone(), false);

    // Advisory frames flow every virtual second.
    let first = next_frame_of_type(&mut viewer, "TIMER_UPDATE").await;
    assert_eq!(first["data"]["timeRemainingSeconds"], 29);

    // After the reconcile cadence, a durable TIMER_UPDATE event exists.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let has_durable = f
            .store
            .events_of(&m.id)
            .iter()
            .any(|e| e.event_type == tatami_types::MatchEventType::TimerUpdate);
        if has_durable {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "no durable timer event within the reconcile window"
        );
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    let reconciled = f.store.load_match(&m.id).await.unwrap();
    assert!(reconciled.time_remaining_seconds < 30);
    assert_eq!(reconciled.state, MatchState::InProgress);
}

#[tokio::test(start_paused = true)]
async fn timer_expiry_auto_finishes_once() {
    let f = fixture();
    let mut m = in_progress_match("m-exp");
    m.time_remaining_seconds = 3;
    f.store.insert(m.clone());
    let channel = ChannelId::for_match(&m.id);

    let mut viewer = f.hub.register("fan", vec![], channel.clone(), false);

    let update = next_frame_of_type(&mut viewer, "MATCH_UPDATE").await;
    assert_eq!(update["data"]["match"]["state"], "FINISHED");

    let finished = f.store.load_match(&m.id).await.unwrap();
    assert_eq!(finished.state, MatchState::Finished);
    // Scores are level: a draw, no winner.
    assert_eq!(finished.winner_participant_id, None);
    assert_eq!(finished.time_remaining_seconds, 0);

    let auto_finishes = f
        .store
        .events_of(&m.id)
        .iter()
        .filter(|e| e.event_type == tatami_types::MatchEventType::AutoFinish)
        .count();
    assert_eq!(auto_finishes, 1);
}
