//! Command router: authorization, validation, engine invocation, publish.

use std::sync::Arc;

use chrono::Utc;
use tatami_engine::{ActorContext, Command};
use tatami_types::{ChannelId, MatchEventType, Role};
use tracing::warn;

use crate::appender::{CommandOutcome, EventLogAppender};
use crate::error::{CommandError, ErrorKind};
use crate::frames::{ClientFrame, ServerFrame, StateAction, TournamentDeltaFrame};
use crate::metrics as m;
use crate::state::Bus;

/// Connection-scoped facts the router needs for one command.
pub struct CommandContext<'a> {
    pub subject_id: &'a str,
    pub roles: &'a [Role],
    pub channel: &'a ChannelId,
}

/// Routes inbound frames: role gate, shape validation, appender, publish.
pub struct CommandRouter {
    appender: EventLogAppender,
    bus: Arc<dyn Bus>,
}

impl CommandRouter {
    pub fn new(appender: EventLogAppender, bus: Arc<dyn Bus>) -> Self {
        Self { appender, bus }
    }

    /// Handle one mutating frame from a connection.
    ///
    /// On success the snapshot has been persisted and published; the caller
    /// need not send anything to the originator (it receives the broadcast
    /// like everyone else). On failure the error is addressed to the
    /// originator only and nothing was published.
    pub async fn handle(
        &self,
        ctx: &CommandContext<'_>,
        frame: &ClientFrame,
    ) -> Result<CommandOutcome, CommandError> {
        match self.handle_inner(ctx, frame).await {
            Ok((command, outcome)) => {
                metrics::counter!(m::COMMANDS_ACCEPTED_TOTAL, "kind" => command.kind_label())
                    .increment(1);
                record_auto_finish(&outcome);
                Ok(outcome)
            }
            Err(e) => {
                metrics::counter!(m::COMMANDS_REJECTED_TOTAL, "reason" => e.kind.label())
                    .increment(1);
                Err(e)
            }
        }
    }

    async fn handle_inner(
        &self,
        ctx: &CommandContext<'_>,
        frame: &ClientFrame,
    ) -> Result<(Command, CommandOutcome), CommandError> {
        if !ctx.roles.iter().any(Role::can_mutate) {
            return Err(CommandError::unauthorized());
        }

        let match_id = match ctx.channel {
            ChannelId::Match(id) => id.as_str(),
            ChannelId::Tournament(_) => {
                return Err(CommandError::malformed(
                    "commands must be sent on a match channel",
                ))
            }
        };
        let addressed = frame
            .match_id()
            .ok_or_else(|| CommandError::malformed("frame carries no matchId"))?;
        if addressed != match_id {
            return Err(CommandError::malformed(format!(
                "frame addresses match {addressed} but this connection is subscribed to {match_id}"
            )));
        }

        let command = command_from_frame(frame)?;
        let actor = ActorContext::new(ctx.subject_id, ctx.roles.to_vec());
        let outcome = self
            .appender
            .execute(match_id, &command, &actor, Utc::now())
            .await?;

        self.publish(&outcome).await;
        Ok((command, outcome))
    }

    /// Run a synthetic command on behalf of the process itself (ticker
    /// reconciliation, timer expiry). Publishes like any referee command.
    pub async fn execute_system(
        &self,
        match_id: &str,
        command: &Command,
    ) -> Result<CommandOutcome, CommandError> {
        let actor = ActorContext::system();
        let result = self
            .appender
            .execute(match_id, command, &actor, Utc::now())
            .await;
        match &result {
            Ok(outcome) => {
                metrics::counter!(m::COMMANDS_ACCEPTED_TOTAL, "kind" => command.kind_label())
                    .increment(1);
                record_auto_finish(outcome);
                self.publish(outcome).await;
            }
            Err(e) => {
                metrics::counter!(m::COMMANDS_REJECTED_TOTAL, "reason" => e.kind.label())
                    .increment(1);
            }
        }
        result
    }

    /// Publish the command's results. Scoreboard and state changes go out
    /// as a full `MATCH_UPDATE` snapshot on the match channel plus a
    /// compact delta on the tournament channel; a comment changes nothing
    /// material, so it travels as a lightweight `EVENT_APPENDED` frame on
    /// the match channel only. Publish failures are logged, not propagated:
    /// the write is already durable and resume will reconcile.
    async fn publish(&self, outcome: &CommandOutcome) {
        let now = Utc::now();
        let m_ch = ChannelId::for_match(&outcome.match_.id);

        let comment_only = outcome
            .events
            .iter()
            .all(|e| e.event_type == MatchEventType::Comment);
        if comment_only {
            for event in &outcome.events {
                let frame = ServerFrame::EventAppended {
                    match_id: outcome.match_.id.clone(),
                    version: event.sequence,
                    data: event.clone(),
                    timestamp: now,
                };
                self.publish_payload(&m_ch, frame.to_json()).await;
            }
            return;
        }

        let full =
            ServerFrame::match_update(outcome.match_.clone(), outcome.events.clone(), now);
        self.publish_payload(&m_ch, full.to_json()).await;

        let t_ch = ChannelId::for_tournament(&outcome.match_.tournament_id);
        let delta = TournamentDeltaFrame::new(&outcome.match_, now);
        self.publish_payload(&t_ch, delta.to_json()).await;
    }

    async fn publish_payload(
        &self,
        channel: &ChannelId,
        payload: Result<String, serde_json::Error>,
    ) {
        match payload {
            Ok(payload) => {
                if let Err(e) = self.bus.publish(channel, payload).await {
                    warn!(channel = %channel, error = %e, "publish failed");
                } else {
                    metrics::counter!(m::WS_MESSAGES_PUBLISHED).increment(1);
                }
            }
            Err(e) => warn!(channel = %channel, error = %e, "frame did not serialize"),
        }
    }
}

fn record_auto_finish(outcome: &CommandOutcome) {
    for event in &outcome.events {
        if event.event_type == MatchEventType::AutoFinish {
            let cause = event
                .metadata
                .as_ref()
                .and_then(|m| m.get("cause"))
                .and_then(|c| c.as_str())
                .unwrap_or("unknown")
                .to_string();
            metrics::counter!(m::AUTO_FINISH_TOTAL, "cause" => cause).increment(1);
        }
    }
}

/// Translate a validated frame into an engine command.
fn command_from_frame(frame: &ClientFrame) -> Result<Command, CommandError> {
    match frame {
        ClientFrame::ScoreUpdate { data, .. } => Ok(Command::Score {
            kind: data.action,
            participant_id: data.participant_id.clone(),
        }),
        ClientFrame::MatchStateUpdate { data, .. } => Ok(match data.action {
            StateAction::Start => Command::Start,
            StateAction::Pause => Command::Pause,
            StateAction::Reset => Command::Reset,
            StateAction::End => Command::End,
            StateAction::Cancel => Command::Cancel,
        }),
        ClientFrame::TimerUpdate { data, .. } => Ok(Command::TimerSet {
            seconds: data.time_remaining,
        }),
        ClientFrame::Comment { data, .. } => Ok(Command::Comment {
            text: data.text.clone(),
        }),
        ClientFrame::Ping { .. } => Err(CommandError::malformed("PING is not a match command")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tatami_bus::{MemoryBus, PubSubBus};
    use tatami_engine::test_support::in_progress_match;
    use tatami_engine::ScoreKind;
    use tatami_store::{MatchStore, MemoryStore};
    use tatami_types::MatchState;

    use crate::frames::{ScoreUpdateData, StateUpdateData};

    fn router(store: Arc<MemoryStore>, bus: Arc<MemoryBus>) -> CommandRouter {
        let appender = EventLogAppender::new(store, 3, Duration::from_secs(2));
        CommandRouter::new(appender, bus)
    }

    fn score_frame(match_id: &str, participant_id: &str) -> ClientFrame {
        ClientFrame::ScoreUpdate {
            match_id: match_id.into(),
            data: ScoreUpdateData {
                action: ScoreKind::Points2,
                participant_id: participant_id.into(),
            },
            correlation_id: Some("c-1".into()),
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn viewer_commands_are_unauthorized_and_unpublished() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let m = in_progress_match();
        store.insert(m.clone());
        let channel = ChannelId::for_match(&m.id);
        let mut sub = bus.subscribe(&channel).await.unwrap();

        let r = router(store.clone(), bus.clone());
        let ctx = CommandContext {
            subject_id: "fan-1",
            roles: &[Role::Competitor],
            channel: &channel,
        };
        let err = r
            .handle(&ctx, &score_frame(&m.id, "p1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);

        // Nothing persisted, nothing broadcast.
        assert!(store.events_of(&m.id).is_empty());
        bus.publish(&channel, "sentinel".into()).await.unwrap();
        assert_eq!(sub.recv().await.unwrap(), "sentinel");
    }

    #[tokio::test]
    async fn referee_score_publishes_to_both_channels() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let m = in_progress_match();
        store.insert(m.clone());
        let match_ch = ChannelId::for_match(&m.id);
        let tour_ch = ChannelId::for_tournament(&m.tournament_id);
        let mut match_sub = bus.subscribe(&match_ch).await.unwrap();
        let mut tour_sub = bus.subscribe(&tour_ch).await.unwrap();

        let r = router(store.clone(), bus.clone());
        let ctx = CommandContext {
            subject_id: "ref-1",
            roles: &[Role::Referee],
            channel: &match_ch,
        };
        let outcome = r.handle(&ctx, &score_frame(&m.id, "p1")).await.unwrap();
        assert_eq!(outcome.match_.score1.points, 2);

        let full: serde_json::Value =
            serde_json::from_str(&match_sub.recv().await.unwrap()).unwrap();
        assert_eq!(full["type"], "MATCH_UPDATE");
        assert_eq!(full["data"]["match"]["score1"]["points"], 2);
        assert_eq!(full["data"]["emittedEvents"][0]["eventType"], "POINTS_2");

        let delta: serde_json::Value =
            serde_json::from_str(&tour_sub.recv().await.unwrap()).unwrap();
        assert_eq!(delta["tournamentId"], m.tournament_id);
        assert_eq!(delta["data"]["score1"]["points"], 2);
    }

    #[tokio::test]
    async fn frame_for_other_match_is_malformed() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let m = in_progress_match();
        store.insert(m.clone());
        let channel = ChannelId::for_match(&m.id);

        let r = router(store, bus);
        let ctx = CommandContext {
            subject_id: "ref-1",
            roles: &[Role::Referee],
            channel: &channel,
        };
        let err = r
            .handle(&ctx, &score_frame("some-other-match", "p1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedCommand);
    }

    #[tokio::test]
    async fn commands_on_tournament_channels_are_malformed() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let m = in_progress_match();
        store.insert(m.clone());
        let channel = ChannelId::for_tournament(&m.tournament_id);

        let r = router(store, bus);
        let ctx = CommandContext {
            subject_id: "ref-1",
            roles: &[Role::Referee],
            channel: &channel,
        };
        let err = r.handle(&ctx, &score_frame(&m.id, "p1")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedCommand);
    }

    #[tokio::test]
    async fn state_update_drives_the_machine() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let m = in_progress_match();
        store.insert(m.clone());
        let channel = ChannelId::for_match(&m.id);

        let r = router(store.clone(), bus);
        let ctx = CommandContext {
            subject_id: "ref-1",
            roles: &[Role::Referee],
            channel: &channel,
        };
        let frame = ClientFrame::MatchStateUpdate {
            match_id: m.id.clone(),
            data: StateUpdateData {
                action: StateAction::End,
            },
            correlation_id: None,
            timestamp: None,
        };
        let outcome = r.handle(&ctx, &frame).await.unwrap();
        assert_eq!(outcome.match_.state, MatchState::Finished);

        let stored = store.load_match(&m.id).await.unwrap();
        assert_eq!(stored.state, MatchState::Finished);
    }

    #[tokio::test]
    async fn comment_travels_as_event_appended() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let m = in_progress_match();
        store.insert(m.clone());
        let match_ch = ChannelId::for_match(&m.id);
        let tour_ch = ChannelId::for_tournament(&m.tournament_id);
        let mut match_sub = bus.subscribe(&match_ch).await.unwrap();
        let mut tour_sub = bus.subscribe(&tour_ch).await.unwrap();

        let r = router(store, bus.clone());
        let ctx = CommandContext {
            subject_id: "ref-1",
            roles: &[Role::Referee],
            channel: &match_ch,
        };
        let frame = ClientFrame::Comment {
            match_id: m.id.clone(),
            data: crate::frames::CommentData {
                text: "guard pull at 3:40".into(),
            },
            correlation_id: None,
            timestamp: None,
        };
        r.handle(&ctx, &frame).await.unwrap();

        let v: serde_json::Value =
            serde_json::from_str(&match_sub.recv().await.unwrap()).unwrap();
        assert_eq!(v["type"], "EVENT_APPENDED");
        assert_eq!(v["data"]["eventType"], "COMMENT");
        assert_eq!(v["data"]["value"], "guard pull at 3:40");

        // No tournament delta for a comment.
        bus.publish(&tour_ch, "sentinel".into()).await.unwrap();
        assert_eq!(tour_sub.recv().await.unwrap(), "sentinel");
    }

    #[tokio::test]
    async fn system_timer_expiry_publishes() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let mut m = in_progress_match();
        m.time_remaining_seconds = 0;
        store.insert(m.clone());
        let match_ch = ChannelId::for_match(&m.id);
        let mut sub = bus.subscribe(&match_ch).await.unwrap();

        let r = router(store, bus.clone());
        let outcome = r
            .execute_system(&m.id, &Command::TimerExpired)
            .await
            .unwrap();
        assert_eq!(outcome.match_.state, MatchState::Finished);

        let full: serde_json::Value =
            serde_json::from_str(&sub.recv().await.unwrap()).unwrap();
        assert_eq!(full["data"]["match"]["state"], "FINISHED");
    }
}
