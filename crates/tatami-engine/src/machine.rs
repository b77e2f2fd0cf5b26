//! The `apply` transition function.

use chrono::{DateTime, Utc};
use serde_json::json;
use tatami_types::{Match, MatchEvent, MatchEventType, MatchState};

use crate::command::{ActorContext, Command, Rejection, ScoreKind};
use crate::rules::{auto_finish_cause, winner, FinishCause};

/// Outcome of an accepted command: the next aggregate and the events it
/// produced, in append order. `next.version` is already advanced by
/// `events.len()` so the stored snapshot satisfies `version == max sequence`.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub next: Match,
    pub events: Vec<MatchEvent>,
}

/// Apply one command to one match.
///
/// Pure: no IO, no clock reads, no randomness. The caller supplies `now`
/// and re-invokes with fresh state when the store reports a version
/// conflict.
pub fn apply(
    current: &Match,
    command: &Command,
    actor: &ActorContext,
    now: DateTime<Utc>,
) -> Result<Applied, Rejection> {
    if !actor.can_mutate() {
        return Err(Rejection::Unauthorized);
    }

    // COMMENT is the only command accepted in a terminal state.
    if current.state.is_terminal() && !matches!(command, Command::Comment { .. }) {
        return Err(Rejection::MatchTerminal);
    }

    let mut next = current.clone();
    let mut events = Vec::with_capacity(2);

    match command {
        Command::Start => {
            if !matches!(current.state, MatchState::Scheduled | MatchState::Paused) {
                return Err(invalid(current.state, command));
            }
            next.state = MatchState::InProgress;
            if next.started_at.is_none() {
                next.started_at = Some(now);
            }
            events.push(
                MatchEvent::draft(&current.id, &actor.actor_id, MatchEventType::Start, now)
                    .with_value(MatchState::InProgress.to_string())
                    .with_metadata(json!({ "oldState": current.state })),
            );
        }

        Command::Pause => {
            if current.state != MatchState::InProgress {
                return Err(invalid(current.state, command));
            }
            next.state = MatchState::Paused;
            events.push(
                MatchEvent::draft(&current.id, &actor.actor_id, MatchEventType::Stop, now)
                    .with_value(MatchState::Paused.to_string())
                    .with_metadata(json!({ "oldState": current.state })),
            );
        }

        Command::Reset => {
            next.state = MatchState::Scheduled;
            next.score1 = Default::default();
            next.score2 = Default::default();
            next.time_remaining_seconds = next.duration_seconds;
            next.started_at = None;
            next.finished_at = None;
            next.winner_participant_id = None;
            events.push(
                MatchEvent::draft(&current.id, &actor.actor_id, MatchEventType::Reset, now)
                    .with_value(MatchState::Scheduled.to_string())
                    .with_metadata(json!({ "oldState": current.state })),
            );
        }

        Command::End => {
            if !matches!(current.state, MatchState::InProgress | MatchState::Paused) {
                return Err(invalid(current.state, command));
            }
            finish(&mut next, now);
            events.push(
                MatchEvent::draft(&current.id, &actor.actor_id, MatchEventType::StateChange, now)
                    .with_value(MatchState::Finished.to_string())
                    .with_metadata(json!({
                        "oldState": current.state,
                        "winnerParticipantId": next.winner_participant_id,
                    })),
            );
        }

        Command::Cancel => {
            next.state = MatchState::Cancelled;
            events.push(
                MatchEvent::draft(&current.id, &actor.actor_id, MatchEventType::StateChange, now)
                    .with_value(MatchState::Cancelled.to_string())
                    .with_metadata(json!({ "oldState": current.state })),
            );
        }

        Command::Score {
            kind,
            participant_id,
        } => {
            if current.state != MatchState::InProgress {
                return Err(invalid(current.state, command));
            }
            if !current.has_participant(participant_id) {
                return Err(Rejection::UnknownParticipant(participant_id.clone()));
            }
            let old = current
                .score_of(participant_id)
                .unwrap_or_default();
            let score = if next.participant1.id == *participant_id {
                &mut next.score1
            } else {
                &mut next.score2
            };
            let counter = match kind {
                ScoreKind::Points2 => {
                    score.points += 2;
                    score.points
                }
                ScoreKind::Advantage => {
                    score.advantages += 1;
                    score.advantages
                }
                ScoreKind::Penalty => {
                    score.penalties += 1;
                    score.penalties
                }
                ScoreKind::Submission => {
                    score.submissions += 1;
                    score.submissions
                }
            };
            let new = *score;
            events.push(
                MatchEvent::draft(&current.id, &actor.actor_id, score_event_type(*kind), now)
                    .with_participant(participant_id.clone())
                    .with_value(counter.to_string())
                    .with_metadata(json!({ "oldScore": old, "newScore": new })),
            );

            if let Some(cause) = auto_finish_cause(&next) {
                finish(&mut next, now);
                events.push(auto_finish_event(&next, cause, now));
            }
        }

        Command::TimerSet { seconds } => {
            let clamped = (*seconds).min(current.duration_seconds);
            events.push(
                MatchEvent::draft(&current.id, &actor.actor_id, MatchEventType::TimerUpdate, now)
                    .with_value(clamped.to_string())
                    .with_metadata(json!({
                        "oldTime": current.time_remaining_seconds,
                        "newTime": clamped,
                    })),
            );
            next.time_remaining_seconds = clamped;
            if clamped == 0 && current.state == MatchState::InProgress {
                finish(&mut next, now);
                events.push(auto_finish_event(&next, FinishCause::TimerExpired, now));
            }
        }

        Command::TimerExpired => {
            if current.state != MatchState::InProgress {
                return Err(invalid(current.state, command));
            }
            events.push(
                MatchEvent::draft(&current.id, &actor.actor_id, MatchEventType::TimerUpdate, now)
                    .with_value("0")
                    .with_metadata(json!({
                        "oldTime": current.time_remaining_seconds,
                        "newTime": 0,
                    })),
            );
            next.time_remaining_seconds = 0;
            finish(&mut next, now);
            events.push(auto_finish_event(&next, FinishCause::TimerExpired, now));
        }

        Command::Comment { text } => {
            if text.trim().is_empty() {
                return Err(Rejection::MalformedCommand("empty comment".into()));
            }
            events.push(
                MatchEvent::draft(&current.id, &actor.actor_id, MatchEventType::Comment, now)
                    .with_value(text.clone()),
            );
        }
    }

    next.updated_at = now;
    next.version = current.version + events.len() as u64;
    Ok(Applied { next, events })
}

fn invalid(from: MatchState, command: &Command) -> Rejection {
    Rejection::InvalidTransition {
        from,
        command: command.kind_label(),
    }
}

fn score_event_type(kind: ScoreKind) -> MatchEventType {
    match kind {
        ScoreKind::Points2 => MatchEventType::Points2,
        ScoreKind::Advantage => MatchEventType::Advantage,
        ScoreKind::Penalty => MatchEventType::Penalty,
        ScoreKind::Submission => MatchEventType::Submission,
    }
}

fn finish(next: &mut Match, now: DateTime<Utc>) {
    next.state = MatchState::Finished;
    next.finished_at = Some(now);
    next.winner_participant_id = winner(next);
}

fn auto_finish_event(next: &Match, cause: FinishCause, now: DateTime<Utc>) -> MatchEvent {
    MatchEvent::draft(&next.id, "system", MatchEventType::AutoFinish, now)
        .with_value(MatchState::Finished.to_string())
        .with_metadata(json!({
            "cause": cause,
            "winnerParticipantId": next.winner_participant_id,
        }))
}
