//! Winner determination and auto-finish rules.

use serde::Serialize;
use tatami_types::Match;

/// Why the engine ended a match on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishCause {
    Submission,
    Disqualification,
    TimerExpired,
}

impl FinishCause {
    /// Stable label used for the `auto_finish_total{cause}` counter.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Submission => "submission",
            Self::Disqualification => "disqualification",
            Self::TimerExpired => "timer_expired",
        }
    }
}

/// Deterministic tie-break applied when a match finishes.
///
/// 1. Exactly one side with a submission wins.
/// 2. Exactly one side with three or more penalties loses (disqualification).
/// 3. Higher points.
/// 4. Higher advantages.
/// 5. Fewer penalties.
/// 6. Draw: no winner.
pub fn winner(m: &Match) -> Option<String> {
    let (s1, s2) = (&m.score1, &m.score2);
    let (p1, p2) = (m.participant1.id.clone(), m.participant2.id.clone());

    match (s1.submissions > 0, s2.submissions > 0) {
        (true, false) => return Some(p1),
        (false, true) => return Some(p2),
        _ => {}
    }

    match (s1.penalties >= 3, s2.penalties >= 3) {
        (true, false) => return Some(p2),
        (false, true) => return Some(p1),
        _ => {}
    }

    if s1.points != s2.points {
        return Some(if s1.points > s2.points { p1 } else { p2 });
    }
    if s1.advantages != s2.advantages {
        return Some(if s1.advantages > s2.advantages { p1 } else { p2 });
    }
    if s1.penalties != s2.penalties {
        return Some(if s1.penalties < s2.penalties { p1 } else { p2 });
    }
    None
}

/// Checked after every accepted score mutation. Timer expiry is handled by
/// the synthetic timer-expired command, not here.
pub fn auto_finish_cause(m: &Match) -> Option<FinishCause> {
    if m.score1.submissions > 0 || m.score2.submissions > 0 {
        return Some(FinishCause::Submission);
    }
    if m.score1.penalties >= 3 || m.score2.penalties >= 3 {
        return Some(FinishCause::Disqualification);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::in_progress_match;

    #[test]
    fn submission_beats_points() {
        let mut m = in_progress_match();
        m.score1.points = 10;
        m.score2.submissions = 1;
        assert_eq!(winner(&m), Some(m.participant2.id.clone()));
    }

    #[test]
    fn both_submitted_falls_through_to_points() {
        let mut m = in_progress_match();
        m.score1.submissions = 1;
        m.score2.submissions = 1;
        m.score1.points = 2;
        assert_eq!(winner(&m), Some(m.participant1.id.clone()));
    }

    #[test]
    fn three_penalties_disqualify() {
        let mut m = in_progress_match();
        m.score2.penalties = 3;
        assert_eq!(winner(&m), Some(m.participant1.id.clone()));
        assert_eq!(auto_finish_cause(&m), Some(FinishCause::Disqualification));
    }

    #[test]
    fn points_then_advantages_then_penalties() {
        let mut m = in_progress_match();
        m.score1.points = 4;
        m.score2.points = 4;
        m.score1.advantages = 1;
        assert_eq!(winner(&m), Some(m.participant1.id.clone()));

        m.score1.advantages = 0;
        m.score1.penalties = 1;
        m.score2.penalties = 2;
        assert_eq!(winner(&m), Some(m.participant1.id.clone()));
    }

    #[test]
    fn dead_even_is_a_draw() {
        let m = in_progress_match();
        assert_eq!(winner(&m), None);
        assert_eq!(auto_finish_cause(&m), None);
    }
}
