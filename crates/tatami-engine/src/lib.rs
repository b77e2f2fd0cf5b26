//! Tatami Engine - Pure Match State Machine
//!
//! Given the current match aggregate, a command, the acting principal, and a
//! clock reading, the engine returns either the next aggregate plus the
//! events the command produced, or a typed rejection. It performs no IO and
//! never suspends; persistence, retry, and broadcast all live above it.
//!
//! The engine is deterministic: equal inputs produce equal outputs. Event
//! drafts leave `id` nil and `sequence` zero for the store to assign.
//!
//! # Example
//!
//! ```
//! use tatami_engine::{apply, ActorContext, Command, ScoreKind};
//! # use tatami_engine::test_support::in_progress_match;
//! # use chrono::Utc;
//!
//! let m = in_progress_match();
//! let referee = ActorContext::new("ref-1", vec![tatami_types::Role::Referee]);
//! let cmd = Command::Score {
//!     kind: ScoreKind::Points2,
//!     participant_id: m.participant1.id.clone(),
//! };
//! let applied = apply(&m, &cmd, &referee, Utc::now()).unwrap();
//! assert_eq!(applied.next.score1.points, 2);
//! ```

mod command;
mod machine;
mod rules;

pub use command::{ActorContext, Command, Rejection, ScoreKind};
pub use machine::{apply, Applied};
pub use rules::{auto_finish_cause, winner, FinishCause};

#[doc(hidden)]
pub mod test_support;
