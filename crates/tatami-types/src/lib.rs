//! Tatami Types - Shared Domain Types for the Match Control Plane
//!
//! This crate defines the core types for the Tatami tournament backend:
//! - Match aggregate, scores, and participants
//! - Immutable match events with a dense per-match sequence
//! - Roles extracted from bearer tokens
//! - Fan-out channel identifiers
//!
//! Every other crate in the workspace depends on these types; this crate
//! carries no IO and no business rules beyond structural validation.

pub mod channel;
pub mod event;
pub mod matches;
pub mod role;

pub use channel::{ChannelId, ChannelParseError};
pub use event::{MatchEvent, MatchEventType};
pub use matches::{Match, MatchState, Participant, Score};
pub use role::Role;
