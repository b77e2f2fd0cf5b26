//! Error taxonomy and WebSocket close codes.

use serde::{Deserialize, Serialize};
use tatami_engine::Rejection;
use tatami_store::StoreError;
use thiserror::Error;

/// Close codes used by the hub.
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Policy violation (e.g. unknown match at connect).
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Internal server error.
    pub const SERVER_ERROR: u16 = 1011;
    /// Slow consumer: try again later.
    pub const TRY_AGAIN_LATER: u16 = 1013;
    /// Heartbeat missed.
    pub const IDLE: u16 = 4000;
    /// Missing or invalid token at handshake.
    pub const UNAUTHENTICATED: u16 = 4401;
    /// Authenticated but forbidden.
    pub const FORBIDDEN: u16 = 4403;
}

/// Error kinds propagated to clients in `ERROR.data.kind` and counted under
/// `commands_rejected_total{reason}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Unauthenticated,
    Unauthorized,
    MalformedCommand,
    InvalidTransition,
    UnknownParticipant,
    MatchTerminal,
    Conflict,
    StoreTimeout,
    StoreUnavailable,
    SlowConsumer,
    Idle,
}

impl ErrorKind {
    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Unauthorized => "unauthorized",
            Self::MalformedCommand => "malformed_command",
            Self::InvalidTransition => "invalid_transition",
            Self::UnknownParticipant => "unknown_participant",
            Self::MatchTerminal => "match_terminal",
            Self::Conflict => "conflict",
            Self::StoreTimeout => "store_timeout",
            Self::StoreUnavailable => "store_unavailable",
            Self::SlowConsumer => "slow_consumer",
            Self::Idle => "idle",
        }
    }
}

/// A command that was refused. Never fatal to the connection: the router
/// answers with an `ERROR` frame and the socket stays open.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CommandError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedCommand, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            ErrorKind::Unauthorized,
            "role lacks permission for this command",
        )
    }
}

impl From<Rejection> for CommandError {
    fn from(r: Rejection) -> Self {
        let kind = match &r {
            Rejection::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Rejection::Unauthorized => ErrorKind::Unauthorized,
            Rejection::UnknownParticipant(_) => ErrorKind::UnknownParticipant,
            Rejection::MalformedCommand(_) => ErrorKind::MalformedCommand,
            Rejection::MatchTerminal => ErrorKind::MatchTerminal,
        };
        Self::new(kind, r.to_string())
    }
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::VersionConflict { .. } => Self::new(
                ErrorKind::Conflict,
                "concurrent update retries exhausted; refetch and retry",
            ),
            StoreError::NotFound(id) => {
                Self::new(ErrorKind::StoreUnavailable, format!("match {id} not found"))
            }
            other => Self::new(ErrorKind::StoreUnavailable, other.to_string()),
        }
    }
}
