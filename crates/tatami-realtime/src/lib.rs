//! Tatami Realtime - The Match Control Plane
//!
//! This crate is the WebSocket fan-out hub and everything behind it:
//!
//! - [`hub`] owns the connection registry, per-connection send queues,
//!   heartbeat/idle eviction, and the refcounted channel subscriptions.
//! - [`dispatcher`] consumes bus subscriptions and fans frames out to local
//!   sockets without ever blocking on a slow client.
//! - [`router`] authorizes and validates inbound commands, runs them
//!   through the pure engine via the event-log [`appender`], and publishes
//!   the resulting snapshot to the bus.
//! - [`ticker`] drives the in-memory countdown for live matches under a
//!   cross-process lease, reconciling the store on a fixed cadence.
//! - [`ws`] holds the axum upgrade handlers for the two endpoints.
//!
//! Frames, the error taxonomy with its close codes, configuration, and the
//! metric names live in their own modules.

pub mod appender;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod frames;
pub mod hub;
pub mod metrics;
pub mod router;
pub mod state;
pub mod ticker;
pub mod ws;

pub use config::RealtimeConfig;
pub use error::{close_code, CommandError, ErrorKind};
pub use hub::Hub;
pub use router::CommandRouter;
pub use state::{AppState, Bus};
