//! Metric names and registration.
//!
//! Series exported on the scrape endpoint. Names are part of the operations
//! contract; dashboards and alerts key on them.

/// Gauge: live WebSocket connections on this instance.
pub const CURRENT_WS_CONNECTIONS: &str = "current_ws_connections";
/// Gauge: payloads received from the bus, not yet consumed locally.
pub const PUBSUB_BACKLOG: &str = "pubsub_backlog";
/// Histogram: publish -> local deliver, milliseconds.
pub const BROADCAST_LATENCY_MS: &str = "broadcast_latency_ms";
/// Counter: frames published to the bus.
pub const WS_MESSAGES_PUBLISHED: &str = "ws_messages_published";
/// Counter: frames handed to local send queues.
pub const WS_MESSAGES_BROADCASTED: &str = "ws_messages_broadcasted";
/// Counter: accepted commands, labeled by `kind`.
pub const COMMANDS_ACCEPTED_TOTAL: &str = "commands_accepted_total";
/// Counter: rejected commands, labeled by `reason`.
pub const COMMANDS_REJECTED_TOTAL: &str = "commands_rejected_total";
/// Counter: engine-initiated finishes, labeled by `cause`.
pub const AUTO_FINISH_TOTAL: &str = "auto_finish_total";

/// Describe all series once at startup so the exporter renders help text.
pub fn describe() {
    metrics::describe_gauge!(CURRENT_WS_CONNECTIONS, "Live WebSocket connections");
    metrics::describe_gauge!(PUBSUB_BACKLOG, "Undelivered pub/sub payloads on this instance");
    metrics::describe_histogram!(
        BROADCAST_LATENCY_MS,
        metrics::Unit::Milliseconds,
        "Latency from publish to local delivery"
    );
    metrics::describe_counter!(WS_MESSAGES_PUBLISHED, "Frames published to the pub/sub bus");
    metrics::describe_counter!(
        WS_MESSAGES_BROADCASTED,
        "Frames delivered to local send queues"
    );
    metrics::describe_counter!(COMMANDS_ACCEPTED_TOTAL, "Accepted match commands by kind");
    metrics::describe_counter!(COMMANDS_REJECTED_TOTAL, "Rejected match commands by reason");
    metrics::describe_counter!(AUTO_FINISH_TOTAL, "Automatic match finishes by cause");
}
