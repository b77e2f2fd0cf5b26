//! WebSocket endpoints.
//!
//! - `GET /ws/match/{matchId}?token=…&role=referee|viewer&sinceVersion=N`
//! - `GET /ws/tournament/{tournamentId}?token=…`
//!
//! Browsers cannot set headers on `new WebSocket`, so the token is accepted
//! from the `token` query parameter as well as the `Authorization` header.
//! Authentication failures close the socket with 4401 right after the
//! upgrade; `role=referee` without a REFEREE/ADMIN claim is downgraded to
//! viewer on match channels and closed with 4403 on tournament channels,
//! where referee mode is meaningless; an unknown match closes with 1008
//! after an explanatory `ERROR` frame.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tatami_auth::{bearer_from_header, VerifiedToken};
use tatami_store::StoreError;
use tatami_types::ChannelId;
use tracing::{debug, warn};

use crate::error::{close_code, ErrorKind};
use crate::frames::{ClientFrame, MatchUpdateData, ServerFrame};
use crate::hub::ConnectionHandles;
use crate::router::CommandContext;
use crate::state::AppState;

/// Query parameters shared by both endpoints.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, rename = "sinceVersion")]
    pub since_version: Option<u64>,
}

/// WebSocket routes, to be nested under the API prefix.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ws/match/{match_id}", get(ws_match_handler))
        .route("/ws/tournament/{tournament_id}", get(ws_tournament_handler))
}

pub async fn ws_match_handler(
    ws: WebSocketUpgrade,
    Path(match_id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let auth = authenticate(&state, &headers, query.token.as_deref());
    ws.on_upgrade(move |socket| serve_match(socket, state, match_id, query, auth))
}

pub async fn ws_tournament_handler(
    ws: WebSocketUpgrade,
    Path(tournament_id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let auth = authenticate(&state, &headers, query.token.as_deref());
    ws.on_upgrade(move |socket| serve_tournament(socket, state, tournament_id, query, auth))
}

fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Option<VerifiedToken> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_from_header)
        .or(query_token)?;
    match state.verifier.verify(token, Utc::now()) {
        Ok(verified) => Some(verified),
        Err(e) => {
            debug!(error = %e, "ws token rejected");
            None
        }
    }
}

async fn close_now(mut socket: WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

async fn serve_match(
    socket: WebSocket,
    state: AppState,
    match_id: String,
    query: WsQuery,
    auth: Option<VerifiedToken>,
) {
    let Some(token) = auth else {
        return close_now(socket, close_code::UNAUTHENTICATED, "unauthenticated").await;
    };

    // `role=referee` needs a REFEREE or ADMIN claim; without it the
    // connection is downgraded to viewer rather than rejected.
    let is_referee = query.role.as_deref() == Some("referee") && token.can_mutate();

    // The match must exist before we subscribe anyone to it.
    let initial = match state.store.load_match(&match_id).await {
        Ok(m) => m,
        Err(StoreError::NotFound(_)) => {
            let mut socket = socket;
            let frame = ServerFrame::error(
                ErrorKind::MalformedCommand,
                format!("match {match_id} not found"),
                None,
                Utc::now(),
            );
            if let Ok(json) = frame.to_json() {
                let _ = socket.send(Message::Text(json.into())).await;
            }
            return close_now(socket, close_code::POLICY_VIOLATION, "unknown match").await;
        }
        Err(e) => {
            warn!(match_id = %match_id, error = %e, "store unavailable at ws accept");
            return close_now(socket, close_code::SERVER_ERROR, "store unavailable").await;
        }
    };

    let channel = ChannelId::for_match(&match_id);
    let handles = state.hub.register(
        token.subject_id.clone(),
        token.roles.clone(),
        channel.clone(),
        is_referee,
    );

    // Initial snapshot: full match plus any events the client missed.
    let since = query.since_version.unwrap_or(initial.version);
    let missed = match state.store.recent_events(&match_id, since, 500).await {
        Ok(events) => events,
        Err(e) => {
            warn!(match_id = %match_id, error = %e, "resume query failed");
            Vec::new()
        }
    };
    let snapshot = ServerFrame::MatchUpdate {
        match_id: match_id.clone(),
        version: initial.version,
        data: MatchUpdateData {
            match_: initial,
            emitted_events: missed,
        },
        timestamp: Utc::now(),
    };
    if let Ok(json) = snapshot.to_json() {
        let _ = handles.info.try_send(json);
    }
    state.hub.broadcast_connection_status(&channel);

    drive_connection(socket, state, channel, handles).await;
}

async fn serve_tournament(
    socket: WebSocket,
    state: AppState,
    tournament_id: String,
    query: WsQuery,
    auth: Option<VerifiedToken>,
) {
    let Some(token) = auth else {
        return close_now(socket, close_code::UNAUTHENTICATED, "unauthenticated").await;
    };

    // Tournament feeds have no referee mode; asking for one is refused
    // outright.
    if query.role.as_deref() == Some("referee") {
        return close_now(socket, close_code::FORBIDDEN, "forbidden").await;
    }

    let channel = ChannelId::for_tournament(&tournament_id);
    let handles = state
        .hub
        .register(token.subject_id.clone(), token.roles.clone(), channel.clone(), false);

    drive_connection(socket, state, channel, handles).await;
}

/// Split the socket, run the writer and reader until either side ends, then
/// release everything the connection held.
async fn drive_connection(
    socket: WebSocket,
    state: AppState,
    channel: ChannelId,
    handles: ConnectionHandles,
) {
    let ConnectionHandles {
        info,
        outbound,
        close,
    } = handles;
    let (sink, stream) = socket.split();
    let conn_id = info.id;

    let writer_state = state.clone();
    let writer = tokio::spawn(write_loop(
        sink,
        outbound,
        close,
        writer_state,
        conn_id,
    ));

    read_loop(stream, &state, &channel, &info).await;

    state.hub.unregister(conn_id);
    // Nudge the writer so it flushes a close frame and exits even when the
    // client vanished without sending one.
    info.request_close(close_code::NORMAL, "closed");
    state.hub.broadcast_connection_status(&channel);
    // The writer bounds every send, so this only outwaits one stalled write.
    let _ = tokio::time::timeout(state.config.send_timeout(), writer).await;
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: tokio::sync::mpsc::Receiver<String>,
    mut close: tokio::sync::watch::Receiver<Option<crate::hub::CloseDirective>>,
    state: AppState,
    conn_id: u64,
) {
    let send_timeout = state.config.send_timeout();
    loop {
        tokio::select! {
            directive = close.changed() => {
                if directive.is_err() {
                    break;
                }
                let Some(d) = close.borrow().clone() else { continue };
                let _ = tokio::time::timeout(
                    send_timeout,
                    sink.send(Message::Close(Some(CloseFrame {
                        code: d.code,
                        reason: d.reason.into(),
                    }))),
                )
                .await;
                break;
            }
            frame = outbound.recv() => {
                let Some(text) = frame else { break };
                match tokio::time::timeout(send_timeout, sink.send(Message::Text(text.into()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => break,
                    Err(_) => {
                        // Write stalled past the deadline: slow consumer.
                        state.hub.evict(conn_id, close_code::TRY_AGAIN_LATER, "slow_consumer");
                        let _ = tokio::time::timeout(
                            send_timeout,
                            sink.send(Message::Close(Some(CloseFrame {
                                code: close_code::TRY_AGAIN_LATER,
                                reason: "slow_consumer".into(),
                            }))),
                        )
                        .await;
                        break;
                    }
                }
            }
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    channel: &ChannelId,
    info: &crate::hub::ConnectionInfo,
) {
    let mut close = info.close_signal();
    loop {
        let message = tokio::select! {
            changed = close.changed() => {
                if changed.is_err() || close.borrow().is_some() {
                    break;
                }
                continue;
            }
            next = stream.next() => match next {
                Some(Ok(m)) => m,
                Some(Err(_)) | None => break,
            },
        };
        match message {
            Message::Text(text) => {
                state.hub.mark_activity(info.id);
                handle_text(state, channel, info, text.as_str()).await;
            }
            // Protocol-level pings are answered by the library; both
            // directions count as liveness.
            Message::Ping(_) | Message::Pong(_) => {
                state.hub.mark_activity(info.id);
            }
            Message::Close(_) => break,
            Message::Binary(_) => {
                let frame = ServerFrame::error(
                    ErrorKind::MalformedCommand,
                    "binary frames are not part of the protocol",
                    None,
                    Utc::now(),
                );
                if let Ok(json) = frame.to_json() {
                    let _ = info.try_send(json);
                }
            }
        }
    }
}

async fn handle_text(
    state: &AppState,
    channel: &ChannelId,
    info: &crate::hub::ConnectionInfo,
    text: &str,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            let frame = ServerFrame::error(
                ErrorKind::MalformedCommand,
                format!("unparseable frame: {e}"),
                None,
                Utc::now(),
            );
            if let Ok(json) = frame.to_json() {
                let _ = info.try_send(json);
            }
            return;
        }
    };

    // Heartbeat is answered directly; it is not a match command.
    if matches!(frame, ClientFrame::Ping { .. }) {
        if let Ok(json) = ServerFrame::pong(Utc::now()).to_json() {
            let _ = info.try_send(json);
        }
        return;
    }

    let ctx = CommandContext {
        subject_id: &info.subject_id,
        roles: &info.roles,
        channel,
    };
    if let Err(e) = state.hub.router().handle(&ctx, &frame).await {
        let error_frame = ServerFrame::error(
            e.kind,
            e.message.clone(),
            frame.correlation_id().map(str::to_string),
            Utc::now(),
        );
        if let Ok(json) = error_frame.to_json() {
            let _ = info.try_send(json);
        }
    }
}
