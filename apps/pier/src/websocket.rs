//! The subscription protocol handler.
//!
//! One WebSocket connection moves through negotiation, authorization,
//! open, streaming and closed as explicit control flow: the upgrade
//! handler owns the pre-upgrade phases (reject early, spawn nothing), the
//! per-connection future owns the rest. While streaming, the transport
//! read loop and the engine task are decoupled by a bounded frame queue:
//! a slow engine suspends the read loop instead of dropping frames.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use graphql_ws_proto::{select_subprotocol, WireFrame};
use metrics::{counter, decrement_gauge, increment_gauge};
use serde_json::json;
use tokio::{sync::mpsc, time::timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::Principal,
    context::RequestMeta,
    engine::SubscriptionLink,
    handlers::{authorise, AuthQuery},
    GatewayState,
};

/// Inbound frames buffered per connection before backpressure kicks in.
pub const SUBSCRIPTION_QUEUE_DEPTH: usize = 100;

/// How long teardown waits for the engine and writer tasks to observe the
/// close signal before giving up on them.
const SHUTDOWN_PATIENCE: Duration = Duration::from_secs(5);

/// `GET /subscriptions`: WebSocket upgrade.
///
/// Everything that can reject the connection happens here, before the
/// handshake completes: sub-protocol negotiation, principal resolution,
/// authorization. No queue exists and no task is spawned until all three
/// have passed.
pub async fn subscription_handler(
    State(state): State<GatewayState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Query(auth): Query<AuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let offered = offered_subprotocols(&headers);
    let Some(subprotocol) = select_subprotocol(offered.iter().map(String::as_str)) else {
        counter!("pier_handshake_rejected_total", 1, "reason" => "negotiation");
        debug!(?offered, "no acceptable sub-protocol offered");
        return (
            StatusCode::BAD_REQUEST,
            "unsupported websocket sub-protocol",
        )
            .into_response();
    };

    let principal =
        match authorise(&state, &headers, auth.token.as_deref(), "subscriptions").await {
            Ok(principal) => principal,
            Err(rejection) => return rejection.into_response(),
        };

    let meta = RequestMeta::from_parts(&headers, Some(remote_addr));
    ws.protocols([subprotocol])
        .on_upgrade(move |socket| handle_subscription(socket, state, principal, meta))
}

/// Offers from the `Sec-WebSocket-Protocol` header, split on commas across
/// however many header lines the client sent.
fn offered_subprotocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Drive one authorized connection until the transport closes.
async fn handle_subscription(
    socket: WebSocket,
    state: GatewayState,
    principal: Principal,
    meta: RequestMeta,
) {
    let connection_id = Uuid::new_v4();
    counter!("pier_connections_total", 1);
    increment_gauge!("pier_connections_active", 1.0);
    info!(
        connection_id = %connection_id,
        principal = %principal.name,
        "subscription connection open"
    );

    // The queue exists before the first frame can be read and is never
    // replaced for the lifetime of the connection.
    let (producer, consumer) = frame_queue::bounded(SUBSCRIPTION_QUEUE_DEPTH);
    let ctx = Arc::new(state.contexts.build(meta));

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireFrame>();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_connection = connection_id;
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            match frame.to_json() {
                Ok(json) => {
                    if ws_tx.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(
                    connection_id = %writer_connection,
                    error = %err,
                    "dropping unserialisable outbound frame"
                ),
            }
        }
        debug!(connection_id = %writer_connection, "writer task finished");
    });

    // Streaming: the engine consumes the queue independently of the read
    // loop. An engine failure is ferried back as a protocol error frame;
    // it does not end the connection.
    let engine = Arc::clone(&state.engine);
    let engine_connection = connection_id;
    let engine_task = tokio::spawn(async move {
        let link = SubscriptionLink {
            inbound: consumer,
            outbound: out_tx.clone(),
        };
        if let Err(err) = engine.run(link, ctx).await {
            warn!(
                connection_id = %engine_connection,
                error = %err,
                "engine run failed"
            );
            let _ = out_tx.send(WireFrame::connection_error(
                json!({ "message": err.to_string() }),
            ));
        }
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                counter!("pier_frames_enqueued_total", 1);
                // Suspends while the queue is full: backpressure, never a
                // silent drop.
                if producer.put(text).await.is_err() {
                    warn!(
                        connection_id = %connection_id,
                        "frame queue closed under an open transport"
                    );
                    break;
                }
            }
            Ok(Message::Close(frame)) => {
                debug!(
                    connection_id = %connection_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            // Ping/pong and binary frames are not protocol text frames.
            Ok(_) => {}
            Err(err) => {
                warn!(
                    connection_id = %connection_id,
                    error = %err,
                    "error receiving frame"
                );
                break;
            }
        }
    }

    // Close: dropping the producer unblocks a consumer parked on an empty
    // queue, so the engine task winds down on its own.
    drop(producer);
    if timeout(SHUTDOWN_PATIENCE, engine_task).await.is_err() {
        warn!(
            connection_id = %connection_id,
            "engine task slow to observe close"
        );
    }
    if timeout(SHUTDOWN_PATIENCE, writer).await.is_err() {
        warn!(connection_id = %connection_id, "writer task slow to drain");
    }

    decrement_gauge!("pier_connections_active", 1.0);
    info!(connection_id = %connection_id, "subscription connection closed");
}
