//! End-to-end coverage of the WebSocket handshake path: sub-protocol
//! negotiation, the authorization boundary, and frame delivery into the
//! engine in arrival order.

mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::SinkExt;
use pier::{
    auth::Principal,
    context::ExecutionContext,
    engine::{EngineError, SkeletonExecutor, SubscriptionEngine, SubscriptionLink},
    gate::{AuthorizationPolicy, PermitResolved},
};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::StatusCode, Error as WsError, Message},
};

use common::{spawn_gateway, TEST_TOKEN};

/// Forwards every inbound frame it consumes, in consumption order.
struct CaptureEngine {
    frames: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl SubscriptionEngine for CaptureEngine {
    async fn run(
        &self,
        mut link: SubscriptionLink,
        _ctx: Arc<ExecutionContext>,
    ) -> Result<(), EngineError> {
        while let Ok(text) = link.inbound.get().await {
            if self.frames.send(text).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Counts how many connection tasks ever reached the engine.
struct CountingEngine {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl SubscriptionEngine for CountingEngine {
    async fn run(
        &self,
        mut link: SubscriptionLink,
        _ctx: Arc<ExecutionContext>,
    ) -> Result<(), EngineError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        while link.inbound.get().await.is_ok() {}
        Ok(())
    }
}

/// Counts gate calls; optionally denies everyone.
struct CountingPolicy {
    calls: Arc<AtomicUsize>,
    allow: bool,
}

impl AuthorizationPolicy for CountingPolicy {
    fn allows(&self, _principal: &Principal, _handler: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.allow
    }
}

fn ws_request(
    addr: std::net::SocketAddr,
    token: Option<&str>,
    protocols: &str,
) -> tokio_tungstenite::tungstenite::handshake::client::Request {
    let url = match token {
        Some(token) => format!("ws://{addr}/subscriptions?token={token}"),
        None => format!("ws://{addr}/subscriptions"),
    };
    let mut request = url.into_client_request().expect("client request");
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        protocols.parse().expect("header value"),
    );
    request
}

fn handshake_status(err: WsError) -> StatusCode {
    match err {
        WsError::Http(response) => response.status(),
        other => panic!("expected an HTTP rejection, got: {other}"),
    }
}

#[test_deadline::tokio_deadline(30)]
async fn negotiates_graphql_ws_and_delivers_first_frame() {
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let addr = spawn_gateway(
        Arc::new(CaptureEngine { frames: frames_tx }),
        Arc::new(SkeletonExecutor),
        Arc::new(PermitResolved),
    )
    .await;

    let (mut ws, response) =
        connect_async(ws_request(addr, Some(TEST_TOKEN), "graphql-ws, foo"))
            .await
            .expect("handshake accepted");
    assert_eq!(
        response
            .headers()
            .get("sec-websocket-protocol")
            .and_then(|value| value.to_str().ok()),
        Some("graphql-ws")
    );

    let start = r#"{"type":"start","id":"1","payload":{"query":"subscription { tick }"}}"#;
    ws.send(Message::Text(start.into()))
        .await
        .expect("frame sent");

    // The engine sees the frame as the first and only queued item.
    let delivered = frames_rx.recv().await.expect("frame delivered");
    assert_eq!(delivered, start);
    assert!(frames_rx.try_recv().is_err());
}

#[test_deadline::tokio_deadline(30)]
async fn handshake_without_graphql_ws_offer_is_rejected() {
    let runs = Arc::new(AtomicUsize::new(0));
    let addr = spawn_gateway(
        Arc::new(CountingEngine { runs: runs.clone() }),
        Arc::new(SkeletonExecutor),
        Arc::new(PermitResolved),
    )
    .await;

    let err = connect_async(ws_request(addr, Some(TEST_TOKEN), "foo"))
        .await
        .expect_err("handshake refused");
    assert_eq!(handshake_status(err), StatusCode::BAD_REQUEST);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0, "no engine task spawned");
}

#[test_deadline::tokio_deadline(30)]
async fn failed_resolution_never_reaches_the_gate() {
    let runs = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let addr = spawn_gateway(
        Arc::new(CountingEngine { runs: runs.clone() }),
        Arc::new(SkeletonExecutor),
        Arc::new(CountingPolicy {
            calls: calls.clone(),
            allow: true,
        }),
    )
    .await;

    for token in [None, Some("wrong-token")] {
        let err = connect_async(ws_request(addr, token, "graphql-ws"))
            .await
            .expect_err("handshake refused");
        assert_eq!(handshake_status(err), StatusCode::UNAUTHORIZED);
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0, "gate never consulted");
    assert_eq!(runs.load(Ordering::SeqCst), 0, "no engine task spawned");
}

#[test_deadline::tokio_deadline(30)]
async fn denied_principal_never_spawns_an_engine_task() {
    let runs = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let addr = spawn_gateway(
        Arc::new(CountingEngine { runs: runs.clone() }),
        Arc::new(SkeletonExecutor),
        Arc::new(CountingPolicy {
            calls: calls.clone(),
            allow: false,
        }),
    )
    .await;

    let err = connect_async(ws_request(addr, Some(TEST_TOKEN), "graphql-ws"))
        .await
        .expect_err("handshake refused");
    assert_eq!(handshake_status(err), StatusCode::FORBIDDEN);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1, "gate consulted once");
    assert_eq!(runs.load(Ordering::SeqCst), 0, "no engine task spawned");
}

#[test_deadline::tokio_deadline(30)]
async fn skeleton_engine_speaks_the_protocol_end_to_end() {
    let addr = spawn_gateway(
        Arc::new(pier::engine::SkeletonEngine),
        Arc::new(SkeletonExecutor),
        Arc::new(PermitResolved),
    )
    .await;

    let (mut ws, _response) = connect_async(ws_request(addr, Some(TEST_TOKEN), "graphql-ws"))
        .await
        .expect("handshake accepted");

    ws.send(Message::Text(r#"{"type":"connection_init"}"#.into()))
        .await
        .expect("init sent");

    use futures_util::StreamExt;
    let ack = loop {
        match ws.next().await.expect("frame").expect("read") {
            Message::Text(text) => break text,
            _ => continue,
        }
    };
    assert_eq!(ack.as_str(), r#"{"type":"connection_ack"}"#);
}
