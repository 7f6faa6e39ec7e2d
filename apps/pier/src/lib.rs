//! Pier: a GraphQL subscription gateway.
//!
//! Pier sits between WebSocket clients speaking the `graphql-ws`
//! sub-protocol and an external GraphQL execution engine. Its job is
//! narrow: negotiate the sub-protocol, resolve and authorize the
//! connecting principal before any protocol data is acted on, then ferry
//! frames in both directions through a bounded per-connection queue. The
//! schema, resolvers and execution engine are injected behind the seams in
//! [`engine`].

pub mod auth;
pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod gate;
pub mod handlers;
pub mod telemetry;
pub mod websocket;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    auth::PrincipalResolver,
    context::ContextBuilder,
    engine::{QueryExecutor, SubscriptionEngine},
    gate::AuthorizationGate,
    handlers::{graphql_handler, health_handler, metrics_handler, user_profile_handler},
    websocket::subscription_handler,
};

/// What the profile endpoint reports about this gateway.
#[derive(Debug, Clone)]
pub struct ProfileSettings {
    pub owner: String,
    pub server_name: String,
}

/// Shared wiring for every connection and request.
///
/// Everything here is immutable and shared read-only across connections;
/// per-connection state lives in the connection's own tasks, so the hot
/// path takes no locks.
#[derive(Clone)]
pub struct GatewayState {
    pub resolver: Arc<dyn PrincipalResolver>,
    pub gate: Arc<AuthorizationGate>,
    pub contexts: ContextBuilder,
    pub engine: Arc<dyn SubscriptionEngine>,
    pub executor: Arc<dyn QueryExecutor>,
    pub profile: ProfileSettings,
    pub metrics: PrometheusHandle,
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/graphql", post(graphql_handler))
        .route("/userprofile", get(user_profile_handler))
        .route("/subscriptions", get(subscription_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
