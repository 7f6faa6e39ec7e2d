//! HTTP surface: one-shot GraphQL execution, the user profile lookup and
//! the operational endpoints. The WebSocket upgrade lives in
//! [`crate::websocket`].

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use tracing::{debug, warn};

use crate::{
    auth::{extract_token, Principal, PrincipalKind},
    context::{GraphQlParams, RequestMeta},
    engine::ExecutionOptions,
    GatewayState,
};

/// Bearer token presented as a query parameter, for clients that cannot
/// set headers.
#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    pub token: Option<String>,
}

/// Rejection for the authentication/authorization path. The body carries
/// only a generic reason string; nothing about the failure leaks.
pub struct AuthErrorResponse {
    status: StatusCode,
    reason: &'static str,
}

impl AuthErrorResponse {
    pub fn authentication_required() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            reason: "authentication required",
        }
    }

    pub fn authorisation_insufficient() -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            reason: "authorisation insufficient",
        }
    }
}

impl IntoResponse for AuthErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "reason": self.reason }))).into_response()
    }
}

/// Resolve the principal once, then gate it. Both steps must pass before
/// any request data is acted on.
pub(crate) async fn authorise(
    state: &GatewayState,
    headers: &HeaderMap,
    token_param: Option<&str>,
    handler: &'static str,
) -> Result<Principal, AuthErrorResponse> {
    let token = extract_token(headers, token_param);
    let principal = match state.resolver.resolve(token.as_deref()).await {
        Ok(principal) => principal,
        Err(err) => {
            warn!(handler, error = %err, "principal resolution failed");
            counter!(
                "pier_resolution_failures_total",
                1,
                "handler" => handler,
                "reason" => err.metric_label()
            );
            return Err(AuthErrorResponse::authentication_required());
        }
    };

    let decision = state.gate.authorize(&principal, handler);
    if !decision.allowed {
        counter!("pier_authorisation_denied_total", 1, "handler" => handler);
        return Err(AuthErrorResponse::authorisation_insufficient());
    }

    Ok(principal)
}

/// `POST /graphql`: one-shot execution through the external executor.
///
/// Validation is disabled at this layer; the engine validated the document
/// upstream. Executor errors come back in the response `errors` field, not
/// as transport failures.
pub async fn graphql_handler(
    State(state): State<GatewayState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Query(auth): Query<AuthQuery>,
    headers: HeaderMap,
    Json(request): Json<GraphQlParams>,
) -> Response {
    let principal = match authorise(&state, &headers, auth.token.as_deref(), "graphql").await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };
    debug!(
        principal = %principal.name,
        operation = request.operation_name.as_deref().unwrap_or("<anonymous>"),
        "executing graphql request"
    );

    let meta = RequestMeta::from_parts(&headers, Some(remote_addr));
    let ctx = state.contexts.build_with_params(meta, request.clone());
    match state
        .executor
        .execute(&ctx, request, ExecutionOptions::passthrough())
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(err) => {
            warn!(error = %err, "graphql execution failed");
            Json(json!({ "errors": [{ "message": err.to_string() }] })).into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct UserProfile {
    kind: PrincipalKind,
    name: String,
    server: String,
    owner: String,
}

/// `GET /userprofile`: who the gateway thinks the caller is.
///
/// `owner` is the configured gateway owner; behind a hub this may differ
/// from the authenticated user.
pub async fn user_profile_handler(
    State(state): State<GatewayState>,
    Query(auth): Query<AuthQuery>,
    headers: HeaderMap,
) -> Response {
    let principal = match authorise(&state, &headers, auth.token.as_deref(), "userprofile").await {
        Ok(principal) => principal,
        Err(rejection) => return rejection.into_response(),
    };

    let server = principal
        .server_host
        .clone()
        .unwrap_or_else(|| state.profile.server_name.clone());
    Json(UserProfile {
        kind: principal.kind,
        name: principal.name,
        server,
        owner: state.profile.owner.clone(),
    })
    .into_response()
}

pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn metrics_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
