//! Seams to the external GraphQL engine.
//!
//! The gateway does not implement GraphQL. Subscriptions are ferried
//! through [`SubscriptionEngine::run`], one-shot queries through
//! [`QueryExecutor::execute`]; both are injected at startup. The meaning of
//! individual `graphql-ws` frame types is the engine's business; the
//! gateway only guarantees delivery order and the authorization boundary.

use std::sync::Arc;

use async_trait::async_trait;
use frame_queue::QueueConsumer;
use graphql_ws_proto::{FrameType, WireFrame};
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::context::{ExecutionContext, GraphQlParams};

/// Duplex attachment handed to the engine for one connection: inbound
/// frames in strict arrival order, outbound frames to the transport writer.
pub struct SubscriptionLink {
    pub inbound: QueueConsumer<String>,
    pub outbound: mpsc::UnboundedSender<WireFrame>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("outbound channel closed")]
    OutboundClosed,
}

/// Long-lived subscription processing for one connection.
#[async_trait]
pub trait SubscriptionEngine: Send + Sync {
    /// Consume the link until the inbound queue closes. A clean close is
    /// `Ok`; an error is ferried back to the client as a protocol error
    /// frame by the caller and does not tear the connection down.
    async fn run(
        &self,
        link: SubscriptionLink,
        ctx: Arc<ExecutionContext>,
    ) -> Result<(), EngineError>;
}

/// Options forwarded with each one-shot execution.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionOptions {
    /// Document validation happens upstream of the gateway, so the query
    /// path always passes `false` here.
    pub validate: bool,
}

impl ExecutionOptions {
    pub fn passthrough() -> Self {
        Self { validate: false }
    }
}

/// One-shot GraphQL execution.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute and return the engine's result verbatim.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        params: GraphQlParams,
        options: ExecutionOptions,
    ) -> Result<serde_json::Value, EngineError>;
}

/// Development engine mounted by the bare binary: speaks just enough
/// `graphql-ws` to hold a conversation and tells every subscriber that no
/// schema is mounted. Doubles as the reference implementation of the ferry
/// contract for the integration tests.
pub struct SkeletonEngine;

#[async_trait]
impl SubscriptionEngine for SkeletonEngine {
    async fn run(
        &self,
        mut link: SubscriptionLink,
        _ctx: Arc<ExecutionContext>,
    ) -> Result<(), EngineError> {
        while let Ok(text) = link.inbound.get().await {
            let frame = match WireFrame::parse(&text) {
                Ok(frame) => frame,
                Err(err) => {
                    debug!(error = %err, "ignoring unparseable inbound frame");
                    continue;
                }
            };

            let reply = match frame.frame_type {
                FrameType::ConnectionInit => Some(WireFrame::connection_ack()),
                FrameType::Start => {
                    let id = frame.id.unwrap_or_default();
                    link.outbound
                        .send(WireFrame::error(
                            id.clone(),
                            json!([{ "message": "no schema mounted" }]),
                        ))
                        .map_err(|_| EngineError::OutboundClosed)?;
                    Some(WireFrame::complete(id))
                }
                FrameType::Stop => frame.id.map(WireFrame::complete),
                FrameType::ConnectionTerminate => return Ok(()),
                _ => None,
            };

            if let Some(reply) = reply {
                link.outbound
                    .send(reply)
                    .map_err(|_| EngineError::OutboundClosed)?;
            }
        }

        // Queue closed: the transport went away. Nothing left to do.
        Ok(())
    }
}

/// Executor counterpart of [`SkeletonEngine`] for the query endpoint.
pub struct SkeletonExecutor;

#[async_trait]
impl QueryExecutor for SkeletonExecutor {
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _params: GraphQlParams,
        _options: ExecutionOptions,
    ) -> Result<serde_json::Value, EngineError> {
        Ok(json!({
            "data": null,
            "errors": [{ "message": "no schema mounted" }],
        }))
    }
}
