//! Per-request execution contexts.
//!
//! Every GraphQL execution receives an [`ExecutionContext`]: request
//! metadata, a shared read-only resolver registry, and (for the
//! request/response path only) the parsed GraphQL parameters. A context is
//! built once and never mutated afterwards; the engine receives it behind
//! an `Arc` as an immutable snapshot.

use std::{any::Any, collections::HashMap, net::SocketAddr, sync::Arc};

use axum::http::HeaderMap;
use serde::Deserialize;

/// Transport-level request metadata captured before the upgrade.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub remote_addr: Option<SocketAddr>,
    pub headers: HashMap<String, String>,
}

impl RequestMeta {
    pub fn from_parts(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> Self {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        Self {
            remote_addr,
            headers,
        }
    }
}

/// Parsed GraphQL operation parameters from a request body.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlParams {
    pub query: String,
    #[serde(default)]
    pub variables: Option<serde_json::Value>,
    #[serde(rename = "operationName", default)]
    pub operation_name: Option<String>,
}

/// Opaque resolver registry seam.
///
/// The registry is shared, read-only and outlives every context. The
/// gateway never looks inside it; the engine downcasts to its own concrete
/// registry type.
pub trait ResolverRegistry: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Registry with nothing mounted, for the skeleton binary and tests.
pub struct EmptyRegistry;

impl ResolverRegistry for EmptyRegistry {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Immutable bundle handed into each GraphQL execution.
pub struct ExecutionContext {
    pub request: RequestMeta,
    pub resolvers: Arc<dyn ResolverRegistry>,
    pub graphql_params: Option<GraphQlParams>,
}

/// Builds one context per request/connection around the shared registry.
#[derive(Clone)]
pub struct ContextBuilder {
    resolvers: Arc<dyn ResolverRegistry>,
}

impl ContextBuilder {
    pub fn new(resolvers: Arc<dyn ResolverRegistry>) -> Self {
        Self { resolvers }
    }

    /// Context for a subscription connection.
    pub fn build(&self, request: RequestMeta) -> ExecutionContext {
        ExecutionContext {
            request,
            resolvers: Arc::clone(&self.resolvers),
            graphql_params: None,
        }
    }

    /// Context for one-shot query execution, carrying the parsed operation.
    pub fn build_with_params(
        &self,
        request: RequestMeta,
        params: GraphQlParams,
    ) -> ExecutionContext {
        ExecutionContext {
            request,
            resolvers: Arc::clone(&self.resolvers),
            graphql_params: Some(params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contexts_share_one_registry() {
        let builder = ContextBuilder::new(Arc::new(EmptyRegistry));
        let meta = RequestMeta {
            remote_addr: None,
            headers: HashMap::new(),
        };
        let first = builder.build(meta.clone());
        let second = builder.build(meta);
        assert!(Arc::ptr_eq(&first.resolvers, &second.resolvers));
        assert!(first.graphql_params.is_none());
    }

    #[test]
    fn query_context_carries_the_parsed_operation() {
        let builder = ContextBuilder::new(Arc::new(EmptyRegistry));
        let params: GraphQlParams = serde_json::from_str(
            r#"{"query":"query Who { me }","operationName":"Who","variables":{"a":1}}"#,
        )
        .expect("valid request body");
        let ctx = builder.build_with_params(
            RequestMeta {
                remote_addr: None,
                headers: HashMap::new(),
            },
            params,
        );
        let params = ctx.graphql_params.expect("params threaded through");
        assert_eq!(params.operation_name.as_deref(), Some("Who"));
        assert_eq!(params.query, "query Who { me }");
    }
}
