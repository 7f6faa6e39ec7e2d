use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use pier::{
    auth::LocalTokenResolver,
    build_router,
    context::{ContextBuilder, EmptyRegistry},
    engine::{QueryExecutor, SubscriptionEngine},
    gate::{AuthorizationGate, AuthorizationPolicy},
    GatewayState, ProfileSettings,
};

pub const TEST_TOKEN: &str = "open-sesame";
pub const TEST_USER: &str = "alice";

/// Bind the gateway on an ephemeral port with the given engine, executor
/// and policy, and serve it in the background.
pub async fn spawn_gateway(
    engine: Arc<dyn SubscriptionEngine>,
    executor: Arc<dyn QueryExecutor>,
    policy: Arc<dyn AuthorizationPolicy>,
) -> SocketAddr {
    let state = GatewayState {
        resolver: Arc::new(LocalTokenResolver::new(TEST_TOKEN, TEST_USER)),
        gate: Arc::new(AuthorizationGate::new(policy)),
        contexts: ContextBuilder::new(Arc::new(EmptyRegistry)),
        engine,
        executor,
        profile: ProfileSettings {
            owner: TEST_USER.to_string(),
            server_name: "gateway.test".to_string(),
        },
        metrics: PrometheusBuilder::new().build_recorder().handle(),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(
            listener,
            build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("serve");
    });
    addr
}
