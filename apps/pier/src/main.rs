use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;

use pier::{
    auth::{HubTokenResolver, LocalTokenResolver, PrincipalResolver},
    build_router,
    cli::Cli,
    config::{AuthConfig, Config},
    context::{ContextBuilder, EmptyRegistry},
    engine::{SkeletonEngine, SkeletonExecutor},
    gate::{AuthorizationGate, PermitResolved},
    telemetry::Telemetry,
    GatewayState, ProfileSettings,
};

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;

    let cli = Cli::parse();
    let config = Config::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        owner = %config.owner,
        "starting pier gateway"
    );

    let resolver: Arc<dyn PrincipalResolver> = match &config.auth {
        AuthConfig::Token { token } => {
            Arc::new(LocalTokenResolver::new(token, config.owner.clone()))
        }
        AuthConfig::Hub {
            jwks_url,
            issuer,
            audience,
            cache_ttl,
        } => Arc::new(HubTokenResolver::new(
            jwks_url.clone(),
            issuer.clone(),
            audience.clone(),
            *cache_ttl,
        )),
    };

    // The bare binary is a handshake skeleton: mount a real engine,
    // executor and resolver registry here to serve a schema.
    let state = GatewayState {
        resolver,
        gate: Arc::new(AuthorizationGate::new(Arc::new(PermitResolved))),
        contexts: ContextBuilder::new(Arc::new(EmptyRegistry)),
        engine: Arc::new(SkeletonEngine),
        executor: Arc::new(SkeletonExecutor),
        profile: ProfileSettings {
            owner: config.owner.clone(),
            server_name: config.server_name.clone(),
        },
        metrics: telemetry.metrics_handle(),
    };

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;

    info!("pier listening on {}", config.listen_addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
