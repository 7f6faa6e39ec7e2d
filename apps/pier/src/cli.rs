use clap::{Parser, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "pier",
    author,
    version,
    about = "GraphQL subscription gateway (WebSocket bridge to an external engine)"
)]
pub struct Cli {
    /// Address to bind the gateway listener to.
    #[arg(long, env = "PIER_LISTEN_ADDR", default_value = "127.0.0.1:8023")]
    pub listen_addr: String,

    /// Principal resolution strategy.
    #[arg(long, env = "PIER_AUTH_MODE", value_enum, default_value_t = AuthMode::Token)]
    pub auth_mode: AuthMode,

    /// Shared secret for token mode.
    #[arg(long, env = "PIER_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// JWKS endpoint of the hub, for hub mode.
    #[arg(long, env = "PIER_HUB_JWKS_URL")]
    pub hub_jwks_url: Option<String>,

    /// Expected JWT issuer in hub mode.
    #[arg(long, env = "PIER_HUB_ISSUER")]
    pub hub_issuer: Option<String>,

    /// Expected JWT audience in hub mode.
    #[arg(long, env = "PIER_HUB_AUDIENCE")]
    pub hub_audience: Option<String>,

    /// Seconds to cache the hub JWKS document.
    #[arg(long, env = "PIER_HUB_JWKS_CACHE_TTL_SECS", default_value_t = 300)]
    pub hub_jwks_cache_ttl_secs: u64,

    /// Gateway owner reported by the profile endpoint. Defaults to $USER.
    #[arg(long, env = "PIER_OWNER")]
    pub owner: Option<String>,

    /// Host name reported by the profile endpoint.
    #[arg(long, env = "PIER_SERVER_NAME")]
    pub server_name: Option<String>,

    /// Grace period applied during shutdown.
    #[arg(long, env = "PIER_SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthMode {
    /// Single shared token; the bearer is the gateway owner.
    Token,
    /// Hub-delegated identity verified against the hub's JWKS endpoint.
    Hub,
}
