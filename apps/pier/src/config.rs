use std::{net::SocketAddr, time::Duration};

use anyhow::{bail, Context};

use crate::cli::{AuthMode, Cli};

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub auth: AuthConfig,
    pub owner: String,
    pub server_name: String,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone)]
pub enum AuthConfig {
    /// Single-user shared token.
    Token { token: String },
    /// Hub-delegated identity verified against the hub's JWKS endpoint.
    Hub {
        jwks_url: String,
        issuer: Option<String>,
        audience: Option<String>,
        cache_ttl: Duration,
    },
}

impl TryFrom<Cli> for Config {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;

        let auth = match cli.auth_mode {
            AuthMode::Token => {
                let Some(token) = cli.auth_token else {
                    bail!("token auth mode requires --auth-token (PIER_AUTH_TOKEN)");
                };
                AuthConfig::Token { token }
            }
            AuthMode::Hub => {
                let Some(jwks_url) = cli.hub_jwks_url else {
                    bail!("hub auth mode requires --hub-jwks-url (PIER_HUB_JWKS_URL)");
                };
                AuthConfig::Hub {
                    jwks_url,
                    issuer: cli.hub_issuer,
                    audience: cli.hub_audience,
                    cache_ttl: Duration::from_secs(cli.hub_jwks_cache_ttl_secs),
                }
            }
        };

        let owner = cli
            .owner
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "pier".to_string());
        let server_name = cli
            .server_name
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| listen_addr.to_string());

        Ok(Config {
            listen_addr,
            auth,
            owner,
            server_name,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }
}
