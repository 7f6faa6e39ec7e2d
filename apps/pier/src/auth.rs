//! Principal resolution.
//!
//! Whatever authenticates a connection lives behind [`PrincipalResolver`]:
//! one strategy is chosen at startup and injected, never swapped at
//! runtime. Resolution runs exactly once per connection or request, before
//! the authorization gate; the resolved [`Principal`] is then cached in the
//! connection state. Re-resolving per message would defeat the
//! once-per-connection authorization contract and is deliberately not
//! possible through this interface.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

/// Identity of a connecting user, immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub name: String,
    pub kind: PrincipalKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_host: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrincipalKind {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "hub-delegated")]
    HubDelegated,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no credentials presented")]
    MissingCredentials,
    #[error("token rejected")]
    TokenMismatch,
    #[error("token validation failed: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token header missing kid")]
    MissingKid,
    #[error("unknown jwk key id {0}")]
    UnknownKey(String),
    #[error("token missing subject")]
    MissingSubject,
    #[error("jwks fetch failed: {0}")]
    JwksFetch(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ResolveError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            ResolveError::MissingCredentials => "missing_credentials",
            ResolveError::TokenMismatch => "token_mismatch",
            ResolveError::InvalidToken(_) => "invalid_token",
            ResolveError::MissingKid => "missing_kid",
            ResolveError::UnknownKey(_) => "unknown_key",
            ResolveError::MissingSubject => "missing_subject",
            ResolveError::JwksFetch(_) => "jwks_fetch",
            ResolveError::Http(_) => "http",
        }
    }
}

/// The single authentication seam of the gateway.
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    /// Resolve the presented credentials into a principal, or fail the
    /// connection before it reaches the authorization gate.
    async fn resolve(&self, token: Option<&str>) -> Result<Principal, ResolveError>;
}

/// Pull a bearer token out of a request.
///
/// Browser WebSocket clients cannot set arbitrary headers, so the `token`
/// query parameter is accepted alongside `Authorization: Bearer`.
pub fn extract_token(headers: &HeaderMap, token_param: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        if let Ok(text) = value.to_str() {
            if let Some(token) = text.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }
    token_param
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Single-user token authentication.
///
/// The gateway is started with one shared secret; any bearer of that secret
/// is the configured local user. Only a SHA-256 digest of the secret is
/// retained.
pub struct LocalTokenResolver {
    token_digest: String,
    user_name: String,
}

impl LocalTokenResolver {
    pub fn new(token: &str, user_name: impl Into<String>) -> Self {
        Self {
            token_digest: digest(token),
            user_name: user_name.into(),
        }
    }
}

#[async_trait]
impl PrincipalResolver for LocalTokenResolver {
    async fn resolve(&self, token: Option<&str>) -> Result<Principal, ResolveError> {
        let token = token.ok_or(ResolveError::MissingCredentials)?;
        if digest(token) != self.token_digest {
            return Err(ResolveError::TokenMismatch);
        }
        Ok(Principal {
            name: self.user_name.clone(),
            kind: PrincipalKind::User,
            server_host: None,
        })
    }
}

fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hub-delegated authentication: the hub signs a JWT naming the user, and
/// the gateway verifies it against the hub's JWKS endpoint.
pub struct HubTokenResolver {
    jwks_url: String,
    issuer: Option<String>,
    audience: Option<String>,
    cache_ttl: Duration,
    keys: Arc<RwLock<Option<KeyCache>>>,
    client: Client,
}

struct KeyCache {
    by_kid: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

impl KeyCache {
    fn stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

#[derive(Debug, Deserialize)]
struct HubClaims {
    sub: String,
    #[serde(default)]
    server: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<JwkEntry>,
}

#[derive(Debug, Deserialize)]
struct JwkEntry {
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    crv: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
}

impl HubTokenResolver {
    pub fn new(
        jwks_url: String,
        issuer: Option<String>,
        audience: Option<String>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            jwks_url,
            issuer,
            audience,
            cache_ttl,
            keys: Arc::new(RwLock::new(None)),
            client: Client::new(),
        }
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, ResolveError> {
        {
            let cache = self.keys.read().await;
            if let Some(cache) = cache.as_ref() {
                if !cache.stale(self.cache_ttl) {
                    if let Some(key) = cache.by_kid.get(kid) {
                        return Ok(key.clone());
                    }
                }
            }
        }

        let mut cache = self.keys.write().await;
        let refresh = cache
            .as_ref()
            .map(|c| c.stale(self.cache_ttl))
            .unwrap_or(true);
        if refresh {
            *cache = Some(self.fetch_keys().await?);
        }
        cache
            .as_ref()
            .and_then(|c| c.by_kid.get(kid).cloned())
            .ok_or_else(|| ResolveError::UnknownKey(kid.to_string()))
    }

    async fn fetch_keys(&self) -> Result<KeyCache, ResolveError> {
        let response = self.client.get(&self.jwks_url).send().await?;
        if !response.status().is_success() {
            return Err(ResolveError::JwksFetch(format!(
                "status {}",
                response.status()
            )));
        }

        let document: JwksDocument = response.json().await?;
        let mut by_kid = HashMap::new();
        for entry in document.keys {
            // Hub keys are ES256; anything else in the document is skipped.
            if entry.kty.as_str() != "EC" || entry.crv.as_deref() != Some("P-256") {
                continue;
            }
            let (Some(kid), Some(x), Some(y)) = (entry.kid, entry.x, entry.y) else {
                continue;
            };
            match DecodingKey::from_ec_components(&x, &y) {
                Ok(key) => {
                    by_kid.insert(kid, key);
                }
                Err(err) => {
                    warn!(error = %err, "skipping unparseable jwk entry");
                }
            }
        }

        if by_kid.is_empty() {
            return Err(ResolveError::JwksFetch(
                "no usable keys in JWKS document".to_string(),
            ));
        }

        Ok(KeyCache {
            by_kid,
            fetched_at: Instant::now(),
        })
    }
}

#[async_trait]
impl PrincipalResolver for HubTokenResolver {
    async fn resolve(&self, token: Option<&str>) -> Result<Principal, ResolveError> {
        let token = token.ok_or(ResolveError::MissingCredentials)?;
        let header = decode_header(token)?;
        let kid = header.kid.ok_or(ResolveError::MissingKid)?;
        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::ES256);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(audience) = &self.audience {
            validation.set_audience(&[audience]);
        }

        let data = decode::<HubClaims>(token, &key, &validation)?;
        if data.claims.sub.trim().is_empty() {
            return Err(ResolveError::MissingSubject);
        }

        Ok(Principal {
            name: data.claims.sub,
            kind: PrincipalKind::HubDelegated,
            server_host: data.claims.server,
        })
    }
}
