//! Connection-level authorization.
//!
//! The gate runs after principal resolution and before any protocol data is
//! acted on. It never touches transport state: callers turn a deny into an
//! HTTP 403 (request/response paths) or a refused handshake (streaming
//! paths) themselves.

use std::sync::Arc;

use tracing::debug;

use crate::auth::Principal;

/// Outcome of one gated call. Computed per call, never stored.
#[derive(Debug)]
pub struct AuthorizationDecision<'a> {
    pub allowed: bool,
    pub principal: &'a Principal,
}

/// The swappable decision function behind the gate.
///
/// Policies are pure: a resolved principal and the identity of the handler
/// being gated go in, a verdict comes out. No I/O, no transport state.
pub trait AuthorizationPolicy: Send + Sync {
    fn allows(&self, principal: &Principal, handler: &str) -> bool;
}

/// Placeholder policy: any successfully resolved principal is allowed,
/// regardless of identity.
///
/// This is the extensibility point for fine-grained authorization. Replace
/// it by injecting a different [`AuthorizationPolicy`] into the gate at
/// startup; do not add identity checks elsewhere.
pub struct PermitResolved;

impl AuthorizationPolicy for PermitResolved {
    fn allows(&self, _principal: &Principal, _handler: &str) -> bool {
        true
    }
}

pub struct AuthorizationGate {
    policy: Arc<dyn AuthorizationPolicy>,
}

impl AuthorizationGate {
    pub fn new(policy: Arc<dyn AuthorizationPolicy>) -> Self {
        Self { policy }
    }

    /// Decide whether `principal` may proceed into `handler`.
    ///
    /// Every decision is audit-logged at debug level.
    pub fn authorize<'a>(
        &self,
        principal: &'a Principal,
        handler: &str,
    ) -> AuthorizationDecision<'a> {
        let allowed = self.policy.allows(principal, handler);
        debug!(
            principal = %principal.name,
            kind = ?principal.kind,
            handler,
            allowed,
            "authorisation decision"
        );
        AuthorizationDecision { allowed, principal }
    }
}
