//! Role policy resolution and enforcement.
//!
//! A policy has two scopes: the operation itself and the resource group it
//! belongs to. Each override flag and the role list are looked up on the
//! operation first and only fall back to the group when the operation does
//! not declare them. With nothing declared anywhere, any authenticated
//! principal passes.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::{
    guard::AccessGuard,
    principal::{AuthenticatedPrincipal, PrincipalKind},
};
use crate::error::{Error, Result};

/// Declarations attached to one scope.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AccessRule {
    /// Skip authentication and authorization.
    pub public: Option<bool>,
    /// Authenticate, but let any role through.
    pub ignore_role_check: Option<bool>,
    pub allowed_roles: Vec<PrincipalKind>,
}

impl AccessRule {
    #[must_use]
    pub fn public() -> Self {
        Self {
            public: Some(true),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn ignore_role_check() -> Self {
        Self {
            ignore_role_check: Some(true),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn roles(roles: impl IntoIterator<Item = PrincipalKind>) -> Self {
        Self {
            allowed_roles: roles.into_iter().collect(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Policy {
    pub operation: AccessRule,
    pub group: AccessRule,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Resolved {
    Public,
    AnyRole,
    Roles(Vec<PrincipalKind>),
    /// Nothing declared.
    Open,
}

impl Policy {
    #[must_use]
    pub fn new(operation: AccessRule, group: AccessRule) -> Self {
        Self { operation, group }
    }

    #[must_use]
    pub fn operation(operation: AccessRule) -> Self {
        Self {
            operation,
            group: AccessRule::default(),
        }
    }

    #[must_use]
    pub fn resolve(&self) -> Resolved {
        if self.operation.public.or(self.group.public).unwrap_or(false) {
            return Resolved::Public;
        }
        if self
            .operation
            .ignore_role_check
            .or(self.group.ignore_role_check)
            .unwrap_or(false)
        {
            return Resolved::AnyRole;
        }
        [&self.operation, &self.group]
            .into_iter()
            .map(|rule| &rule.allowed_roles)
            .find(|roles| !roles.is_empty())
            .map_or(Resolved::Open, |roles| Resolved::Roles(roles.clone()))
    }
}

/// # Errors
/// `Unauthorized` when a non-public policy has no principal, `Forbidden` when
/// the principal's role is outside the resolved set.
pub fn authorize(resolved: &Resolved, principal: Option<&AuthenticatedPrincipal>) -> Result<()> {
    match (resolved, principal) {
        (Resolved::Public, _) => Ok(()),
        (_, None) => Err(Error::Unauthorized),
        (Resolved::AnyRole | Resolved::Open, Some(_)) => Ok(()),
        (Resolved::Roles(roles), Some(principal)) if roles.contains(&principal.kind) => Ok(()),
        (Resolved::Roles(_), Some(_)) => Err(Error::Forbidden),
    }
}

/// State for [`enforce`]: the guard plus the route's policy.
#[derive(Clone)]
pub struct Enforcement {
    guard: Arc<AccessGuard>,
    policy: Arc<Policy>,
}

impl Enforcement {
    #[must_use]
    pub fn new(guard: Arc<AccessGuard>, policy: Policy) -> Self {
        Self {
            guard,
            policy: Arc::new(policy),
        }
    }
}

/// Authenticate (unless public), authorize, and expose the
/// [`AuthenticatedPrincipal`] to the handler as a request extension.
pub async fn enforce(
    State(enforcement): State<Enforcement>,
    mut request: Request,
    next: Next,
) -> Response {
    let resolved = enforcement.policy.resolve();
    if resolved == Resolved::Public {
        return next.run(request).await;
    }
    let principal = match enforcement.guard.authenticate(request.headers()).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = authorize(&resolved, Some(&principal)) {
        return err.into_response();
    }
    request.extensions_mut().insert(principal);
    next.run(request).await
}
