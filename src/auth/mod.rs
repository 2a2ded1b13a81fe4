//! Authentication core: tokens, refresh-token sessions, delivery, and RBAC.
//!
//! Flow Overview:
//! 1) `AuthState::build` derives two independent issuers from the configured
//!    secrets and one `RefreshTokenService` per principal kind over a shared
//!    store.
//! 2) Each kind gets an `AuthGateway` and a `RefreshGuard`; both kinds share
//!    one `AccessGuard`.
//! 3) The HTTP layer mounts each kind under [`route_prefix`]; refresh and
//!    logout live under [`session_path`], which is also the refresh cookie path.

pub mod clock;
pub mod config;
pub mod context;
pub mod delivery;
pub mod gateway;
pub mod guard;
pub mod principal;
pub mod rbac;
pub mod refresh;
pub mod throttle;
pub mod token;

use anyhow::Result;
use chrono::Duration;
use std::sync::Arc;

pub use config::AuthConfig;
pub use principal::{AuthenticatedPrincipal, PrincipalKind};

use self::{
    clock::Clock,
    delivery::{CookieSettings, SessionDelivery, WebDelivery},
    gateway::AuthGateway,
    guard::{AccessGuard, RefreshGuard},
    principal::{CredentialVerifier, PrincipalDirectory},
    refresh::{store::TokenStore, RefreshTokenService},
    throttle::LoginThrottle,
    token::TokenIssuer,
};

#[must_use]
pub const fn route_prefix(kind: PrincipalKind) -> &'static str {
    match kind {
        PrincipalKind::User => "/v1/auth/user",
        PrincipalKind::Admin => "/v1/auth/admin",
    }
}

/// Path prefix of a kind's refresh and logout routes.
#[must_use]
pub fn session_path(kind: PrincipalKind) -> String {
    format!("{}/session", route_prefix(kind))
}

/// The external collaborators for one principal kind.
#[derive(Clone)]
pub struct Principals {
    pub directory: Arc<dyn PrincipalDirectory>,
    pub credentials: Arc<dyn CredentialVerifier>,
}

#[derive(Clone)]
pub struct KindAuth {
    pub gateway: Arc<AuthGateway>,
    pub refresh_guard: Arc<RefreshGuard>,
}

#[derive(Clone)]
pub struct AuthState {
    pub access_guard: Arc<AccessGuard>,
    pub users: KindAuth,
    pub admins: KindAuth,
}

impl AuthState {
    /// # Errors
    /// Returns an error when the configuration is rejected by
    /// [`AuthConfig::validate`].
    pub fn build(
        config: &AuthConfig,
        store: Arc<dyn TokenStore>,
        users: Principals,
        admins: Principals,
        throttle: Arc<dyn LoginThrottle>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let access_ttl = Duration::seconds(config.access_token_ttl_seconds());
        let refresh_ttl = Duration::seconds(config.refresh_token_ttl_seconds());
        let access = Arc::new(TokenIssuer::new(
            config.access_token_secret(),
            access_ttl,
            clock.clone(),
        ));
        let refresh = Arc::new(TokenIssuer::new(
            config.refresh_token_secret(),
            refresh_ttl,
            clock.clone(),
        ));

        let access_guard = Arc::new(AccessGuard::new(
            access.clone(),
            config.access_cookie_name().to_string(),
            users.directory.clone(),
            admins.directory.clone(),
        ));

        let per_kind = |kind: PrincipalKind, principals: Principals| {
            let service = Arc::new(RefreshTokenService::new(
                kind,
                store.clone(),
                principals.directory.clone(),
                refresh.clone(),
                clock.clone(),
            ));
            let web = WebDelivery::new(
                CookieSettings {
                    access_name: config.access_cookie_name().to_string(),
                    refresh_name: config.refresh_cookie_name().to_string(),
                    refresh_path: session_path(kind),
                    secure: config.cookie_secure(),
                },
                access_ttl,
                refresh_ttl,
                clock.clone(),
            );
            KindAuth {
                gateway: Arc::new(AuthGateway::new(
                    principals.credentials,
                    principals.directory,
                    access.clone(),
                    service.clone(),
                    SessionDelivery::new(web),
                    throttle.clone(),
                )),
                refresh_guard: Arc::new(RefreshGuard::new(
                    service,
                    config.refresh_cookie_name().to_string(),
                )),
            }
        };

        Ok(Self {
            access_guard,
            users: per_kind(PrincipalKind::User, users),
            admins: per_kind(PrincipalKind::Admin, admins),
        })
    }

    #[must_use]
    pub fn for_kind(&self, kind: PrincipalKind) -> &KindAuth {
        match kind {
            PrincipalKind::User => &self.users,
            PrincipalKind::Admin => &self.admins,
        }
    }
}
