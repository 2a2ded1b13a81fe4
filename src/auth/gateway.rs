//! Login, refresh, logout, and profile orchestration for one principal kind.
//!
//! Flow Overview:
//! 1) Login consults the throttle, checks credentials, mints an access token,
//!    generates a refresh record, and hands the pair to the channel strategy.
//! 2) Refresh trusts the presented token already checked by `RefreshGuard`,
//!    rotates its record, mints a new access token, and re-delivers.
//! 3) Logout revokes the record and always runs the channel's clearing step,
//!    then reports the revoke result.

use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    context::SessionContext,
    delivery::{Channel, Delivered, SessionDelivery, TokenPair},
    guard::PresentedRefreshToken,
    principal::{CredentialVerifier, PrincipalDirectory, PrincipalKind, Profile},
    refresh::RefreshTokenService,
    throttle::LoginThrottle,
    token::TokenIssuer,
};
use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub profile: Profile,
    pub delivered: Delivered,
}

/// Clearing output is produced on every path; `result` carries the revoke outcome.
#[derive(Debug)]
pub struct LogoutOutcome {
    pub delivered: Delivered,
    pub result: Result<()>,
}

pub struct AuthGateway {
    kind: PrincipalKind,
    credentials: Arc<dyn CredentialVerifier>,
    directory: Arc<dyn PrincipalDirectory>,
    access: Arc<TokenIssuer>,
    refresh: Arc<RefreshTokenService>,
    delivery: SessionDelivery,
    throttle: Arc<dyn LoginThrottle>,
}

impl AuthGateway {
    #[must_use]
    pub fn new(
        credentials: Arc<dyn CredentialVerifier>,
        directory: Arc<dyn PrincipalDirectory>,
        access: Arc<TokenIssuer>,
        refresh: Arc<RefreshTokenService>,
        delivery: SessionDelivery,
        throttle: Arc<dyn LoginThrottle>,
    ) -> Self {
        Self {
            kind: refresh.kind(),
            credentials,
            directory,
            access,
            refresh,
            delivery,
            throttle,
        }
    }

    /// Login for browsers: tokens go to cookies, the body gets the profile.
    ///
    /// # Errors
    /// `Throttled`, `InvalidCredentials`, `Transient`, or `Internal`.
    pub async fn web_login(
        &self,
        credentials: &Credentials,
        context: &SessionContext,
    ) -> Result<LoginOutcome> {
        self.login(Channel::Web, credentials, context).await
    }

    /// Login for native clients: both tokens go in the body.
    ///
    /// # Errors
    /// `Throttled`, `InvalidCredentials`, `Transient`, or `Internal`.
    pub async fn mobile_login(
        &self,
        credentials: &Credentials,
        context: &SessionContext,
    ) -> Result<LoginOutcome> {
        self.login(Channel::Mobile, credentials, context).await
    }

    #[instrument(skip(self, credentials, context), fields(kind = %self.kind, username = %credentials.username))]
    async fn login(
        &self,
        channel: Channel,
        credentials: &Credentials,
        context: &SessionContext,
    ) -> Result<LoginOutcome> {
        let key = format!(
            "login:{}:{}:{}",
            self.kind,
            credentials.username,
            context.ip_address.as_deref().unwrap_or("unknown")
        );
        if self.throttle.should_throttle(&key) {
            warn!("Login throttled");
            return Err(Error::Throttled);
        }

        let profile = self
            .credentials
            .check(&credentials.username, &credentials.password)
            .await?;
        let access_token = self.access.issue_access(profile.id, self.kind)?;
        let refresh = self.refresh.generate(profile.id, context).await?;
        let delivered = self.delivery.for_channel(channel).deliver(TokenPair {
            access_token,
            refresh_token: refresh.token,
        })?;
        info!(principal_id = %profile.id, ?channel, "Login succeeded");
        Ok(LoginOutcome { profile, delivered })
    }

    /// Rotate the presented record and re-deliver a fresh pair.
    ///
    /// # Errors
    /// `TokenReuseDetected` when the record was already consumed, `Transient`
    /// when the store fails, `Internal` on signing failures.
    #[instrument(skip(self, presented, context), fields(kind = %self.kind, record_id = %presented.record_id))]
    pub async fn refresh(
        &self,
        channel: Channel,
        presented: &PresentedRefreshToken,
        context: &SessionContext,
    ) -> Result<Delivered> {
        let refresh = self
            .refresh
            .rotate(presented.record_id, presented.principal_id, context)
            .await?;
        let access_token = self.access.issue_access(presented.principal_id, self.kind)?;
        self.delivery.for_channel(channel).deliver(TokenPair {
            access_token,
            refresh_token: refresh.token,
        })
    }

    /// Revoke the presented record. The clearing step runs whether the token
    /// was unusable, the revoke failed, or it succeeded.
    #[instrument(skip(self, presented), fields(kind = %self.kind))]
    pub async fn logout(
        &self,
        channel: Channel,
        presented: Result<PresentedRefreshToken>,
    ) -> LogoutOutcome {
        let result = match presented {
            Ok(presented) => self.refresh.revoke(presented.record_id).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            warn!("Logout did not revoke a refresh token: {err}");
        }

        match self.delivery.for_channel(channel).clear() {
            Ok(delivered) => LogoutOutcome { delivered, result },
            Err(clear_err) => LogoutOutcome {
                delivered: Delivered::default(),
                result: result.and(Err(clear_err)),
            },
        }
    }

    /// # Errors
    /// `NotFound` when the principal disappeared.
    pub async fn profile(&self, principal_id: Uuid) -> Result<Profile> {
        self.directory.profile(principal_id, self.kind).await
    }
}
