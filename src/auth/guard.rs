//! Request guards that turn presented credentials into verified identities.

use axum::http::HeaderMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{
    delivery::{bearer_token, read_cookie, refresh_header, Channel},
    principal::{AuthenticatedPrincipal, PrincipalDirectory, PrincipalKind},
    refresh::RefreshTokenService,
    token::{AccessTokenClaims, TokenIssuer},
};
use crate::error::{Error, Result};

/// Verifies access tokens for either kind.
pub struct AccessGuard {
    issuer: Arc<TokenIssuer>,
    cookie_name: String,
    users: Arc<dyn PrincipalDirectory>,
    admins: Arc<dyn PrincipalDirectory>,
}

impl AccessGuard {
    #[must_use]
    pub fn new(
        issuer: Arc<TokenIssuer>,
        cookie_name: String,
        users: Arc<dyn PrincipalDirectory>,
        admins: Arc<dyn PrincipalDirectory>,
    ) -> Self {
        Self {
            issuer,
            cookie_name,
            users,
            admins,
        }
    }

    fn directory(&self, kind: PrincipalKind) -> &dyn PrincipalDirectory {
        match kind {
            PrincipalKind::User => self.users.as_ref(),
            PrincipalKind::Admin => self.admins.as_ref(),
        }
    }

    /// Resolve the bearer token, else the access cookie, into a principal
    /// that still exists and is active.
    ///
    /// # Errors
    /// `Unauthorized` when no token is presented, the issuer's verification
    /// errors, `PrincipalInactive`, or `Transient` from the directory.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthenticatedPrincipal> {
        let token = bearer_token(headers)
            .or_else(|| read_cookie(headers, &self.cookie_name))
            .ok_or(Error::Unauthorized)?;
        let claims: AccessTokenClaims = self.issuer.verify(&token)?;
        match self.directory(claims.kind).is_active(claims.sub, claims.kind).await {
            Ok(true) => Ok(AuthenticatedPrincipal {
                principal_id: claims.sub,
                kind: claims.kind,
            }),
            Ok(false) | Err(Error::NotFound) => Err(Error::PrincipalInactive),
            Err(err) => Err(err),
        }
    }
}

/// A refresh token whose signature and kind have been checked.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PresentedRefreshToken {
    pub record_id: Uuid,
    pub principal_id: Uuid,
    pub kind: PrincipalKind,
}

/// Verifies refresh tokens for one kind.
pub struct RefreshGuard {
    service: Arc<RefreshTokenService>,
    cookie_name: String,
}

impl RefreshGuard {
    #[must_use]
    pub fn new(service: Arc<RefreshTokenService>, cookie_name: String) -> Self {
        Self {
            service,
            cookie_name,
        }
    }

    /// Read the token from the channel's carrier and verify it cryptographically.
    /// The store is not consulted.
    ///
    /// # Errors
    /// `Unauthorized` when absent or minted for the other kind, otherwise the
    /// issuer's verification errors.
    pub fn decode(&self, headers: &HeaderMap, channel: Channel) -> Result<PresentedRefreshToken> {
        let token = match channel {
            Channel::Web => read_cookie(headers, &self.cookie_name),
            Channel::Mobile => refresh_header(headers),
        }
        .ok_or(Error::Unauthorized)?;
        let claims = self.service.decode(&token)?;
        Ok(PresentedRefreshToken {
            record_id: claims.sub,
            principal_id: claims.principal_id,
            kind: claims.kind,
        })
    }

    /// `decode`, then validate the record against the store.
    ///
    /// # Errors
    /// Anything `decode` or `RefreshTokenService::validate` reports.
    pub async fn check(
        &self,
        headers: &HeaderMap,
        channel: Channel,
    ) -> Result<PresentedRefreshToken> {
        let presented = self.decode(headers, channel)?;
        self.service
            .validate(presented.record_id, presented.principal_id)
            .await?;
        Ok(presented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        clock::{Clock, ManualClock},
        context::SessionContext,
        delivery::REFRESH_TOKEN_HEADER,
        principal::MemoryDirectory,
        refresh::store::MemoryTokenStore,
    };
    use axum::http::{
        header::{AUTHORIZATION, COOKIE},
        HeaderValue,
    };
    use chrono::{Duration, TimeZone, Utc};
    use secrecy::SecretString;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn issuer(secret: &str, clock: Arc<dyn Clock>) -> Arc<TokenIssuer> {
        Arc::new(TokenIssuer::new(
            &SecretString::from(secret.to_string()),
            Duration::minutes(15),
            clock,
        ))
    }

    #[tokio::test]
    async fn access_guard_accepts_bearer_and_cookie() -> anyhow::Result<()> {
        let clock = clock();
        let users = Arc::new(MemoryDirectory::new(PrincipalKind::User));
        let admins = Arc::new(MemoryDirectory::new(PrincipalKind::Admin));
        let alice = users.add("alice", "alice@example.com", "pw").await;
        let access = issuer("access", clock.clone());
        let guard = AccessGuard::new(
            access.clone(),
            "access_token".to_string(),
            users.clone(),
            admins,
        );
        let token = access.issue_access(alice.id, PrincipalKind::User)?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
        let principal = guard.authenticate(&headers).await?;
        assert_eq!(principal.principal_id, alice.id);
        assert_eq!(principal.kind, PrincipalKind::User);

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(&format!("access_token={token}"))?);
        assert!(guard.authenticate(&headers).await.is_ok());

        assert!(matches!(
            guard.authenticate(&HeaderMap::new()).await,
            Err(Error::Unauthorized)
        ));

        users.set_active(alice.id, false).await;
        assert!(matches!(
            guard.authenticate(&headers).await,
            Err(Error::PrincipalInactive)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_guard_reads_the_channel_carrier() -> anyhow::Result<()> {
        let clock = clock();
        let users = Arc::new(MemoryDirectory::new(PrincipalKind::User));
        let alice = users.add("alice", "alice@example.com", "pw").await;
        let service = Arc::new(RefreshTokenService::new(
            PrincipalKind::User,
            Arc::new(MemoryTokenStore::new(clock.clone())),
            users,
            issuer("refresh", clock.clone()),
            clock,
        ));
        let guard = RefreshGuard::new(service.clone(), "refresh_token".to_string());
        let issued = service.generate(alice.id, &SessionContext::default()).await?;

        let mut mobile = HeaderMap::new();
        mobile.insert(REFRESH_TOKEN_HEADER, HeaderValue::from_str(&issued.token)?);
        let presented = guard.check(&mobile, Channel::Mobile).await?;
        assert_eq!(presented.record_id, issued.record_id);

        // The mobile header is not a web carrier.
        assert!(matches!(
            guard.decode(&mobile, Channel::Web),
            Err(Error::Unauthorized)
        ));

        let mut web = HeaderMap::new();
        web.insert(
            COOKIE,
            HeaderValue::from_str(&format!("refresh_token={}", issued.token))?,
        );
        assert!(guard.check(&web, Channel::Web).await.is_ok());
        Ok(())
    }
}
