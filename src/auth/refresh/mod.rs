//! Refresh-token lifecycle for one principal kind.
//!
//! Flow Overview:
//! 1) `generate` persists an Active record and signs a token wrapping its id.
//! 2) `validate` reads the record fresh from the store on every call.
//! 3) `rotate` swaps the record for a successor in one store transaction.
//! 4) `revoke` marks the record Revoked; repeating it is a no-op.
//!
//! A record that was superseded by rotation and is presented again signals a
//! copied token. The service refuses it and revokes every record descending
//! from it, which ends the session for both holders.

pub mod postgres;
pub mod store;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use self::store::{RefreshTokenRecord, RotateOutcome, TokenStore};
use super::{
    clock::Clock,
    context::SessionContext,
    principal::{PrincipalDirectory, PrincipalKind},
    token::{RefreshTokenClaims, TokenIssuer},
};
use crate::error::{Error, Result};

/// A freshly signed refresh token and the record behind it.
#[derive(Clone, Debug)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub record_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

pub struct RefreshTokenService {
    kind: PrincipalKind,
    store: Arc<dyn TokenStore>,
    directory: Arc<dyn PrincipalDirectory>,
    issuer: Arc<TokenIssuer>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RefreshTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenService")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl RefreshTokenService {
    #[must_use]
    pub fn new(
        kind: PrincipalKind,
        store: Arc<dyn TokenStore>,
        directory: Arc<dyn PrincipalDirectory>,
        issuer: Arc<TokenIssuer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kind,
            store,
            directory,
            issuer,
            clock,
        }
    }

    #[must_use]
    pub fn kind(&self) -> PrincipalKind {
        self.kind
    }

    /// Verify a presented refresh token's signature and expiry and require it
    /// to belong to this service's kind.
    ///
    /// # Errors
    /// `InvalidSignature` or `TokenExpired` from the issuer, `Unauthorized`
    /// when the token was minted for the other kind.
    pub fn decode(&self, token: &str) -> Result<RefreshTokenClaims> {
        let claims: RefreshTokenClaims = self.issuer.verify(token)?;
        if claims.kind != self.kind {
            return Err(Error::Unauthorized);
        }
        Ok(claims)
    }

    /// Build a record and its signed token without touching the store.
    fn mint(
        &self,
        principal_id: Uuid,
        context: &SessionContext,
    ) -> Result<(RefreshTokenRecord, IssuedRefreshToken)> {
        let (issued_at, expires_at) = self.issuer.window()?;
        let record =
            RefreshTokenRecord::new(principal_id, self.kind, context, issued_at, expires_at);
        let token = self.issuer.issue(&RefreshTokenClaims {
            sub: record.id,
            principal_id,
            kind: self.kind,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        })?;
        let issued = IssuedRefreshToken {
            token,
            record_id: record.id,
            expires_at,
        };
        Ok((record, issued))
    }

    /// Persist a new Active record for the principal and return its token.
    ///
    /// # Errors
    /// `Transient` when the store fails.
    #[instrument(skip(self, context), fields(kind = %self.kind))]
    pub async fn generate(
        &self,
        principal_id: Uuid,
        context: &SessionContext,
    ) -> Result<IssuedRefreshToken> {
        let (record, issued) = self.mint(principal_id, context)?;
        self.store
            .insert(&record)
            .await
            .map_err(Error::Transient)?;
        Ok(issued)
    }

    /// Check that the record exists, is Active, has not expired, and that its
    /// principal is still active. Nothing is written unless reuse is detected.
    ///
    /// # Errors
    /// `TokenNotFound`, `TokenRevoked`, `TokenReuseDetected`, `TokenExpired`,
    /// `PrincipalInactive`, or `Transient`.
    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn validate(&self, record_id: Uuid, principal_id: Uuid) -> Result<()> {
        let record = self
            .store
            .find(record_id, self.kind)
            .await
            .map_err(Error::Transient)?
            .filter(|record| record.principal_id == principal_id)
            .ok_or(Error::TokenNotFound)?;

        if record.is_superseded() {
            return Err(self.reuse_detected(record_id).await);
        }
        if record.is_revoked {
            return Err(Error::TokenRevoked);
        }
        if record.is_expired_at(self.clock.now()) {
            return Err(Error::TokenExpired);
        }

        match self.directory.is_active(principal_id, self.kind).await {
            Ok(true) => Ok(()),
            Ok(false) | Err(Error::NotFound) => Err(Error::PrincipalInactive),
            Err(err) => Err(err),
        }
    }

    /// Revoke a record. Unknown and already revoked records are left alone.
    ///
    /// # Errors
    /// `Transient` when the store fails.
    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn revoke(&self, record_id: Uuid) -> Result<()> {
        self.store
            .revoke(record_id, self.kind)
            .await
            .map_err(Error::Transient)
    }

    /// Replace an Active record with a successor for the same principal.
    ///
    /// # Errors
    /// `TokenReuseDetected` when the predecessor is no longer Active, in which
    /// case nothing was written and its lineage is revoked. `Transient` when
    /// the store fails; the predecessor is then still Active.
    #[instrument(skip(self, context), fields(kind = %self.kind))]
    pub async fn rotate(
        &self,
        record_id: Uuid,
        principal_id: Uuid,
        context: &SessionContext,
    ) -> Result<IssuedRefreshToken> {
        let (successor, issued) = self.mint(principal_id, context)?;
        match self
            .store
            .rotate(record_id, self.kind, &successor)
            .await
            .map_err(Error::Transient)?
        {
            RotateOutcome::Rotated => Ok(issued),
            RotateOutcome::PredecessorInactive => Err(self.reuse_detected(record_id).await),
        }
    }

    async fn reuse_detected(&self, record_id: Uuid) -> Error {
        match self.store.revoke_lineage(record_id, self.kind).await {
            Ok(revoked) => {
                warn!(
                    alert = "refresh_token_reuse",
                    kind = %self.kind,
                    %record_id,
                    revoked,
                    "Superseded refresh token presented again"
                );
                Error::TokenReuseDetected
            }
            Err(err) => {
                warn!(
                    alert = "refresh_token_reuse",
                    kind = %self.kind,
                    %record_id,
                    "Superseded refresh token presented again; lineage revocation failed: {err:#}"
                );
                Error::Transient(err)
            }
        }
    }
}
