//! HS256 token minting and verification.
//!
//! Flow Overview:
//! 1) The access issuer signs `{sub, kind, iat, exp}` for every request credential.
//! 2) The refresh issuer signs a wrapper around a stored refresh record id.
//! 3) Each issuer owns its own secret and TTL, so neither can mint or accept
//!    the other's tokens.
//!
//! Expiry is compared against the injected [`Clock`] rather than the crate's
//! own system-time check, so both sides of the comparison use the same clock.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fmt, sync::Arc};
use uuid::Uuid;

use super::{clock::Clock, principal::PrincipalKind};
use crate::error::{Error, Result};

/// Claims that carry an expiry in unix seconds.
pub trait ExpiringClaims: Serialize + DeserializeOwned {
    fn expires_at(&self) -> i64;
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: Uuid,
    pub kind: PrincipalKind,
    pub iat: i64,
    pub exp: i64,
}

impl ExpiringClaims for AccessTokenClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    /// Id of the stored refresh record.
    pub sub: Uuid,
    pub principal_id: Uuid,
    pub kind: PrincipalKind,
    pub iat: i64,
    pub exp: i64,
}

impl ExpiringClaims for RefreshTokenClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

/// `now + ttl`, or `Error::Internal` on overflow.
///
/// # Errors
/// `Error::Internal` when the sum leaves chrono's date range.
pub fn expires_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(ttl).ok_or_else(|| {
        Error::Internal(anyhow::anyhow!(
            "expiry overflows: {now} + {}s",
            ttl.num_seconds()
        ))
    })
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    #[must_use]
    pub fn new(secret: &SecretString, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let key = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            validation,
            ttl,
            clock,
        }
    }

    /// Issue time and expiry for a token minted now.
    ///
    /// # Errors
    /// `Error::Internal` when the expiry falls outside the representable range.
    pub fn window(&self) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let now = self.clock.now();
        Ok((now, expires_after(now, self.ttl)?))
    }

    /// Sign claims.
    ///
    /// # Errors
    /// `Error::Internal` if the claims cannot be encoded.
    pub fn issue<C: ExpiringClaims>(&self, claims: &C) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|err| Error::Internal(anyhow::anyhow!("failed to sign token: {err}")))
    }

    /// Verify the signature, then the expiry against the clock.
    ///
    /// # Errors
    /// `Error::InvalidSignature` for malformed tokens or a foreign key,
    /// `Error::TokenExpired` once `now >= exp`.
    pub fn verify<C: ExpiringClaims>(&self, token: &str) -> Result<C> {
        let data = decode::<C>(token, &self.decoding, &self.validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => Error::TokenExpired,
                _ => Error::InvalidSignature,
            }
        })?;
        if self.clock.now().timestamp() >= data.claims.expires_at() {
            return Err(Error::TokenExpired);
        }
        Ok(data.claims)
    }

    /// Mint an access token for a principal.
    ///
    /// # Errors
    /// `Error::Internal` if signing fails.
    pub fn issue_access(&self, principal_id: Uuid, kind: PrincipalKind) -> Result<String> {
        let (iat, exp) = self.window()?;
        self.issue(&AccessTokenClaims {
            sub: principal_id,
            kind,
            iat: iat.timestamp(),
            exp: exp.timestamp(),
        })
    }
}
