//! Error taxonomy shared by the auth core and the HTTP handlers.
//!
//! Token and principal failures all surface to clients as `401 Unauthorized`;
//! the finer variants exist so callers and logs can tell them apart.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("unauthorized")]
    Unauthorized,

    #[error("refresh token not found")]
    TokenNotFound,

    #[error("refresh token revoked")]
    TokenRevoked,

    #[error("token expired")]
    TokenExpired,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("principal is not active")]
    PrincipalInactive,

    /// A superseded refresh token was presented again; possible theft.
    #[error("refresh token reuse detected")]
    TokenReuseDetected,

    #[error("forbidden")]
    Forbidden,

    #[error("principal not found")]
    NotFound,

    #[error("too many login attempts")]
    Throttled,

    /// Storage unreachable or transaction aborted; the caller may retry.
    #[error("transient storage failure: {0:#}")]
    Transient(#[source] anyhow::Error),

    #[error("internal error: {0:#}")]
    Internal(#[source] anyhow::Error),
}

impl Error {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::Unauthorized
            | Self::TokenNotFound
            | Self::TokenRevoked
            | Self::TokenExpired
            | Self::InvalidSignature
            | Self::PrincipalInactive
            | Self::TokenReuseDetected => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Throttled => StatusCode::TOO_MANY_REQUESTS,
            Self::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Token failures collapse into one message so the
    /// response does not reveal which check rejected the token.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid username or password",
            Self::Unauthorized
            | Self::TokenNotFound
            | Self::TokenRevoked
            | Self::TokenExpired
            | Self::InvalidSignature
            | Self::PrincipalInactive
            | Self::TokenReuseDetected => "Unauthorized",
            Self::Forbidden => {
                "You are not authorized to access this resource. Please contact support"
            }
            Self::NotFound => "Not found",
            Self::Throttled => "Too many requests",
            Self::Transient(_) => "Service temporarily unavailable, please retry",
            Self::Internal(_) => "Internal server error",
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("{self}");
        }
        let body = Json(json!({
            "statusCode": status.as_u16(),
            "message": self.public_message(),
            "error": status.canonical_reason().unwrap_or("Error"),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn token_failures_map_to_unauthorized() {
        for err in [
            Error::Unauthorized,
            Error::TokenNotFound,
            Error::TokenRevoked,
            Error::TokenExpired,
            Error::InvalidSignature,
            Error::PrincipalInactive,
            Error::TokenReuseDetected,
        ] {
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED, "{err}");
            assert_eq!(err.public_message(), "Unauthorized");
        }
    }

    #[test]
    fn other_variants_map_status() {
        assert_eq!(Error::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(Error::Throttled.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            Error::Transient(anyhow!("pool timed out")).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Internal(anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn transient_is_distinguishable() {
        assert!(Error::Transient(anyhow!("down")).is_transient());
        assert!(!Error::TokenRevoked.is_transient());
    }

    #[tokio::test]
    async fn response_body_hides_internals() -> anyhow::Result<()> {
        let response = Error::Transient(anyhow!("connection refused to 10.0.0.3")).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let text = String::from_utf8(body.to_vec())?;
        assert!(!text.contains("10.0.0.3"));
        let value: serde_json::Value = serde_json::from_str(&text)?;
        assert_eq!(value["statusCode"], 503);
        Ok(())
    }
}
