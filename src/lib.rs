//! # Sesame
//!
//! `sesame` issues and rotates sessions for two independent populations of
//! principals: end users and administrators. Each kind has its own login,
//! refresh, logout and profile endpoints. Both kinds share the access and
//! refresh signing secrets; a token is bound to its kind by the `kind` claim,
//! and refresh records are only ever looked up within their own kind.
//!
//! ## Tokens
//!
//! - **Access tokens** are short-lived signed JWTs. They are never stored.
//! - **Refresh tokens** are signed JWTs whose claims point at a persisted
//!   record (`refresh_tokens`, keyed by `UUIDv7`). A refresh is single use:
//!   rotating it revokes the record and links it to its successor.
//!
//! Presenting a superseded refresh token is treated as theft. The whole
//! lineage descending from it is revoked and the request is rejected.
//!
//! ## Delivery
//!
//! Web clients receive both tokens as `HttpOnly` cookies; the refresh cookie
//! is scoped to the kind's session path. Mobile clients receive them in the
//! JSON body and present the refresh token in the `x-refresh-token` header.
//!
//! The schema lives in `sql/schema.sql`.

pub mod auth;
pub mod cli;
pub mod directory;
pub mod error;
pub mod sesame;

pub use error::{Error, Result};
pub use sesame::GIT_COMMIT_HASH;
