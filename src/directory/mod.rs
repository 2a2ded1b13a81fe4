//! PostgreSQL principal directory.
//!
//! Users and administrators live in separate tables with the same shape; one
//! [`PgDirectory`] instance serves one kind. Passwords are stored as argon2
//! PHC strings and verified on the blocking pool.

use anyhow::Context;
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::auth::principal::{CredentialVerifier, PrincipalDirectory, PrincipalKind, Profile};
use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct PgDirectory {
    pool: PgPool,
    kind: PrincipalKind,
}

impl PgDirectory {
    #[must_use]
    pub fn new(pool: PgPool, kind: PrincipalKind) -> Self {
        Self { pool, kind }
    }

    fn table(&self) -> &'static str {
        table_for(self.kind)
    }
}

const fn table_for(kind: PrincipalKind) -> &'static str {
    match kind {
        PrincipalKind::User => "users",
        PrincipalKind::Admin => "admins",
    }
}

fn profile_from_row(row: &PgRow) -> std::result::Result<Profile, sqlx::Error> {
    Ok(Profile {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        status: row.try_get("status")?,
        created_at: row.try_get("created_at")?,
    })
}

fn storage_error(err: sqlx::Error, what: &'static str) -> Error {
    Error::Transient(anyhow::Error::new(err).context(what))
}

/// Verify a password against a PHC string. Malformed hashes never match.
#[must_use]
pub fn verify_password(password: &str, phc: &str) -> bool {
    PasswordHash::new(phc)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[async_trait]
impl PrincipalDirectory for PgDirectory {
    async fn is_active(&self, id: Uuid, kind: PrincipalKind) -> Result<bool> {
        if kind != self.kind {
            return Err(Error::NotFound);
        }
        let query = format!("SELECT status::text AS status FROM {} WHERE id = $1", self.table());
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| storage_error(err, "Failed to look up principal status"))?
            .ok_or(Error::NotFound)?;
        let status: String = row
            .try_get("status")
            .map_err(|err| storage_error(err, "Failed to decode principal status"))?;
        Ok(status == "active")
    }

    async fn profile(&self, id: Uuid, kind: PrincipalKind) -> Result<Profile> {
        if kind != self.kind {
            return Err(Error::NotFound);
        }
        let query = format!(
            "SELECT id, username, email, status::text AS status, created_at FROM {} WHERE id = $1",
            self.table()
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| storage_error(err, "Failed to fetch profile"))?
            .ok_or(Error::NotFound)?;
        profile_from_row(&row).map_err(|err| storage_error(err, "Failed to decode profile"))
    }
}

#[async_trait]
impl CredentialVerifier for PgDirectory {
    async fn check(&self, username: &str, password: &str) -> Result<Profile> {
        let query = format!(
            "SELECT id, username, email, status::text AS status, created_at, password_hash \
             FROM {} WHERE username = $1",
            self.table()
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let Some(row) = sqlx::query(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .map_err(|err| storage_error(err, "Failed to fetch credentials"))?
        else {
            return Err(Error::InvalidCredentials);
        };

        let profile =
            profile_from_row(&row).map_err(|err| storage_error(err, "Failed to decode profile"))?;
        let phc: String = row
            .try_get("password_hash")
            .map_err(|err| storage_error(err, "Failed to decode password hash"))?;
        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &phc))
            .await
            .context("password verification task failed")
            .map_err(Error::Internal)?;

        if matches && profile.status == "active" {
            Ok(profile)
        } else {
            Err(Error::InvalidCredentials)
        }
    }
}
