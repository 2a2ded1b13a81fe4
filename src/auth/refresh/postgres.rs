//! PostgreSQL-backed refresh-token store.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{
    postgres::{PgArguments, PgRow},
    query::Query,
    PgPool, Postgres, Row,
};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::store::{RefreshTokenRecord, RotateOutcome, TokenStore};
use crate::auth::principal::PrincipalKind;

const COLUMNS: &str = "id, principal_id, principal_kind, user_agent, ip_address, browser, os, \
                       is_revoked, revoked_at, replaced_by, expires_at, created_at";

#[derive(Clone, Debug)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &PgRow) -> Result<RefreshTokenRecord> {
    let kind: String = row.try_get("principal_kind")?;
    Ok(RefreshTokenRecord {
        id: row.try_get("id")?,
        principal_id: row.try_get("principal_id")?,
        principal_kind: kind.parse::<PrincipalKind>().map_err(|err| anyhow!(err))?,
        user_agent: row.try_get("user_agent")?,
        ip_address: row.try_get("ip_address")?,
        browser: row.try_get("browser")?,
        os: row.try_get("os")?,
        is_revoked: row.try_get("is_revoked")?,
        revoked_at: row.try_get("revoked_at")?,
        replaced_by: row.try_get("replaced_by")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn insert_query(record: &RefreshTokenRecord) -> Query<'_, Postgres, PgArguments> {
    sqlx::query(
        r"
        INSERT INTO refresh_tokens
            (id, principal_id, principal_kind, user_agent, ip_address, browser, os,
             is_revoked, expires_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, $8, $9)
        ",
    )
    .bind(record.id)
    .bind(record.principal_id)
    .bind(record.principal_kind.as_str())
    .bind(record.user_agent.as_deref())
    .bind(record.ip_address.as_deref())
    .bind(record.browser.as_deref())
    .bind(record.os.as_deref())
    .bind(record.expires_at)
    .bind(record.created_at)
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<()> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = "INSERT INTO refresh_tokens"
        );
        insert_query(record)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("Failed to insert refresh token")?;
        Ok(())
    }

    async fn find(&self, id: Uuid, kind: PrincipalKind) -> Result<Option<RefreshTokenRecord>> {
        let query =
            format!("SELECT {COLUMNS} FROM refresh_tokens WHERE id = $1 AND principal_kind = $2");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = "SELECT FROM refresh_tokens WHERE id"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("Failed to fetch refresh token")?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn revoke(&self, id: Uuid, kind: PrincipalKind) -> Result<()> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = "UPDATE refresh_tokens SET is_revoked"
        );
        sqlx::query(
            r"
            UPDATE refresh_tokens
            SET is_revoked = TRUE, revoked_at = NOW()
            WHERE id = $1 AND principal_kind = $2 AND is_revoked = FALSE
            ",
        )
        .bind(id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .instrument(span)
        .await
        .context("Failed to revoke refresh token")?;
        Ok(())
    }

    async fn rotate(
        &self,
        predecessor: Uuid,
        kind: PrincipalKind,
        successor: &RefreshTokenRecord,
    ) -> Result<RotateOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin rotation transaction")?;

        // The row lock taken here makes a concurrent rotation of the same
        // predecessor wait, then re-check `is_revoked` and match nothing.
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = "UPDATE refresh_tokens SET replaced_by"
        );
        let revoked = sqlx::query(
            r"
            UPDATE refresh_tokens
            SET is_revoked = TRUE, revoked_at = NOW(), replaced_by = $3
            WHERE id = $1 AND principal_kind = $2 AND is_revoked = FALSE
            ",
        )
        .bind(predecessor)
        .bind(kind.as_str())
        .bind(successor.id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("Failed to revoke predecessor")?;

        if revoked.rows_affected() == 0 {
            tx.rollback().await.context("Failed to roll back rotation")?;
            return Ok(RotateOutcome::PredecessorInactive);
        }

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = "INSERT INTO refresh_tokens"
        );
        insert_query(successor)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("Failed to insert successor")?;

        tx.commit().await.context("Failed to commit rotation")?;
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke_lineage(&self, id: Uuid, kind: PrincipalKind) -> Result<u64> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = "WITH RECURSIVE lineage UPDATE refresh_tokens"
        );
        let result = sqlx::query(
            r"
            WITH RECURSIVE lineage AS (
                SELECT replaced_by AS id
                FROM refresh_tokens
                WHERE id = $1 AND principal_kind = $2 AND replaced_by IS NOT NULL
                UNION
                SELECT t.replaced_by
                FROM refresh_tokens t
                JOIN lineage l ON t.id = l.id
                WHERE t.replaced_by IS NOT NULL
            )
            UPDATE refresh_tokens
            SET is_revoked = TRUE, revoked_at = NOW()
            WHERE id IN (SELECT id FROM lineage)
              AND principal_kind = $2
              AND is_revoked = FALSE
            ",
        )
        .bind(id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .instrument(span)
        .await
        .context("Failed to revoke refresh token lineage")?;
        Ok(result.rows_affected())
    }
}
