//! Refresh-token records and their storage contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::{clock::Clock, context::SessionContext, principal::PrincipalKind};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub principal_kind: PrincipalKind,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Successor created when this record was consumed by rotation.
    pub replaced_by: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// A fresh, active record.
    #[must_use]
    pub fn new(
        principal_id: Uuid,
        principal_kind: PrincipalKind,
        context: &SessionContext,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            principal_id,
            principal_kind,
            user_agent: context.user_agent.clone(),
            ip_address: context.ip_address.clone(),
            browser: context.browser.clone(),
            os: context.os.clone(),
            is_revoked: false,
            revoked_at: None,
            replaced_by: None,
            expires_at,
            created_at,
        }
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Revoked because a successor replaced it, not by logout.
    #[must_use]
    pub fn is_superseded(&self) -> bool {
        self.is_revoked && self.replaced_by.is_some()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RotateOutcome {
    /// Predecessor revoked and successor committed together.
    Rotated,
    /// The conditional revoke matched nothing; nothing was written.
    PredecessorInactive,
}

/// Persistence for refresh-token records.
///
/// Every lookup is scoped by kind; a record of another kind behaves as absent.
/// Errors are storage failures (unreachable, aborted) and are safe to retry.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, record: &RefreshTokenRecord) -> anyhow::Result<()>;

    async fn find(
        &self,
        id: Uuid,
        kind: PrincipalKind,
    ) -> anyhow::Result<Option<RefreshTokenRecord>>;

    /// Set `is_revoked`; a missing or already revoked record is not an error.
    async fn revoke(&self, id: Uuid, kind: PrincipalKind) -> anyhow::Result<()>;

    /// In one transaction: revoke `predecessor` only if it is still active,
    /// link it to `successor`, and insert `successor`.
    async fn rotate(
        &self,
        predecessor: Uuid,
        kind: PrincipalKind,
        successor: &RefreshTokenRecord,
    ) -> anyhow::Result<RotateOutcome>;

    /// Revoke every still-active record that descends from `id` through
    /// `replaced_by`. Returns how many were revoked.
    async fn revoke_lineage(&self, id: Uuid, kind: PrincipalKind) -> anyhow::Result<u64>;
}

/// Store backed by a map behind one async mutex, so each operation is
/// serialised against every other. `revoked_at` comes from the given clock.
pub struct MemoryTokenStore {
    records: Mutex<HashMap<Uuid, RefreshTokenRecord>>,
    clock: Arc<dyn Clock>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Snapshot of every record, in no particular order.
    pub async fn records(&self) -> Vec<RefreshTokenRecord> {
        self.records.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, record: &RefreshTokenRecord) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.id) {
            anyhow::bail!("duplicate refresh token id {}", record.id);
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn find(
        &self,
        id: Uuid,
        kind: PrincipalKind,
    ) -> anyhow::Result<Option<RefreshTokenRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .get(&id)
            .filter(|record| record.principal_kind == kind)
            .cloned())
    }

    async fn revoke(&self, id: Uuid, kind: PrincipalKind) -> anyhow::Result<()> {
        if let Some(record) = self
            .records
            .lock()
            .await
            .get_mut(&id)
            .filter(|record| record.principal_kind == kind && !record.is_revoked)
        {
            record.is_revoked = true;
            record.revoked_at = Some(self.clock.now());
        }
        Ok(())
    }

    async fn rotate(
        &self,
        predecessor: Uuid,
        kind: PrincipalKind,
        successor: &RefreshTokenRecord,
    ) -> anyhow::Result<RotateOutcome> {
        let mut records = self.records.lock().await;
        if records.contains_key(&successor.id) {
            anyhow::bail!("duplicate refresh token id {}", successor.id);
        }
        let Some(record) = records
            .get_mut(&predecessor)
            .filter(|record| record.principal_kind == kind && !record.is_revoked)
        else {
            return Ok(RotateOutcome::PredecessorInactive);
        };
        record.is_revoked = true;
        record.revoked_at = Some(self.clock.now());
        record.replaced_by = Some(successor.id);
        records.insert(successor.id, successor.clone());
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke_lineage(&self, id: Uuid, kind: PrincipalKind) -> anyhow::Result<u64> {
        let now = self.clock.now();
        let mut records = self.records.lock().await;
        let mut revoked = 0;
        let mut next = records
            .get(&id)
            .filter(|record| record.principal_kind == kind)
            .and_then(|record| record.replaced_by);
        while let Some(current) = next {
            let Some(record) = records.get_mut(&current) else {
                break;
            };
            if !record.is_revoked {
                record.is_revoked = true;
                record.revoked_at = Some(now);
                revoked += 1;
            }
            next = record.replaced_by;
        }
        Ok(revoked)
    }
}
