//! Principal kinds and the collaborator contracts the auth core consumes.
//!
//! Profile storage and password hashing live behind [`PrincipalDirectory`] and
//! [`CredentialVerifier`]; the core never reaches past these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};

/// The two kinds of principal. The kind doubles as the role claim.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    Admin,
}

impl PrincipalKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrincipalKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown principal kind: {other}")),
        }
    }
}

/// Authenticated request context, derived from a verified access token.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AuthenticatedPrincipal {
    pub principal_id: Uuid,
    pub kind: PrincipalKind,
}

/// Public projection of a principal. Never carries credentials.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// Whether the principal exists and may hold sessions.
    ///
    /// # Errors
    /// `Error::NotFound` when no such principal exists.
    async fn is_active(&self, id: Uuid, kind: PrincipalKind) -> Result<bool>;

    /// # Errors
    /// `Error::NotFound` when no such principal exists.
    async fn profile(&self, id: Uuid, kind: PrincipalKind) -> Result<Profile>;
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// # Errors
    /// `Error::InvalidCredentials` when the username is unknown, the password
    /// does not match, or the principal is not active.
    async fn check(&self, username: &str, password: &str) -> Result<Profile>;
}

#[derive(Clone, Debug)]
struct MemoryEntry {
    profile: Profile,
    password: String,
    active: bool,
}

/// In-process directory for one principal kind.
///
/// Holds plaintext passwords, so it is only meant for development and tests.
#[derive(Debug)]
pub struct MemoryDirectory {
    kind: PrincipalKind,
    entries: RwLock<HashMap<Uuid, MemoryEntry>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new(kind: PrincipalKind) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Add an active principal and return its profile.
    pub async fn add(&self, username: &str, email: &str, password: &str) -> Profile {
        let profile = Profile {
            id: Uuid::now_v7(),
            username: username.to_string(),
            email: email.to_string(),
            status: "active".to_string(),
            created_at: Utc::now(),
        };
        self.entries.write().await.insert(
            profile.id,
            MemoryEntry {
                profile: profile.clone(),
                password: password.to_string(),
                active: true,
            },
        );
        profile
    }

    pub async fn set_active(&self, id: Uuid, active: bool) {
        if let Some(entry) = self.entries.write().await.get_mut(&id) {
            entry.active = active;
            entry.profile.status = if active { "active" } else { "blocked" }.to_string();
        }
    }

    pub async fn remove(&self, id: Uuid) {
        self.entries.write().await.remove(&id);
    }
}

#[async_trait]
impl PrincipalDirectory for MemoryDirectory {
    async fn is_active(&self, id: Uuid, kind: PrincipalKind) -> Result<bool> {
        if kind != self.kind {
            return Err(Error::NotFound);
        }
        self.entries
            .read()
            .await
            .get(&id)
            .map(|entry| entry.active)
            .ok_or(Error::NotFound)
    }

    async fn profile(&self, id: Uuid, kind: PrincipalKind) -> Result<Profile> {
        if kind != self.kind {
            return Err(Error::NotFound);
        }
        self.entries
            .read()
            .await
            .get(&id)
            .map(|entry| entry.profile.clone())
            .ok_or(Error::NotFound)
    }
}

#[async_trait]
impl CredentialVerifier for MemoryDirectory {
    async fn check(&self, username: &str, password: &str) -> Result<Profile> {
        let entries = self.entries.read().await;
        entries
            .values()
            .find(|entry| {
                entry.profile.username == username && entry.password == password && entry.active
            })
            .map(|entry| entry.profile.clone())
            .ok_or(Error::InvalidCredentials)
    }
}
