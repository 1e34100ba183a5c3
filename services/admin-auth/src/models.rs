//! Records shared between the services and the persistence layer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Source value for accounts created locally (setup, invite, CLI).
pub const LOCAL_SOURCE: &str = "local";

/// A persistent administrator account.
#[derive(Clone, PartialEq, Eq)]
pub struct Admin {
    /// Row id.
    pub id: i64,
    /// Lower-cased, unique username.
    pub username: String,
    /// Lower-cased, unique email.
    pub email: Option<String>,
    /// Argon2id PHC string.
    pub password_hash: String,
    /// Exactly one admin is primary once any admin exists.
    pub is_primary: bool,
    /// `"local"` or the federated provider id.
    pub source: String,
    /// Subject identifier at the federated provider.
    pub external_id: Option<String>,
    /// Whether a second factor is enrolled.
    pub totp_enabled: bool,
    /// Digest of the admin's personal API token.
    pub token_hash: Option<String>,
    /// Readable lookup prefix of the personal API token.
    pub token_prefix: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Last successful login.
    pub last_login_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Admin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admin")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("is_primary", &self.is_primary)
            .field("source", &self.source)
            .field("external_id", &self.external_id)
            .field("totp_enabled", &self.totp_enabled)
            .field("token_prefix", &self.token_prefix)
            .field("created_at", &self.created_at)
            .field("last_login_at", &self.last_login_at)
            .finish_non_exhaustive()
    }
}

/// Fields for inserting an admin.
#[derive(Debug, Clone)]
pub struct NewAdmin {
    /// Lower-cased username.
    pub username: String,
    /// Lower-cased email.
    pub email: Option<String>,
    /// Argon2id PHC string.
    pub password_hash: String,
    /// Primary flag.
    pub is_primary: bool,
    /// Account source.
    pub source: String,
    /// Federated subject.
    pub external_id: Option<String>,
}

/// A single-use invitation for a new secondary admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invite {
    /// Row id.
    pub id: i64,
    /// Digest of the invite token.
    #[serde(skip)]
    pub token_hash: String,
    /// Username pre-filled on the accept form.
    pub suggested_username: Option<String>,
    /// Admin who issued the invite.
    pub created_by: i64,
    /// Issue time.
    pub created_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// Time the invite was consumed.
    pub used_at: Option<DateTime<Utc>>,
    /// Admin created from this invite.
    pub used_by: Option<i64>,
}

impl Invite {
    /// Unused and unexpired at `now`.
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && now <= self.expires_at
    }
}

/// Fields for inserting an invite.
#[derive(Debug, Clone)]
pub struct NewInvite {
    /// Digest of the invite token.
    pub token_hash: String,
    /// Username pre-filled on the accept form.
    pub suggested_username: Option<String>,
    /// Issuing admin.
    pub created_by: i64,
    /// Issue time.
    pub created_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
}

/// The installation's first-run bootstrap token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupToken {
    /// Digest of the token.
    pub token_hash: String,
    /// Issue time.
    pub created_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// Time the token was consumed.
    pub used_at: Option<DateTime<Utc>>,
}

impl SetupToken {
    /// Unused and unexpired at `now`.
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && now <= self.expires_at
    }
}

/// A session as held by the shared store, keyed by the digest of its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSession {
    /// Digest of the session id.
    pub token_hash: String,
    /// Owning admin username.
    pub admin_username: String,
    /// Client address at login.
    pub source_ip: String,
    /// Client user agent at login.
    pub user_agent: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
}

/// An ephemeral API token as held by the shared store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedApiToken {
    /// Digest of the token.
    pub token_hash: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Granted scopes, in order.
    pub permissions: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry time, `None` for non-expiring tokens.
    pub expires_at: Option<DateTime<Utc>>,
    /// Last successful validation.
    pub last_used_at: Option<DateTime<Utc>>,
}
