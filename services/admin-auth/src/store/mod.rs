//! Persistence seams.
//!
//! [`SessionStore`] backs the in-memory session cache in clustered
//! deployments. [`AdminStore`] holds admin accounts, invites and the setup
//! token. [`SqliteStore`] implements both.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::models::{
    Admin, Invite, NewAdmin, NewInvite, PersistedApiToken, PersistedSession, SetupToken,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Shared backing for sessions and ephemeral API tokens.
///
/// Every key is the digest of the credential, never the credential itself.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace a session.
    async fn put_session(&self, session: &PersistedSession) -> Result<(), StoreError>;

    /// Load a session by digest.
    async fn get_session(&self, token_hash: &str) -> Result<Option<PersistedSession>, StoreError>;

    /// Delete a session by digest. Missing rows are not an error.
    async fn delete_session(&self, token_hash: &str) -> Result<(), StoreError>;

    /// Delete every session belonging to one admin.
    async fn delete_sessions_for(&self, admin_username: &str) -> Result<u64, StoreError>;

    /// Insert or replace an API token.
    async fn put_api_token(&self, token: &PersistedApiToken) -> Result<(), StoreError>;

    /// Load an API token by digest.
    async fn get_api_token(&self, token_hash: &str) -> Result<Option<PersistedApiToken>, StoreError>;

    /// Delete an API token by digest, reporting whether a row was removed.
    async fn delete_api_token(&self, token_hash: &str) -> Result<bool, StoreError>;

    /// Purge sessions and tokens that expired before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Relational storage for admin identities.
///
/// Usernames and emails are passed in already lower-cased.
#[async_trait]
pub trait AdminStore: Send + Sync {
    /// Insert an admin. Uniqueness violations surface as [`StoreError::Duplicate`].
    async fn insert_admin(&self, admin: &NewAdmin) -> Result<Admin, StoreError>;

    /// Look up by row id.
    async fn admin_by_id(&self, id: i64) -> Result<Option<Admin>, StoreError>;

    /// Look up by username.
    async fn admin_by_username(&self, username: &str) -> Result<Option<Admin>, StoreError>;

    /// Look up by email.
    async fn admin_by_email(&self, email: &str) -> Result<Option<Admin>, StoreError>;

    /// Look up by federated source and subject.
    async fn admin_by_external(
        &self,
        source: &str,
        external_id: &str,
    ) -> Result<Option<Admin>, StoreError>;

    /// The primary admin, if any admin exists.
    async fn primary_admin(&self) -> Result<Option<Admin>, StoreError>;

    /// All admins, oldest first.
    async fn list_admins(&self) -> Result<Vec<Admin>, StoreError>;

    /// Number of admins.
    async fn count_admins(&self) -> Result<i64, StoreError>;

    /// Delete a non-primary admin, reporting whether a row was removed.
    async fn delete_admin(&self, id: i64) -> Result<bool, StoreError>;

    /// Replace an admin's password hash.
    async fn update_password(&self, id: i64, password_hash: &str) -> Result<bool, StoreError>;

    /// Stamp the last login time.
    async fn record_login(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Set or clear an admin's personal API token digest and prefix.
    async fn set_api_token(
        &self,
        id: i64,
        token: Option<(&str, &str)>,
    ) -> Result<bool, StoreError>;

    /// Admins whose personal token carries `prefix`.
    async fn admins_by_token_prefix(&self, prefix: &str) -> Result<Vec<Admin>, StoreError>;

    /// Insert an invite.
    async fn insert_invite(&self, invite: &NewInvite) -> Result<Invite, StoreError>;

    /// Look up an invite by token digest.
    async fn invite_by_hash(&self, token_hash: &str) -> Result<Option<Invite>, StoreError>;

    /// All invites, newest first.
    async fn list_invites(&self) -> Result<Vec<Invite>, StoreError>;

    /// Delete an invite, reporting whether a row was removed.
    async fn delete_invite(&self, id: i64) -> Result<bool, StoreError>;

    /// Atomically consume an unused, unexpired invite and insert the admin
    /// it admits. Returns `None` when the invite cannot be used.
    async fn accept_invite(
        &self,
        token_hash: &str,
        admin: &NewAdmin,
        now: DateTime<Utc>,
    ) -> Result<Option<Admin>, StoreError>;

    /// Replace the installation's setup token.
    async fn put_setup_token(&self, token: &SetupToken) -> Result<(), StoreError>;

    /// The current setup token.
    async fn setup_token(&self) -> Result<Option<SetupToken>, StoreError>;

    /// Atomically mark the setup token used if it matches, is unused and is
    /// unexpired. Returns whether this call consumed it.
    async fn consume_setup_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
