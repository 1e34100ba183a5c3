//! Persistent multi-administrator identities.
//!
//! [`AdminService`] owns admin accounts, the primary/secondary hierarchy,
//! personal API tokens, first-run setup and invites. Every credential it
//! issues is returned once in plaintext and persisted only as a SHA-256
//! digest.

use crate::config::AuthConfig;
use crate::error::AdminError;
use crate::models::{Admin, Invite, NewAdmin, NewInvite, SetupToken, LOCAL_SOURCE};
use crate::password::PasswordHasher;
use crate::store::AdminStore;
use crate::token;
use chrono::{Duration, Utc};
use std::sync::Arc;

/// Readable prefix of every personal API token.
pub const API_TOKEN_PREFIX: &str = "adm_";

/// Path an invite link is served under.
pub const INVITE_PATH_PREFIX: &str = "/admin/invite/";

const API_TOKEN_RANDOM_BYTES: usize = 24;
const API_TOKEN_LOOKUP_LEN: usize = 12;
const SETUP_TOKEN_BYTES: usize = 32;
const INVITE_TOKEN_BYTES: usize = 32;
const EXTERNAL_PASSWORD_BYTES: usize = 32;

const MIN_USERNAME_LEN: usize = 3;
const MAX_USERNAME_LEN: usize = 64;
const MIN_PASSWORD_LEN: usize = 8;

/// A freshly created invite together with its one-time plaintext token.
#[derive(Debug, Clone)]
pub struct IssuedInvite {
    /// Persisted invite record.
    pub invite: Invite,
    /// Plaintext token. Not recoverable after this value is dropped.
    pub token: String,
}

impl IssuedInvite {
    /// Relative URL the recipient opens to accept the invite.
    #[must_use]
    pub fn accept_path(&self) -> String {
        format!("{INVITE_PATH_PREFIX}{}", self.token)
    }
}

/// Manager for persistent administrator accounts.
pub struct AdminService {
    store: Arc<dyn AdminStore>,
    hasher: PasswordHasher,
    invite_ttl: Duration,
    setup_ttl: Duration,
}

impl std::fmt::Debug for AdminService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminService")
            .field("invite_ttl", &self.invite_ttl)
            .field("setup_ttl", &self.setup_ttl)
            .finish_non_exhaustive()
    }
}

impl AdminService {
    /// Create a service over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn AdminStore>, hasher: PasswordHasher, config: &AuthConfig) -> Self {
        Self {
            store,
            hasher,
            invite_ttl: Duration::hours(i64::from(config.invites.ttl_hours)),
            setup_ttl: Duration::hours(i64::from(config.setup.ttl_hours)),
        }
    }

    /// Create a local admin.
    ///
    /// Username and email are lower-cased. The first admin ever created is
    /// primary regardless of `is_primary`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for malformed fields, `DuplicateIdentity` when the
    /// username or email is taken, `PrimaryAlreadyExists` when asking for a
    /// second primary.
    pub async fn create_admin(
        &self,
        username: &str,
        email: Option<&str>,
        password: &str,
        is_primary: bool,
    ) -> Result<Admin, AdminError> {
        let username = normalize(username);
        validate_username(&username)?;
        let email = normalize_email(email)?;
        validate_password(password)?;

        self.ensure_identity_free(&username, email.as_deref()).await?;

        let admin = NewAdmin {
            username,
            email,
            password_hash: self.hasher.hash(password)?,
            is_primary,
            source: LOCAL_SOURCE.to_string(),
            external_id: None,
        };
        self.insert(admin).await
    }

    /// Look up an admin by row id.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn get_admin_by_id(&self, id: i64) -> Result<Option<Admin>, AdminError> {
        Ok(self.store.admin_by_id(id).await?)
    }

    /// Case-insensitive lookup by username.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn get_admin_by_username(&self, username: &str) -> Result<Option<Admin>, AdminError> {
        let username = normalize(username);
        if username.is_empty() {
            return Ok(None);
        }
        Ok(self.store.admin_by_username(&username).await?)
    }

    /// Case-insensitive lookup by email.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn get_admin_by_email(&self, email: &str) -> Result<Option<Admin>, AdminError> {
        let email = normalize(email);
        if email.is_empty() {
            return Ok(None);
        }
        Ok(self.store.admin_by_email(&email).await?)
    }

    /// Verify a login by username or email.
    ///
    /// Returns `None` for an unknown identifier, a wrong password, or an
    /// account that belongs to a federated provider, without distinguishing
    /// between them. Stamps the last login time on success.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn authenticate_admin(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Option<Admin>, AdminError> {
        let admin = match self.get_admin_by_username(identifier).await? {
            Some(admin) => Some(admin),
            None => self.get_admin_by_email(identifier).await?,
        };

        let Some(mut admin) = admin else {
            let _ = self.hasher.verify_absent(password);
            return Ok(None);
        };
        if admin.source != LOCAL_SOURCE || !self.hasher.verify(password, &admin.password_hash) {
            tracing::debug!(admin_id = admin.id, "Admin login rejected");
            return Ok(None);
        }

        let now = Utc::now();
        self.store.record_login(admin.id, now).await?;
        admin.last_login_at = Some(now);
        tracing::info!(admin_id = admin.id, username = %admin.username, "Admin logged in");
        Ok(Some(admin))
    }

    /// Delete a secondary admin.
    ///
    /// Authorization is the caller's job; see [`Self::can_admin_modify_admin`].
    ///
    /// # Errors
    ///
    /// `PrimaryAdminProtected` for the primary admin, `NotFound` for an
    /// unknown id.
    pub async fn delete_admin(&self, target_id: i64, acting_id: i64) -> Result<(), AdminError> {
        let target = self
            .store
            .admin_by_id(target_id)
            .await?
            .ok_or(AdminError::NotFound)?;
        if target.is_primary {
            tracing::warn!(
                target_id,
                acting_id,
                "Refused to delete the primary administrator"
            );
            return Err(AdminError::PrimaryAdminProtected);
        }
        if !self.store.delete_admin(target_id).await? {
            return Err(AdminError::NotFound);
        }
        tracing::info!(
            target_id,
            acting_id,
            username = %target.username,
            "Deleted administrator"
        );
        Ok(())
    }

    /// Number of admins.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn get_total_admin_count(&self) -> Result<i64, AdminError> {
        Ok(self.store.count_admins().await?)
    }

    /// Whether any admin exists.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn has_any_admin(&self) -> Result<bool, AdminError> {
        Ok(self.get_total_admin_count().await? > 0)
    }

    /// The primary admin, if any admin exists.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn get_primary_admin(&self) -> Result<Option<Admin>, AdminError> {
        Ok(self.store.primary_admin().await?)
    }

    /// Whether `viewer_id` may see `target_id`: itself, or anyone when primary.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn can_admin_view_admin(
        &self,
        viewer_id: i64,
        target_id: i64,
    ) -> Result<bool, AdminError> {
        if viewer_id == target_id {
            return Ok(true);
        }
        Ok(self
            .store
            .admin_by_id(viewer_id)
            .await?
            .is_some_and(|viewer| viewer.is_primary))
    }

    /// Whether `viewer_id` may modify `target_id`. Same rule as viewing.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn can_admin_modify_admin(
        &self,
        viewer_id: i64,
        target_id: i64,
    ) -> Result<bool, AdminError> {
        self.can_admin_view_admin(viewer_id, target_id).await
    }

    /// Every admin, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn list_admins(&self) -> Result<Vec<Admin>, AdminError> {
        Ok(self.store.list_admins().await?)
    }

    /// Admins `viewer_id` is allowed to see.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn list_visible_admins(&self, viewer_id: i64) -> Result<Vec<Admin>, AdminError> {
        let Some(viewer) = self.store.admin_by_id(viewer_id).await? else {
            return Ok(Vec::new());
        };
        if viewer.is_primary {
            return self.list_admins().await;
        }
        Ok(vec![viewer])
    }

    /// Replace an admin's password.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a short password, `NotFound` for an unknown id.
    pub async fn update_password(&self, admin_id: i64, password: &str) -> Result<(), AdminError> {
        validate_password(password)?;
        let hash = self.hasher.hash(password)?;
        if !self.store.update_password(admin_id, &hash).await? {
            return Err(AdminError::NotFound);
        }
        tracing::info!(admin_id, "Updated administrator password");
        Ok(())
    }

    /// Stamp an admin's last login time.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn record_login(&self, admin_id: i64) -> Result<(), AdminError> {
        Ok(self.store.record_login(admin_id, Utc::now()).await?)
    }

    /// Issue a personal API token, replacing any previous one.
    ///
    /// The plaintext is returned once; only its digest and lookup prefix
    /// are stored.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown admin.
    pub async fn generate_api_token(&self, admin_id: i64) -> Result<String, AdminError> {
        let value = format!(
            "{API_TOKEN_PREFIX}{}",
            token::random_token(API_TOKEN_RANDOM_BYTES)
        );
        let prefix = &value[..API_TOKEN_LOOKUP_LEN];
        let stored = self
            .store
            .set_api_token(admin_id, Some((&token::digest(&value), prefix)))
            .await?;
        if !stored {
            return Err(AdminError::NotFound);
        }
        tracing::info!(admin_id, token = %token::mask(&value), "Issued administrator API token");
        Ok(value)
    }

    /// Resolve a personal API token to its admin.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn validate_api_token(&self, value: &str) -> Result<Option<Admin>, AdminError> {
        if !value.starts_with(API_TOKEN_PREFIX) || value.len() <= API_TOKEN_LOOKUP_LEN {
            return Ok(None);
        }
        let Some(prefix) = value.get(..API_TOKEN_LOOKUP_LEN) else {
            return Ok(None);
        };

        let presented = token::digest(value);
        let candidates = self.store.admins_by_token_prefix(prefix).await?;
        Ok(candidates.into_iter().find(|admin| {
            admin
                .token_hash
                .as_deref()
                .is_some_and(|stored| token::constant_time_eq(stored, &presented))
        }))
    }

    /// Remove an admin's personal API token.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn revoke_api_token(&self, admin_id: i64) -> Result<bool, AdminError> {
        let revoked = self.store.set_api_token(admin_id, None).await?;
        if revoked {
            tracing::info!(admin_id, "Revoked administrator API token");
        }
        Ok(revoked)
    }

    /// Issue the installation's setup token, replacing any previous one.
    ///
    /// # Errors
    ///
    /// `SetupAlreadyCompleted` once any admin exists.
    pub async fn create_setup_token(&self) -> Result<String, AdminError> {
        if self.has_any_admin().await? {
            return Err(AdminError::SetupAlreadyCompleted);
        }
        let now = Utc::now();
        let value = token::random_token(SETUP_TOKEN_BYTES);
        self.store
            .put_setup_token(&SetupToken {
                token_hash: token::digest(&value),
                created_at: now,
                expires_at: now + self.setup_ttl,
                used_at: None,
            })
            .await?;
        tracing::info!(token = %token::mask(&value), "Issued setup token");
        Ok(value)
    }

    /// Whether `value` is the current, unused, unexpired setup token.
    ///
    /// Always `false` once any admin exists.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn validate_setup_token(&self, value: &str) -> Result<bool, AdminError> {
        if value.is_empty() || self.has_any_admin().await? {
            return Ok(false);
        }
        let Some(stored) = self.store.setup_token().await? else {
            return Ok(false);
        };
        Ok(stored.is_usable(Utc::now())
            && token::constant_time_eq(&stored.token_hash, &token::digest(value)))
    }

    /// Consume the setup token. Only the first successful call returns `true`,
    /// and none does once an admin exists.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn use_setup_token(&self, value: &str) -> Result<bool, AdminError> {
        if value.is_empty() || self.has_any_admin().await? {
            return Ok(false);
        }
        let consumed = self
            .store
            .consume_setup_token(&token::digest(value), Utc::now())
            .await?;
        if consumed {
            tracing::info!("Setup token consumed");
        }
        Ok(consumed)
    }

    /// Run first-run setup: consume the setup token and create the primary admin.
    ///
    /// # Errors
    ///
    /// `SetupAlreadyCompleted` if an admin exists, `InvalidOrExpiredToken`
    /// if the token cannot be used, plus any [`Self::create_admin`] error.
    pub async fn complete_setup(
        &self,
        setup_token: &str,
        username: &str,
        email: Option<&str>,
        password: &str,
    ) -> Result<Admin, AdminError> {
        validate_username(&normalize(username))?;
        normalize_email(email)?;
        validate_password(password)?;

        if self.has_any_admin().await? {
            return Err(AdminError::SetupAlreadyCompleted);
        }
        if !self.use_setup_token(setup_token).await? {
            return Err(AdminError::InvalidOrExpiredToken);
        }
        self.create_admin(username, email, password, true).await
    }

    /// Issue an invite for a new secondary admin.
    ///
    /// `ttl` defaults to the configured invite lifetime.
    ///
    /// # Errors
    ///
    /// `NotFound` if the creator does not exist.
    pub async fn create_invite(
        &self,
        creator_id: i64,
        suggested_username: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<IssuedInvite, AdminError> {
        if self.store.admin_by_id(creator_id).await?.is_none() {
            return Err(AdminError::NotFound);
        }
        let suggested_username = suggested_username
            .map(normalize)
            .filter(|name| !name.is_empty());

        let now = Utc::now();
        let value = token::random_token(INVITE_TOKEN_BYTES);
        let invite = self
            .store
            .insert_invite(&NewInvite {
                token_hash: token::digest(&value),
                suggested_username,
                created_by: creator_id,
                created_at: now,
                expires_at: now + ttl.unwrap_or(self.invite_ttl),
            })
            .await?;

        tracing::info!(
            invite_id = invite.id,
            created_by = creator_id,
            expires_at = %invite.expires_at,
            "Created administrator invite"
        );
        Ok(IssuedInvite {
            invite,
            token: value,
        })
    }

    /// The invite behind `invite_token`, if it can still be accepted.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn lookup_invite(&self, invite_token: &str) -> Result<Option<Invite>, AdminError> {
        if invite_token.is_empty() {
            return Ok(None);
        }
        let invite = self.store.invite_by_hash(&token::digest(invite_token)).await?;
        Ok(invite.filter(|invite| invite.is_usable(Utc::now())))
    }

    /// Redeem an invite, creating a secondary local admin.
    ///
    /// An empty `username` falls back to the invite's suggested username.
    ///
    /// # Errors
    ///
    /// `InvalidOrExpiredToken` for any unknown, used or expired token,
    /// `InvalidInput` for malformed fields, `DuplicateIdentity` when taken.
    pub async fn accept_invite(
        &self,
        invite_token: &str,
        username: &str,
        email: Option<&str>,
        password: &str,
    ) -> Result<Admin, AdminError> {
        let now = Utc::now();
        let token_hash = token::digest(invite_token);
        let invite = match self.store.invite_by_hash(&token_hash).await? {
            Some(invite) if invite.is_usable(now) => invite,
            _ => return Err(AdminError::InvalidOrExpiredToken),
        };

        let mut username = normalize(username);
        if username.is_empty() {
            username = invite.suggested_username.clone().unwrap_or_default();
        }
        validate_username(&username)?;
        let email = normalize_email(email)?;
        validate_password(password)?;
        self.ensure_identity_free(&username, email.as_deref()).await?;

        let admin = NewAdmin {
            username,
            email,
            password_hash: self.hasher.hash(password)?,
            is_primary: false,
            source: LOCAL_SOURCE.to_string(),
            external_id: None,
        };
        let created = self
            .store
            .accept_invite(&token_hash, &admin, now)
            .await?
            .ok_or(AdminError::InvalidOrExpiredToken)?;

        tracing::info!(
            invite_id = invite.id,
            admin_id = created.id,
            username = %created.username,
            "Invite accepted"
        );
        Ok(created)
    }

    /// Every invite, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn list_invites(&self) -> Result<Vec<Invite>, AdminError> {
        Ok(self.store.list_invites().await?)
    }

    /// Withdraw an invite.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn revoke_invite(&self, invite_id: i64) -> Result<bool, AdminError> {
        let revoked = self.store.delete_invite(invite_id).await?;
        if revoked {
            tracing::info!(invite_id, "Revoked administrator invite");
        }
        Ok(revoked)
    }

    /// Return the admin linked to a federated subject, creating it on first login.
    ///
    /// Federated admins get an unusable random password, so they can only
    /// log in through their provider.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a malformed username, `DuplicateIdentity` if the
    /// username or email already belongs to another account.
    pub async fn find_or_create_external_admin(
        &self,
        source: &str,
        external_id: &str,
        username: &str,
        email: Option<&str>,
    ) -> Result<Admin, AdminError> {
        if source.is_empty() || source == LOCAL_SOURCE || external_id.is_empty() {
            return Err(AdminError::InvalidInput(
                "federated source and subject are required".to_string(),
            ));
        }
        if let Some(existing) = self.store.admin_by_external(source, external_id).await? {
            return Ok(existing);
        }

        let username = normalize(username);
        validate_username(&username)?;
        let email = normalize_email(email)?;
        self.ensure_identity_free(&username, email.as_deref()).await?;

        let admin = NewAdmin {
            username,
            email,
            password_hash: self
                .hasher
                .hash(&token::random_token(EXTERNAL_PASSWORD_BYTES))?,
            is_primary: false,
            source: source.to_string(),
            external_id: Some(external_id.to_string()),
        };
        self.insert(admin).await
    }

    async fn ensure_identity_free(
        &self,
        username: &str,
        email: Option<&str>,
    ) -> Result<(), AdminError> {
        if self.store.admin_by_username(username).await?.is_some() {
            return Err(AdminError::DuplicateIdentity);
        }
        if let Some(email) = email {
            if self.store.admin_by_email(email).await?.is_some() {
                return Err(AdminError::DuplicateIdentity);
            }
        }
        Ok(())
    }

    async fn insert(&self, mut admin: NewAdmin) -> Result<Admin, AdminError> {
        let promoted = match self.store.primary_admin().await? {
            None => !std::mem::replace(&mut admin.is_primary, true),
            Some(_) if admin.is_primary => return Err(AdminError::PrimaryAlreadyExists),
            Some(_) => false,
        };

        let created = match self.store.insert_admin(&admin).await.map_err(AdminError::from) {
            // Another first admin was inserted concurrently.
            Err(AdminError::PrimaryAlreadyExists) if promoted => {
                admin.is_primary = false;
                self.store.insert_admin(&admin).await?
            }
            result => result?,
        };
        tracing::info!(
            admin_id = created.id,
            username = %created.username,
            primary = created.is_primary,
            source = %created.source,
            "Created administrator"
        );
        Ok(created)
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn normalize_email(email: Option<&str>) -> Result<Option<String>, AdminError> {
    let Some(email) = email.map(normalize).filter(|e| !e.is_empty()) else {
        return Ok(None);
    };
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(Some(email)),
        _ => Err(AdminError::InvalidInput(format!("invalid email address: {email}"))),
    }
}

fn validate_username(username: &str) -> Result<(), AdminError> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err(AdminError::InvalidInput(format!(
            "username must be {MIN_USERNAME_LEN}-{MAX_USERNAME_LEN} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
    {
        return Err(AdminError::InvalidInput(
            "username may only contain letters, digits, '.', '_' and '-'".to_string(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AdminError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AdminError::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
