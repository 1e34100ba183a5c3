//! Transient session and API-token cache for the statically configured admin.
//!
//! [`AuthManager`] keeps sessions and ephemeral API tokens in memory behind a
//! single lock. In clustered deployments it writes through to a
//! [`SessionStore`] and repopulates itself from the store on a cache miss.
//! Expired entries are rejected on every read and swept periodically by a
//! [`CleanupWorker`].

mod cleanup;
mod expiry;

pub use cleanup::{CleanupReport, CleanupWorker};

use crate::config::{AdminCredentialsConfig, AuthConfig};
use crate::error::{SessionError, StoreError};
use crate::models::{PersistedApiToken, PersistedSession};
use crate::password::{is_argon2_hash, PasswordHasher};
use crate::request::{self, CookieAttributes};
use crate::store::SessionStore;
use crate::token;
use chrono::{DateTime, Duration, Utc};
use expiry::ExpiryIndex;
use http::HeaderMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Name of the implicit token derived from configuration.
pub const CONFIG_TOKEN_NAME: &str = "config";

/// Permission granting every scope.
pub const WILDCARD_PERMISSION: &str = "*";

const SESSION_ID_BYTES: usize = 32;
const API_TOKEN_BYTES: usize = 32;

/// Longest session lifetime; longer configured durations are clamped.
const MAX_SESSION_DAYS: i64 = 366;

/// An authenticated browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    /// Opaque random identifier, also the cookie value.
    #[serde(skip)]
    pub id: String,
    /// Admin the session belongs to.
    pub admin_username: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// Client address at login.
    pub source_ip: String,
    /// Client user agent at login.
    pub user_agent: String,
}

impl Session {
    /// Whether the session has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            token_hash: token::digest(&self.id),
            admin_username: self.admin_username.clone(),
            source_ip: self.source_ip.clone(),
            user_agent: self.user_agent.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }

    fn from_persisted(id: &str, row: PersistedSession) -> Self {
        Self {
            id: id.to_string(),
            admin_username: row.admin_username,
            created_at: row.created_at,
            expires_at: row.expires_at,
            source_ip: row.source_ip,
            user_agent: row.user_agent,
        }
    }
}

/// An ephemeral API token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiToken {
    /// Token value. Masked in listings.
    pub token: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Granted scopes, in order.
    pub permissions: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry time, `None` for tokens that never expire.
    pub expires_at: Option<DateTime<Utc>>,
    /// Last successful validation.
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiToken {
    /// Whether the token has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    /// Whether the token grants `scope`.
    #[must_use]
    pub fn allows(&self, scope: &str) -> bool {
        self.permissions
            .iter()
            .any(|p| p == WILDCARD_PERMISSION || p == scope)
    }

    fn to_persisted(&self) -> PersistedApiToken {
        PersistedApiToken {
            token_hash: token::digest(&self.token),
            name: self.name.clone(),
            description: self.description.clone(),
            permissions: self.permissions.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_used_at: self.last_used_at,
        }
    }

    fn from_persisted(token: &str, row: PersistedApiToken) -> Self {
        Self {
            token: token.to_string(),
            name: row.name,
            description: row.description,
            permissions: row.permissions,
            created_at: row.created_at,
            expires_at: row.expires_at,
            last_used_at: row.last_used_at,
        }
    }
}

/// Who a request was authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Cookie session.
    Session(Session),
    /// Bearer API token.
    ApiToken(ApiToken),
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    tokens: HashMap<String, ApiToken>,
    session_expiry: ExpiryIndex,
    token_expiry: ExpiryIndex,
}

impl Inner {
    fn insert_session(&mut self, session: Session) {
        if let Some(previous) = self.sessions.remove(&session.id) {
            self.session_expiry.remove(previous.expires_at, &previous.id);
        }
        self.session_expiry.insert(session.expires_at, &session.id);
        self.sessions.insert(session.id.clone(), session);
    }

    fn remove_session(&mut self, id: &str) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        self.session_expiry.remove(session.expires_at, id);
        Some(session)
    }

    fn insert_token(&mut self, api_token: ApiToken) {
        if let Some(previous) = self.tokens.remove(&api_token.token) {
            if let Some(at) = previous.expires_at {
                self.token_expiry.remove(at, &previous.token);
            }
        }
        if let Some(at) = api_token.expires_at {
            self.token_expiry.insert(at, &api_token.token);
        }
        self.tokens.insert(api_token.token.clone(), api_token);
    }

    fn remove_token(&mut self, value: &str) -> Option<ApiToken> {
        let api_token = self.tokens.remove(value)?;
        if let Some(at) = api_token.expires_at {
            self.token_expiry.remove(at, value);
        }
        Some(api_token)
    }
}

/// Lock-guarded session and API-token cache.
///
/// Share it between request handlers behind an `Arc`. The lock is never held
/// across an `.await`.
pub struct AuthManager {
    inner: Mutex<Inner>,
    credentials: AdminCredentialsConfig,
    hasher: PasswordHasher,
    session_ttl: Duration,
    cookie: CookieAttributes,
    store: Option<Arc<dyn SessionStore>>,
    store_timeout: std::time::Duration,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("admin_username", &self.credentials.username)
            .field("session_ttl", &self.session_ttl)
            .field("cookie", &self.cookie)
            .field("clustered", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl AuthManager {
    /// Create a process-local manager from configuration.
    #[must_use]
    pub fn new(config: &AuthConfig, hasher: PasswordHasher) -> Self {
        let session_ttl = clamp_session_ttl(config.session.session_duration());
        Self {
            inner: Mutex::new(Inner::default()),
            credentials: config.admin.clone(),
            hasher,
            session_ttl,
            cookie: CookieAttributes::new(
                config.session.cookie_name.clone(),
                config.session.tls_enabled,
            ),
            store: None,
            store_timeout: config.session.persistence_timeout(),
            started_at: Utc::now(),
        }
    }

    /// Write sessions and tokens through to a shared store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the session lifetime, clamped to a year and a day.
    #[must_use]
    pub fn with_session_duration(mut self, duration: std::time::Duration) -> Self {
        self.session_ttl = clamp_session_ttl(duration);
        self
    }

    /// Session lifetime applied on creation and refresh.
    #[must_use]
    pub const fn session_duration(&self) -> Duration {
        self.session_ttl
    }

    /// Whether a shared store is attached.
    #[must_use]
    pub fn is_clustered(&self) -> bool {
        self.store.is_some()
    }

    /// Check credentials against the configured administrator.
    ///
    /// An Argon2id-encoded configured password is verified with the hasher.
    /// A plaintext one is only compared when `plaintext_bootstrap` is
    /// enabled. Empty configured credentials always fail.
    #[must_use]
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        let configured = &self.credentials;
        if configured.username.is_empty()
            || configured.password.is_empty()
            || username.is_empty()
            || password.is_empty()
        {
            return false;
        }

        if !token::constant_time_eq(username, &configured.username) {
            return self.hasher.verify_absent(password);
        }

        if is_argon2_hash(&configured.password) {
            return self.hasher.verify(password, &configured.password);
        }

        if configured.plaintext_bootstrap {
            tracing::warn!(
                username = %configured.username,
                "Authenticating against a plaintext configured password (bootstrap mode)"
            );
            return token::constant_time_eq(password, &configured.password);
        }

        tracing::warn!(
            username = %configured.username,
            "Configured admin password is not an Argon2id hash and plaintext bootstrap is disabled"
        );
        false
    }

    /// Mint a session for `username`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write-through to the shared store fails; the
    /// session is then discarded.
    pub async fn create_session(
        &self,
        username: &str,
        source_ip: &str,
        user_agent: &str,
    ) -> Result<Session, SessionError> {
        let now = Utc::now();
        let session = Session {
            id: token::random_token(SESSION_ID_BYTES),
            admin_username: username.to_string(),
            created_at: now,
            expires_at: now + self.session_ttl,
            source_ip: source_ip.to_string(),
            user_agent: user_agent.to_string(),
        };

        self.inner.lock().insert_session(session.clone());

        if let Some(store) = &self.store {
            if let Err(e) = self.bounded(store.put_session(&session.to_persisted())).await {
                self.inner.lock().remove_session(&session.id);
                return Err(e.into());
            }
        }

        tracing::info!(
            username = %username,
            ip = %source_ip,
            session = %token::mask(&session.id),
            "Created admin session"
        );
        Ok(session)
    }

    /// Look up a live session.
    ///
    /// Checks memory first; on a miss, consults the shared store and caches
    /// the result. Expired sessions are reported as absent and evicted.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared store fails or times out.
    pub async fn get_session(&self, id: &str) -> Result<Option<Session>, SessionError> {
        if id.is_empty() {
            return Ok(None);
        }
        let now = Utc::now();

        {
            let mut inner = self.inner.lock();
            match inner.sessions.get(id) {
                Some(session) if !session.is_expired_at(now) => return Ok(Some(session.clone())),
                Some(_) => {
                    inner.remove_session(id);
                    return Ok(None);
                }
                None => {}
            }
        }

        let Some(store) = &self.store else {
            return Ok(None);
        };
        let Some(row) = self.bounded(store.get_session(&token::digest(id))).await? else {
            return Ok(None);
        };
        let session = Session::from_persisted(id, row);
        if session.is_expired_at(now) {
            return Ok(None);
        }

        tracing::debug!(session = %token::mask(id), "Restored session from shared store");
        self.inner.lock().insert_session(session.clone());
        Ok(Some(session))
    }

    /// Remove a session. Removing an unknown session is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared store fails or times out.
    pub async fn delete_session(&self, id: &str) -> Result<(), SessionError> {
        let removed = self.inner.lock().remove_session(id);
        if let Some(store) = &self.store {
            self.bounded(store.delete_session(&token::digest(id))).await?;
        }
        if let Some(session) = removed {
            tracing::info!(
                username = %session.admin_username,
                session = %token::mask(id),
                "Deleted admin session"
            );
        }
        Ok(())
    }

    /// Extend a live session by the configured lifetime, measured from now.
    ///
    /// Returns `false` if the session is unknown or already expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared store fails or times out.
    pub async fn refresh_session(&self, id: &str) -> Result<bool, SessionError> {
        if self.get_session(id).await?.is_none() {
            return Ok(false);
        }

        let refreshed = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let now = Utc::now();
            match inner.sessions.get_mut(id) {
                Some(session) if !session.is_expired_at(now) => {
                    let previous = session.expires_at;
                    session.expires_at = now + self.session_ttl;
                    inner
                        .session_expiry
                        .reschedule(previous, session.expires_at, id);
                    Some(session.clone())
                }
                _ => None,
            }
        };

        let Some(session) = refreshed else {
            return Ok(false);
        };
        if let Some(store) = &self.store {
            self.bounded(store.put_session(&session.to_persisted())).await?;
        }
        Ok(true)
    }

    /// Remove every session belonging to `username`.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared store fails or times out.
    pub async fn revoke_sessions_for(&self, username: &str) -> Result<usize, SessionError> {
        let removed = {
            let mut inner = self.inner.lock();
            let ids: Vec<String> = inner
                .sessions
                .values()
                .filter(|s| s.admin_username == username)
                .map(|s| s.id.clone())
                .collect();
            for id in &ids {
                inner.remove_session(id);
            }
            ids.len()
        };
        if let Some(store) = &self.store {
            self.bounded(store.delete_sessions_for(username)).await?;
        }
        tracing::info!(username = %username, removed, "Revoked admin sessions");
        Ok(removed)
    }

    /// Issue an ephemeral API token.
    ///
    /// `valid_days` of zero never expires, and neither does a lifetime that
    /// runs past the last representable instant.
    ///
    /// # Errors
    ///
    /// Returns an error if the write-through to the shared store fails; the
    /// token is then discarded.
    pub async fn create_api_token(
        &self,
        name: &str,
        description: &str,
        permissions: Vec<String>,
        valid_days: u32,
    ) -> Result<ApiToken, SessionError> {
        let now = Utc::now();
        let api_token = ApiToken {
            token: token::random_token(API_TOKEN_BYTES),
            name: name.to_string(),
            description: description.to_string(),
            permissions,
            created_at: now,
            expires_at: api_token_expiry(now, valid_days),
            last_used_at: None,
        };

        self.inner.lock().insert_token(api_token.clone());

        if let Some(store) = &self.store {
            if let Err(e) = self.bounded(store.put_api_token(&api_token.to_persisted())).await {
                self.inner.lock().remove_token(&api_token.token);
                return Err(e.into());
            }
        }

        tracing::info!(
            name = %name,
            token = %token::mask(&api_token.token),
            "Created API token"
        );
        Ok(api_token)
    }

    /// Validate an API token, including the static configured token.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared store fails or times out.
    pub async fn validate_api_token(&self, value: &str) -> Result<Option<ApiToken>, SessionError> {
        if value.is_empty() {
            return Ok(None);
        }
        if !self.credentials.api_token.is_empty()
            && token::constant_time_eq(value, &self.credentials.api_token)
        {
            return Ok(Some(self.config_token()));
        }

        let now = Utc::now();
        {
            let mut inner = self.inner.lock();
            if inner.tokens.get(value).is_some_and(|t| t.is_expired_at(now)) {
                inner.remove_token(value);
                return Ok(None);
            }
            if let Some(api_token) = inner.tokens.get_mut(value) {
                api_token.last_used_at = Some(now);
                return Ok(Some(api_token.clone()));
            }
        }

        let Some(store) = &self.store else {
            return Ok(None);
        };
        let Some(row) = self.bounded(store.get_api_token(&token::digest(value))).await? else {
            return Ok(None);
        };
        let mut api_token = ApiToken::from_persisted(value, row);
        if api_token.is_expired_at(now) {
            return Ok(None);
        }
        api_token.last_used_at = Some(now);
        self.inner.lock().insert_token(api_token.clone());
        Ok(Some(api_token))
    }

    /// Revoke an API token. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared store fails or times out.
    pub async fn revoke_api_token(&self, value: &str) -> Result<bool, SessionError> {
        let mut removed = self.inner.lock().remove_token(value).is_some();
        if let Some(store) = &self.store {
            removed |= self.bounded(store.delete_api_token(&token::digest(value))).await?;
        }
        if removed {
            tracing::info!(token = %token::mask(value), "Revoked API token");
        }
        Ok(removed)
    }

    /// Live ephemeral tokens, oldest first, with token values masked.
    #[must_use]
    pub fn list_api_tokens(&self) -> Vec<ApiToken> {
        let now = Utc::now();
        let mut tokens: Vec<ApiToken> = self
            .inner
            .lock()
            .tokens
            .values()
            .filter(|t| !t.is_expired_at(now))
            .cloned()
            .collect();
        tokens.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        for api_token in &mut tokens {
            api_token.token = token::mask(&api_token.token);
        }
        tokens
    }

    /// Write the session cookie.
    pub fn set_session_cookie(&self, headers: &mut HeaderMap, session: &Session) {
        let max_age = (session.expires_at - Utc::now()).num_seconds().max(0);
        self.cookie.write(headers, &session.id, Some(max_age));
    }

    /// Expire the session cookie.
    pub fn clear_session_cookie(&self, headers: &mut HeaderMap) {
        self.cookie.clear(headers);
    }

    /// Session id carried by the request cookie, if any.
    #[must_use]
    pub fn session_from_request(&self, headers: &HeaderMap) -> Option<String> {
        request::cookie_value(headers, &self.cookie.name)
    }

    /// Bearer token carried by the request, or an empty string.
    #[must_use]
    pub fn token_from_request(&self, headers: &HeaderMap) -> String {
        request::bearer_token(headers)
    }

    /// Resolve a request to a session or API token.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared store fails or times out.
    pub async fn identify(&self, headers: &HeaderMap) -> Result<Option<Principal>, SessionError> {
        if let Some(id) = self.session_from_request(headers) {
            if let Some(session) = self.get_session(&id).await? {
                return Ok(Some(Principal::Session(session)));
            }
        }
        let bearer = self.token_from_request(headers);
        Ok(self
            .validate_api_token(&bearer)
            .await?
            .map(Principal::ApiToken))
    }

    /// Remove every in-memory session and token that has expired.
    pub fn cleanup(&self) -> CleanupReport {
        let now = Utc::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let expired_sessions = inner.session_expiry.drain_expired(now);
        for id in &expired_sessions {
            inner.sessions.remove(id);
        }
        let expired_tokens = inner.token_expiry.drain_expired(now);
        for value in &expired_tokens {
            inner.tokens.remove(value);
        }

        CleanupReport {
            sessions: expired_sessions.len(),
            api_tokens: expired_tokens.len(),
        }
    }

    /// Purge expired rows from the shared store, if one is attached.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared store fails or times out.
    pub async fn cleanup_persistent(&self) -> Result<u64, SessionError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        Ok(self.bounded(store.delete_expired(Utc::now())).await?)
    }

    /// Number of sessions held in memory, expired or not.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Number of ephemeral tokens held in memory, expired or not.
    #[must_use]
    pub fn api_token_count(&self) -> usize {
        self.inner.lock().tokens.len()
    }

    fn config_token(&self) -> ApiToken {
        ApiToken {
            token: self.credentials.api_token.clone(),
            name: CONFIG_TOKEN_NAME.to_string(),
            description: "Configured static API token".to_string(),
            permissions: vec![WILDCARD_PERMISSION.to_string()],
            created_at: self.started_at,
            expires_at: None,
            last_used_at: None,
        }
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.store_timeout, operation)
            .await
            .map_err(|_| {
                tracing::warn!(
                    timeout_ms = self.store_timeout.as_millis(),
                    "Session store did not answer in time"
                );
                StoreError::Timeout
            })?
    }
}

fn clamp_session_ttl(duration: std::time::Duration) -> Duration {
    let max = Duration::days(MAX_SESSION_DAYS);
    Duration::from_std(duration).map_or(max, |ttl| ttl.min(max))
}

fn api_token_expiry(now: DateTime<Utc>, valid_days: u32) -> Option<DateTime<Utc>> {
    if valid_days == 0 {
        return None;
    }
    now.checked_add_signed(Duration::days(i64::from(valid_days)))
}
