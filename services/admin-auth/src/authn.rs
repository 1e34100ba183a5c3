//! One authentication interface over both identity sources.
//!
//! [`StaticAuthenticator`] checks the administrator from configuration and
//! the ephemeral token cache. [`AdminAuthenticator`] checks persistent admin
//! accounts. [`ChainAuthenticator`] tries several in order, so a deployment
//! can accept both without branching at call sites.

use crate::admin::AdminService;
use crate::error::AuthError;
use crate::models::Admin;
use crate::session::{ApiToken, AuthManager, WILDCARD_PERMISSION};
use async_trait::async_trait;
use std::sync::Arc;

/// Who a credential belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// The administrator from configuration.
    Static {
        /// Configured username.
        username: String,
    },
    /// A persistent admin account.
    Admin(Admin),
    /// An ephemeral or configured API token.
    Token(ApiToken),
}

impl Identity {
    /// Display name for audit logs.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Static { username } => username,
            Self::Admin(admin) => &admin.username,
            Self::Token(token) => &token.name,
        }
    }

    /// Row id when backed by a persistent account.
    #[must_use]
    pub const fn admin_id(&self) -> Option<i64> {
        match self {
            Self::Admin(admin) => Some(admin.id),
            _ => None,
        }
    }

    /// Whether the identity has full control. The configured administrator
    /// and the primary admin do; tokens need the wildcard permission.
    #[must_use]
    pub fn is_superuser(&self) -> bool {
        match self {
            Self::Static { .. } => true,
            Self::Admin(admin) => admin.is_primary,
            Self::Token(token) => token.permissions.iter().any(|p| p == WILDCARD_PERMISSION),
        }
    }
}

/// A source of identities.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a username (or email) and password.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backing store fails.
    async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Option<Identity>, AuthError>;

    /// Resolve a bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backing store fails.
    async fn authenticate_token(&self, token: &str) -> Result<Option<Identity>, AuthError>;
}

/// Checks the configured administrator and the ephemeral token cache.
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    manager: Arc<AuthManager>,
}

impl StaticAuthenticator {
    /// Wrap a session manager.
    #[must_use]
    pub const fn new(manager: Arc<AuthManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Option<Identity>, AuthError> {
        Ok(self
            .manager
            .authenticate(identifier, password)
            .then(|| Identity::Static {
                username: identifier.to_string(),
            }))
    }

    async fn authenticate_token(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        Ok(self
            .manager
            .validate_api_token(token)
            .await?
            .map(Identity::Token))
    }
}

/// Checks persistent admin accounts and their personal API tokens.
#[derive(Debug, Clone)]
pub struct AdminAuthenticator {
    admins: Arc<AdminService>,
}

impl AdminAuthenticator {
    /// Wrap an admin service.
    #[must_use]
    pub const fn new(admins: Arc<AdminService>) -> Self {
        Self { admins }
    }
}

#[async_trait]
impl Authenticator for AdminAuthenticator {
    async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Option<Identity>, AuthError> {
        Ok(self
            .admins
            .authenticate_admin(identifier, password)
            .await?
            .map(Identity::Admin))
    }

    async fn authenticate_token(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        Ok(self
            .admins
            .validate_api_token(token)
            .await?
            .map(Identity::Admin))
    }
}

/// Tries each authenticator in order and returns the first match.
///
/// A store failure in any member stops the chain.
#[derive(Default, Clone)]
pub struct ChainAuthenticator {
    members: Vec<Arc<dyn Authenticator>>,
}

impl std::fmt::Debug for ChainAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainAuthenticator")
            .field("members", &self.members.len())
            .finish()
    }
}

impl ChainAuthenticator {
    /// An empty chain, which authenticates nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an authenticator.
    #[must_use]
    pub fn with(mut self, member: Arc<dyn Authenticator>) -> Self {
        self.members.push(member);
        self
    }
}

#[async_trait]
impl Authenticator for ChainAuthenticator {
    async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Option<Identity>, AuthError> {
        for member in &self.members {
            if let Some(identity) = member.authenticate(identifier, password).await? {
                return Ok(Some(identity));
            }
        }
        Ok(None)
    }

    async fn authenticate_token(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        if token.is_empty() {
            return Ok(None);
        }
        for member in &self.members {
            if let Some(identity) = member.authenticate_token(token).await? {
                return Ok(Some(identity));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdminCredentialsConfig, AuthConfig, PasswordConfig};
    use crate::password::PasswordHasher;
    use crate::store::SqliteStore;

    fn hasher() -> PasswordHasher {
        PasswordHasher::with_params(&PasswordConfig {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
            hash_length: 32,
        })
        .unwrap()
    }

    async fn chain() -> (ChainAuthenticator, Arc<AdminService>) {
        let config = AuthConfig {
            admin: AdminCredentialsConfig {
                username: "root".to_string(),
                password: hasher().hash("config-password").unwrap(),
                api_token: "configured-token".to_string(),
                plaintext_bootstrap: false,
            },
            ..AuthConfig::default()
        };
        let manager = Arc::new(AuthManager::new(&config, hasher()));
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let admins = Arc::new(AdminService::new(store, hasher(), &config));

        let chain = ChainAuthenticator::new()
            .with(Arc::new(StaticAuthenticator::new(manager)))
            .with(Arc::new(AdminAuthenticator::new(Arc::clone(&admins))));
        (chain, admins)
    }

    #[tokio::test]
    async fn test_chain_prefers_static_then_admin() {
        let (chain, admins) = chain().await;
        admins
            .create_admin("alice", Some("alice@test.com"), "alice-password", true)
            .await
            .unwrap();

        let root = chain
            .authenticate("root", "config-password")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(root, Identity::Static { username: "root".to_string() });
        assert!(root.is_superuser());

        let alice = chain
            .authenticate("alice@test.com", "alice-password")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alice.name(), "alice");
        assert!(alice.admin_id().is_some());

        assert!(chain.authenticate("alice", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chain_tokens() {
        let (chain, admins) = chain().await;
        let alice = admins
            .create_admin("alice", None, "alice-password", true)
            .await
            .unwrap();
        let personal = admins.generate_api_token(alice.id).await.unwrap();

        let configured = chain
            .authenticate_token("configured-token")
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(configured, Identity::Token(ref t) if t.name == "config"));

        let resolved = chain.authenticate_token(&personal).await.unwrap().unwrap();
        assert_eq!(resolved.admin_id(), Some(alice.id));

        assert!(chain.authenticate_token("").await.unwrap().is_none());
        assert!(chain.authenticate_token("garbage").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_chain_authenticates_nothing() {
        let chain = ChainAuthenticator::new();
        assert!(chain.authenticate("root", "pw").await.unwrap().is_none());
        assert!(chain.authenticate_token("tok").await.unwrap().is_none());
    }
}
