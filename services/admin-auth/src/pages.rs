//! Typed parameters for each admin page.
//!
//! Renderers receive a [`PageContext`] whose `page` is one [`AdminPage`]
//! variant, serialised with a `"page"` tag. Nothing here carries a password
//! hash or a plaintext token.

use crate::admin::AdminService;
use crate::authn::Identity;
use crate::csrf::FORM_FIELD;
use crate::error::AdminError;
use crate::external::{ExternalAuthService, LDAP_PROVIDER, OIDC_PROVIDER};
use crate::models::{Admin, Invite};
use crate::session::{ApiToken, AuthManager};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A federated provider offered on the login page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderLink {
    /// `"oidc"` or `"ldap"`.
    pub kind: &'static str,
    /// Configured provider id.
    pub id: String,
}

/// An admin as shown in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminSummary {
    /// Row id.
    pub id: i64,
    /// Username.
    pub username: String,
    /// Email.
    pub email: Option<String>,
    /// Primary flag.
    pub is_primary: bool,
    /// `"local"` or a provider id.
    pub source: String,
    /// Whether a second factor is enrolled.
    pub totp_enabled: bool,
    /// Whether a personal API token is set.
    pub has_api_token: bool,
    /// Last login.
    pub last_login_at: Option<DateTime<Utc>>,
    /// Whether the viewer may edit or delete this admin.
    pub can_modify: bool,
}

impl AdminSummary {
    fn from_admin(admin: &Admin, can_modify: bool) -> Self {
        Self {
            id: admin.id,
            username: admin.username.clone(),
            email: admin.email.clone(),
            is_primary: admin.is_primary,
            source: admin.source.clone(),
            totp_enabled: admin.totp_enabled,
            has_api_token: admin.token_hash.is_some(),
            last_login_at: admin.last_login_at,
            can_modify,
        }
    }
}

/// Page-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "page", rename_all = "snake_case")]
pub enum AdminPage {
    /// Login form.
    Login {
        /// Generic failure message from the previous attempt.
        error: Option<String>,
        /// Enabled federated providers.
        providers: Vec<ProviderLink>,
    },
    /// First-run setup form.
    Setup {
        /// Whether setup is still possible.
        setup_required: bool,
        /// Failure message from the previous attempt.
        error: Option<String>,
    },
    /// Landing page after login.
    Dashboard {
        /// Display name of the signed-in identity.
        username: String,
        /// Whether the identity has full control.
        is_superuser: bool,
        /// Number of persistent admins.
        admin_count: i64,
        /// Number of live ephemeral API tokens.
        api_token_count: usize,
    },
    /// Admin management.
    Admins {
        /// Viewing admin, when the identity is a persistent account.
        viewer_id: Option<i64>,
        /// Whether the viewer may issue invites.
        can_invite: bool,
        /// Admins the viewer may see.
        admins: Vec<AdminSummary>,
        /// Outstanding invites, shown to superusers only.
        invites: Vec<Invite>,
    },
    /// Ephemeral API tokens, masked.
    ApiTokens {
        /// Live tokens.
        tokens: Vec<ApiToken>,
        /// A token created by the previous request, shown once.
        created: Option<String>,
    },
    /// Invite acceptance form.
    Invite {
        /// Whether the invite can still be accepted.
        valid: bool,
        /// Pre-filled username.
        suggested_username: Option<String>,
        /// Expiry of a valid invite.
        expires_at: Option<DateTime<Utc>>,
    },
}

/// Everything a page renderer receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageContext {
    /// Token to echo in forms.
    pub csrf_token: String,
    /// Form field name for the token.
    pub csrf_field: &'static str,
    /// Page parameters.
    #[serde(flatten)]
    pub page: AdminPage,
}

impl PageContext {
    /// Wrap page parameters with the request's CSRF token.
    #[must_use]
    pub fn new(csrf_token: impl Into<String>, page: AdminPage) -> Self {
        Self {
            csrf_token: csrf_token.into(),
            csrf_field: FORM_FIELD,
            page,
        }
    }
}

/// Login page parameters.
#[must_use]
pub fn login(external: &ExternalAuthService, error: Option<&str>) -> AdminPage {
    let oidc = external
        .enabled_oidc_providers()
        .into_iter()
        .map(|p| ProviderLink {
            kind: OIDC_PROVIDER,
            id: p.id.clone(),
        });
    let ldap = external
        .enabled_ldap_providers()
        .into_iter()
        .map(|p| ProviderLink {
            kind: LDAP_PROVIDER,
            id: p.id.clone(),
        });
    AdminPage::Login {
        error: error.map(ToString::to_string),
        providers: oidc.chain(ldap).collect(),
    }
}

/// Setup page parameters.
///
/// # Errors
///
/// Returns an error only if the store fails.
pub async fn setup(admins: &AdminService, error: Option<&str>) -> Result<AdminPage, AdminError> {
    Ok(AdminPage::Setup {
        setup_required: !admins.has_any_admin().await?,
        error: error.map(ToString::to_string),
    })
}

/// Dashboard parameters.
///
/// # Errors
///
/// Returns an error only if the store fails.
pub async fn dashboard(
    identity: &Identity,
    admins: &AdminService,
    manager: &AuthManager,
) -> Result<AdminPage, AdminError> {
    Ok(AdminPage::Dashboard {
        username: identity.name().to_string(),
        is_superuser: identity.is_superuser(),
        admin_count: admins.get_total_admin_count().await?,
        api_token_count: manager.list_api_tokens().len(),
    })
}

/// Admin management parameters, filtered to what `identity` may see.
///
/// # Errors
///
/// Returns an error only if the store fails.
pub async fn admin_list(identity: &Identity, admins: &AdminService) -> Result<AdminPage, AdminError> {
    let superuser = identity.is_superuser();
    let viewer_id = identity.admin_id();

    let visible = match viewer_id {
        Some(id) => admins.list_visible_admins(id).await?,
        None if superuser => admins.list_admins().await?,
        None => Vec::new(),
    };
    let summaries = visible
        .iter()
        .map(|admin| {
            let can_modify = superuser || viewer_id == Some(admin.id);
            AdminSummary::from_admin(admin, can_modify)
        })
        .collect();
    let invites = if superuser {
        admins.list_invites().await?
    } else {
        Vec::new()
    };

    Ok(AdminPage::Admins {
        viewer_id,
        can_invite: superuser,
        admins: summaries,
        invites,
    })
}

/// API token page parameters.
#[must_use]
pub fn api_tokens(manager: &AuthManager, created: Option<&ApiToken>) -> AdminPage {
    AdminPage::ApiTokens {
        tokens: manager.list_api_tokens(),
        created: created.map(|t| t.token.clone()),
    }
}

/// Invite page parameters. Unknown, used and expired invites look the same.
///
/// # Errors
///
/// Returns an error only if the store fails.
pub async fn invite(admins: &AdminService, invite_token: &str) -> Result<AdminPage, AdminError> {
    Ok(match admins.lookup_invite(invite_token).await? {
        Some(invite) => AdminPage::Invite {
            valid: true,
            suggested_username: invite.suggested_username,
            expires_at: Some(invite.expires_at),
        },
        None => AdminPage::Invite {
            valid: false,
            suggested_username: None,
            expires_at: None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, ExternalAuthConfig, OidcProviderConfig, PasswordConfig};
    use crate::password::PasswordHasher;
    use crate::store::SqliteStore;
    use std::sync::Arc;

    fn hasher() -> PasswordHasher {
        PasswordHasher::with_params(&PasswordConfig {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
            hash_length: 32,
        })
        .unwrap()
    }

    async fn admins() -> AdminService {
        let store = SqliteStore::in_memory().await.unwrap();
        AdminService::new(Arc::new(store), hasher(), &AuthConfig::default())
    }

    #[test]
    fn test_login_page_lists_enabled_providers() {
        let external = ExternalAuthService::new(ExternalAuthConfig {
            oidc: vec![
                OidcProviderConfig {
                    id: "sso".to_string(),
                    enabled: true,
                    ..OidcProviderConfig::default()
                },
                OidcProviderConfig {
                    id: "old".to_string(),
                    ..OidcProviderConfig::default()
                },
            ],
            ldap: Vec::new(),
        });

        let page = login(&external, Some(crate::error::INVALID_CREDENTIALS));
        let json = serde_json::to_value(PageContext::new("csrf", page)).unwrap();
        assert_eq!(json["page"], "login");
        assert_eq!(json["csrf_token"], "csrf");
        assert_eq!(json["csrf_field"], FORM_FIELD);
        assert_eq!(json["error"], "invalid credentials");
        assert_eq!(json["providers"][0]["id"], "sso");
        assert_eq!(json["providers"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_admin_list_respects_hierarchy() {
        let admins = admins().await;
        let root = admins
            .create_admin("root", None, "password123", true)
            .await
            .unwrap();
        let alpha = admins
            .create_admin("alpha", None, "password123", false)
            .await
            .unwrap();
        admins
            .create_admin("bravo", None, "password123", false)
            .await
            .unwrap();
        admins.create_invite(root.id, None, None).await.unwrap();

        let AdminPage::Admins { admins: seen, invites, can_invite, .. } =
            admin_list(&Identity::Admin(root), &admins).await.unwrap()
        else {
            panic!("expected admins page");
        };
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|a| a.can_modify));
        assert_eq!(invites.len(), 1);
        assert!(can_invite);

        let AdminPage::Admins { admins: seen, invites, can_invite, .. } =
            admin_list(&Identity::Admin(alpha.clone()), &admins).await.unwrap()
        else {
            panic!("expected admins page");
        };
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, alpha.id);
        assert!(seen[0].can_modify);
        assert!(invites.is_empty());
        assert!(!can_invite);
    }

    #[tokio::test]
    async fn test_invite_page_hides_token_state() {
        let admins = admins().await;
        let root = admins
            .create_admin("root", None, "password123", true)
            .await
            .unwrap();
        let issued = admins
            .create_invite(root.id, Some("newbie"), None)
            .await
            .unwrap();

        let valid = invite(&admins, &issued.token).await.unwrap();
        assert!(matches!(
            valid,
            AdminPage::Invite { valid: true, ref suggested_username, .. }
                if suggested_username.as_deref() == Some("newbie")
        ));

        let unknown = invite(&admins, "unknown").await.unwrap();
        let json = serde_json::to_value(&unknown).unwrap();
        assert_eq!(json["page"], "invite");
        assert_eq!(json["valid"], false);
    }

    #[tokio::test]
    async fn test_setup_page_tracks_admin_presence() {
        let admins = admins().await;
        assert!(matches!(
            setup(&admins, None).await.unwrap(),
            AdminPage::Setup { setup_required: true, .. }
        ));
        admins
            .create_admin("root", None, "password123", true)
            .await
            .unwrap();
        assert!(matches!(
            setup(&admins, None).await.unwrap(),
            AdminPage::Setup { setup_required: false, .. }
        ));
    }
}
