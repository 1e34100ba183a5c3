//! Federated login: provider lookup, admin-group mapping and OIDC URLs.

use crate::admin::AdminService;
use crate::config::{ExternalAuthConfig, LdapProviderConfig, OidcProviderConfig};
use crate::error::{AdminError, ExternalAuthError};
use crate::models::Admin;
use crate::token;
use std::collections::HashSet;
use url::Url;

/// Provider type name for OpenID Connect.
pub const OIDC_PROVIDER: &str = "oidc";

/// Provider type name for LDAP.
pub const LDAP_PROVIDER: &str = "ldap";

const STATE_TOKEN_BYTES: usize = 16;
const DEFAULT_SCOPE: &str = "openid";

/// Identity asserted by a federated provider after a successful login.
#[derive(Debug, Clone, Default)]
pub struct FederatedLogin {
    /// `"oidc"` or `"ldap"`.
    pub provider_type: String,
    /// Configured provider id.
    pub provider_id: String,
    /// Stable subject identifier at the provider.
    pub subject: String,
    /// Preferred username.
    pub username: String,
    /// Email claim, if any.
    pub email: Option<String>,
    /// Group claims.
    pub groups: Vec<String>,
}

/// Maps federated identities onto administrator access.
#[derive(Debug, Clone)]
pub struct ExternalAuthService {
    config: ExternalAuthConfig,
}

impl ExternalAuthService {
    /// Create a service over the configured providers.
    #[must_use]
    pub const fn new(config: ExternalAuthConfig) -> Self {
        Self { config }
    }

    /// Whether any of `user_groups` is an admin group of the given provider.
    ///
    /// Unknown or disabled providers never grant access.
    #[must_use]
    pub fn check_admin_group_membership(
        &self,
        provider_type: &str,
        provider_id: &str,
        user_groups: &[String],
    ) -> bool {
        let Some(admin_groups) = self.admin_groups(provider_type, provider_id) else {
            tracing::debug!(
                provider_type,
                provider_id,
                "No enabled provider for group check"
            );
            return false;
        };
        let allowed: HashSet<&str> = admin_groups.iter().map(String::as_str).collect();
        user_groups.iter().any(|group| allowed.contains(group.as_str()))
    }

    /// Enabled OIDC providers, in configured order.
    #[must_use]
    pub fn enabled_oidc_providers(&self) -> Vec<&OidcProviderConfig> {
        self.config.oidc.iter().filter(|p| p.enabled).collect()
    }

    /// Enabled LDAP providers, in configured order.
    #[must_use]
    pub fn enabled_ldap_providers(&self) -> Vec<&LdapProviderConfig> {
        self.config.ldap.iter().filter(|p| p.enabled).collect()
    }

    /// Fresh anti-CSRF state for the authorization round trip (32 hex chars).
    #[must_use]
    pub fn generate_state_token() -> String {
        token::random_token(STATE_TOKEN_BYTES)
    }

    /// Authorization endpoint URL for an OIDC provider.
    ///
    /// # Errors
    ///
    /// `UnknownProvider`, `ProviderDisabled`, or `InvalidIssuer` when the
    /// configured issuer is not a URL.
    pub fn oidc_auth_url(&self, provider_id: &str, state: &str) -> Result<String, ExternalAuthError> {
        let provider = self
            .config
            .oidc
            .iter()
            .find(|p| p.id == provider_id)
            .ok_or_else(|| ExternalAuthError::UnknownProvider(provider_id.to_string()))?;
        if !provider.enabled {
            return Err(ExternalAuthError::ProviderDisabled(provider_id.to_string()));
        }

        let scope = if provider.scopes.is_empty() {
            DEFAULT_SCOPE.to_string()
        } else {
            provider.scopes.join(" ")
        };
        let endpoint = format!("{}/authorize", provider.issuer.trim_end_matches('/'));
        let url = Url::parse_with_params(
            &endpoint,
            &[
                ("client_id", provider.client_id.as_str()),
                ("redirect_uri", provider.redirect_url.as_str()),
                ("scope", scope.as_str()),
                ("state", state),
                ("response_type", "code"),
            ],
        )
        .map_err(|e| ExternalAuthError::InvalidIssuer {
            provider: provider_id.to_string(),
            reason: e.to_string(),
        })?;
        Ok(url.into())
    }

    /// Turn a federated login into an admin, if the user holds an admin group.
    ///
    /// # Errors
    ///
    /// Propagates [`AdminService::find_or_create_external_admin`] failures.
    pub async fn resolve_login(
        &self,
        admins: &AdminService,
        login: &FederatedLogin,
    ) -> Result<Option<Admin>, AdminError> {
        if !self.check_admin_group_membership(&login.provider_type, &login.provider_id, &login.groups)
        {
            tracing::info!(
                provider = %login.provider_id,
                subject = %login.subject,
                "Federated login lacks an admin group"
            );
            return Ok(None);
        }

        let admin = admins
            .find_or_create_external_admin(
                &login.provider_id,
                &login.subject,
                &login.username,
                login.email.as_deref(),
            )
            .await?;
        tracing::info!(
            provider = %login.provider_id,
            admin_id = admin.id,
            "Federated admin login"
        );
        Ok(Some(admin))
    }

    fn admin_groups(&self, provider_type: &str, provider_id: &str) -> Option<&[String]> {
        if provider_type.eq_ignore_ascii_case(OIDC_PROVIDER) {
            self.config
                .oidc
                .iter()
                .find(|p| p.id == provider_id && p.enabled)
                .map(|p| p.admin_groups.as_slice())
        } else if provider_type.eq_ignore_ascii_case(LDAP_PROVIDER) {
            self.config
                .ldap
                .iter()
                .find(|p| p.id == provider_id && p.enabled)
                .map(|p| p.admin_groups.as_slice())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn service() -> ExternalAuthService {
        ExternalAuthService::new(ExternalAuthConfig {
            oidc: vec![
                OidcProviderConfig {
                    id: "p1".to_string(),
                    enabled: true,
                    issuer: "https://idp.example.com/".to_string(),
                    client_id: "control-plane".to_string(),
                    redirect_url: "https://admin.example.com/auth/callback".to_string(),
                    scopes: groups(&["openid", "email", "groups"]),
                    admin_groups: groups(&["admin-group"]),
                },
                OidcProviderConfig {
                    id: "off".to_string(),
                    enabled: false,
                    issuer: "https://off.example.com".to_string(),
                    admin_groups: groups(&["admin-group"]),
                    ..OidcProviderConfig::default()
                },
            ],
            ldap: vec![LdapProviderConfig {
                id: "corp".to_string(),
                enabled: true,
                admin_groups: groups(&["cn=admins,dc=corp"]),
            }],
        })
    }

    #[test]
    fn test_group_membership() {
        let service = service();
        assert!(service.check_admin_group_membership("oidc", "p1", &groups(&["users", "admin-group"])));
        assert!(!service.check_admin_group_membership("oidc", "p1", &groups(&["users", "developers"])));
        assert!(!service.check_admin_group_membership("oidc", "unknown", &groups(&["admin-group"])));
        assert!(!service.check_admin_group_membership("oidc", "off", &groups(&["admin-group"])));
        assert!(!service.check_admin_group_membership("saml", "p1", &groups(&["admin-group"])));
        assert!(service.check_admin_group_membership("LDAP", "corp", &groups(&["cn=admins,dc=corp"])));
        assert!(!service.check_admin_group_membership("oidc", "p1", &[]));
    }

    #[test]
    fn test_enabled_providers() {
        let service = service();
        let oidc: Vec<&str> = service
            .enabled_oidc_providers()
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(oidc, vec!["p1"]);
        assert_eq!(service.enabled_ldap_providers().len(), 1);
    }

    #[test]
    fn test_state_token_shape() {
        let state = ExternalAuthService::generate_state_token();
        assert_eq!(state.len(), 32);
        assert!(state.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(state, ExternalAuthService::generate_state_token());
    }

    #[test]
    fn test_oidc_auth_url() {
        let service = service();
        let url = Url::parse(&service.oidc_auth_url("p1", "abc123").unwrap()).unwrap();
        assert_eq!(url.host_str(), Some("idp.example.com"));
        assert_eq!(url.path(), "/authorize");

        let query: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();
        assert_eq!(query["client_id"], "control-plane");
        assert_eq!(query["redirect_uri"], "https://admin.example.com/auth/callback");
        assert_eq!(query["scope"], "openid email groups");
        assert_eq!(query["state"], "abc123");
        assert_eq!(query["response_type"], "code");
    }

    #[test]
    fn test_oidc_auth_url_errors() {
        let service = service();
        assert!(matches!(
            service.oidc_auth_url("nope", "s"),
            Err(ExternalAuthError::UnknownProvider(id)) if id == "nope"
        ));
        assert!(matches!(
            service.oidc_auth_url("off", "s"),
            Err(ExternalAuthError::ProviderDisabled(id)) if id == "off"
        ));

        let broken = ExternalAuthService::new(ExternalAuthConfig {
            oidc: vec![OidcProviderConfig {
                id: "bad".to_string(),
                enabled: true,
                issuer: "not a url".to_string(),
                ..OidcProviderConfig::default()
            }],
            ldap: Vec::new(),
        });
        assert!(matches!(
            broken.oidc_auth_url("bad", "s"),
            Err(ExternalAuthError::InvalidIssuer { .. })
        ));
    }
}
