//! Configuration for the admin auth core.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::time::Duration;

/// Admin auth configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Statically configured administrator identity.
    #[serde(default)]
    pub admin: AdminCredentialsConfig,
    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,
    /// CSRF configuration.
    #[serde(default)]
    pub csrf: CsrfConfig,
    /// Password hashing configuration.
    #[serde(default)]
    pub password: PasswordConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Federated identity providers.
    #[serde(default)]
    pub external: ExternalAuthConfig,
    /// Invite configuration.
    #[serde(default)]
    pub invites: InviteConfig,
    /// First-run setup configuration.
    #[serde(default)]
    pub setup: SetupConfig,
}

/// The single administrator identity read from configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminCredentialsConfig {
    /// Administrator username.
    #[serde(default)]
    pub username: String,
    /// Argon2id-encoded password, or plaintext when `plaintext_bootstrap` is set.
    #[serde(default)]
    pub password: String,
    /// Static API token granting wildcard permissions.
    #[serde(default)]
    pub api_token: String,
    /// Accept a plaintext `password` for first boot.
    #[serde(default)]
    pub plaintext_bootstrap: bool,
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Session cookie name.
    #[serde(default = "default_session_cookie")]
    pub cookie_name: String,
    /// Session lifetime, e.g. `"24h"`, `"30m"`, `"7d"`.
    #[serde(default = "default_session_duration")]
    pub duration: String,
    /// Mark cookies `Secure`.
    #[serde(default)]
    pub tls_enabled: bool,
    /// Cleanup interval in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// Upper bound on a persistence round trip in milliseconds.
    #[serde(default = "default_persistence_timeout")]
    pub persistence_timeout_ms: u64,
    /// Write sessions and API tokens through to the shared store.
    #[serde(default)]
    pub persist: bool,
}

/// CSRF configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CsrfConfig {
    /// CSRF cookie name.
    #[serde(default = "default_csrf_cookie")]
    pub cookie_name: String,
    /// Header carrying the echoed token.
    #[serde(default = "default_csrf_header")]
    pub header_name: String,
    /// Mark the cookie `Secure`.
    #[serde(default)]
    pub tls_enabled: bool,
}

/// Password hashing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    /// Argon2 memory cost in KiB.
    #[serde(default = "default_memory_cost")]
    pub memory_cost: u32,
    /// Argon2 time cost (iterations).
    #[serde(default = "default_time_cost")]
    pub time_cost: u32,
    /// Argon2 parallelism factor.
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    /// Output hash length in bytes.
    #[serde(default = "default_hash_length")]
    pub hash_length: usize,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Federated provider configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalAuthConfig {
    /// OpenID Connect providers.
    #[serde(default)]
    pub oidc: Vec<OidcProviderConfig>,
    /// LDAP providers.
    #[serde(default)]
    pub ldap: Vec<LdapProviderConfig>,
}

/// One OpenID Connect provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OidcProviderConfig {
    /// Provider identifier.
    pub id: String,
    /// Whether logins through this provider are accepted.
    #[serde(default)]
    pub enabled: bool,
    /// Issuer base URL.
    #[serde(default)]
    pub issuer: String,
    /// OAuth client id.
    #[serde(default)]
    pub client_id: String,
    /// Callback URL registered with the provider.
    #[serde(default)]
    pub redirect_url: String,
    /// Requested scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Groups that grant administrator access.
    #[serde(default)]
    pub admin_groups: Vec<String>,
}

/// One LDAP provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LdapProviderConfig {
    /// Provider identifier.
    pub id: String,
    /// Whether logins through this provider are accepted.
    #[serde(default)]
    pub enabled: bool,
    /// Groups that grant administrator access.
    #[serde(default)]
    pub admin_groups: Vec<String>,
}

/// Invite configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct InviteConfig {
    /// Default invite lifetime in hours.
    #[serde(default = "default_invite_ttl_hours")]
    pub ttl_hours: u32,
}

/// First-run setup configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SetupConfig {
    /// Setup token lifetime in hours.
    #[serde(default = "default_setup_ttl_hours")]
    pub ttl_hours: u32,
}

/// Session lifetime used when the configured value cannot be parsed.
pub const DEFAULT_SESSION_DURATION: Duration = Duration::from_secs(24 * 3600);

// Default value functions
fn default_session_cookie() -> String {
    "admin_session".to_string()
}

fn default_session_duration() -> String {
    "24h".to_string()
}

const fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

const fn default_persistence_timeout() -> u64 {
    2000
}

fn default_csrf_cookie() -> String {
    "admin_csrf".to_string()
}

fn default_csrf_header() -> String {
    "X-CSRF-Token".to_string()
}

const fn default_memory_cost() -> u32 {
    19456 // OWASP recommended minimum
}

const fn default_time_cost() -> u32 {
    2
}

const fn default_parallelism() -> u32 {
    1
}

const fn default_hash_length() -> usize {
    32
}

fn default_database_url() -> String {
    "sqlite://admin-auth.db?mode=rwc".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

const fn default_invite_ttl_hours() -> u32 {
    72
}

const fn default_setup_ttl_hours() -> u32 {
    24
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_session_cookie(),
            duration: default_session_duration(),
            tls_enabled: false,
            cleanup_interval_seconds: default_cleanup_interval(),
            persistence_timeout_ms: default_persistence_timeout(),
            persist: false,
        }
    }
}

impl SessionConfig {
    /// Parsed session lifetime, falling back to 24 hours.
    #[must_use]
    pub fn session_duration(&self) -> Duration {
        parse_duration(&self.duration).unwrap_or_else(|| {
            tracing::warn!(
                value = %self.duration,
                "Unparsable session duration, using default"
            );
            DEFAULT_SESSION_DURATION
        })
    }

    /// Bound on a single persistence round trip.
    #[must_use]
    pub const fn persistence_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence_timeout_ms)
    }

    /// Interval between cleanup sweeps.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_csrf_cookie(),
            header_name: default_csrf_header(),
            tls_enabled: false,
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: default_memory_cost(),
            time_cost: default_time_cost(),
            parallelism: default_parallelism(),
            hash_length: default_hash_length(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for InviteConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_invite_ttl_hours(),
        }
    }
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_setup_ttl_hours(),
        }
    }
}

impl AuthConfig {
    /// Load configuration from files and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Toml::file("config/local.toml"))
            .merge(Env::prefixed("ADMIN_AUTH_").split("__"))
            .extract()
            .map_err(Box::new)
    }
}

/// Parse a duration such as `"90s"`, `"30m"`, `"24h"` or `"7d"`.
///
/// A bare number is read as seconds. Zero and unknown units yield `None`.
#[must_use]
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    let multiplier = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return None,
    };
    let secs = amount.checked_mul(multiplier)?;
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert_eq!(config.session.cookie_name, "admin_session");
        assert_eq!(config.session.session_duration(), DEFAULT_SESSION_DURATION);
        assert_eq!(config.csrf.header_name, "X-CSRF-Token");
        assert_eq!(config.password.memory_cost, 19456);
        assert_eq!(config.invites.ttl_hours, 72);
        assert!(!config.admin.plaintext_bootstrap);
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("24h"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_duration("7d"), Some(Duration::from_secs(604_800)));
        assert_eq!(parse_duration("3600"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_unparsable_duration_falls_back() {
        assert_eq!(parse_duration("forever"), None);
        assert_eq!(parse_duration("0h"), None);
        assert_eq!(parse_duration("12w"), None);

        let session = SessionConfig {
            duration: "soon".to_string(),
            ..SessionConfig::default()
        };
        assert_eq!(session.session_duration(), DEFAULT_SESSION_DURATION);
    }

    #[test]
    fn test_provider_lists_deserialize() {
        let config: AuthConfig = Figment::new()
            .merge(Toml::string(
                r#"
                [[external.oidc]]
                id = "p1"
                enabled = true
                issuer = "https://idp.example.com"
                client_id = "control-plane"
                admin_groups = ["admin-group"]

                [[external.ldap]]
                id = "corp"
                "#,
            ))
            .extract()
            .unwrap();
        assert_eq!(config.external.oidc.len(), 1);
        assert_eq!(config.external.oidc[0].admin_groups, vec!["admin-group"]);
        assert!(!config.external.ldap[0].enabled);
        assert_eq!(config.session.cookie_name, "admin_session");
    }
}
