//! Authentication and authorization core for an administrative control plane.
//!
//! Provides the configured-admin session and API-token cache
//! ([`AuthManager`]), persistent multi-admin accounts with invites and
//! first-run setup ([`AdminService`]), federated group mapping
//! ([`ExternalAuthService`]) and double-submit CSRF protection
//! ([`CsrfGuard`]).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod authn;
pub mod config;
pub mod csrf;
pub mod error;
pub mod external;
pub mod models;
pub mod pages;
pub mod password;
pub mod request;
pub mod session;
pub mod store;
pub mod token;

pub use admin::{AdminService, IssuedInvite};
pub use authn::{AdminAuthenticator, Authenticator, ChainAuthenticator, Identity, StaticAuthenticator};
pub use config::AuthConfig;
pub use csrf::CsrfGuard;
pub use error::{AdminError, AuthError, ExternalAuthError, PasswordError, SessionError, StoreError};
pub use external::{ExternalAuthService, FederatedLogin};
pub use models::{Admin, Invite};
pub use password::PasswordHasher;
pub use session::{ApiToken, AuthManager, CleanupWorker, Principal, Session};
pub use store::{AdminStore, SessionStore, SqliteStore};
