//! Error taxonomy for the auth core.
//!
//! Routine misses (unknown session, expired token, wrong password) are
//! reported as `Option`/`bool` by the owning component. The types here cover
//! the outcomes a caller has to branch on.

use thiserror::Error;

/// Message shown for any failed credential check.
pub const INVALID_CREDENTIALS: &str = "invalid credentials";

/// Persistence-layer failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("duplicate value: {0}")]
    Duplicate(String),
    /// A stored row could not be mapped back into a record.
    #[error("corrupt row: {0}")]
    Corrupt(String),
    /// The backend did not answer within the allotted time.
    #[error("persistence timed out")]
    Timeout,
    /// Any other database failure.
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Duplicate(db.message().to_string())
            }
            _ => Self::Database(err),
        }
    }
}

/// Password hashing failure.
#[derive(Debug, Error)]
pub enum PasswordError {
    /// Empty passwords are never hashed.
    #[error("password cannot be empty")]
    EmptyPassword,
    /// The configured cost parameters are rejected by Argon2.
    #[error("invalid argon2 parameters: {0}")]
    InvalidParams(String),
    /// Hashing itself failed.
    #[error("failed to hash password: {0}")]
    Hashing(String),
}

/// Session or API-token store failure in [`crate::AuthManager`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// The backing store failed or timed out.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Admin lifecycle failure.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Username or email already taken.
    #[error("an administrator with that username or email already exists")]
    DuplicateIdentity,
    /// The primary administrator cannot be deleted.
    #[error("the primary administrator cannot be deleted")]
    PrimaryAdminProtected,
    /// A primary administrator already exists.
    #[error("a primary administrator already exists")]
    PrimaryAlreadyExists,
    /// Invite or setup token is unknown, used, or expired.
    #[error("invalid or expired token")]
    InvalidOrExpiredToken,
    /// First-run setup has already produced an administrator.
    #[error("setup has already been completed")]
    SetupAlreadyCompleted,
    /// Referenced administrator does not exist.
    #[error("administrator not found")]
    NotFound,
    /// Input failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Password could not be hashed.
    #[error(transparent)]
    Password(#[from] PasswordError),
    /// Persistence failure.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AdminError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(detail) if detail.contains("is_primary") => {
                Self::PrimaryAlreadyExists
            }
            StoreError::Duplicate(_) => Self::DuplicateIdentity,
            other => Self::Store(other),
        }
    }
}

/// Failure while resolving an identity through an [`crate::Authenticator`].
#[derive(Debug, Error)]
pub enum AuthError {
    /// Session or token cache failure.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Admin store failure.
    #[error(transparent)]
    Admin(#[from] AdminError),
}

/// Federated login configuration failure.
#[derive(Debug, Error)]
pub enum ExternalAuthError {
    /// No provider with that id is configured.
    #[error("unknown identity provider: {0}")]
    UnknownProvider(String),
    /// The provider exists but is disabled.
    #[error("identity provider is disabled: {0}")]
    ProviderDisabled(String),
    /// The provider's issuer is not a valid URL.
    #[error("invalid issuer for provider {provider}: {reason}")]
    InvalidIssuer {
        /// Provider id.
        provider: String,
        /// Parse failure.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_conflict_maps_to_primary_error() {
        let err = AdminError::from(StoreError::Duplicate(
            "UNIQUE constraint failed: admins.is_primary".to_string(),
        ));
        assert!(matches!(err, AdminError::PrimaryAlreadyExists));

        let err = AdminError::from(StoreError::Duplicate(
            "UNIQUE constraint failed: admins.username".to_string(),
        ));
        assert!(matches!(err, AdminError::DuplicateIdentity));
    }

    #[test]
    fn test_token_errors_are_generic() {
        assert_eq!(
            AdminError::InvalidOrExpiredToken.to_string(),
            "invalid or expired token"
        );
    }
}
