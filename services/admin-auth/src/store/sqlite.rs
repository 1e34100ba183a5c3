//! SQLite implementation of the persistence seams.
//!
//! Timestamps are stored as Unix milliseconds so expiry checks can run inside
//! conditional `UPDATE`s.

use super::{AdminStore, SessionStore};
use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::models::{
    Admin, Invite, NewAdmin, NewInvite, PersistedApiToken, PersistedSession, SetupToken,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row, Sqlite};

macro_rules! select_admins {
    ($tail:literal) => {
        concat!(
            "SELECT id, username, email, password_hash, is_primary, source, external_id, ",
            "totp_enabled, token_hash, token_prefix, created_at, updated_at, last_login_at ",
            "FROM admins ",
            $tail
        )
    };
}

macro_rules! select_invites {
    ($tail:literal) => {
        concat!(
            "SELECT id, token_hash, suggested_username, created_by, created_at, expires_at, ",
            "used_at, used_by FROM admin_invites ",
            $tail
        )
    };
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS admins (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE COLLATE NOCASE,
        email TEXT UNIQUE COLLATE NOCASE,
        password_hash TEXT NOT NULL,
        is_primary INTEGER NOT NULL DEFAULT 0,
        source TEXT NOT NULL DEFAULT 'local',
        external_id TEXT,
        totp_enabled INTEGER NOT NULL DEFAULT 0,
        token_hash TEXT UNIQUE,
        token_prefix TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        last_login_at INTEGER
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_admins_single_primary
        ON admins (is_primary) WHERE is_primary = 1",
    "CREATE INDEX IF NOT EXISTS idx_admins_token_prefix ON admins (token_prefix)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_admins_external
        ON admins (source, external_id) WHERE external_id IS NOT NULL",
    "CREATE TABLE IF NOT EXISTS admin_invites (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        token_hash TEXT NOT NULL UNIQUE,
        suggested_username TEXT,
        created_by INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        used_at INTEGER,
        used_by INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS setup_tokens (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        token_hash TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        used_at INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS admin_sessions (
        token_hash TEXT PRIMARY KEY,
        admin_username TEXT NOT NULL,
        source_ip TEXT NOT NULL,
        user_agent TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_admin_sessions_username ON admin_sessions (admin_username)",
    "CREATE TABLE IF NOT EXISTS admin_api_tokens (
        token_hash TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        permissions TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER,
        last_used_at INTEGER
    )",
];

/// sqlx-backed store for admins, invites, setup tokens and clustered sessions.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect using the database configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be opened.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    /// Open a private in-memory database with the schema applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn in_memory() -> Result<Self, StoreError> {
        // One long-lived connection, since every connection to `:memory:` is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create the schema if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!(statements = SCHEMA.len(), "Applied admin auth schema");
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(value: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {value}")))
}

fn optional_millis(value: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(from_millis).transpose()
}

fn admin_from_row(row: &SqliteRow) -> Result<Admin, StoreError> {
    Ok(Admin {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        is_primary: row.try_get("is_primary")?,
        source: row.try_get("source")?,
        external_id: row.try_get("external_id")?,
        totp_enabled: row.try_get("totp_enabled")?,
        token_hash: row.try_get("token_hash")?,
        token_prefix: row.try_get("token_prefix")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
        last_login_at: optional_millis(row.try_get("last_login_at")?)?,
    })
}

fn invite_from_row(row: &SqliteRow) -> Result<Invite, StoreError> {
    Ok(Invite {
        id: row.try_get("id")?,
        token_hash: row.try_get("token_hash")?,
        suggested_username: row.try_get("suggested_username")?,
        created_by: row.try_get("created_by")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        expires_at: from_millis(row.try_get("expires_at")?)?,
        used_at: optional_millis(row.try_get("used_at")?)?,
        used_by: row.try_get("used_by")?,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<PersistedSession, StoreError> {
    Ok(PersistedSession {
        token_hash: row.try_get("token_hash")?,
        admin_username: row.try_get("admin_username")?,
        source_ip: row.try_get("source_ip")?,
        user_agent: row.try_get("user_agent")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        expires_at: from_millis(row.try_get("expires_at")?)?,
    })
}

fn api_token_from_row(row: &SqliteRow) -> Result<PersistedApiToken, StoreError> {
    let permissions: String = row.try_get("permissions")?;
    Ok(PersistedApiToken {
        token_hash: row.try_get("token_hash")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        permissions: serde_json::from_str(&permissions)
            .map_err(|e| StoreError::Corrupt(format!("permissions: {e}")))?,
        created_at: from_millis(row.try_get("created_at")?)?,
        expires_at: optional_millis(row.try_get("expires_at")?)?,
        last_used_at: optional_millis(row.try_get("last_used_at")?)?,
    })
}

async fn insert_admin_row<'e, E>(
    executor: E,
    admin: &NewAdmin,
    now: DateTime<Utc>,
) -> Result<i64, StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO admins (username, email, password_hash, is_primary, source, external_id, \
         created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(admin.username.as_str())
    .bind(admin.email.as_deref())
    .bind(admin.password_hash.as_str())
    .bind(admin.is_primary)
    .bind(admin.source.as_str())
    .bind(admin.external_id.as_deref())
    .bind(millis(now))
    .bind(millis(now))
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn put_session(&self, session: &PersistedSession) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO admin_sessions \
             (token_hash, admin_username, source_ip, user_agent, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(session.token_hash.as_str())
        .bind(session.admin_username.as_str())
        .bind(session.source_ip.as_str())
        .bind(session.user_agent.as_str())
        .bind(millis(session.created_at))
        .bind(millis(session.expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, token_hash: &str) -> Result<Option<PersistedSession>, StoreError> {
        sqlx::query("SELECT * FROM admin_sessions WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(session_from_row)
            .transpose()
    }

    async fn delete_session(&self, token_hash: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM admin_sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_sessions_for(&self, admin_username: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM admin_sessions WHERE admin_username = ?")
            .bind(admin_username)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn put_api_token(&self, token: &PersistedApiToken) -> Result<(), StoreError> {
        let permissions = serde_json::to_string(&token.permissions)
            .map_err(|e| StoreError::Corrupt(format!("permissions: {e}")))?;
        sqlx::query(
            "INSERT OR REPLACE INTO admin_api_tokens \
             (token_hash, name, description, permissions, created_at, expires_at, last_used_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(token.token_hash.as_str())
        .bind(token.name.as_str())
        .bind(token.description.as_str())
        .bind(permissions)
        .bind(millis(token.created_at))
        .bind(token.expires_at.map(millis))
        .bind(token.last_used_at.map(millis))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_api_token(&self, token_hash: &str) -> Result<Option<PersistedApiToken>, StoreError> {
        sqlx::query("SELECT * FROM admin_api_tokens WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(api_token_from_row)
            .transpose()
    }

    async fn delete_api_token(&self, token_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM admin_api_tokens WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let sessions = sqlx::query("DELETE FROM admin_sessions WHERE expires_at < ?")
            .bind(millis(now))
            .execute(&self.pool)
            .await?;
        let tokens = sqlx::query(
            "DELETE FROM admin_api_tokens WHERE expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(millis(now))
        .execute(&self.pool)
        .await?;
        Ok(sessions.rows_affected() + tokens.rows_affected())
    }
}

#[async_trait]
impl AdminStore for SqliteStore {
    async fn insert_admin(&self, admin: &NewAdmin) -> Result<Admin, StoreError> {
        let id = insert_admin_row(&self.pool, admin, Utc::now()).await?;
        self.admin_by_id(id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("inserted admin {id} not found")))
    }

    async fn admin_by_id(&self, id: i64) -> Result<Option<Admin>, StoreError> {
        sqlx::query(select_admins!("WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(admin_from_row)
            .transpose()
    }

    async fn admin_by_username(&self, username: &str) -> Result<Option<Admin>, StoreError> {
        sqlx::query(select_admins!("WHERE username = ?"))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(admin_from_row)
            .transpose()
    }

    async fn admin_by_email(&self, email: &str) -> Result<Option<Admin>, StoreError> {
        sqlx::query(select_admins!("WHERE email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(admin_from_row)
            .transpose()
    }

    async fn admin_by_external(
        &self,
        source: &str,
        external_id: &str,
    ) -> Result<Option<Admin>, StoreError> {
        sqlx::query(select_admins!("WHERE source = ? AND external_id = ?"))
            .bind(source)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(admin_from_row)
            .transpose()
    }

    async fn primary_admin(&self) -> Result<Option<Admin>, StoreError> {
        sqlx::query(select_admins!("WHERE is_primary = 1"))
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(admin_from_row)
            .transpose()
    }

    async fn list_admins(&self) -> Result<Vec<Admin>, StoreError> {
        sqlx::query(select_admins!("ORDER BY id"))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(admin_from_row)
            .collect()
    }

    async fn count_admins(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) FROM admins")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn delete_admin(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM admins WHERE id = ? AND is_primary = 0")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE admins SET password_hash = ?, updated_at = ? WHERE id = ?")
                .bind(password_hash)
                .bind(millis(Utc::now()))
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_login(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE admins SET last_login_at = ? WHERE id = ?")
            .bind(millis(at))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_api_token(
        &self,
        id: i64,
        token: Option<(&str, &str)>,
    ) -> Result<bool, StoreError> {
        let (hash, prefix) = token.unzip();
        let result = sqlx::query(
            "UPDATE admins SET token_hash = ?, token_prefix = ?, updated_at = ? WHERE id = ?",
        )
        .bind(hash)
        .bind(prefix)
        .bind(millis(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn admins_by_token_prefix(&self, prefix: &str) -> Result<Vec<Admin>, StoreError> {
        sqlx::query(select_admins!("WHERE token_prefix = ?"))
            .bind(prefix)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(admin_from_row)
            .collect()
    }

    async fn insert_invite(&self, invite: &NewInvite) -> Result<Invite, StoreError> {
        let result = sqlx::query(
            "INSERT INTO admin_invites \
             (token_hash, suggested_username, created_by, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(invite.token_hash.as_str())
        .bind(invite.suggested_username.as_deref())
        .bind(invite.created_by)
        .bind(millis(invite.created_at))
        .bind(millis(invite.expires_at))
        .execute(&self.pool)
        .await?;
        let id = result.last_insert_rowid();
        sqlx::query(select_invites!("WHERE id = ?"))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)
            .and_then(|row| invite_from_row(&row))
    }

    async fn invite_by_hash(&self, token_hash: &str) -> Result<Option<Invite>, StoreError> {
        sqlx::query(select_invites!("WHERE token_hash = ?"))
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(invite_from_row)
            .transpose()
    }

    async fn list_invites(&self) -> Result<Vec<Invite>, StoreError> {
        sqlx::query(select_invites!("ORDER BY id DESC"))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(invite_from_row)
            .collect()
    }

    async fn delete_invite(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM admin_invites WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn accept_invite(
        &self,
        token_hash: &str,
        admin: &NewAdmin,
        now: DateTime<Utc>,
    ) -> Result<Option<Admin>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE admin_invites SET used_at = ? \
             WHERE token_hash = ? AND used_at IS NULL AND expires_at >= ?",
        )
        .bind(millis(now))
        .bind(token_hash)
        .bind(millis(now))
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(None);
        }

        // An insert failure drops `tx`, which rolls back the claim.
        let admin_id = insert_admin_row(&mut *tx, admin, now).await?;

        sqlx::query("UPDATE admin_invites SET used_by = ? WHERE token_hash = ?")
            .bind(admin_id)
            .bind(token_hash)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(select_admins!("WHERE id = ?"))
            .bind(admin_id)
            .fetch_one(&mut *tx)
            .await?;
        let created = admin_from_row(&row)?;

        tx.commit().await?;
        Ok(Some(created))
    }

    async fn put_setup_token(&self, token: &SetupToken) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO setup_tokens (id, token_hash, created_at, expires_at, used_at) \
             VALUES (1, ?, ?, ?, ?)",
        )
        .bind(token.token_hash.as_str())
        .bind(millis(token.created_at))
        .bind(millis(token.expires_at))
        .bind(token.used_at.map(millis))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn setup_token(&self) -> Result<Option<SetupToken>, StoreError> {
        let Some(row) = sqlx::query("SELECT * FROM setup_tokens WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(SetupToken {
            token_hash: row.try_get("token_hash")?,
            created_at: from_millis(row.try_get("created_at")?)?,
            expires_at: from_millis(row.try_get("expires_at")?)?,
            used_at: optional_millis(row.try_get("used_at")?)?,
        }))
    }

    async fn consume_setup_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE setup_tokens SET used_at = ? \
             WHERE id = 1 AND token_hash = ? AND used_at IS NULL AND expires_at >= ?",
        )
        .bind(millis(now))
        .bind(token_hash)
        .bind(millis(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_admin(username: &str, email: Option<&str>, is_primary: bool) -> NewAdmin {
        NewAdmin {
            username: username.to_string(),
            email: email.map(str::to_string),
            password_hash: "$argon2id$v=19$m=8,t=1,p=1$c2FsdHNhbHQ$aGFzaA".to_string(),
            is_primary,
            source: "local".to_string(),
            external_id: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup_admin() {
        let store = SqliteStore::in_memory().await.unwrap();
        let admin = store
            .insert_admin(&new_admin("alice", Some("alice@test.com"), true))
            .await
            .unwrap();

        assert!(admin.is_primary);
        assert_eq!(store.admin_by_username("alice").await.unwrap(), Some(admin.clone()));
        assert_eq!(store.admin_by_email("alice@test.com").await.unwrap(), Some(admin.clone()));
        assert_eq!(store.primary_admin().await.unwrap(), Some(admin));
        assert_eq!(store.count_admins().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unique_constraints_surface_as_duplicates() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_admin(&new_admin("alice", Some("a@test.com"), true)).await.unwrap();

        let same_name = store.insert_admin(&new_admin("ALICE", None, false)).await;
        assert!(matches!(same_name, Err(StoreError::Duplicate(_))));

        let second_primary = store.insert_admin(&new_admin("bob", None, true)).await;
        match second_primary {
            Err(StoreError::Duplicate(detail)) => assert!(detail.contains("is_primary")),
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_primary_row_is_never_deleted() {
        let store = SqliteStore::in_memory().await.unwrap();
        let primary = store.insert_admin(&new_admin("root", None, true)).await.unwrap();
        let other = store.insert_admin(&new_admin("ops", None, false)).await.unwrap();

        assert!(!store.delete_admin(primary.id).await.unwrap());
        assert!(store.delete_admin(other.id).await.unwrap());
        assert_eq!(store.count_admins().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invite_accept_is_single_use() {
        let store = SqliteStore::in_memory().await.unwrap();
        let root = store.insert_admin(&new_admin("root", None, true)).await.unwrap();
        let now = Utc::now();
        store
            .insert_invite(&NewInvite {
                token_hash: "h1".to_string(),
                suggested_username: None,
                created_by: root.id,
                created_at: now,
                expires_at: now + Duration::hours(1),
            })
            .await
            .unwrap();

        let first = store
            .accept_invite("h1", &new_admin("ops", None, false), now)
            .await
            .unwrap()
            .unwrap();
        let invite = store.invite_by_hash("h1").await.unwrap().unwrap();
        assert_eq!(invite.used_by, Some(first.id));
        assert!(invite.used_at.is_some());

        let second = store
            .accept_invite("h1", &new_admin("ops2", None, false), now)
            .await
            .unwrap();
        assert!(second.is_none());
        assert!(store.admin_by_username("ops2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_accept_rolls_back_claim() {
        let store = SqliteStore::in_memory().await.unwrap();
        let root = store.insert_admin(&new_admin("root", None, true)).await.unwrap();
        let now = Utc::now();
        store
            .insert_invite(&NewInvite {
                token_hash: "h2".to_string(),
                suggested_username: None,
                created_by: root.id,
                created_at: now,
                expires_at: now + Duration::hours(1),
            })
            .await
            .unwrap();

        let clash = store.accept_invite("h2", &new_admin("root", None, false), now).await;
        assert!(matches!(clash, Err(StoreError::Duplicate(_))));

        let invite = store.invite_by_hash("h2").await.unwrap().unwrap();
        assert!(invite.used_at.is_none());
    }

    #[tokio::test]
    async fn test_setup_token_consumed_once() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        store
            .put_setup_token(&SetupToken {
                token_hash: "s1".to_string(),
                created_at: now,
                expires_at: now + Duration::hours(1),
                used_at: None,
            })
            .await
            .unwrap();

        assert!(!store.consume_setup_token("other", now).await.unwrap());
        assert!(store.consume_setup_token("s1", now).await.unwrap());
        assert!(!store.consume_setup_token("s1", now).await.unwrap());
        assert!(store.setup_token().await.unwrap().unwrap().used_at.is_some());
    }

    #[tokio::test]
    async fn test_session_rows_and_expiry() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        let live = PersistedSession {
            token_hash: "live".to_string(),
            admin_username: "admin".to_string(),
            source_ip: "127.0.0.1".to_string(),
            user_agent: "test".to_string(),
            created_at: now,
            expires_at: now + Duration::hours(1),
        };
        let stale = PersistedSession {
            token_hash: "stale".to_string(),
            expires_at: now - Duration::seconds(1),
            ..live.clone()
        };
        store.put_session(&live).await.unwrap();
        store.put_session(&stale).await.unwrap();
        store
            .put_api_token(&PersistedApiToken {
                token_hash: "forever".to_string(),
                name: "ci".to_string(),
                description: String::new(),
                permissions: vec!["read".to_string(), "write".to_string()],
                created_at: now,
                expires_at: None,
                last_used_at: None,
            })
            .await
            .unwrap();

        assert_eq!(store.delete_expired(now).await.unwrap(), 1);
        assert!(store.get_session("stale").await.unwrap().is_none());
        assert_eq!(
            store.get_session("live").await.unwrap().map(|s| s.admin_username),
            Some("admin".to_string())
        );
        let token = store.get_api_token("forever").await.unwrap().unwrap();
        assert_eq!(token.permissions, vec!["read", "write"]);

        assert_eq!(store.delete_sessions_for("admin").await.unwrap(), 1);
        assert!(store.delete_api_token("forever").await.unwrap());
        assert!(!store.delete_api_token("forever").await.unwrap());
    }
}
