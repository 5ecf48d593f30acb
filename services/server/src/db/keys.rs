//! Access key storage.

use chrono::{DateTime, Utc};
use dockward_id::KeyId;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::SqlitePool;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use super::DbError;
use crate::auth::tokens;

/// An access key as exposed to the admin surface. Carries no secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessKey {
    pub id: KeyId,
    pub label: String,
    /// First characters of the token, enough to tell keys apart in a list.
    pub token_hint: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A freshly created key together with its plaintext token.
///
/// This is the only time the token exists outside the client.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedKey {
    #[serde(flatten)]
    pub key: AccessKey,
    pub token: String,
}

/// A key row plus the stored hash, for credential checks.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub key: AccessKey,
    pub token_hash: String,
}

/// Repository over the `access_keys` table.
#[derive(Clone)]
pub struct KeyStore {
    pool: SqlitePool,
}

const KEY_COLUMNS: &str =
    "id, token_hash, token_hint, label, active, created_at, revoked_at, last_used_at";

impl KeyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Generate and store a new active key.
    pub async fn create(&self, label: &str) -> Result<IssuedKey, DbError> {
        let token = tokens::generate_key_token();
        let token_hash = tokens::hash_token(&token);
        let key = AccessKey {
            id: KeyId::new(),
            label: label.trim().to_string(),
            token_hint: tokens::token_hint(&token),
            active: true,
            created_at: Utc::now(),
            revoked_at: None,
            last_used_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO access_keys (id, token_hash, token_hint, label, active, created_at)
            VALUES (?1, ?2, ?3, ?4, 1, ?5)
            "#,
        )
        .bind(key.id.to_string())
        .bind(&token_hash)
        .bind(&key.token_hint)
        .bind(&key.label)
        .bind(key.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DbError::from_write(e, "access key"))?;

        info!(key_id = %key.id, "Access key created");

        Ok(IssuedKey { key, token })
    }

    /// All keys, oldest first, including revoked ones.
    pub async fn list(&self) -> Result<Vec<AccessKey>, DbError> {
        let rows = sqlx::query_as::<_, KeyRecord>(&format!(
            "SELECT {KEY_COLUMNS} FROM access_keys ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(rows.into_iter().map(|r| r.key).collect())
    }

    pub async fn get(&self, id: &KeyId) -> Result<Option<AccessKey>, DbError> {
        let row = sqlx::query_as::<_, KeyRecord>(&format!(
            "SELECT {KEY_COLUMNS} FROM access_keys WHERE id = ?1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(row.map(|r| r.key))
    }

    /// Look up a key by the hash of its token. Returns revoked keys too; the
    /// caller decides what inactive means.
    pub async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<KeyRecord>, DbError> {
        sqlx::query_as::<_, KeyRecord>(&format!(
            "SELECT {KEY_COLUMNS} FROM access_keys WHERE token_hash = ?1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)
    }

    /// Resolve a plaintext token to its key, if that key is still active.
    ///
    /// The stored hash is compared to the computed one in constant time so the
    /// index lookup is the only data-dependent step.
    pub async fn find_active_by_token(&self, token: &str) -> Result<Option<AccessKey>, DbError> {
        let token_hash = tokens::hash_token(token);
        let Some(record) = self.find_by_token_hash(&token_hash).await? else {
            return Ok(None);
        };

        let matches: bool = record
            .token_hash
            .as_bytes()
            .ct_eq(token_hash.as_bytes())
            .into();

        Ok((matches && record.key.active).then_some(record.key))
    }

    /// Deactivate a key. Returns false if it was unknown or already revoked.
    pub async fn revoke(&self, id: &KeyId) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE access_keys
            SET active = 0, revoked_at = ?1
            WHERE id = ?2 AND active = 1
            "#,
        )
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        let revoked = result.rows_affected() > 0;
        if revoked {
            info!(key_id = %id, "Access key revoked");
        }
        Ok(revoked)
    }

    /// Stamp `last_used_at`.
    pub async fn touch_last_used(&self, id: &KeyId) -> Result<(), DbError> {
        sqlx::query("UPDATE access_keys SET last_used_at = ?1 WHERE id = ?2")
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        debug!(key_id = %id, "Recorded key use");
        Ok(())
    }
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for KeyRecord {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let id: String = row.try_get("id")?;
        let id = id.parse::<KeyId>().map_err(|e| sqlx::Error::ColumnDecode {
            index: "id".to_string(),
            source: Box::new(e),
        })?;

        Ok(Self {
            key: AccessKey {
                id,
                label: row.try_get("label")?,
                token_hint: row.try_get("token_hint")?,
                active: row.try_get("active")?,
                created_at: row.try_get("created_at")?,
                revoked_at: row.try_get("revoked_at")?,
                last_used_at: row.try_get("last_used_at")?,
            },
            token_hash: row.try_get("token_hash")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_database;

    #[tokio::test]
    async fn test_create_returns_token_once_and_stores_hash() {
        let (db, _dir) = test_database().await;
        let store = db.keys();

        let issued = store.create("  laptop ").await.unwrap();
        assert_eq!(issued.key.label, "laptop");
        assert!(issued.key.active);
        assert!(issued.token.starts_with(tokens::KEY_TOKEN_PREFIX));

        let record = store
            .find_by_token_hash(&tokens::hash_token(&issued.token))
            .await
            .unwrap()
            .expect("stored");
        assert_eq!(record.key.id, issued.key.id);
        assert_eq!(record.key.token_hint, issued.key.token_hint);
        assert_ne!(record.token_hash, issued.token);
    }

    #[tokio::test]
    async fn test_revoke_keeps_row() {
        let (db, _dir) = test_database().await;
        let store = db.keys();
        let issued = store.create("ci").await.unwrap();

        assert!(store.revoke(&issued.key.id).await.unwrap());
        assert!(!store.revoke(&issued.key.id).await.unwrap());

        let key = store.get(&issued.key.id).await.unwrap().expect("row kept");
        assert!(!key.active);
        assert!(key.revoked_at.is_some());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_unknown_is_false() {
        let (db, _dir) = test_database().await;
        assert!(!db.keys().revoke(&KeyId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_active_by_token() {
        let (db, _dir) = test_database().await;
        let store = db.keys();
        let issued = store.create("ops").await.unwrap();

        let found = store.find_active_by_token(&issued.token).await.unwrap();
        assert_eq!(found.map(|k| k.id), Some(issued.key.id));

        let other = format!("{}x", issued.token);
        assert!(store.find_active_by_token(&other).await.unwrap().is_none());

        store.revoke(&issued.key.id).await.unwrap();
        assert!(store.find_active_by_token(&issued.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_touch_last_used() {
        let (db, _dir) = test_database().await;
        let store = db.keys();
        let issued = store.create("").await.unwrap();
        assert!(issued.key.last_used_at.is_none());

        store.touch_last_used(&issued.key.id).await.unwrap();
        let key = store.get(&issued.key.id).await.unwrap().unwrap();
        assert!(key.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_hash_is_conflict() {
        let (db, _dir) = test_database().await;
        let store = db.keys();
        let issued = store.create("a").await.unwrap();

        let err = sqlx::query(
            "INSERT INTO access_keys (id, token_hash, token_hint, label, active, created_at) VALUES (?1, ?2, 'x', '', 1, ?3)",
        )
        .bind(KeyId::new().to_string())
        .bind(tokens::hash_token(&issued.token))
        .bind(Utc::now())
        .execute(db.pool())
        .await
        .map_err(|e| DbError::from_write(e, "access key"))
        .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }
}
