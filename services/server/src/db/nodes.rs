//! Cluster node registry storage.

use chrono::{DateTime, Utc};
use dockward_id::NodeId;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::SqlitePool;
use tracing::info;

use super::DbError;

/// A registered node. Stored and returned, never acted upon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterNode {
    pub id: NodeId,
    pub name: String,
    pub address: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewNode {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Partial update; `None` leaves the column unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl NodeUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.address.is_none() && self.status.is_none()
    }
}

const DEFAULT_STATUS: &str = "unknown";

/// Repository over the `cluster_nodes` table.
#[derive(Clone)]
pub struct NodeStore {
    pool: SqlitePool,
}

impl NodeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewNode) -> Result<ClusterNode, DbError> {
        let now = Utc::now();
        let node = ClusterNode {
            id: NodeId::new(),
            name: new.name,
            address: new.address,
            status: new.status.unwrap_or_else(|| DEFAULT_STATUS.to_string()),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO cluster_nodes (id, name, address, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(node.id.to_string())
        .bind(&node.name)
        .bind(&node.address)
        .bind(&node.status)
        .bind(node.created_at)
        .bind(node.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DbError::from_write(e, "node name"))?;

        info!(node_id = %node.id, name = %node.name, "Node registered");
        Ok(node)
    }

    pub async fn list(&self) -> Result<Vec<ClusterNode>, DbError> {
        sqlx::query_as::<_, ClusterNode>(
            "SELECT id, name, address, status, created_at, updated_at FROM cluster_nodes ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)
    }

    pub async fn get(&self, id: &NodeId) -> Result<Option<ClusterNode>, DbError> {
        sqlx::query_as::<_, ClusterNode>(
            "SELECT id, name, address, status, created_at, updated_at FROM cluster_nodes WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)
    }

    /// Apply a partial update in one statement. Returns `None` for unknown ids.
    pub async fn update(
        &self,
        id: &NodeId,
        update: NodeUpdate,
    ) -> Result<Option<ClusterNode>, DbError> {
        sqlx::query_as::<_, ClusterNode>(
            r#"
            UPDATE cluster_nodes
            SET name = COALESCE(?1, name),
                address = COALESCE(?2, address),
                status = COALESCE(?3, status),
                updated_at = ?4
            WHERE id = ?5
            RETURNING id, name, address, status, created_at, updated_at
            "#,
        )
        .bind(update.name)
        .bind(update.address)
        .bind(update.status)
        .bind(Utc::now())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DbError::from_write(e, "node name"))
    }

    pub async fn delete(&self, id: &NodeId) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM cluster_nodes WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(node_id = %id, "Node removed");
        }
        Ok(deleted)
    }
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for ClusterNode {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let id: String = row.try_get("id")?;
        let id = id.parse::<NodeId>().map_err(|e| sqlx::Error::ColumnDecode {
            index: "id".to_string(),
            source: Box::new(e),
        })?;

        Ok(Self {
            id,
            name: row.try_get("name")?,
            address: row.try_get("address")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
