//! Postgres-backed index store.
//!
//! Context references and item rows live in two tables; the full body stays
//! in the blob store. Listing filters and pagination are pushed into SQL.

use super::{ContextRef, IndexStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::collections::HashMap;
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;
use toolmesh_core::{Context, ContextItem, ItemRole, ListOptions, MeshResult, StorageError};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Connection pool configuration for the index database.
#[derive(Debug, Clone)]
pub struct PgIndexConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub max_size: usize,
    pub timeout: Duration,
}

impl Default for PgIndexConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "toolmesh".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl PgIndexConfig {
    /// Load from `TOOLMESH_DB_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("TOOLMESH_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("TOOLMESH_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("TOOLMESH_DB_NAME").unwrap_or_else(|_| "toolmesh".to_string()),
            user: std::env::var("TOOLMESH_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("TOOLMESH_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("TOOLMESH_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("TOOLMESH_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> MeshResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| {
                StorageError::Unavailable {
                    reason: format!("failed to create pool: {e}"),
                }
                .into()
            })
    }
}

// ============================================================================
// STORE
// ============================================================================

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS context_refs (
    id             TEXT PRIMARY KEY,
    agent_id       TEXT NOT NULL,
    session_id     TEXT,
    model_id       TEXT NOT NULL,
    current_tokens BIGINT NOT NULL,
    max_tokens     BIGINT NOT NULL,
    created_at     TIMESTAMPTZ NOT NULL,
    updated_at     TIMESTAMPTZ NOT NULL,
    expires_at     TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS context_refs_agent_idx
    ON context_refs (agent_id, session_id, created_at DESC);
CREATE TABLE IF NOT EXISTS context_items (
    context_id TEXT NOT NULL REFERENCES context_refs (id) ON DELETE CASCADE,
    ordinal    INTEGER NOT NULL,
    role       TEXT NOT NULL,
    content    TEXT NOT NULL,
    tokens     BIGINT NOT NULL,
    ts         TIMESTAMPTZ NOT NULL,
    metadata   JSONB NOT NULL DEFAULT '{}'::jsonb,
    PRIMARY KEY (context_id, ordinal)
);
"#;

/// Postgres index store over a deadpool connection pool.
#[derive(Clone)]
pub struct PgIndexStore {
    pool: Pool,
}

impl PgIndexStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &PgIndexConfig) -> MeshResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Create the tables when missing.
    pub async fn migrate(&self) -> MeshResult<()> {
        let conn = self.conn().await?;
        conn.batch_execute(SCHEMA)
            .await
            .map_err(|e| storage_err("context", "schema", e))?;
        Ok(())
    }

    async fn conn(&self) -> MeshResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            StorageError::Unavailable {
                reason: format!("connection pool: {e}"),
            }
            .into()
        })
    }
}

fn storage_err(entity: &'static str, id: &str, e: tokio_postgres::Error) -> toolmesh_core::MeshError {
    StorageError::WriteFailed {
        entity,
        id: id.to_string(),
        reason: e.to_string(),
    }
    .into()
}

fn read_err(entity: &'static str, id: &str, e: tokio_postgres::Error) -> toolmesh_core::MeshError {
    StorageError::ReadFailed {
        entity,
        id: id.to_string(),
        reason: e.to_string(),
    }
    .into()
}

fn row_to_ref(row: &tokio_postgres::Row) -> ContextRef {
    ContextRef {
        id: row.get("id"),
        agent_id: row.get("agent_id"),
        session_id: row.get("session_id"),
        model_id: row.get("model_id"),
        current_tokens: row.get::<_, i64>("current_tokens") as u32,
        max_tokens: row.get::<_, i64>("max_tokens") as u32,
        created_at: row.get::<_, DateTime<Utc>>("created_at"),
        updated_at: row.get::<_, DateTime<Utc>>("updated_at"),
        expires_at: row.get::<_, Option<DateTime<Utc>>>("expires_at"),
    }
}

fn row_to_item(row: &tokio_postgres::Row) -> ContextItem {
    let metadata: serde_json::Value = row.get("metadata");
    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_value(metadata).unwrap_or_default();
    ContextItem {
        role: ItemRole::from(row.get::<_, String>("role")),
        content: row.get("content"),
        tokens: row.get::<_, i64>("tokens") as u32,
        timestamp: row.get::<_, DateTime<Utc>>("ts"),
        metadata,
    }
}

#[async_trait]
impl IndexStore for PgIndexStore {
    async fn upsert(&self, ctx: &Context) -> MeshResult<()> {
        let mut conn = self.conn().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| storage_err("context", &ctx.id, e))?;

        tx.execute(
            "INSERT INTO context_refs
                 (id, agent_id, session_id, model_id, current_tokens, max_tokens,
                  created_at, updated_at, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (id) DO UPDATE SET
                 agent_id = EXCLUDED.agent_id,
                 session_id = EXCLUDED.session_id,
                 model_id = EXCLUDED.model_id,
                 current_tokens = EXCLUDED.current_tokens,
                 max_tokens = EXCLUDED.max_tokens,
                 updated_at = EXCLUDED.updated_at,
                 expires_at = EXCLUDED.expires_at",
            &[
                &ctx.id,
                &ctx.agent_id,
                &ctx.session_id,
                &ctx.model_id,
                &(ctx.current_tokens as i64),
                &(ctx.max_tokens as i64),
                &ctx.created_at,
                &ctx.updated_at,
                &ctx.expires_at,
            ],
        )
        .await
        .map_err(|e| storage_err("context", &ctx.id, e))?;

        tx.execute(
            "DELETE FROM context_items WHERE context_id = $1",
            &[&ctx.id],
        )
        .await
        .map_err(|e| storage_err("context", &ctx.id, e))?;

        for (ordinal, item) in ctx.content.iter().enumerate() {
            let metadata = serde_json::to_value(&item.metadata).unwrap_or_default();
            tx.execute(
                "INSERT INTO context_items
                     (context_id, ordinal, role, content, tokens, ts, metadata)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &ctx.id,
                    &(ordinal as i32),
                    &item.role.as_str(),
                    &item.content,
                    &(item.tokens as i64),
                    &item.timestamp,
                    &metadata,
                ],
            )
            .await
            .map_err(|e| storage_err("context", &ctx.id, e))?;
        }

        tx.commit()
            .await
            .map_err(|e| storage_err("context", &ctx.id, e))
    }

    async fn get_ref(&self, context_id: &str) -> MeshResult<ContextRef> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt("SELECT * FROM context_refs WHERE id = $1", &[&context_id])
            .await
            .map_err(|e| read_err("context", context_id, e))?;
        match row {
            Some(row) => Ok(row_to_ref(&row)),
            None => Err(StorageError::NotFound {
                entity: "context",
                id: context_id.to_string(),
            }
            .into()),
        }
    }

    async fn delete(&self, context_id: &str) -> MeshResult<()> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM context_refs WHERE id = $1", &[&context_id])
            .await
            .map_err(|e| storage_err("context", context_id, e))?;
        if deleted == 0 {
            return Err(StorageError::NotFound {
                entity: "context",
                id: context_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn list(
        &self,
        agent_id: &str,
        session_id: Option<&str>,
        options: &ListOptions,
    ) -> MeshResult<Vec<ContextRef>> {
        let conn = self.conn().await?;

        let mut sql = String::from("SELECT * FROM context_refs WHERE agent_id = $1");
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&agent_id];

        if let Some(ref session) = session_id {
            params.push(session);
            sql.push_str(&format!(" AND session_id = ${}", params.len()));
        }
        if let Some(ref after) = options.created_after {
            params.push(after);
            sql.push_str(&format!(" AND created_at >= ${}", params.len()));
        }
        if let Some(ref before) = options.created_before {
            params.push(before);
            sql.push_str(&format!(" AND created_at <= ${}", params.len()));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let limit = options.limit.map(|l| l as i64);
        if let Some(ref limit) = limit {
            params.push(limit);
            sql.push_str(&format!(" LIMIT ${}", params.len()));
        }
        let offset = options.offset.map(|o| o as i64);
        if let Some(ref offset) = offset {
            params.push(offset);
            sql.push_str(&format!(" OFFSET ${}", params.len()));
        }

        let rows = conn
            .query(sql.as_str(), &params)
            .await
            .map_err(|e| read_err("context", agent_id, e))?;
        Ok(rows.iter().map(row_to_ref).collect())
    }

    async fn items(&self, context_id: &str) -> MeshResult<Vec<ContextItem>> {
        let conn = self.conn().await?;
        let exists = conn
            .query_opt("SELECT 1 FROM context_refs WHERE id = $1", &[&context_id])
            .await
            .map_err(|e| read_err("context", context_id, e))?;
        if exists.is_none() {
            return Err(StorageError::NotFound {
                entity: "context",
                id: context_id.to_string(),
            }
            .into());
        }

        let rows = conn
            .query(
                "SELECT * FROM context_items WHERE context_id = $1 ORDER BY ordinal",
                &[&context_id],
            )
            .await
            .map_err(|e| read_err("context", context_id, e))?;
        Ok(rows.iter().map(row_to_item).collect())
    }
}
