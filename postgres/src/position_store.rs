//! Committed replication positions in `PostgreSQL`.

use crate::{qualified, quote_ident};
use cdc_bootstrap_core::replication::{Position, PositionStore, ReplicationError};
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;

/// PostgreSQL-backed [`PositionStore`], one row per client.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE maxwell.positions (
///     client_id TEXT PRIMARY KEY,
///     log_file TEXT NOT NULL,
///     log_offset BIGINT NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
/// );
/// ```
#[derive(Clone)]
pub struct PostgresPositionStore {
    pool: PgPool,
    schema: String,
    table: String,
}

impl PostgresPositionStore {
    /// Create a store for the `positions` table in `schema`.
    #[must_use]
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        let schema = schema.into();
        let table = qualified(&schema, "positions");
        Self {
            pool,
            schema,
            table,
        }
    }

    /// Create the schema and the positions table if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::Checkpoint`] if a statement fails.
    pub async fn migrate(&self) -> Result<(), ReplicationError> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.schema)))
            .execute(&self.pool)
            .await
            .map_err(|e| ReplicationError::Checkpoint(format!("Migration failed: {e}")))?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                client_id TEXT PRIMARY KEY,
                log_file TEXT NOT NULL,
                log_offset BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| ReplicationError::Checkpoint(format!("Migration failed: {e}")))?;

        Ok(())
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl PositionStore for PostgresPositionStore {
    fn save_position(
        &self,
        client_id: &str,
        position: Position,
    ) -> Pin<Box<dyn Future<Output = Result<(), ReplicationError>> + Send + '_>> {
        let client_id = client_id.to_string();
        Box::pin(async move {
            let offset = i64::try_from(position.offset).map_err(|_| {
                ReplicationError::Checkpoint(format!("Offset {} out of range", position.offset))
            })?;

            sqlx::query(&format!(
                "INSERT INTO {} (client_id, log_file, log_offset, updated_at)
                 VALUES ($1, $2, $3, now())
                 ON CONFLICT (client_id) DO UPDATE
                 SET log_file = EXCLUDED.log_file,
                     log_offset = EXCLUDED.log_offset,
                     updated_at = now()",
                self.table
            ))
            .bind(&client_id)
            .bind(&position.log)
            .bind(offset)
            .execute(&self.pool)
            .await
            .map_err(|e| ReplicationError::Checkpoint(format!("Failed to save position: {e}")))?;

            Ok(())
        })
    }

    fn load_position(
        &self,
        client_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Position>, ReplicationError>> + Send + '_>> {
        let client_id = client_id.to_string();
        Box::pin(async move {
            let result: Option<(String, i64)> = sqlx::query_as(&format!(
                "SELECT log_file, log_offset FROM {} WHERE client_id = $1",
                self.table
            ))
            .bind(&client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ReplicationError::Checkpoint(format!("Failed to load position: {e}")))?;

            result
                .map(|(log, offset)| {
                    u64::try_from(offset)
                        .map(|offset| Position::new(log, offset))
                        .map_err(|_| ReplicationError::Checkpoint(format!("Negative offset {offset}")))
                })
                .transpose()
        })
    }
}
