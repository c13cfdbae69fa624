//! `PostgreSQL` storage for the bootstrap control table.

use crate::{qualified, quote_ident};
use cdc_bootstrap_core::control::{
    BOOTSTRAP_TABLE, BootstrapRequest, BootstrapState, ControlRow, ControlRowId,
};
use cdc_bootstrap_core::control_store::{ControlStore, ControlStoreError, StoreFuture};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

const COLUMNS: &str = "id, database_name, table_name, field_name, start_date, \
                       started_at, completed_at, is_complete, inserted_rows";

/// PostgreSQL-backed [`ControlStore`].
///
/// # Schema
///
/// ```sql
/// CREATE TABLE maxwell.bootstrap (
///     id BIGSERIAL PRIMARY KEY,
///     database_name TEXT NOT NULL,
///     table_name TEXT NOT NULL,
///     field_name TEXT,
///     start_date TEXT,
///     is_complete SMALLINT NOT NULL DEFAULT 0,
///     inserted_rows BIGINT NOT NULL DEFAULT 0,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
///     started_at TIMESTAMPTZ,
///     completed_at TIMESTAMPTZ
/// );
/// ```
///
/// Transitions are single guarded `UPDATE … RETURNING` statements, so two
/// processes racing on the same request cannot both start it.
#[derive(Clone)]
pub struct PostgresControlStore {
    pool: PgPool,
    schema: String,
    table: String,
}

impl PostgresControlStore {
    /// Create a store for the control table in `schema`.
    #[must_use]
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        let schema = schema.into();
        let table = qualified(&schema, BOOTSTRAP_TABLE);
        Self {
            pool,
            schema,
            table,
        }
    }

    /// Connect to `database_url` with a small pool of its own.
    ///
    /// # Errors
    ///
    /// Returns [`ControlStoreError::DatabaseError`] if the connection fails.
    pub async fn connect(database_url: &str, schema: impl Into<String>) -> Result<Self, ControlStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5) // Control traffic is a handful of rows
            .connect(database_url)
            .await
            .map_err(|e| ControlStoreError::DatabaseError(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool, schema))
    }

    /// Create the schema and the control table if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns [`ControlStoreError::DatabaseError`] if a statement fails.
    pub async fn migrate(&self) -> Result<(), ControlStoreError> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.schema)))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                database_name TEXT NOT NULL,
                table_name TEXT NOT NULL,
                field_name TEXT,
                start_date TEXT,
                is_complete SMALLINT NOT NULL DEFAULT 0,
                inserted_rows BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                CHECK ((is_complete = 1) = (completed_at IS NOT NULL))
            )",
            self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        tracing::info!(table = %self.table, "Control table ready");
        Ok(())
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The schema holding the control table.
    #[must_use]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    async fn fetch(&self, id: ControlRowId) -> Result<Option<ControlRow>, ControlStoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM {} WHERE id = $1", self.table))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(control_row).transpose()
    }

    /// Explain why a guarded update touched no row.
    async fn rejected(&self, id: ControlRowId, to: BootstrapState) -> ControlStoreError {
        match self.fetch(id).await {
            Ok(Some(row)) => ControlStoreError::InvalidTransition {
                id,
                from: row.state(),
                to,
            },
            Ok(None) => ControlStoreError::NotFound(id),
            Err(e) => e,
        }
    }

    async fn transition(
        &self,
        id: ControlRowId,
        to: BootstrapState,
        update: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<ControlRow, ControlStoreError> {
        let updated = update.fetch_optional(&self.pool).await.map_err(db_error)?;

        match updated {
            Some(row) => {
                metrics::counter!("bootstrap_control_transitions_total", "to" => to.as_str())
                    .increment(1);
                control_row(&row)
            }
            None => Err(self.rejected(id, to).await),
        }
    }
}

impl ControlStore for PostgresControlStore {
    fn request(&self, request: BootstrapRequest) -> StoreFuture<'_, ControlRow> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "INSERT INTO {} (database_name, table_name, field_name, start_date)
                 VALUES ($1, $2, $3, $4)
                 RETURNING {COLUMNS}",
                self.table
            ))
            .bind(&request.database_name)
            .bind(&request.table_name)
            .bind(&request.field_name)
            .bind(&request.start_date)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

            let row = control_row(&row)?;
            tracing::info!(
                bootstrap_id = %row.id,
                database = %row.database_name,
                table = %row.table_name,
                "Bootstrap requested"
            );
            Ok(row)
        })
    }

    fn load(&self, id: ControlRowId) -> StoreFuture<'_, Option<ControlRow>> {
        Box::pin(self.fetch(id))
    }

    fn mark_started(&self, id: ControlRowId, started_at: DateTime<Utc>) -> StoreFuture<'_, ControlRow> {
        Box::pin(async move {
            let sql = format!(
                "UPDATE {} SET started_at = $2
                 WHERE id = $1 AND started_at IS NULL AND is_complete = 0
                 RETURNING {COLUMNS}",
                self.table
            );
            let update = sqlx::query(&sql).bind(id.get()).bind(started_at);
            self.transition(id, BootstrapState::Running, update).await
        })
    }

    fn mark_completed(
        &self,
        id: ControlRowId,
        completed_at: DateTime<Utc>,
        inserted_rows: u64,
    ) -> StoreFuture<'_, ControlRow> {
        Box::pin(async move {
            let sql = format!(
                "UPDATE {} SET completed_at = $2, is_complete = 1, inserted_rows = $3
                 WHERE id = $1 AND started_at IS NOT NULL AND is_complete = 0
                 RETURNING {COLUMNS}",
                self.table
            );
            let update = sqlx::query(&sql)
                .bind(id.get())
                .bind(completed_at)
                .bind(i64::try_from(inserted_rows).unwrap_or(i64::MAX));
            self.transition(id, BootstrapState::Complete, update).await
        })
    }

    fn find_running(&self) -> StoreFuture<'_, Vec<ControlRow>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {COLUMNS} FROM {}
                 WHERE started_at IS NOT NULL AND is_complete = 0
                 ORDER BY id ASC",
                self.table
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter().map(control_row).collect()
        })
    }
}

fn control_row(row: &PgRow) -> Result<ControlRow, ControlStoreError> {
    let is_complete: i16 = row.try_get("is_complete").map_err(invalid_row)?;
    let inserted_rows: i64 = row.try_get("inserted_rows").map_err(invalid_row)?;

    Ok(ControlRow {
        id: ControlRowId::new(row.try_get("id").map_err(invalid_row)?),
        database_name: row.try_get("database_name").map_err(invalid_row)?,
        table_name: row.try_get("table_name").map_err(invalid_row)?,
        field_name: row.try_get("field_name").map_err(invalid_row)?,
        start_date: row.try_get("start_date").map_err(invalid_row)?,
        started_at: row.try_get("started_at").map_err(invalid_row)?,
        completed_at: row.try_get("completed_at").map_err(invalid_row)?,
        is_complete: is_complete != 0,
        inserted_rows: u64::try_from(inserted_rows)
            .map_err(|_| ControlStoreError::InvalidRow(format!("negative inserted_rows {inserted_rows}")))?,
    })
}

fn db_error(e: sqlx::Error) -> ControlStoreError {
    ControlStoreError::DatabaseError(e.to_string())
}

fn invalid_row(e: sqlx::Error) -> ControlStoreError {
    ControlStoreError::InvalidRow(e.to_string())
}
