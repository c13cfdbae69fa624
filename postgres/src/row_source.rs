//! Historical scans over `PostgreSQL` tables.
//!
//! Each row is rendered by the server with `row_to_json`, so column values reach
//! the producer in the same JSON shape whatever the table's column types are.

use crate::{qualified, quote_ident};
use cdc_bootstrap_core::row::RowData;
use cdc_bootstrap_core::row_source::{RowSource, ScanError, ScanRequest, ScanStream};
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;

/// PostgreSQL-backed [`RowSource`].
///
/// The request's database names the schema. When the request carries a field,
/// rows are filtered with `field >= start` (the bound is cast to the column's
/// own type) and ordered by that field.
#[derive(Clone)]
pub struct PostgresRowSource {
    pool: PgPool,
}

impl PostgresRowSource {
    /// Create a row source over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn table_exists(&self, table: &str) -> Result<bool, ScanError> {
        let (exists,): (bool,) = sqlx::query_as("SELECT to_regclass($1) IS NOT NULL")
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(exists)
    }

    /// SQL type of `column`, as `format_type` spells it.
    async fn column_type(&self, table: &str, column: &str) -> Result<String, ScanError> {
        let found: Option<(String,)> = sqlx::query_as(
            "SELECT format_type(atttypid, atttypmod)
             FROM pg_attribute
             WHERE attrelid = $1::regclass AND attname = $2 AND attnum > 0 AND NOT attisdropped",
        )
        .bind(table)
        .bind(column)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        found
            .map(|(ty,)| ty)
            .ok_or_else(|| ScanError::DatabaseError(format!("Column {column} not found on {table}")))
    }

    async fn select(&self, request: &ScanRequest) -> Result<String, ScanError> {
        let table = qualified(&request.database, &request.table);
        if !self.table_exists(&table).await? {
            return Err(ScanError::TableNotFound {
                database: request.database.clone(),
                table: request.table.clone(),
            });
        }

        let mut sql = format!("SELECT row_to_json(t) FROM {table} t");
        if let Some(field) = &request.field {
            let column = quote_ident(field);
            if request.start.is_some() {
                let ty = self.column_type(&table, field).await?;
                sql.push_str(&format!(" WHERE t.{column} >= CAST($1 AS {ty})"));
            }
            sql.push_str(&format!(" ORDER BY t.{column}"));
        }
        Ok(sql)
    }
}

impl RowSource for PostgresRowSource {
    fn scan(
        &self,
        request: &ScanRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ScanStream, ScanError>> + Send + '_>> {
        let request = request.clone();
        Box::pin(async move {
            let sql = self.select(&request).await?;
            let start = request.field.as_ref().and(request.start.clone());
            let pool = self.pool.clone();

            tracing::debug!(
                database = %request.database,
                table = %request.table,
                field = ?request.field,
                start = ?start,
                "Opening historical scan"
            );

            let stream = async_stream::stream! {
                let mut query = sqlx::query_as::<_, (Value,)>(&sql);
                if let Some(start) = start {
                    query = query.bind(start);
                }
                let mut rows = query.fetch(&pool);

                loop {
                    match rows.try_next().await {
                        Ok(Some((value,))) => yield decode(value),
                        Ok(None) => break,
                        Err(e) => {
                            yield Err(db_error(e));
                            break;
                        }
                    }
                }
            };

            Ok(Box::pin(stream) as ScanStream)
        })
    }
}

fn decode(value: Value) -> Result<RowData, ScanError> {
    match value {
        Value::Object(data) => Ok(data),
        other => Err(ScanError::DecodeError(format!("expected a JSON object, got {other}"))),
    }
}

fn db_error(e: sqlx::Error) -> ScanError {
    ScanError::DatabaseError(e.to_string())
}
