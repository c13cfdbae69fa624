//! `PostgreSQL` adapters for the CDC bootstrap subsystem.
//!
//! This crate implements the storage boundaries from `cdc-bootstrap-core` on top
//! of sqlx:
//!
//! - [`PostgresControlStore`]: the `bootstrap` control table, with guarded
//!   lifecycle transitions
//! - [`PostgresRowSource`]: historical scans rendered with `row_to_json`
//! - [`PostgresPositionStore`]: committed replication positions per client
//!
//! The control database of the bootstrap subsystem maps onto a `PostgreSQL`
//! schema, and so does the database named in a bootstrap request.
//!
//! # Example
//!
//! ```ignore
//! use cdc_bootstrap_postgres::{PostgresControlStore, PostgresRowSource};
//!
//! let pool = sqlx::PgPool::connect("postgres://localhost/app").await?;
//! let store = PostgresControlStore::new(pool.clone(), "maxwell");
//! store.migrate().await?;
//! let source = PostgresRowSource::new(pool);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod control_store;
pub mod position_store;
pub mod row_source;

pub use control_store::PostgresControlStore;
pub use position_store::PostgresPositionStore;
pub use row_source::PostgresRowSource;

/// Quote an identifier for splicing into SQL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."table"`
pub(crate) fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified("shop", "Orders"), "\"shop\".\"Orders\"");
    }
}
