use crate::error::DbError;
use async_trait::async_trait;
use model::{core::value::Value, plan::table::TableRef, records::row::RowData};

/// Read side of the engine: implemented by every source dialect.
///
/// `read_batch` is keyset pagination: rows with `batch_column` strictly
/// greater than `after`, ordered ascending, at most `size` rows. The SQL
/// shape differs per dialect (TOP / LIMIT / FETCH FIRST) and is supplied
/// by the adapter's [`Dialect`](crate::dialect::Dialect).
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn list_columns(&self, table: &TableRef) -> Result<Vec<String>, DbError>;

    async fn table_exists(&self, table: &TableRef) -> Result<bool, DbError>;

    async fn row_count(&self, table: &TableRef) -> Result<u64, DbError>;

    /// Distinct values in `column`; compared with `row_count` by the
    /// validator to warn about non-unique batch columns.
    async fn distinct_count(&self, table: &TableRef, column: &str) -> Result<u64, DbError>;

    async fn read_batch(
        &self,
        table: &TableRef,
        batch_column: &str,
        size: usize,
        after: Option<&Value>,
    ) -> Result<Vec<RowData>, DbError>;

    /// Unpaged read of the whole table (batch size 0), ordered by
    /// `order_by` when present.
    async fn read_all(
        &self,
        table: &TableRef,
        order_by: Option<&str>,
    ) -> Result<Vec<RowData>, DbError>;

    /// Round-trip liveness check used by the validator.
    async fn ping(&self) -> Result<(), DbError>;

    async fn close(&self) -> Result<(), DbError>;
}

/// Write side of the engine. The target is always SQL Server or Azure
/// SQL; the trait exists so the migrator and key-map store can be tested
/// against an in-memory double.
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    async fn list_columns(&self, table: &TableRef) -> Result<Vec<String>, DbError>;

    async fn table_exists(&self, table: &TableRef) -> Result<bool, DbError>;

    /// The database-generated identity column, when the table has one.
    async fn identity_column_of(&self, table: &TableRef) -> Result<Option<String>, DbError>;

    async fn exec(&self, sql: &str) -> Result<(), DbError>;

    async fn query_rows(&self, sql: &str) -> Result<Vec<RowData>, DbError>;

    /// Inserts one row (restricted to `columns`) and returns the
    /// database-generated identity value.
    async fn insert_returning_identity(
        &self,
        table: &TableRef,
        columns: &[String],
        row: &RowData,
    ) -> Result<Value, DbError>;

    /// Inserts one row without capturing an identity.
    async fn insert_one(
        &self,
        table: &TableRef,
        columns: &[String],
        row: &RowData,
    ) -> Result<(), DbError>;

    /// Multi-row insert; statements are chunked to the engine's 1000-row
    /// VALUES limit internally.
    async fn bulk_insert(
        &self,
        table: &TableRef,
        columns: &[String],
        rows: &[RowData],
    ) -> Result<(), DbError>;

    async fn set_identity_insert(&self, table: &TableRef, on: bool) -> Result<(), DbError>;

    async fn set_triggers_enabled(&self, table: &TableRef, enabled: bool)
    -> Result<(), DbError>;

    /// Disables or re-enables every foreign-key and check constraint in
    /// the target database.
    async fn set_all_constraints_enabled(&self, enabled: bool) -> Result<(), DbError>;

    async fn truncate_table(&self, table: &TableRef) -> Result<(), DbError>;

    /// Fallback when truncation is blocked by referential integrity.
    async fn delete_all_rows(&self, table: &TableRef) -> Result<(), DbError>;

    /// Bare table names (no schema) in the target database starting with
    /// `prefix`; used for key-map cleanup.
    async fn list_tables_with_prefix(&self, prefix: &str) -> Result<Vec<String>, DbError>;

    async fn drop_table(&self, name: &str) -> Result<(), DbError>;

    async fn ping(&self) -> Result<(), DbError>;

    async fn close(&self) -> Result<(), DbError>;
}
