//! Ordered, resumable page-at-a-time reads from a source table.

use connectors::{adapter::SourceAdapter, error::DbError};
use model::{core::value::Value, plan::table::TableRef, records::row::RowData};
use tracing::debug;

/// Keyset cursor over `batch_column`. Pages are ascending and strictly
/// greater than the last acknowledged key, so resuming from a persisted
/// key never re-reads acknowledged rows. With a non-unique batch column,
/// duplicates sitting exactly on a page boundary can be skipped; the
/// validator warns about such columns.
pub struct BatchCursor<'a> {
    source: &'a dyn SourceAdapter,
    table: TableRef,
    batch_column: String,
    size: usize,
    last_key: Option<Value>,
    exhausted: bool,
}

impl<'a> BatchCursor<'a> {
    pub fn new(
        source: &'a dyn SourceAdapter,
        table: TableRef,
        batch_column: &str,
        size: usize,
        resume_key: Option<Value>,
    ) -> Self {
        BatchCursor {
            source,
            table,
            batch_column: batch_column.to_string(),
            size,
            last_key: resume_key,
            exhausted: false,
        }
    }

    /// Largest batch-column value seen so far (or the resume seed).
    pub fn last_key(&self) -> Option<&Value> {
        self.last_key.as_ref()
    }

    /// Fetches the next page, or `None` when the table is drained. A
    /// page shorter than the requested size is still returned; the call
    /// after it terminates.
    pub async fn next_page(&mut self) -> Result<Option<Vec<RowData>>, DbError> {
        if self.exhausted {
            return Ok(None);
        }

        // Batch size 0 disables paging: one read covering the table.
        if self.size == 0 {
            self.exhausted = true;
            let rows = self
                .source
                .read_all(&self.table, Some(&self.batch_column))
                .await?;
            self.advance_key(&rows);
            return Ok(if rows.is_empty() { None } else { Some(rows) });
        }

        let rows = self
            .source
            .read_batch(
                &self.table,
                &self.batch_column,
                self.size,
                self.last_key.as_ref(),
            )
            .await?;

        if rows.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        if rows.len() < self.size {
            self.exhausted = true;
        }

        self.advance_key(&rows);
        debug!(
            table = %self.table,
            rows = rows.len(),
            "Fetched source page"
        );
        Ok(Some(rows))
    }

    fn advance_key(&mut self, rows: &[RowData]) {
        if let Some(last_row) = rows.last() {
            let key = last_row.value_of(&self.batch_column);
            if !key.is_null() {
                self.last_key = Some(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use model::records::row::ColumnValue;

    /// In-memory source keyed on an integer `Id` column.
    struct VecSource {
        keys: Vec<i64>,
    }

    fn row(id: i64) -> RowData {
        RowData::new(vec![ColumnValue {
            name: "Id".into(),
            value: Value::Int(id),
        }])
    }

    #[async_trait]
    impl SourceAdapter for VecSource {
        async fn list_columns(&self, _table: &TableRef) -> Result<Vec<String>, DbError> {
            Ok(vec!["Id".into()])
        }

        async fn table_exists(&self, _table: &TableRef) -> Result<bool, DbError> {
            Ok(true)
        }

        async fn row_count(&self, _table: &TableRef) -> Result<u64, DbError> {
            Ok(self.keys.len() as u64)
        }

        async fn distinct_count(
            &self,
            _table: &TableRef,
            _column: &str,
        ) -> Result<u64, DbError> {
            let mut keys = self.keys.clone();
            keys.sort_unstable();
            keys.dedup();
            Ok(keys.len() as u64)
        }

        async fn read_batch(
            &self,
            _table: &TableRef,
            _batch_column: &str,
            size: usize,
            after: Option<&Value>,
        ) -> Result<Vec<RowData>, DbError> {
            let floor = after.and_then(|v| v.as_i64()).unwrap_or(i64::MIN);
            let mut keys: Vec<i64> = self
                .keys
                .iter()
                .copied()
                .filter(|k| *k > floor)
                .collect();
            keys.sort_unstable();
            Ok(keys.into_iter().take(size).map(row).collect())
        }

        async fn read_all(
            &self,
            _table: &TableRef,
            _order_by: Option<&str>,
        ) -> Result<Vec<RowData>, DbError> {
            let mut keys = self.keys.clone();
            keys.sort_unstable();
            Ok(keys.into_iter().map(row).collect())
        }

        async fn ping(&self) -> Result<(), DbError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), DbError> {
            Ok(())
        }
    }

    fn table() -> TableRef {
        TableRef::new("dbo", "T")
    }

    #[tokio::test]
    async fn pages_in_order_and_terminates_on_short_page() {
        let source = VecSource { keys: vec![3, 1, 2, 5, 4] };
        let mut cursor = BatchCursor::new(&source, table(), "Id", 2, None);

        let p1 = cursor.next_page().await.unwrap().unwrap();
        assert_eq!(p1.len(), 2);
        assert_eq!(p1[0].value_of("Id"), Value::Int(1));
        assert_eq!(cursor.last_key(), Some(&Value::Int(2)));

        let p2 = cursor.next_page().await.unwrap().unwrap();
        assert_eq!(p2[1].value_of("Id"), Value::Int(4));

        let p3 = cursor.next_page().await.unwrap().unwrap();
        assert_eq!(p3.len(), 1);
        assert_eq!(cursor.last_key(), Some(&Value::Int(5)));

        assert!(cursor.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resume_key_skips_acknowledged_rows() {
        let source = VecSource { keys: vec![1, 2, 3, 4, 5] };
        let mut cursor =
            BatchCursor::new(&source, table(), "Id", 2, Some(Value::Int(4)));

        let page = cursor.next_page().await.unwrap().unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].value_of("Id"), Value::Int(5));
        assert_eq!(cursor.last_key(), Some(&Value::Int(5)));
        assert!(cursor.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exact_multiple_needs_one_extra_fetch() {
        let source = VecSource { keys: vec![1, 2, 3, 4] };
        let mut cursor = BatchCursor::new(&source, table(), "Id", 2, None);
        assert_eq!(cursor.next_page().await.unwrap().unwrap().len(), 2);
        assert_eq!(cursor.next_page().await.unwrap().unwrap().len(), 2);
        assert!(cursor.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_size_zero_reads_everything_at_once() {
        let source = VecSource { keys: vec![2, 1, 3] };
        let mut cursor = BatchCursor::new(&source, table(), "Id", 0, None);
        let page = cursor.next_page().await.unwrap().unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(cursor.last_key(), Some(&Value::Int(3)));
        assert!(cursor.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_table_yields_no_pages() {
        let source = VecSource { keys: vec![] };
        let mut cursor = BatchCursor::new(&source, table(), "Id", 2, None);
        assert!(cursor.next_page().await.unwrap().is_none());
    }
}
