//! MySQL source adapter over mysql_async.

use crate::{
    adapter::SourceAdapter,
    auth::ResolvedAuth,
    dialect::{Dialect, MySqlDialect},
    error::{ConnectorError, DbError},
    util::op_timeout,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use model::{
    core::value::Value,
    plan::{connection::ConnectionDescriptor, table::TableRef},
    records::row::{ColumnValue, RowData},
};
use mysql_async::{
    Pool, Row as MySqlRow,
    consts::{ColumnFlags, ColumnType},
    prelude::Queryable,
};
use std::time::Duration;
use tracing::debug;

pub struct MySqlAdapter {
    pool: Pool,
    dialect: MySqlDialect,
    timeout: Duration,
}

impl MySqlAdapter {
    pub async fn connect(
        descriptor: &ConnectionDescriptor,
        auth: ResolvedAuth,
        timeout: Duration,
    ) -> Result<Self, ConnectorError> {
        let ResolvedAuth::Sql(creds) = auth else {
            return Err(ConnectorError::UnsupportedAuth {
                provider: descriptor.provider,
                auth: descriptor.auth,
            });
        };

        let opts = mysql_async::OptsBuilder::default()
            .ip_or_hostname(descriptor.server.clone())
            .tcp_port(descriptor.port.unwrap_or(3306))
            .db_name(Some(descriptor.database.clone()))
            .user(Some(creds.username))
            .pass(Some(creds.password));
        let pool = Pool::new(opts);

        let adapter = MySqlAdapter {
            pool,
            dialect: MySqlDialect,
            timeout,
        };
        // Fail at connect time, not first query.
        adapter
            .ping()
            .await
            .map_err(|e| ConnectorError::MySql(mysql_async::Error::Other(e.to_string().into())))?;
        Ok(adapter)
    }

    async fn query(&self, sql: &str) -> Result<Vec<MySqlRow>, DbError> {
        debug!(sql, "mysql query");
        op_timeout(self.timeout, async {
            let mut conn = self.pool.get_conn().await?;
            conn.query::<MySqlRow, _>(sql).await
        })
        .await
    }
}

pub(crate) fn decode_row(row: &MySqlRow) -> RowData {
    let columns = row
        .columns_ref()
        .iter()
        .enumerate()
        .map(|(idx, col)| ColumnValue {
            name: col.name_str().into_owned(),
            value: decode_column(row, idx, col.column_type(), col.flags()),
        })
        .collect();
    RowData::new(columns)
}

fn decode_column(
    row: &MySqlRow,
    idx: usize,
    column_type: ColumnType,
    flags: ColumnFlags,
) -> Value {
    use ColumnType::*;
    match column_type {
        MYSQL_TYPE_NULL => Value::Null,
        MYSQL_TYPE_TINY | MYSQL_TYPE_SHORT | MYSQL_TYPE_LONG | MYSQL_TYPE_INT24
        | MYSQL_TYPE_LONGLONG | MYSQL_TYPE_YEAR => {
            if flags.contains(ColumnFlags::UNSIGNED_FLAG) {
                row.get_opt::<u64, _>(idx)
                    .and_then(|r| r.ok())
                    .map(|v| Value::Int(v as i64))
                    .unwrap_or(Value::Null)
            } else {
                row.get_opt::<i64, _>(idx)
                    .and_then(|r| r.ok())
                    .map(Value::Int)
                    .unwrap_or(Value::Null)
            }
        }
        MYSQL_TYPE_FLOAT | MYSQL_TYPE_DOUBLE => row
            .get_opt::<f64, _>(idx)
            .and_then(|r| r.ok())
            .map(Value::Float)
            .unwrap_or(Value::Null),
        MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL => row
            .get_opt::<BigDecimal, _>(idx)
            .and_then(|r| r.ok())
            .map(Value::Decimal)
            .unwrap_or(Value::Null),
        MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE => row
            .get_opt::<chrono::NaiveDate, _>(idx)
            .and_then(|r| r.ok())
            .map(Value::Date)
            .unwrap_or(Value::Null),
        MYSQL_TYPE_DATETIME | MYSQL_TYPE_DATETIME2 | MYSQL_TYPE_TIMESTAMP
        | MYSQL_TYPE_TIMESTAMP2 => row
            .get_opt::<chrono::NaiveDateTime, _>(idx)
            .and_then(|r| r.ok())
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        MYSQL_TYPE_BIT => row
            .get_opt::<Vec<u8>, _>(idx)
            .and_then(|r| r.ok())
            .map(|bytes| Value::Bool(bytes.iter().any(|b| *b != 0)))
            .unwrap_or(Value::Null),
        MYSQL_TYPE_TINY_BLOB | MYSQL_TYPE_MEDIUM_BLOB | MYSQL_TYPE_LONG_BLOB
        | MYSQL_TYPE_BLOB | MYSQL_TYPE_GEOMETRY => {
            // Binary columns carry the BINARY flag; text blobs decode as
            // strings.
            if flags.contains(ColumnFlags::BINARY_FLAG) {
                row.get_opt::<Vec<u8>, _>(idx)
                    .and_then(|r| r.ok())
                    .map(Value::Bytes)
                    .unwrap_or(Value::Null)
            } else {
                row.get_opt::<String, _>(idx)
                    .and_then(|r| r.ok())
                    .map(Value::Text)
                    .unwrap_or(Value::Null)
            }
        }
        _ => row
            .get_opt::<String, _>(idx)
            .and_then(|r| r.ok())
            .map(Value::Text)
            .unwrap_or(Value::Null),
    }
}

fn escape_str(text: &str) -> String {
    text.replace('\'', "''")
}

#[async_trait]
impl SourceAdapter for MySqlAdapter {
    async fn list_columns(&self, table: &TableRef) -> Result<Vec<String>, DbError> {
        let sql = format!(
            "SELECT COLUMN_NAME FROM information_schema.columns \
             WHERE table_schema = '{}' AND table_name = '{}' \
             ORDER BY ORDINAL_POSITION",
            escape_str(&table.schema),
            escape_str(&table.table)
        );
        let rows = self.query(&sql).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get_opt::<String, _>(0).and_then(|r| r.ok()))
            .collect())
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, DbError> {
        let sql = format!(
            "SELECT 1 FROM information_schema.tables \
             WHERE table_schema = '{}' AND table_name = '{}'",
            escape_str(&table.schema),
            escape_str(&table.table)
        );
        Ok(!self.query(&sql).await?.is_empty())
    }

    async fn row_count(&self, table: &TableRef) -> Result<u64, DbError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.dialect.quote_table(table));
        let rows = self.query(&sql).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get_opt::<u64, _>(0).and_then(|r| r.ok()))
            .unwrap_or(0))
    }

    async fn distinct_count(&self, table: &TableRef, column: &str) -> Result<u64, DbError> {
        let sql = format!(
            "SELECT COUNT(DISTINCT {}) FROM {}",
            self.dialect.quote_identifier(column),
            self.dialect.quote_table(table)
        );
        let rows = self.query(&sql).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get_opt::<u64, _>(0).and_then(|r| r.ok()))
            .unwrap_or(0))
    }

    async fn read_batch(
        &self,
        table: &TableRef,
        batch_column: &str,
        size: usize,
        after: Option<&Value>,
    ) -> Result<Vec<RowData>, DbError> {
        let sql = self.dialect.batch_select(table, batch_column, size, after);
        let rows = self.query(&sql).await?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn read_all(
        &self,
        table: &TableRef,
        order_by: Option<&str>,
    ) -> Result<Vec<RowData>, DbError> {
        let sql = self.dialect.select_all(table, order_by);
        let rows = self.query(&sql).await?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn ping(&self) -> Result<(), DbError> {
        self.query(self.dialect.ping_query()).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), DbError> {
        self.pool.clone().disconnect().await?;
        Ok(())
    }
}
