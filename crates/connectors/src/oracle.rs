//! Oracle source adapter. The driver is blocking, so every call runs on
//! the blocking pool via `spawn_blocking`.

use crate::{
    adapter::SourceAdapter,
    auth::ResolvedAuth,
    dialect::{Dialect, OracleDialect},
    error::{ConnectorError, DbError},
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use model::{
    core::value::Value,
    plan::{connection::ConnectionDescriptor, table::TableRef},
    records::row::{ColumnValue, RowData},
};
use oracle::{Connection, sql_type::OracleType};
use std::{
    str::FromStr,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::debug;

pub struct OracleAdapter {
    conn: Arc<Mutex<Connection>>,
    dialect: OracleDialect,
    timeout: Duration,
}

impl OracleAdapter {
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

        let connect_str = match descriptor.port {
            Some(port) => format!("//{}:{port}/{}", descriptor.server, descriptor.database),
            None => format!("//{}/{}", descriptor.server, descriptor.database),
        };

        let conn = tokio::task::spawn_blocking(move || {
            Connection::connect(creds.username, creds.password, connect_str)
        })
        .await
        .map_err(|e| ConnectorError::Unexpected(format!("connect task failed: {e}")))??;

        Ok(OracleAdapter {
            conn: Arc::new(Mutex::new(conn)),
            dialect: OracleDialect,
            timeout,
        })
    }

    async fn query(&self, sql: String) -> Result<Vec<RowData>, DbError> {
        debug!(sql, "oracle query");
        let conn = Arc::clone(&self.conn);
        let handle = tokio::task::spawn_blocking(move || -> Result<Vec<RowData>, DbError> {
            let conn = conn
                .lock()
                .map_err(|_| DbError::Unexpected("oracle connection mutex poisoned".into()))?;
            let rows = conn.query(&sql, &[])?;
            let mut decoded = Vec::new();
            for row in rows {
                decoded.push(decode_row(&row?));
            }
            Ok(decoded)
        });

        match tokio::time::timeout(self.timeout, handle).await {
            Ok(joined) => joined?,
            Err(_) => Err(DbError::Timeout(self.timeout.as_secs())),
        }
    }
}

pub(crate) fn decode_row(row: &oracle::Row) -> RowData {
    let columns = row
        .column_info()
        .iter()
        .enumerate()
        .map(|(idx, info)| ColumnValue {
            name: info.name().to_string(),
            value: decode_column(row, idx, info.oracle_type()),
        })
        .collect();
    RowData::new(columns)
}

fn decode_column(row: &oracle::Row, idx: usize, oracle_type: &OracleType) -> Value {
    match oracle_type {
        OracleType::Number(_, 0) | OracleType::Int64 | OracleType::UInt64 => row
            .get::<usize, Option<i64>>(idx)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),
        OracleType::Number(_, _) => row
            .get::<usize, Option<String>>(idx)
            .ok()
            .flatten()
            .and_then(|raw| BigDecimal::from_str(&raw).ok())
            .map(Value::Decimal)
            .unwrap_or(Value::Null),
        OracleType::Float(_) | OracleType::BinaryFloat | OracleType::BinaryDouble => row
            .get::<usize, Option<f64>>(idx)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),
        OracleType::Date
        | OracleType::Timestamp(_)
        | OracleType::TimestampTZ(_)
        | OracleType::TimestampLTZ(_) => row
            .get::<usize, Option<chrono::NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        OracleType::Boolean => row
            .get::<usize, Option<bool>>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        OracleType::Raw(_) | OracleType::LongRaw | OracleType::BLOB => row
            .get::<usize, Option<Vec<u8>>>(idx)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),
        _ => row
            .get::<usize, Option<String>>(idx)
            .ok()
            .flatten()
            .map(Value::Text)
            .unwrap_or(Value::Null),
    }
}

fn escape_str(text: &str) -> String {
    text.replace('\'', "''")
}

#[async_trait]
impl SourceAdapter for OracleAdapter {
    async fn list_columns(&self, table: &TableRef) -> Result<Vec<String>, DbError> {
        let sql = format!(
            "SELECT COLUMN_NAME FROM ALL_TAB_COLUMNS \
             WHERE OWNER = UPPER('{}') AND TABLE_NAME = UPPER('{}') \
             ORDER BY COLUMN_ID",
            escape_str(&table.schema),
            escape_str(&table.table)
        );
        let rows = self.query(sql).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.columns.first().and_then(|c| c.value.as_text()))
            .collect())
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, DbError> {
        let sql = format!(
            "SELECT 1 FROM ALL_TABLES \
             WHERE OWNER = UPPER('{}') AND TABLE_NAME = UPPER('{}')",
            escape_str(&table.schema),
            escape_str(&table.table)
        );
        Ok(!self.query(sql).await?.is_empty())
    }

    async fn row_count(&self, table: &TableRef) -> Result<u64, DbError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.dialect.quote_table(table));
        let rows = self.query(sql).await?;
        Ok(rows
            .first()
            .and_then(|row| row.columns.first())
            .and_then(|c| c.value.as_i64())
            .unwrap_or(0)
            .max(0) as u64)
    }

    async fn distinct_count(&self, table: &TableRef, column: &str) -> Result<u64, DbError> {
        let sql = format!(
            "SELECT COUNT(DISTINCT {}) FROM {}",
            self.dialect.quote_identifier(column),
            self.dialect.quote_table(table)
        );
        let rows = self.query(sql).await?;
        Ok(rows
            .first()
            .and_then(|row| row.columns.first())
            .and_then(|c| c.value.as_i64())
            .unwrap_or(0)
            .max(0) as u64)
    }

    async fn read_batch(
        &self,
        table: &TableRef,
        batch_column: &str,
        size: usize,
        after: Option<&Value>,
    ) -> Result<Vec<RowData>, DbError> {
        let sql = self.dialect.batch_select(table, batch_column, size, after);
        self.query(sql).await
    }

    async fn read_all(
        &self,
        table: &TableRef,
        order_by: Option<&str>,
    ) -> Result<Vec<RowData>, DbError> {
        let sql = self.dialect.select_all(table, order_by);
        self.query(sql).await
    }

    async fn ping(&self) -> Result<(), DbError> {
        self.query(self.dialect.ping_query().to_string())
            .await
            .map(|_| ())
    }

    async fn close(&self) -> Result<(), DbError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<(), DbError> {
            let conn = conn
                .lock()
                .map_err(|_| DbError::Unexpected("oracle connection mutex poisoned".into()))?;
            conn.close()?;
            Ok(())
        })
        .await?
    }
}
