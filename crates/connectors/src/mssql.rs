//! SQL Server / Azure SQL adapter over tiberius. This is the only write
//! target the engine supports, and also serves as a read source.

use crate::{
    adapter::{SourceAdapter, TargetAdapter},
    auth::ResolvedAuth,
    dialect::{Dialect, SqlServerDialect},
    error::{ConnectorError, DbError},
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use model::{
    core::value::Value,
    plan::{connection::ConnectionDescriptor, table::TableRef},
    records::row::{ColumnValue, RowData},
};
use std::{future::Future, str::FromStr, time::Duration};
use tiberius::{AuthMethod, Client, ColumnType, Config, EncryptionLevel};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

/// Rows per multi-row INSERT statement; SQL Server rejects VALUES lists
/// longer than 1000.
pub const MAX_ROWS_PER_INSERT: usize = 1000;

pub struct MssqlAdapter {
    client: Mutex<Client<Compat<TcpStream>>>,
    dialect: SqlServerDialect,
    timeout: Duration,
}

impl MssqlAdapter {
    pub async fn connect(
        descriptor: &ConnectionDescriptor,
        auth: ResolvedAuth,
        timeout: Duration,
    ) -> Result<Self, ConnectorError> {
        let host = descriptor.server.clone();
        let port = descriptor.port.unwrap_or(1433);

        let mut config = Config::new();
        config.host(&host);
        config.port(port);
        config.database(&descriptor.database);
        config.authentication(match auth {
            ResolvedAuth::Sql(creds) => AuthMethod::sql_server(creds.username, creds.password),
            #[cfg(windows)]
            ResolvedAuth::Windows => AuthMethod::Integrated,
            #[cfg(not(windows))]
            ResolvedAuth::Windows => return Err(ConnectorError::WindowsAuthUnavailable),
            ResolvedAuth::AadToken(token) => AuthMethod::aad_token(token),
        });
        config.trust_cert();
        config.encryption(EncryptionLevel::Required);

        let addr = format!("{host}:{port}");
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|source| ConnectorError::Tcp { addr, source })?;
        tcp.set_nodelay(true)
            .map_err(|source| ConnectorError::Tcp {
                addr: format!("{host}:{port}"),
                source,
            })?;

        let client = Client::connect(config, tcp.compat_write()).await?;
        Ok(MssqlAdapter {
            client: Mutex::new(client),
            dialect: SqlServerDialect,
            timeout,
        })
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T, DbError>
    where
        F: Future<Output = Result<T, tiberius::error::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(DbError::from),
            Err(_) => Err(DbError::Timeout(self.timeout.as_secs())),
        }
    }

    async fn query(&self, sql: &str) -> Result<Vec<tiberius::Row>, DbError> {
        debug!(sql, "mssql query");
        let mut client = self.client.lock().await;
        self.with_timeout(async {
            client.simple_query(sql).await?.into_first_result().await
        })
        .await
    }

    async fn run(&self, sql: &str) -> Result<(), DbError> {
        debug!(sql, "mssql exec");
        let mut client = self.client.lock().await;
        self.with_timeout(async {
            client.simple_query(sql).await?.into_results().await?;
            Ok(())
        })
        .await
    }

    fn render_insert(&self, table: &TableRef, columns: &[String], rows: &[RowData]) -> String {
        let column_list = columns
            .iter()
            .map(|c| self.dialect.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let value_rows = rows
            .iter()
            .map(|row| {
                let cells = columns
                    .iter()
                    .map(|c| self.dialect.literal(&row.value_of(c)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({cells})")
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({column_list}) VALUES {value_rows}",
            self.dialect.quote_table(table)
        )
    }
}

pub(crate) fn decode_row(row: &tiberius::Row) -> RowData {
    let columns = row
        .columns()
        .iter()
        .map(|col| ColumnValue {
            name: col.name().to_string(),
            value: decode_column(row, col),
        })
        .collect();
    RowData::new(columns)
}

fn decode_column(row: &tiberius::Row, col: &tiberius::Column) -> Value {
    let name = col.name();
    match col.column_type() {
        ColumnType::Null => Value::Null,
        ColumnType::Bit | ColumnType::Bitn => row
            .try_get::<bool, _>(name)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        ColumnType::Int1 => row
            .try_get::<u8, _>(name)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),
        ColumnType::Int2 => row
            .try_get::<i16, _>(name)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),
        ColumnType::Int4 => row
            .try_get::<i32, _>(name)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),
        ColumnType::Int8 => row
            .try_get::<i64, _>(name)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),
        ColumnType::Intn => decode_intn(row, name),
        ColumnType::Float4 => row
            .try_get::<f32, _>(name)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),
        ColumnType::Float8 | ColumnType::Money | ColumnType::Money4 => row
            .try_get::<f64, _>(name)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),
        ColumnType::Floatn => {
            if let Ok(Some(v)) = row.try_get::<f64, _>(name) {
                Value::Float(v)
            } else if let Ok(Some(v)) = row.try_get::<f32, _>(name) {
                Value::Float(v as f64)
            } else {
                Value::Null
            }
        }
        ColumnType::Decimaln | ColumnType::Numericn => row
            .try_get::<bigdecimal03::BigDecimal, _>(name)
            .ok()
            .flatten()
            .and_then(|v| BigDecimal::from_str(&v.to_string()).ok())
            .map(Value::Decimal)
            .unwrap_or(Value::Null),
        ColumnType::Guid => row
            .try_get::<uuid::Uuid, _>(name)
            .ok()
            .flatten()
            .map(Value::Uuid)
            .unwrap_or(Value::Null),
        ColumnType::Daten => row
            .try_get::<chrono::NaiveDate, _>(name)
            .ok()
            .flatten()
            .map(Value::Date)
            .unwrap_or(Value::Null),
        ColumnType::Datetime
        | ColumnType::Datetime4
        | ColumnType::Datetimen
        | ColumnType::Datetime2 => row
            .try_get::<chrono::NaiveDateTime, _>(name)
            .ok()
            .flatten()
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        ColumnType::DatetimeOffsetn => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(name)
            .ok()
            .flatten()
            .map(Value::utc_datetime)
            .unwrap_or(Value::Null),
        ColumnType::BigBinary | ColumnType::BigVarBin | ColumnType::Image => row
            .try_get::<&[u8], _>(name)
            .ok()
            .flatten()
            .map(|v| Value::Bytes(v.to_vec()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<&str, _>(name)
            .ok()
            .flatten()
            .map(|v| Value::Text(v.to_string()))
            .unwrap_or(Value::Null),
    }
}

fn decode_intn(row: &tiberius::Row, name: &str) -> Value {
    if let Ok(Some(v)) = row.try_get::<i64, _>(name) {
        Value::Int(v)
    } else if let Ok(Some(v)) = row.try_get::<i32, _>(name) {
        Value::Int(v as i64)
    } else if let Ok(Some(v)) = row.try_get::<i16, _>(name) {
        Value::Int(v as i64)
    } else if let Ok(Some(v)) = row.try_get::<u8, _>(name) {
        Value::Int(v as i64)
    } else {
        Value::Null
    }
}

fn escape_str(text: &str) -> String {
    text.replace('\'', "''")
}

#[async_trait]
impl SourceAdapter for MssqlAdapter {
    async fn list_columns(&self, table: &TableRef) -> Result<Vec<String>, DbError> {
        TargetAdapter::list_columns(self, table).await
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, DbError> {
        TargetAdapter::table_exists(self, table).await
    }

    async fn row_count(&self, table: &TableRef) -> Result<u64, DbError> {
        let sql = format!(
            "SELECT COUNT_BIG(*) AS cnt FROM {}",
            self.dialect.quote_table(table)
        );
        let rows = self.query(&sql).await?;
        let count: i64 = rows
            .first()
            .and_then(|row| row.try_get::<i64, _>(0).ok().flatten())
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    async fn distinct_count(&self, table: &TableRef, column: &str) -> Result<u64, DbError> {
        let sql = format!(
            "SELECT COUNT_BIG(DISTINCT {}) FROM {}",
            self.dialect.quote_identifier(column),
            self.dialect.quote_table(table)
        );
        let rows = self.query(&sql).await?;
        let count: i64 = rows
            .first()
            .and_then(|row| row.try_get::<i64, _>(0).ok().flatten())
            .unwrap_or(0);
        Ok(count.max(0) as u64)
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
        Ok(())
    }
}

#[async_trait]
impl TargetAdapter for MssqlAdapter {
    async fn list_columns(&self, table: &TableRef) -> Result<Vec<String>, DbError> {
        let sql = format!(
            "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}' \
             ORDER BY ORDINAL_POSITION",
            escape_str(&table.schema),
            escape_str(&table.table)
        );
        let rows = self.query(&sql).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                row.try_get::<&str, _>(0)
                    .ok()
                    .flatten()
                    .map(|s| s.to_string())
            })
            .collect())
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool, DbError> {
        let sql = format!(
            "SELECT 1 FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}'",
            escape_str(&table.schema),
            escape_str(&table.table)
        );
        Ok(!self.query(&sql).await?.is_empty())
    }

    async fn identity_column_of(&self, table: &TableRef) -> Result<Option<String>, DbError> {
        let sql = format!(
            "SELECT c.name FROM sys.columns c \
             JOIN sys.tables t ON c.object_id = t.object_id \
             JOIN sys.schemas s ON t.schema_id = s.schema_id \
             WHERE s.name = '{}' AND t.name = '{}' AND c.is_identity = 1",
            escape_str(&table.schema),
            escape_str(&table.table)
        );
        let rows = self.query(&sql).await?;
        Ok(rows.first().and_then(|row| {
            row.try_get::<&str, _>(0)
                .ok()
                .flatten()
                .map(|s| s.to_string())
        }))
    }

    async fn exec(&self, sql: &str) -> Result<(), DbError> {
        self.run(sql).await
    }

    async fn query_rows(&self, sql: &str) -> Result<Vec<RowData>, DbError> {
        let rows = self.query(sql).await?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn insert_returning_identity(
        &self,
        table: &TableRef,
        columns: &[String],
        row: &RowData,
    ) -> Result<Value, DbError> {
        let insert = self.render_insert(table, columns, std::slice::from_ref(row));
        let sql = format!("{insert}; SELECT CAST(SCOPE_IDENTITY() AS BIGINT) AS new_key;");
        let rows = self.query(&sql).await?;
        rows.first()
            .and_then(|r| r.try_get::<i64, _>(0).ok().flatten())
            .map(Value::Int)
            .ok_or_else(|| {
                DbError::Unexpected(format!(
                    "insert into {} returned no generated identity",
                    self.dialect.quote_table(table)
                ))
            })
    }

    async fn insert_one(
        &self,
        table: &TableRef,
        columns: &[String],
        row: &RowData,
    ) -> Result<(), DbError> {
        let sql = self.render_insert(table, columns, std::slice::from_ref(row));
        self.run(&sql).await
    }

    async fn bulk_insert(
        &self,
        table: &TableRef,
        columns: &[String],
        rows: &[RowData],
    ) -> Result<(), DbError> {
        for chunk in rows.chunks(MAX_ROWS_PER_INSERT) {
            let sql = self.render_insert(table, columns, chunk);
            self.run(&sql).await?;
        }
        Ok(())
    }

    async fn set_identity_insert(&self, table: &TableRef, on: bool) -> Result<(), DbError> {
        let state = if on { "ON" } else { "OFF" };
        let sql = format!(
            "SET IDENTITY_INSERT {} {state}",
            self.dialect.quote_table(table)
        );
        self.run(&sql).await
    }

    async fn set_triggers_enabled(
        &self,
        table: &TableRef,
        enabled: bool,
    ) -> Result<(), DbError> {
        let verb = if enabled { "ENABLE" } else { "DISABLE" };
        let sql = format!(
            "ALTER TABLE {} {verb} TRIGGER ALL",
            self.dialect.quote_table(table)
        );
        self.run(&sql).await
    }

    async fn set_all_constraints_enabled(&self, enabled: bool) -> Result<(), DbError> {
        let sql = if enabled {
            "EXEC sp_MSforeachtable 'ALTER TABLE ? WITH CHECK CHECK CONSTRAINT ALL'"
        } else {
            "EXEC sp_MSforeachtable 'ALTER TABLE ? NOCHECK CONSTRAINT ALL'"
        };
        self.run(sql).await
    }

    async fn truncate_table(&self, table: &TableRef) -> Result<(), DbError> {
        let sql = format!("TRUNCATE TABLE {}", self.dialect.quote_table(table));
        self.run(&sql).await
    }

    async fn delete_all_rows(&self, table: &TableRef) -> Result<(), DbError> {
        let sql = format!("DELETE FROM {}", self.dialect.quote_table(table));
        self.run(&sql).await
    }

    async fn list_tables_with_prefix(&self, prefix: &str) -> Result<Vec<String>, DbError> {
        let sql = format!(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_TYPE = 'BASE TABLE' AND TABLE_NAME LIKE '{}%'",
            escape_str(prefix)
        );
        let rows = self.query(&sql).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                row.try_get::<&str, _>(0)
                    .ok()
                    .flatten()
                    .map(|s| s.to_string())
            })
            .collect())
    }

    async fn drop_table(&self, name: &str) -> Result<(), DbError> {
        let sql = format!("DROP TABLE {}", self.dialect.quote_identifier(name));
        self.run(&sql).await
    }

    async fn ping(&self) -> Result<(), DbError> {
        self.query(self.dialect.ping_query()).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), DbError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter_sql(columns: &[&str], rows: Vec<Vec<Value>>) -> String {
        let dialect = SqlServerDialect;
        let table = TableRef::new("dbo", "People");
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let rows: Vec<RowData> = rows
            .into_iter()
            .map(|cells| {
                RowData::new(
                    columns
                        .iter()
                        .zip(cells)
                        .map(|(name, value)| ColumnValue {
                            name: name.clone(),
                            value,
                        })
                        .collect(),
                )
            })
            .collect();
        // Mirror render_insert without a live connection.
        let column_list = columns
            .iter()
            .map(|c| dialect.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let value_rows = rows
            .iter()
            .map(|row| {
                let cells = columns
                    .iter()
                    .map(|c| dialect.literal(&row.value_of(c)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({cells})")
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({column_list}) VALUES {value_rows}",
            dialect.quote_table(&table)
        )
    }

    #[test]
    fn insert_sql_escapes_text() {
        let sql = adapter_sql(
            &["Name", "Age"],
            vec![vec![Value::Text("O'Brien".into()), Value::Int(40)]],
        );
        assert_eq!(
            sql,
            "INSERT INTO [dbo].[People] ([Name], [Age]) VALUES (N'O''Brien', 40)"
        );
    }

    #[test]
    fn insert_sql_multi_row() {
        let sql = adapter_sql(
            &["Id"],
            vec![vec![Value::Int(1)], vec![Value::Null], vec![Value::Int(3)]],
        );
        assert!(sql.ends_with("VALUES (1), (NULL), (3)"));
    }
}
