//! PostgreSQL source adapter over tokio-postgres. TLS is attempted
//! first and dropped when the server does not offer it.

use crate::{
    adapter::SourceAdapter,
    auth::ResolvedAuth,
    dialect::{Dialect, PostgresDialect},
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
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::{str::FromStr, time::Duration};
use tokio_postgres::{Client, Config, NoTls, Row as PgRow};
use tracing::{debug, error, warn};

pub struct PostgresAdapter {
    client: Client,
    dialect: PostgresDialect,
    timeout: Duration,
}

impl PostgresAdapter {
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

        let mut config = Config::new();
        config
            .host(&descriptor.server)
            .port(descriptor.port.unwrap_or(5432))
            .dbname(&descriptor.database)
            .user(&creds.username)
            .password(&creds.password);

        let client = match connect_with_tls(config.clone()).await {
            Ok(client) => client,
            Err(err) => {
                warn!(%err, "Postgres TLS handshake failed, retrying without TLS");
                connect_without_tls(config).await?
            }
        };

        Ok(PostgresAdapter {
            client,
            dialect: PostgresDialect,
            timeout,
        })
    }

    async fn query(&self, sql: &str) -> Result<Vec<PgRow>, DbError> {
        debug!(sql, "postgres query");
        op_timeout(self.timeout, self.client.query(sql, &[])).await
    }
}

async fn connect_with_tls(config: Config) -> Result<Client, ConnectorError> {
    let connector = TlsConnector::builder().build()?;
    let tls = MakeTlsConnector::new(connector);
    let (client, connection) = config.connect(tls).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(%err, "Postgres connection error");
        }
    });
    Ok(client)
}

async fn connect_without_tls(config: Config) -> Result<Client, ConnectorError> {
    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(%err, "Postgres connection error");
        }
    });
    Ok(client)
}

pub(crate) fn decode_row(row: &PgRow) -> RowData {
    let columns = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| ColumnValue {
            name: col.name().to_string(),
            value: decode_column(row, idx, col.type_().name()),
        })
        .collect();
    RowData::new(columns)
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Value {
    match type_name {
        "bool" => row
            .try_get::<_, Option<bool>>(idx)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "int2" => row
            .try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),
        "int4" => row
            .try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),
        "int8" => row
            .try_get::<_, Option<i64>>(idx)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),
        "float8" => row
            .try_get::<_, Option<f64>>(idx)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),
        "numeric" => row
            .try_get::<_, Option<rust_decimal::Decimal>>(idx)
            .ok()
            .flatten()
            .and_then(|v| BigDecimal::from_str(&v.to_string()).ok())
            .map(Value::Decimal)
            .unwrap_or(Value::Null),
        "date" => row
            .try_get::<_, Option<chrono::NaiveDate>>(idx)
            .ok()
            .flatten()
            .map(Value::Date)
            .unwrap_or(Value::Null),
        "timestamp" => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        "timestamptz" => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .ok()
            .flatten()
            .map(Value::utc_datetime)
            .unwrap_or(Value::Null),
        "uuid" => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .ok()
            .flatten()
            .map(Value::Uuid)
            .unwrap_or(Value::Null),
        "bytea" => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),
        "json" | "jsonb" => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::Text(v.to_string()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<_, Option<String>>(idx)
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
impl SourceAdapter for PostgresAdapter {
    async fn list_columns(&self, table: &TableRef) -> Result<Vec<String>, DbError> {
        let sql = format!(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = '{}' AND table_name = '{}' \
             ORDER BY ordinal_position",
            escape_str(&table.schema),
            escape_str(&table.table)
        );
        let rows = self.query(&sql).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<_, String>(0).ok())
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
        let count: i64 = rows
            .first()
            .and_then(|row| row.try_get::<_, i64>(0).ok())
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    async fn distinct_count(&self, table: &TableRef, column: &str) -> Result<u64, DbError> {
        let sql = format!(
            "SELECT COUNT(DISTINCT {}) FROM {}",
            self.dialect.quote_identifier(column),
            self.dialect.quote_table(table)
        );
        let rows = self.query(&sql).await?;
        let count: i64 = rows
            .first()
            .and_then(|row| row.try_get::<_, i64>(0).ok())
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
