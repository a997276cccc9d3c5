use crate::{
    adapter::{SourceAdapter, TargetAdapter},
    auth,
    error::ConnectorError,
    mssql::MssqlAdapter,
    mysql::MySqlAdapter,
    oracle::OracleAdapter,
    postgres::PostgresAdapter,
};
use model::plan::connection::{ConnectionDescriptor, Provider};
use std::time::Duration;
use tracing::info;

/// Opens a read connection for any of the five source providers.
pub async fn connect_source(
    descriptor: &ConnectionDescriptor,
    query_timeout: Duration,
) -> Result<Box<dyn SourceAdapter>, ConnectorError> {
    let resolved = auth::resolve(descriptor).await?;
    info!(
        provider = %descriptor.provider,
        server = %descriptor.server,
        "Opening source connection"
    );
    let adapter: Box<dyn SourceAdapter> = match descriptor.provider {
        Provider::SqlServer | Provider::AzureSql => {
            Box::new(MssqlAdapter::connect(descriptor, resolved, query_timeout).await?)
        }
        Provider::MySql => {
            Box::new(MySqlAdapter::connect(descriptor, resolved, query_timeout).await?)
        }
        Provider::PostgreSql => {
            Box::new(PostgresAdapter::connect(descriptor, resolved, query_timeout).await?)
        }
        Provider::Oracle => {
            Box::new(OracleAdapter::connect(descriptor, resolved, query_timeout).await?)
        }
    };
    Ok(adapter)
}

/// Opens the write connection. Only SQL Server and Azure SQL are valid
/// targets.
pub async fn connect_target(
    descriptor: &ConnectionDescriptor,
    query_timeout: Duration,
) -> Result<Box<dyn TargetAdapter>, ConnectorError> {
    if !descriptor.provider.is_valid_target() {
        return Err(ConnectorError::InvalidTargetProvider(descriptor.provider));
    }
    let resolved = auth::resolve(descriptor).await?;
    info!(
        provider = %descriptor.provider,
        server = %descriptor.server,
        "Opening target connection"
    );
    Ok(Box::new(
        MssqlAdapter::connect(descriptor, resolved, query_timeout).await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::plan::connection::AuthMode;

    #[tokio::test]
    async fn target_must_be_sql_server_family() {
        let descriptor = ConnectionDescriptor {
            provider: Provider::MySql,
            server: "localhost".into(),
            port: None,
            database: "db".into(),
            auth: AuthMode::SqlAuth,
            username: Some("u".into()),
            password: Some("p".into()),
        };
        let result = connect_target(&descriptor, Duration::from_secs(5)).await;
        assert!(matches!(
            result,
            Err(ConnectorError::InvalidTargetProvider(Provider::MySql))
        ));
    }
}
