use model::plan::connection::{AuthMode, Provider};
use thiserror::Error;

/// Connection-establishment failures.
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("{provider} does not accept authentication mode {auth}")]
    UnsupportedAuth { provider: Provider, auth: AuthMode },

    #[error("{0} is not a valid target provider; the target must be SqlServer or AzureSql")]
    InvalidTargetProvider(Provider),

    #[error("Windows authentication is only available on Windows hosts")]
    WindowsAuthUnavailable,

    #[error("failed to read credentials from the terminal: {0}")]
    CredentialPrompt(String),

    #[error("failed to obtain an Azure access token: {0}")]
    AzureToken(String),

    #[error("TCP connect to {addr} failed: {source}")]
    Tcp {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("SQL Server handshake failed: {0}")]
    Tds(#[from] tiberius::error::Error),

    #[error("MySQL connect failed: {0}")]
    MySql(#[from] mysql_async::Error),

    #[error("PostgreSQL connect failed: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("PostgreSQL TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("Oracle connect failed: {0}")]
    Oracle(#[from] ::oracle::Error),

    #[error("{0}")]
    Unexpected(String),
}

/// Failures of individual database operations after a connection exists.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("query timed out after {0} seconds")]
    Timeout(u64),

    #[error("SQL Server error: {0}")]
    Tds(#[from] tiberius::error::Error),

    #[error("MySQL error: {0}")]
    MySql(#[from] mysql_async::Error),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Oracle error: {0}")]
    Oracle(#[from] ::oracle::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Unexpected(String),
}

impl DbError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DbError::Timeout(_))
    }
}
