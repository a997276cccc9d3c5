use engine_config::ConfigError;
use engine_runtime::MigrationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("migration error: {0}")]
    Migration(MigrationError),

    #[error("validation reported errors")]
    ValidationInvalid,

    #[error("shutdown requested")]
    ShutdownRequested,
}

impl From<MigrationError> for CliError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::Cancelled => CliError::ShutdownRequested,
            other => CliError::Migration(other),
        }
    }
}
