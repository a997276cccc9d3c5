use connectors::error::{ConnectorError, DbError};
use engine_core::error::{KeyMapError, StatusError};
use engine_processing::TransformError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("connection failed: {0}")]
    Connector(#[from] ConnectorError),

    #[error("database operation failed: {0}")]
    Db(#[from] DbError),

    #[error("key-map failure: {0}")]
    KeyMap(#[from] KeyMapError),

    #[error("status artefact failure: {0}")]
    Status(#[from] StatusError),

    #[error("transformation program failure: {0}")]
    Transform(#[from] TransformError),

    #[error("table `{table}` failed: {source}")]
    TableFailed {
        table: String,
        #[source]
        source: Box<MigrationError>,
    },

    #[error("cannot resume: {0}")]
    ResumeImpossible(String),

    #[error("shutdown requested")]
    Cancelled,
}
