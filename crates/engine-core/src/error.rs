use connectors::error::DbError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyMapError {
    #[error("key-map table operation failed: {0}")]
    Db(#[from] DbError),

    #[error("key-map key exceeds the 450 character limit: `{0}`")]
    KeyTooLong(String),
}

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("failed to write status artefact {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read status artefact {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize status artefact: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("no prior progress artefact found for migration `{0}`")]
    NoPriorRun(String),
}
