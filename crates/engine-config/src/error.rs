use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path}: {source}")]
    Xml {
        path: String,
        #[source]
        source: quick_xml::DeError,
    },

    #[error("configuration for `{migration}` is structurally invalid:\n{}", errors.join("\n"))]
    Structural {
        migration: String,
        errors: Vec<String>,
    },
}
