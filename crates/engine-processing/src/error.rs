use expression_engine::ExpressionError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("failed to compile `{target}` for {table}: {source}")]
    Compile {
        table: String,
        target: String,
        #[source]
        source: ExpressionError,
    },

    #[error("keyLookup target `{target}` references parent `{parent}` whose key map is not loaded")]
    MissingKeyMap { target: String, parent: String },
}
