use crate::error::DbError;
use std::{future::Future, time::Duration};

/// Applies the configured query timeout to a driver operation. Timeout
/// errors are fatal for the current table and propagate as such.
pub(crate) async fn op_timeout<T, E, F>(timeout: Duration, fut: F) -> Result<T, DbError>
where
    E: Into<DbError>,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(DbError::Timeout(timeout.as_secs())),
    }
}
