use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Installs SIGINT/SIGTERM handlers that cancel the run token. The
/// engine checks the token between batches, so the in-flight batch is
/// acknowledged before the run shuts down and the persisted cursor
/// stays truthful.
pub fn register_handlers(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install SIGINT handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), finishing the current batch");
            }
            _ = terminate => {
                info!("Received SIGTERM, finishing the current batch");
            }
        }

        cancel.cancel();
    });
}
