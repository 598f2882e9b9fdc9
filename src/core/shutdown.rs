use std::future::Future;

use tokio::signal;
use tokio::sync::watch;

pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

/// Flips the returned receiver to `true` once `trigger` completes.
pub(crate) fn shutdown_on<F>(trigger: F) -> (watch::Sender<bool>, watch::Receiver<bool>)
where
    F: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = watch::channel(false);
    let notifier = tx.clone();
    tokio::spawn(async move {
        trigger.await;
        if notifier.send(true).is_err() {
            tracing::warn!("Failed to broadcast shutdown signal to background tasks");
        }
    });
    (tx, rx)
}

/// Shutdown channel driven by Ctrl-C / SIGTERM.
pub(crate) fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    shutdown_on(shutdown_signal())
}

/// Resolves once the receiver observes `true` (or the sender is gone).
pub(crate) async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
