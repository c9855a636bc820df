//! Shutdown (SIGTERM/SIGINT) and reload (SIGHUP) signal handling.

use tokio::sync::watch;

/// Listens for OS signals; flips the shutdown channel when asked to stop.
pub struct SignalHandler {
    shutdown_tx: watch::Sender<bool>,
}

impl SignalHandler {
    /// Create a handler and a receiver that becomes `true` on shutdown.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    /// Run until a shutdown signal arrives. SIGHUP (unix) calls `reload_fn`
    /// and keeps running.
    pub async fn run<F>(self, reload_fn: F) -> std::io::Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sighup = signal(SignalKind::hangup())?;

            loop {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        res?;
                        tracing::info!("Received SIGINT, shutting down");
                        break;
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, shutting down");
                        break;
                    }
                    _ = sighup.recv() => {
                        tracing::info!("Received SIGHUP, reloading configuration");
                        reload_fn();
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = &reload_fn;
            tokio::signal::ctrl_c().await?;
            tracing::info!("Received Ctrl+C, shutting down");
        }

        self.shutdown();
        Ok(())
    }

    /// Trigger shutdown without an OS signal.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
