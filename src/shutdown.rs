use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

/// A cooperative shutdown handle shared across the app.
///
/// `shutdown()` fires the signal once; every clone observes it. There are two
/// distinct wait points: `await_shutdown_begin()` resolves the instant the
/// signal fires (supervised background tasks use this to stop retrying and
/// exit), while `await_shutdown()` resolves `shutdown_delay` after that, so
/// the HTTP server keeps accepting in-flight requests a little longer before
/// `axum::serve(...).with_graceful_shutdown(...)` stops it. `shutdown_timeout`
/// is the outer bound the caller should use to force-abort tasks that ignore
/// the signal.
#[derive(Clone)]
pub struct Shutdown {
    sender:          watch::Sender<bool>,
    receiver:        watch::Receiver<bool>,
    shutdown_timeout: Duration,
    shutdown_delay:   Duration,
}

impl Shutdown {
    /// Creates a new shutdown handle and starts watching for SIGINT/SIGTERM.
    #[must_use]
    pub fn spawn(shutdown_timeout: Duration, shutdown_delay: Duration) -> Self {
        let (sender, receiver) = watch::channel(false);

        let handle = Self {
            sender,
            receiver,
            shutdown_timeout,
            shutdown_delay,
        };

        handle.clone().watch_signals();

        handle
    }

    fn watch_signals(self) {
        tokio::spawn(async move {
            if let Err(err) = signal_shutdown().await {
                error!(?err, "error waiting for shutdown signal");
            }
            self.shutdown();
        });
    }

    /// Signals every clone of this handle to begin shutting down.
    pub fn shutdown(&self) {
        // Does not fail because the channel never closes while `self` is alive.
        let _ = self.sender.send(true);
    }

    /// Are we currently shutting down?
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves as soon as the shutdown signal fires.
    ///
    /// Resolves immediately if already shutting down. Safe to cancel by
    /// dropping the future.
    pub async fn await_shutdown_begin(&self) {
        let mut receiver = self.receiver.clone();
        if *receiver.borrow_and_update() {
            return;
        }
        let _ = receiver.changed().await;
    }

    /// Resolves `shutdown_delay` after the shutdown signal fires, giving
    /// in-flight requests (and load balancer health probes) a grace window.
    pub async fn await_shutdown(&self) {
        self.await_shutdown_begin().await;
        tokio::time::sleep(self.shutdown_delay).await;
        info!("shutdown delay elapsed, stopping");
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

#[cfg(unix)]
async fn signal_shutdown() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => { info!("SIGINT received, shutting down"); }
        _ = sigterm.recv() => { info!("SIGTERM received, shutting down"); }
    };
    Ok(())
}

#[cfg(not(unix))]
async fn signal_shutdown() -> anyhow::Result<()> {
    use tokio::signal::ctrl_c;

    ctrl_c().await?;
    info!("Ctrl-C received, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::time::{sleep, Duration};

    use super::*;

    #[tokio::test]
    async fn shutdown_begin_resolves_immediately_on_signal() {
        let shutdown = Shutdown::spawn(Duration::from_secs(30), Duration::from_millis(50));
        let start = tokio::time::Instant::now();

        let waiter = shutdown.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            waiter.shutdown();
        });

        shutdown.await_shutdown_begin().await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn await_shutdown_waits_out_the_delay() {
        let shutdown = Shutdown::spawn(Duration::from_secs(30), Duration::from_millis(100));
        shutdown.shutdown();

        let start = tokio::time::Instant::now();
        shutdown.await_shutdown().await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn is_shutting_down_reflects_signal() {
        let shutdown = Shutdown::spawn(Duration::from_secs(30), Duration::from_millis(1));
        assert!(!shutdown.is_shutting_down());
        shutdown.shutdown();
        assert!(shutdown.is_shutting_down());
    }
}
