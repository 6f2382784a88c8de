use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::select;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::App;
use crate::shutdown::Shutdown;

pub mod tasks;

const SENDOUT_BACKOFF: Duration = Duration::from_secs(5);
const OVERDUE_BACKOFF: Duration = Duration::from_secs(5);

/// A task manager for all long running tasks.
///
/// It's assumed that there is only one instance at a time. Spawning multiple
/// `TaskMonitor`s will result in undefined behavior, including duplicate
/// batch submissions.
pub struct TaskMonitor;

impl TaskMonitor {
    /// Initialize and run the task monitor.
    pub async fn init(main_app: Arc<App>, shutdown: Shutdown) {
        let handles = FuturesUnordered::new();

        // Periodic opportunistic sendout
        let app = main_app.clone();
        let sendout = move || tasks::sendout::sendout(app.clone());
        let sendout_handle = crate::utils::spawn_with_backoff_cancel_on_shutdown(
            sendout,
            SENDOUT_BACKOFF,
            shutdown.clone(),
        );
        handles.push(sendout_handle);

        // Periodic overdue sweep
        let app = main_app.clone();
        let overdue = move || tasks::overdue::overdue(app.clone());
        let overdue_handle = crate::utils::spawn_with_backoff_cancel_on_shutdown(
            overdue,
            OVERDUE_BACKOFF,
            shutdown.clone(),
        );
        handles.push(overdue_handle);

        // Confirmation worker: drains confirmed/failed transaction receipts
        // for as long as the channel stays open. There's only ever one of
        // these, so it isn't retried through `spawn_with_backoff` — if it
        // exits, the whole process should go down with it.
        let processor = main_app.processor.clone();
        let confirmation_receiver = main_app.take_confirmation_receiver().await;
        let confirmation_handle = tokio::spawn(async move {
            if let Err(error) = processor.run_confirmation_worker(confirmation_receiver).await {
                error!(?error, "confirmation worker exited with an error");
            }
        });
        handles.push(confirmation_handle);

        tokio::spawn(Self::monitor_shutdown(handles, shutdown.clone()));
    }

    async fn monitor_shutdown(mut handles: FuturesUnordered<JoinHandle<()>>, shutdown: Shutdown) {
        select! {
            // Wait for the shutdown signal
            _ = shutdown.await_shutdown_begin() => {}
            // Or wait for a task to panic
            _ = Self::await_task_panic(&mut handles, shutdown.clone()) => {}
        };
    }

    async fn await_task_panic(handles: &mut FuturesUnordered<JoinHandle<()>>, shutdown: Shutdown) {
        while let Some(result) = handles.next().await {
            if !shutdown.is_shutting_down() {
                match result {
                    Ok(()) => {
                        info!("task exited");
                    }
                    Err(error) => {
                        error!(?error, "task panicked");
                        // Instruct the rest of the app to shutdown
                        shutdown.clone().shutdown();
                        return;
                    }
                }
            }
        }
        warn!("all tasks have returned unexpectedly");
    }
}
