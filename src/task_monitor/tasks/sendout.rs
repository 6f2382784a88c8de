use std::sync::Arc;

use tokio::time;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::app::App;
use crate::monitoring::Monitoring;

/// Periodically attempts an opportunistic batch transfer, coalescing
/// whatever payments have aged past `payment_max_delay`.
pub async fn sendout(app: Arc<App>) -> anyhow::Result<()> {
    let mut timer = time::interval(app.config.processor.sendout_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        timer.tick().await;
        info!("sendout driver woken due to timeout");

        app.sendout().await?;

        Monitoring::log_queues(&app.processor).await;
    }
}
