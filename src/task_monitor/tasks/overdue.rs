use std::sync::Arc;

use tokio::time;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::app::App;

/// Periodically sweeps the awaiting set for payments that have sat
/// unconfirmed past `payment_deadline`, promoting them to `overdue`.
pub async fn overdue(app: Arc<App>) -> anyhow::Result<()> {
    let mut timer = time::interval(app.config.processor.overdue_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        timer.tick().await;
        info!("overdue driver woken due to timeout");

        app.processor.update_overdue().await?;
    }
}
