use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use vendabot_agent::ReminderService;

/// Runs session expiry and both reminder sweeps every `interval`. The first
/// pass starts one interval after boot.
pub fn spawn_sweeps(
    reminders: Arc<ReminderService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            match reminders.run_all(Utc::now()).await {
                Ok(report) => info!(
                    event_name = "scheduler.sweep.completed",
                    expired = report.expired,
                    examined = report.examined,
                    sent = report.sent,
                    failed = report.failed,
                    "periodic sweep completed"
                ),
                Err(error) => {
                    warn!(event_name = "scheduler.sweep.failed", error = %error, "periodic sweep failed")
                }
            }
        }
        info!(event_name = "scheduler.sweep.stopped", "sweep scheduler stopped");
    })
}
