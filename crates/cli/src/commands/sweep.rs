use chrono::Utc;

use crate::commands::{CommandResult, FailureClass};
use vendabot_server::bootstrap::bootstrap_with_config;

/// One pass of the scheduler's work: expiry, abandoned carts, unpaid orders.
pub fn run() -> CommandResult {
    CommandResult::execute("sweep", |config| async move {
        let app = bootstrap_with_config(config).await.map_err(FailureClass::Bootstrap.with())?;
        let report = app.reminders.run_all(Utc::now()).await.map_err(FailureClass::Sweep.with());
        app.db_pool.close().await;
        let report = report?;
        Ok(format!(
            "expired {} sessions; examined {}, sent {}, failed {} reminders",
            report.expired, report.examined, report.sent, report.failed
        ))
    })
}
