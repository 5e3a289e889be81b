use chrono::Utc;

use crate::commands::{open_pool, CommandFailure, CommandResult, FailureClass};
use vendabot_core::config::AppConfig;
use vendabot_core::dispatch::{DispatchConfig, EventProcessingEngine};
use vendabot_core::domain::webhook_event::ProcessingStatus;
use vendabot_db::repositories::{SqlWebhookEventRepository, WebhookEventRepository};
use vendabot_db::{migrations, DbPool};

/// Moves up to `limit` failed events back to pending with a fresh attempt
/// budget. A running server picks them up on its next poll.
pub fn run(limit: u32) -> CommandResult {
    CommandResult::execute("requeue-failed", |config| async move {
        let pool = open_pool(&config).await?;
        let requeued = requeue(&pool, &config, limit).await;
        pool.close().await;
        requeued.map(|count| format!("requeued {count} failed events"))
    })
}

async fn requeue(pool: &DbPool, config: &AppConfig, limit: u32) -> Result<u32, CommandFailure> {
    migrations::run_pending(pool).await.map_err(FailureClass::Migration.with())?;

    let events = SqlWebhookEventRepository::new(pool.clone());
    let engine = EventProcessingEngine::with_config(DispatchConfig::from(&config.worker));
    let failed = events
        .list_by_status(ProcessingStatus::Failed, limit)
        .await
        .map_err(FailureClass::Repository.with())?;

    let mut requeued = 0;
    for event in failed {
        // Only failed events pass the engine's guard; anything else is skipped.
        let Ok(transition) = engine.requeue(event.clone(), Utc::now()) else { continue };
        if events
            .compare_and_swap(&event, &transition.event)
            .await
            .map_err(FailureClass::Repository.with())?
        {
            requeued += 1;
        }
    }
    Ok(requeued)
}
