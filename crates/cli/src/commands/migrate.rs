use crate::commands::{open_pool, CommandResult, FailureClass};
use vendabot_db::migrations;

pub fn run() -> CommandResult {
    CommandResult::execute("migrate", |config| async move {
        let pool = open_pool(&config).await?;
        let applied = migrations::run_pending(&pool).await.map_err(FailureClass::Migration.with());
        pool.close().await;
        applied.map(|()| "applied pending migrations".to_string())
    })
}
