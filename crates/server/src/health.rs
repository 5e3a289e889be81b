use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use vendabot_db::{ping, DbPool};

#[derive(Clone)]
struct HealthState {
    db_pool: DbPool,
    workers: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComponentCheck {
    pub name: &'static str,
    pub ready: bool,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub status: &'static str,
    pub version: &'static str,
    pub workers: u32,
    pub checks: Vec<ComponentCheck>,
    pub checked_at: DateTime<Utc>,
}

impl ReadinessReport {
    fn from_checks(workers: u32, checks: Vec<ComponentCheck>) -> Self {
        let ready = checks.iter().all(|check| check.ready);
        Self {
            status: if ready { "ready" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            workers,
            checks,
            checked_at: Utc::now(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

pub fn router(db_pool: DbPool, workers: u32) -> Router {
    Router::new().route("/health", get(readiness)).with_state(HealthState { db_pool, workers })
}

async fn readiness(State(state): State<HealthState>) -> (StatusCode, Json<ReadinessReport>) {
    let report = ReadinessReport::from_checks(
        state.workers,
        vec![
            ComponentCheck {
                name: "service",
                ready: true,
                detail: format!("{} event workers configured", state.workers),
            },
            database_check(&state.db_pool).await,
        ],
    );
    let code = if report.is_ready() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(report))
}

async fn database_check(pool: &DbPool) -> ComponentCheck {
    match ping(pool).await {
        Ok(()) => ComponentCheck { name: "database", ready: true, detail: "reachable".to_string() },
        Err(error) => ComponentCheck {
            name: "database",
            ready: false,
            detail: format!("ping failed: {error}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;
    use vendabot_db::connect_with_settings;

    use super::router;

    async fn get_health(pool: vendabot_db::DbPool) -> (StatusCode, Value) {
        let response = router(pool, 4)
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    #[tokio::test]
    async fn reachable_database_reports_ready() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");

        let (status, report) = get_health(pool.clone()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["status"], "ready");
        assert_eq!(report["workers"], 4);
        assert_eq!(report["checks"][1]["name"], "database");
        assert_eq!(report["checks"][1]["ready"], true);

        pool.close().await;
    }

    #[tokio::test]
    async fn closed_pool_degrades_readiness() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        pool.close().await;

        let (status, report) = get_health(pool).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report["status"], "degraded");
        assert_eq!(report["checks"][0]["ready"], true);
        assert_eq!(report["checks"][1]["ready"], false);
    }
}
