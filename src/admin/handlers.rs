use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::pool::{PoolError, ProcessState};

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub version: &'static str,
    pub status: &'static str,
    pub workers: usize,
}

#[derive(Debug, Serialize)]
pub struct ActionResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    fn from_result(result: Result<(), PoolError>) -> (StatusCode, Json<Self>) {
        match result {
            Ok(()) => (StatusCode::OK, Json(Self { ok: true, error: None })),
            Err(err) => {
                tracing::error!(error = %err, "admin pool operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(Self {
                        ok: false,
                        error: Some(err.to_string()),
                    }),
                )
            }
        }
    }
}

fn report(healthy: bool, workers: usize, label: &'static str) -> (StatusCode, Json<HealthReport>) {
    let (status, text) = if healthy {
        (StatusCode::OK, label)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (
        status,
        Json(HealthReport {
            version: env!("CARGO_PKG_VERSION"),
            status: text,
            workers,
        }),
    )
}

/// 200 while at least one worker is ready or working.
pub async fn get_status(State(state): State<AdminState>) -> (StatusCode, Json<HealthReport>) {
    let workers = state.pool.workers().await;
    let active = workers.iter().any(|worker| worker.status.is_active());
    report(active, workers.len(), "operational")
}

/// 200 while at least one worker can take a request right now.
pub async fn get_ready(State(state): State<AdminState>) -> (StatusCode, Json<HealthReport>) {
    let workers = state.pool.workers().await;
    let ready = workers.iter().any(|worker| worker.status.is_ready());
    report(ready, workers.len(), "ready")
}

pub async fn get_workers(State(state): State<AdminState>) -> Json<Vec<ProcessState>> {
    Json(state.pool.workers().await)
}

pub async fn add_worker(State(state): State<AdminState>) -> (StatusCode, Json<ActionResult>) {
    ActionResult::from_result(state.pool.add_worker().await)
}

pub async fn remove_worker(State(state): State<AdminState>) -> (StatusCode, Json<ActionResult>) {
    ActionResult::from_result(state.pool.remove_worker().await)
}

pub async fn reset_pool(State(state): State<AdminState>) -> (StatusCode, Json<ActionResult>) {
    ActionResult::from_result(state.pool.reset().await)
}
