//! Admin API.
//!
//! # Endpoints
//! - `GET /admin/status`: 200 when any worker is active, 503 otherwise
//! - `GET /admin/ready`: 200 when any worker is ready, 503 otherwise
//! - `GET /admin/workers`: worker process states
//! - `POST /admin/workers`: add a worker
//! - `DELETE /admin/workers`: remove a worker
//! - `POST /admin/reset`: restart the pool; new dispatches wait for it
//!
//! Every endpoint requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::pool::SharedPool;

#[derive(Clone)]
pub struct AdminState {
    pub pool: Arc<SharedPool>,
    pub api_key: String,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/ready", get(get_ready))
        .route(
            "/admin/workers",
            get(get_workers).post(add_worker).delete(remove_worker),
        )
        .route("/admin/reset", post(reset_pool))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
