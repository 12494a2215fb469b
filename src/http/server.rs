//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the axum Router that sends every request to the gateway handler
//! - Wire up middleware (attributes, body limit, timeout, request ID, tracing)
//! - Serve the admin API on its own listener when enabled
//! - Stop accepting and drain on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::{setup_admin_router, AdminState};
use crate::config::GatewayConfig;
use crate::handler::{Handler, ResponseWriter};
use crate::http::attributes::attributes_middleware;
use crate::http::stream::StreamWriter;
use crate::pool::{SharedPool, WorkerPool};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<Handler>,
}

/// HTTP gateway in front of a worker pool.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    pool: Arc<SharedPool>,
}

impl HttpServer {
    pub fn new(config: GatewayConfig, pool: Arc<dyn WorkerPool>) -> Self {
        let pool = Arc::new(SharedPool::new(pool));
        let state = AppState {
            handler: Arc::new(Handler::new(&config, pool.clone())),
        };
        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            pool,
        }
    }

    /// Build the axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let mut router = Router::new()
            .route("/", any(gateway_handler))
            .route("/{*path}", any(gateway_handler))
            .with_state(state)
            .layer(middleware::from_fn(attributes_middleware));

        if let Some(limit) = config.http.max_request_bytes() {
            router = router.layer(RequestBodyLimitLayer::new(limit));
        }

        router
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Router serving gateway traffic, for embedding or tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn pool(&self) -> Arc<SharedPool> {
        self.pool.clone()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve until a shutdown signal is broadcast.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "http gateway starting");

        if self.config.admin.enabled {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            tracing::info!(address = %admin_listener.local_addr()?, "admin api listening");

            let admin = setup_admin_router(AdminState {
                pool: self.pool.clone(),
                api_key: self.config.admin.api_key.clone(),
            });
            let mut admin_shutdown = shutdown.resubscribe();
            tokio::spawn(async move {
                let served = axum::serve(admin_listener, admin)
                    .with_graceful_shutdown(async move {
                        let _ = admin_shutdown.recv().await;
                    })
                    .await;
                if let Err(err) = served {
                    tracing::error!(error = %err, "admin api stopped");
                }
            });
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("http gateway draining connections");
            })
            .await?;

        tracing::info!("http gateway stopped");
        Ok(())
    }
}

/// Hand the request to the gateway handler on its own task and return the
/// streamed response as soon as the head is committed.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let (mut writer, head) = StreamWriter::new();
    let handler = state.handler.clone();

    tokio::spawn(async move {
        // Failures are already written to the client and logged.
        let _ = handler.serve(request, peer, &mut writer).await;
        if let Err(err) = writer.finish().await {
            tracing::debug!(error = %err, "response stream closed early");
        }
    });

    match head.await {
        Ok(response) => response,
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "response head was never written").into_response(),
    }
}
