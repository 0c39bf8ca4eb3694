use crate::routes;
use axum::{Extension, Router};
use nofly_core::{RefreshEngine, RefreshScheduler, ZoneStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ZoneStore>,
    /// Shared with the background scheduler so on-demand and scheduled cycles
    /// contend for the same run flag.
    pub engine: Arc<RefreshEngine>,
    pub started_at: Instant,
}

impl AppState {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(store: Arc<dyn ZoneStore>, engine: Arc<RefreshEngine>) -> Self {
        Self {
            store,
            engine,
            started_at: Instant::now(),
        }
    }
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router(state: AppState) -> Router {
    let request_id = axum::http::HeaderName::from_static("x-request-id");
    Router::new()
        .merge(routes::router())
        .layer(Extension(Arc::new(state)))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Serve the API until ctrl-c. With `refresh_interval` set, a background
/// scheduler runs refresh cycles for the lifetime of the server.
#[tracing::instrument(level = "info", skip_all, fields(%addr))]
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    refresh_interval: Option<Duration>,
) -> anyhow::Result<()> {
    let scheduler = match refresh_interval {
        Some(interval) => {
            tracing::info!(
                interval_secs = interval.as_secs(),
                "refresh scheduler started"
            );
            Some(RefreshScheduler::start(state.engine.clone(), interval))
        }
        None => {
            tracing::info!("refresh scheduler disabled (NOFLY_SCHEDULER_ENABLED=false)");
            None
        }
    };

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = scheduler {
        handle.shutdown().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
