use crate::server::AppState;
use axum::Extension;
use axum::Json;
use axum::routing::get;
use nofly_core::LayerDescriptor;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct LayersResponse {
    pub count: usize,
    pub layers: Vec<LayerDescriptor>,
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> axum::Router {
    axum::Router::new().route("/layers", get(list_layers))
}

/// Configured layers in refresh order.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn list_layers(Extension(state): Extension<Arc<AppState>>) -> Json<LayersResponse> {
    let layers: Vec<LayerDescriptor> = state.engine.layers().iter().cloned().collect();
    Json(LayersResponse {
        count: layers.len(),
        layers,
    })
}
