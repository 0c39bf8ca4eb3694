use crate::error::ApiError;
use crate::server::AppState;
use axum::Extension;
use axum::Json;
use axum::extract::Query;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::routing::{get, post};
use nofly_core::{PointCheck, RefreshReport, Zone, validate_lng_lat};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ListZonesQuery {
    #[serde(default)]
    pub layer: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ZonesResponse {
    pub count: usize,
    pub zones: Vec<Zone>,
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    #[serde(alias = "longitude")]
    pub lng: f64,
    #[serde(alias = "latitude")]
    pub lat: f64,
}

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/zones", get(list_zones))
        .route("/zones/check", post(check_point))
        .route("/zones/refresh", post(refresh_now))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn list_zones(
    Extension(state): Extension<Arc<AppState>>,
    query: Result<Query<ListZonesQuery>, QueryRejection>,
) -> Result<Json<ZonesResponse>, ApiError> {
    let Query(q) = query?;
    let layer = q.layer.as_deref().map(str::trim).filter(|l| !l.is_empty());
    let zones = state.store.list_zones(layer).await?;
    Ok(Json(ZonesResponse {
        count: zones.len(),
        zones,
    }))
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn check_point(
    Extension(state): Extension<Arc<AppState>>,
    body: Result<Json<CheckRequest>, JsonRejection>,
) -> Result<Json<PointCheck>, ApiError> {
    let Json(req) = body?;
    validate_lng_lat(req.lng, req.lat)?;
    let ids = state.store.zones_containing(req.lng, req.lat).await?;
    tracing::debug!(lng = req.lng, lat = req.lat, hits = ids.len(), "point checked");
    Ok(Json(PointCheck::from_ids(ids)))
}

/// Run one refresh cycle now and report its outcome.
///
/// The cycle runs on its own task, so a client that hangs up does not cancel it.
#[tracing::instrument(level = "info", skip_all)]
pub async fn refresh_now(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<RefreshReport>, ApiError> {
    let engine = state.engine.clone();
    let report = tokio::spawn(async move { engine.refresh().await })
        .await
        .map_err(|e| nofly_core::Error::backend("refresh task", e))??;
    Ok(Json(report))
}
