use axum::Router;
use axum::routing::get;

pub mod health;
pub mod layers;
pub mod zones;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> Router {
    Router::new()
        .route("/health", get(health::get_health))
        .merge(layers::router())
        .merge(zones::router())
}
