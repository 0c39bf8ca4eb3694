use crate::models::LayerDescriptor;
use crate::refresh::error::{FetchError, RefreshError};
use crate::refresh::models::{RawFeature, RefreshReport};
use async_trait::async_trait;

/// Retrieves every feature of a layer from a remote service.
///
/// Implementations return either the complete layer or an error; never a partial layer.
#[async_trait]
pub trait FeatureSource: Send + Sync {
    async fn fetch_layer(&self, layer: &LayerDescriptor) -> Result<Vec<RawFeature>, FetchError>;
}

/// Something that can run a full replacement cycle (driven by the scheduler and the API).
#[async_trait]
pub trait ZoneRefresh: Send + Sync {
    async fn refresh(&self) -> Result<RefreshReport, RefreshError>;
}
