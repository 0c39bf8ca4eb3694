use crate::models::{Path, Ring};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ArcGIS REST geometry object. Only the ring and path encodings are understood;
/// any other keys (`x`/`y`, `spatialReference`, ...) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArcGisGeometry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rings: Option<Vec<Ring>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<Path>>,
}

impl ArcGisGeometry {
    pub fn from_rings(rings: Vec<Ring>) -> Self {
        Self {
            rings: Some(rings),
            paths: None,
        }
    }

    pub fn from_paths(paths: Vec<Path>) -> Self {
        Self {
            rings: None,
            paths: Some(paths),
        }
    }
}

/// One feature record returned by the feature service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFeature {
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub geometry: Option<ArcGisGeometry>,
}

/// In-body error object ArcGIS returns with HTTP 200.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceErrorBody {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One page of a `/query` response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FeaturePage {
    #[serde(default)]
    pub features: Vec<RawFeature>,
    #[serde(default, rename = "exceededTransferLimit")]
    pub exceeded_transfer_limit: bool,
    #[serde(default)]
    pub error: Option<ServiceErrorBody>,
}

/// Per-layer outcome of a refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerReport {
    pub layer: String,
    pub fetched: u64,
    pub written: u64,
    pub dropped: u64,
}

/// Outcome of one successful refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Zones written (and committed) by this cycle.
    pub written: u64,
    /// Features dropped because their geometry could not be converted.
    pub dropped: u64,
    pub layers: Vec<LayerReport>,
}
