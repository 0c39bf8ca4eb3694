use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path as FsPath;

/// Spatial reference of every persisted geometry (WGS 84).
pub const SRID: i32 = 4326;

/// One coordinate tuple as published by the feature service (x, y and optionally z/m).
pub type Position = Vec<f64>;
/// Closed ordered sequence of positions (polygon shell or hole).
pub type Ring = Vec<Position>;
/// Open ordered sequence of positions.
pub type Path = Vec<Position>;

/// Static configuration entry describing one remote geometry layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    /// Unique layer key, also stored on every zone produced from this layer.
    pub id: String,
    /// Path appended to the feature service base URL (e.g. `/UAV_fs/FeatureServer/3`).
    pub endpoint: String,
    /// Semantic type tag (e.g. `uav`, `national_park`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Attribute holding a human-readable zone name, if the layer has one.
    #[serde(default)]
    pub name_field: Option<String>,
}

impl LayerDescriptor {
    pub fn new(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        kind: impl Into<String>,
        name_field: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            kind: kind.into(),
            name_field: name_field.map(str::to_string),
        }
    }
}

/// Ordered, validated set of layer descriptors. Order is the refresh order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LayerCatalog {
    layers: Vec<LayerDescriptor>,
}

/// File form of a layer entry; the id is the mapping key.
#[derive(Debug, Deserialize)]
struct LayerEntry {
    endpoint: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name_field: Option<String>,
}

impl LayerCatalog {
    pub fn new(layers: Vec<LayerDescriptor>) -> Result<Self> {
        let mut seen = HashSet::new();
        for layer in &layers {
            if layer.id.trim().is_empty() {
                return Err(Error::InvalidInput("layer id is empty".to_string()));
            }
            if layer.endpoint.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "layer '{}' has an empty endpoint",
                    layer.id
                )));
            }
            if !seen.insert(layer.id.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate layer id '{}'",
                    layer.id
                )));
            }
        }
        Ok(Self { layers })
    }

    /// Drone restriction layers published by the Taiwan CAA drone GIS service.
    pub fn caa_default() -> Self {
        Self {
            layers: vec![
                LayerDescriptor::new("UAV", "/UAV_fs/FeatureServer/3", "uav", Some("空域名稱")),
                LayerDescriptor::new(
                    "National_Park",
                    "/National_Park_fs/FeatureServer/0",
                    "national_park",
                    Some("name_full"),
                ),
                LayerDescriptor::new(
                    "Temporary_Area",
                    "/Temporary_Area/FeatureServer/19",
                    "temporary",
                    Some("空域名稱"),
                ),
                LayerDescriptor::new(
                    "Commercial_Port",
                    "/Commercial_Port_fs/FeatureServer/4",
                    "commercial_port",
                    Some("名稱"),
                ),
                LayerDescriptor::new(
                    "Kinmen_Matsu",
                    "/Kinmen_Matsu_Drone_Zone_fs/FeatureServer/0",
                    "kinmen_matsu",
                    None,
                ),
            ],
        }
    }

    /// Parse a `{layer_id: {endpoint, type, name_field}}` mapping (YAML or JSON).
    ///
    /// Mapping order is kept as the refresh order.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let raw: serde_json::Map<String, serde_json::Value> =
            serde_yaml::from_str(s).map_err(|e| Error::backend("parse layer catalog", e))?;
        let mut layers = Vec::with_capacity(raw.len());
        for (id, value) in raw {
            let entry: LayerEntry = serde_json::from_value(value).map_err(|e| {
                Error::InvalidInput(format!("invalid layer entry '{id}': {e}"))
            })?;
            layers.push(LayerDescriptor {
                id,
                endpoint: entry.endpoint,
                kind: entry.kind,
                name_field: entry.name_field.filter(|f| !f.trim().is_empty()),
            });
        }
        Self::new(layers)
    }

    #[tracing::instrument(level = "debug")]
    pub fn from_file(path: &FsPath) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| Error::backend(format!("read layers file {}", path.display()), e))?;
        Self::from_yaml_str(&s)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LayerDescriptor> {
        self.layers.iter()
    }

    pub fn get(&self, id: &str) -> Option<&LayerDescriptor> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Canonical zone geometry, serialized as a GeoJSON geometry object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum ZoneGeometry {
    Polygon(Vec<Ring>),
    LineString(Path),
    MultiLineString(Vec<Path>),
}

impl ZoneGeometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            ZoneGeometry::Polygon(_) => "Polygon",
            ZoneGeometry::LineString(_) => "LineString",
            ZoneGeometry::MultiLineString(_) => "MultiLineString",
        }
    }

    /// GeoJSON text, as accepted by PostGIS `ST_GeomFromGeoJSON`.
    pub fn to_geojson(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::backend("serialize geometry", e))
    }

    pub fn from_geojson(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::backend("parse geojson geometry", e))
    }
}

/// A zone staged for insertion during a refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewZone {
    pub layer: String,
    pub name: Option<String>,
    pub properties: serde_json::Map<String, serde_json::Value>,
    pub geometry: ZoneGeometry,
}

impl NewZone {
    /// Attribute mapping serialized verbatim (key order preserved, non-ASCII kept as-is).
    pub fn properties_json(&self) -> Result<String> {
        serde_json::to_string(&self.properties)
            .map_err(|e| Error::backend("serialize zone properties", e))
    }
}

/// Persisted no-fly zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: i64,
    pub layer: String,
    pub name: Option<String>,
    pub properties: Option<serde_json::Value>,
    pub geometry: ZoneGeometry,
    pub created_at: DateTime<Utc>,
}

/// Answer to "does this point fall inside any zone?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointCheck {
    pub in_zone: bool,
    pub zone_ids: Vec<i64>,
}

impl PointCheck {
    pub fn from_ids(zone_ids: Vec<i64>) -> Self {
        Self {
            in_zone: !zone_ids.is_empty(),
            zone_ids,
        }
    }
}

/// Validate a WGS 84 longitude/latitude pair.
pub fn validate_lng_lat(lng: f64, lat: f64) -> Result<()> {
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(Error::InvalidInput(format!(
            "longitude out of range: {lng}"
        )));
    }
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(Error::InvalidInput(format!("latitude out of range: {lat}")));
    }
    Ok(())
}
