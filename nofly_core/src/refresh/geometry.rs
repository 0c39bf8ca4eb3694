//! ArcGIS geometry -> canonical (GeoJSON) geometry.
//!
//! Rings map to a Polygon, a single path to a LineString and several paths to a
//! MultiLineString. Coordinates pass through untouched: no winding-order fixes and
//! no ring closing.

use crate::models::ZoneGeometry;
use crate::refresh::models::ArcGisGeometry;

/// Convert one vendor geometry. `None` means "unconvertible" and is not an error.
pub fn convert(geometry: &ArcGisGeometry) -> Option<ZoneGeometry> {
    if let Some(rings) = geometry.rings.as_ref().filter(|r| !r.is_empty()) {
        return Some(ZoneGeometry::Polygon(rings.clone()));
    }
    match geometry.paths.as_deref() {
        Some([path]) => Some(ZoneGeometry::LineString(path.clone())),
        Some(paths) if !paths.is_empty() => Some(ZoneGeometry::MultiLineString(paths.to_vec())),
        _ => None,
    }
}

/// Convert a feature's geometry; a feature without a geometry object is unconvertible.
pub fn convert_feature(geometry: Option<&ArcGisGeometry>) -> Option<ZoneGeometry> {
    geometry.and_then(convert)
}
