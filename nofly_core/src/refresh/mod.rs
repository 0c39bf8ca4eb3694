//! Zone refresh pipeline.
//!
//! Pulls every configured layer from the ArcGIS feature service, converts each
//! feature's geometry and replaces the stored zone set in one unit of work:
//! - `fetcher`: paginated layer download (`FeatureSource`)
//! - `geometry`: ArcGIS geometry to GeoJSON conversion
//! - `engine`: one full replacement cycle (`ZoneRefresh`)
//! - `schedule`: periodic cycles with a skip-if-busy policy

pub mod engine;
pub mod error;
pub mod fetcher;
pub mod geometry;
pub mod models;
pub mod schedule;
pub mod traits;
