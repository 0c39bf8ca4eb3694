//! nofly core library: layer catalog, refresh pipeline and zone store.

pub mod config;
pub mod error;
pub mod models;
pub mod o11y;
pub mod refresh;
pub mod store;

pub use config::{AppConfig, FetcherConfig, PostgresConfig, RefreshConfig};
pub use error::{Error, Result, error_chain};
pub use models::{
    LayerCatalog, LayerDescriptor, NewZone, PointCheck, Zone, ZoneGeometry, validate_lng_lat,
};
pub use refresh::engine::RefreshEngine;
pub use refresh::error::{FetchError, PersistStage, RefreshError};
pub use refresh::fetcher::ArcGisFetcher;
pub use refresh::models::{LayerReport, RawFeature, RefreshReport};
pub use refresh::schedule::{RefreshScheduler, SchedulerHandle};
pub use refresh::traits::{FeatureSource, ZoneRefresh};
pub use store::memory::MemoryZoneStore;
pub use store::postgres::PgZoneStore;
pub use store::traits::{ZoneReplacement, ZoneStore};
