use crate::Result;
use crate::models::{NewZone, Zone};
use async_trait::async_trait;

/// Persisted zone set.
///
/// Writes only happen through a [`ZoneReplacement`]; reads always observe the last
/// committed set.
#[async_trait]
pub trait ZoneStore: Send + Sync {
    /// Open a replacement unit of work. Every existing zone is deleted inside it.
    async fn begin_replace(&self) -> Result<Box<dyn ZoneReplacement>>;

    /// All zones ordered by id, optionally restricted to one layer.
    async fn list_zones(&self, layer: Option<&str>) -> Result<Vec<Zone>>;

    /// Ids (ascending) of zones whose geometry contains the point.
    async fn zones_containing(&self, lng: f64, lat: f64) -> Result<Vec<i64>>;
}

/// Open full-replacement transaction.
///
/// Nothing written here is visible to readers until `commit`. Dropping the value
/// without committing rolls back.
#[async_trait]
pub trait ZoneReplacement: Send {
    /// Stage a batch of zones. Returns the number of rows written.
    async fn insert_batch(&mut self, zones: &[NewZone]) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
