//! In-process zone store for local development and tests.
//!
//! Mirrors the Postgres store's unit-of-work semantics: a replacement stages rows
//! privately and swaps them in atomically on commit.

use crate::Result;
use crate::models::{NewZone, Position, Ring, Zone, ZoneGeometry};
use crate::store::traits::{ZoneReplacement, ZoneStore};
use async_trait::async_trait;
use chrono::Utc;
use geo::Contains;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug)]
struct MemoryState {
    zones: Vec<Zone>,
    next_id: i64,
    commits: u64,
    #[cfg(test)]
    last_batch_sizes: Vec<usize>,
}

#[derive(Clone)]
pub struct MemoryZoneStore {
    state: Arc<RwLock<MemoryState>>,
}

impl Default for MemoryZoneStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryZoneStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState {
                zones: Vec::new(),
                next_id: 1,
                commits: 0,
                #[cfg(test)]
                last_batch_sizes: Vec::new(),
            })),
        }
    }

    /// Number of committed replacements.
    pub async fn commits(&self) -> u64 {
        self.state.read().await.commits
    }

    /// Batch sizes written by the most recent committed replacement.
    #[cfg(test)]
    pub(crate) async fn batch_sizes(&self) -> Vec<usize> {
        self.state.read().await.last_batch_sizes.clone()
    }
}

struct MemoryReplacement {
    state: Arc<RwLock<MemoryState>>,
    staged: Vec<NewZone>,
    #[cfg(test)]
    batch_sizes: Vec<usize>,
}

#[async_trait]
impl ZoneReplacement for MemoryReplacement {
    async fn insert_batch(&mut self, zones: &[NewZone]) -> Result<u64> {
        self.staged.extend_from_slice(zones);
        #[cfg(test)]
        self.batch_sizes.push(zones.len());
        Ok(zones.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut state = this.state.write().await;
        let created_at = Utc::now();
        let mut zones = Vec::with_capacity(this.staged.len());
        for z in this.staged {
            let id = state.next_id;
            state.next_id += 1;
            zones.push(Zone {
                id,
                layer: z.layer,
                name: z.name,
                properties: Some(serde_json::Value::Object(z.properties)),
                geometry: z.geometry,
                created_at,
            });
        }
        state.zones = zones;
        state.commits += 1;
        #[cfg(test)]
        {
            state.last_batch_sizes = this.batch_sizes;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ZoneStore for MemoryZoneStore {
    async fn begin_replace(&self) -> Result<Box<dyn ZoneReplacement>> {
        Ok(Box::new(MemoryReplacement {
            state: self.state.clone(),
            staged: Vec::new(),
            #[cfg(test)]
            batch_sizes: Vec::new(),
        }))
    }

    async fn list_zones(&self, layer: Option<&str>) -> Result<Vec<Zone>> {
        let state = self.state.read().await;
        Ok(state
            .zones
            .iter()
            .filter(|z| layer.is_none_or(|l| z.layer == l))
            .cloned()
            .collect())
    }

    async fn zones_containing(&self, lng: f64, lat: f64) -> Result<Vec<i64>> {
        let point = geo::Point::new(lng, lat);
        let state = self.state.read().await;
        Ok(state
            .zones
            .iter()
            .filter(|z| contains(&z.geometry, &point))
            .map(|z| z.id)
            .collect())
    }
}

fn line(positions: &[Position]) -> geo::LineString<f64> {
    positions
        .iter()
        .filter(|p| p.len() >= 2)
        .map(|p| geo::Coord { x: p[0], y: p[1] })
        .collect()
}

fn polygon(rings: &[Ring]) -> Option<geo::Polygon<f64>> {
    let (shell, holes) = rings.split_first()?;
    Some(geo::Polygon::new(
        line(shell),
        holes.iter().map(|h| line(h)).collect(),
    ))
}

/// Point-in-geometry test matching PostGIS `ST_Contains` for the supported types.
fn contains(geometry: &ZoneGeometry, point: &geo::Point<f64>) -> bool {
    match geometry {
        ZoneGeometry::Polygon(rings) => polygon(rings).is_some_and(|p| p.contains(point)),
        ZoneGeometry::LineString(path) => line(path).contains(point),
        ZoneGeometry::MultiLineString(paths) => paths.iter().any(|p| line(p).contains(point)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(layer: &str, geometry: ZoneGeometry) -> NewZone {
        NewZone {
            layer: layer.to_string(),
            name: None,
            properties: serde_json::Map::new(),
            geometry,
        }
    }

    fn square() -> ZoneGeometry {
        ZoneGeometry::Polygon(vec![vec![
            vec![0.0, 0.0],
            vec![0.0, 10.0],
            vec![10.0, 10.0],
            vec![10.0, 0.0],
            vec![0.0, 0.0],
        ]])
    }

    async fn load(store: &MemoryZoneStore, zones: &[NewZone]) {
        let mut tx = store.begin_replace().await.unwrap();
        tx.insert_batch(zones).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn square_contains_center_only() {
        let store = MemoryZoneStore::new();
        load(&store, &[zone("UAV", square())]).await;
        let id = store.list_zones(None).await.unwrap()[0].id;

        assert_eq!(store.zones_containing(5.0, 5.0).await.unwrap(), vec![id]);
        assert!(store.zones_containing(20.0, 20.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn holes_are_excluded() {
        let store = MemoryZoneStore::new();
        let with_hole = ZoneGeometry::Polygon(vec![
            vec![
                vec![0.0, 0.0],
                vec![0.0, 10.0],
                vec![10.0, 10.0],
                vec![10.0, 0.0],
                vec![0.0, 0.0],
            ],
            vec![
                vec![4.0, 4.0],
                vec![6.0, 4.0],
                vec![6.0, 6.0],
                vec![4.0, 6.0],
                vec![4.0, 4.0],
            ],
        ]);
        load(&store, &[zone("UAV", with_hole)]).await;
        assert!(store.zones_containing(5.0, 5.0).await.unwrap().is_empty());
        assert_eq!(store.zones_containing(1.0, 1.0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn uncommitted_replacement_is_invisible() {
        let store = MemoryZoneStore::new();
        load(&store, &[zone("UAV", square())]).await;
        let before = store.list_zones(None).await.unwrap();

        let mut tx = store.begin_replace().await.unwrap();
        tx.insert_batch(&[zone("Temporary_Area", square())])
            .await
            .unwrap();
        assert_eq!(store.list_zones(None).await.unwrap(), before);
        drop(tx);

        assert_eq!(store.list_zones(None).await.unwrap(), before);
        assert_eq!(store.commits().await, 1);
    }

    #[tokio::test]
    async fn ids_keep_increasing_across_replacements() {
        let store = MemoryZoneStore::new();
        load(&store, &[zone("A", square()), zone("B", square())]).await;
        load(&store, &[zone("A", square())]).await;
        let zones = store.list_zones(None).await.unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].id, 3);
    }

    #[tokio::test]
    async fn list_filters_by_layer() {
        let store = MemoryZoneStore::new();
        let line = ZoneGeometry::LineString(vec![vec![0.0, 0.0], vec![1.0, 1.0]]);
        load(&store, &[zone("A", square()), zone("B", line), zone("A", square())]).await;
        let only_a = store.list_zones(Some("A")).await.unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|z| z.layer == "A"));
        assert!(store.list_zones(Some("missing")).await.unwrap().is_empty());
    }
}
