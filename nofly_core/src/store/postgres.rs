//! PostGIS-backed zone store.

use crate::config::PostgresConfig;
use crate::models::{NewZone, SRID, Zone, ZoneGeometry};
use crate::store::traits::{ZoneReplacement, ZoneStore};
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};

const MIGRATION_0001: &str = include_str!("../../migrations/0001_no_fly_zones.sql");

#[derive(Clone)]
pub struct PgZoneStore {
    pool: PgPool,
}

impl PgZoneStore {
    #[tracing::instrument(level = "debug", skip(cfg))]
    pub async fn connect(cfg: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(cfg.acquire_timeout)
            .connect(&cfg.url)
            .await
            .map_err(|e| Error::backend_sqlx("connect", e))?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the PostGIS extension, the zone table and its indexes.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION_0001)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend_sqlx("apply migrations", e))?;
        Ok(())
    }

    fn zone_from_row(row: &PgRow) -> Result<Zone> {
        let geometry: String = row
            .try_get("geometry")
            .map_err(|e| Error::backend_sqlx("geometry", e))?;
        let properties: Option<String> = row
            .try_get("properties")
            .map_err(|e| Error::backend_sqlx("properties", e))?;
        Ok(Zone {
            id: row.try_get("id").map_err(|e| Error::backend_sqlx("id", e))?,
            layer: row
                .try_get("layer")
                .map_err(|e| Error::backend_sqlx("layer", e))?,
            name: row
                .try_get("name")
                .map_err(|e| Error::backend_sqlx("name", e))?,
            // Rows written by other tools may hold non-JSON text.
            properties: properties.filter(|raw| !raw.is_empty()).map(|raw| {
                serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
            }),
            geometry: ZoneGeometry::from_geojson(&geometry)?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| Error::backend_sqlx("created_at", e))?,
        })
    }
}

struct PgReplacement {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ZoneReplacement for PgReplacement {
    #[tracing::instrument(level = "debug", skip(self, zones), fields(rows = zones.len()))]
    async fn insert_batch(&mut self, zones: &[NewZone]) -> Result<u64> {
        if zones.is_empty() {
            return Ok(0);
        }
        let mut rows = Vec::with_capacity(zones.len());
        for z in zones {
            rows.push((z, z.properties_json()?, z.geometry.to_geojson()?));
        }

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO no_fly_zones (layer, name, properties, geometry) ");
        qb.push_values(rows, |mut b, (zone, properties, geojson)| {
            b.push_bind(zone.layer.clone())
                .push_bind(zone.name.clone())
                .push_bind(properties)
                .push("ST_SetSRID(ST_GeomFromGeoJSON(")
                .push_bind_unseparated(geojson)
                .push_unseparated(format!("), {SRID})"));
        });
        let res = qb
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| Error::backend_sqlx("insert zones", e))?;
        Ok(res.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| Error::backend_sqlx("commit replacement", e))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| Error::backend_sqlx("rollback replacement", e))
    }
}

#[async_trait]
impl ZoneStore for PgZoneStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn begin_replace(&self) -> Result<Box<dyn ZoneReplacement>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::backend_sqlx("begin replacement", e))?;
        let deleted = sqlx::query("DELETE FROM no_fly_zones")
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::backend_sqlx("clear zones", e))?
            .rows_affected();
        tracing::debug!(deleted, "cleared zones inside replacement");
        Ok(Box::new(PgReplacement { tx }))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_zones(&self, layer: Option<&str>) -> Result<Vec<Zone>> {
        let rows = match layer {
            Some(layer) => {
                sqlx::query(
                    "SELECT id, layer, name, properties, ST_AsGeoJSON(geometry) AS geometry, created_at \
                     FROM no_fly_zones WHERE layer = $1 ORDER BY id",
                )
                .bind(layer)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, layer, name, properties, ST_AsGeoJSON(geometry) AS geometry, created_at \
                     FROM no_fly_zones ORDER BY id",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| Error::backend_sqlx("list zones", e))?;
        rows.iter().map(Self::zone_from_row).collect()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn zones_containing(&self, lng: f64, lat: f64) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT id FROM no_fly_zones \
             WHERE ST_Contains(geometry, ST_SetSRID(ST_MakePoint($1, $2), 4326)) \
             ORDER BY id",
        )
        .bind(lng)
        .bind(lat)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend_sqlx("check point", e))?;
        rows.iter()
            .map(|r| r.try_get("id").map_err(|e| Error::backend_sqlx("id", e)))
            .collect()
    }
}
