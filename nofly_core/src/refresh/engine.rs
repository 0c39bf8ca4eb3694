use crate::models::{LayerCatalog, LayerDescriptor, NewZone};
use crate::refresh::error::{PersistStage, RefreshError};
use crate::refresh::geometry;
use crate::refresh::models::{LayerReport, RawFeature, RefreshReport};
use crate::refresh::traits::{FeatureSource, ZoneRefresh};
use crate::store::traits::{ZoneReplacement, ZoneStore};
use crate::config::MAX_BATCH_SIZE;
use crate::error::error_chain;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Full-replacement refresh of the zone set.
///
/// One cycle fetches every configured layer in order, converts each feature and
/// writes the result through a single [`ZoneReplacement`]. The replacement is only
/// committed once every layer succeeded; any failure leaves the store untouched.
pub struct RefreshEngine {
    layers: Arc<LayerCatalog>,
    source: Arc<dyn FeatureSource>,
    store: Arc<dyn ZoneStore>,
    batch_size: usize,
    running: AtomicBool,
}

impl RefreshEngine {
    #[tracing::instrument(level = "debug", skip(layers, source, store))]
    pub fn new(
        layers: Arc<LayerCatalog>,
        source: Arc<dyn FeatureSource>,
        store: Arc<dyn ZoneStore>,
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(Error::InvalidInput(format!(
                "batch_size must be between 1 and {MAX_BATCH_SIZE}"
            )));
        }
        Ok(Self {
            layers,
            source,
            store,
            batch_size,
            running: AtomicBool::new(false),
        })
    }

    pub fn layers(&self) -> &LayerCatalog {
        &self.layers
    }

    /// True while a cycle holds the run lock.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn try_claim(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(&self.running))
    }

    /// Run one cycle. Fails fast with `AlreadyRunning` instead of queueing.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn refresh(&self) -> std::result::Result<RefreshReport, RefreshError> {
        let _guard = self.try_claim().ok_or(RefreshError::AlreadyRunning)?;

        let started_at = Utc::now();
        tracing::info!(%started_at, layers = self.layers.len(), "refresh cycle started");

        let mut tx = self
            .store
            .begin_replace()
            .await
            .map_err(RefreshError::persistence(PersistStage::Begin))?;

        match self.replace_all(tx.as_mut()).await {
            Ok(layers) => {
                tx.commit()
                    .await
                    .map_err(RefreshError::persistence(PersistStage::Commit))?;
                let report = RefreshReport {
                    started_at,
                    finished_at: Utc::now(),
                    written: layers.iter().map(|l| l.written).sum(),
                    dropped: layers.iter().map(|l| l.dropped).sum(),
                    layers,
                };
                tracing::info!(
                    %started_at,
                    written = report.written,
                    dropped = report.dropped,
                    "refresh cycle committed"
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(
                        error = %error_chain(&rollback_err),
                        "rollback after failed refresh failed"
                    );
                }
                tracing::error!(%started_at, error = %error_chain(&e), "refresh cycle rolled back");
                Err(e)
            }
        }
    }

    /// Fetch, convert and stage every layer inside the open replacement.
    async fn replace_all(
        &self,
        tx: &mut dyn ZoneReplacement,
    ) -> std::result::Result<Vec<LayerReport>, RefreshError> {
        let mut batch: Vec<NewZone> = Vec::with_capacity(self.batch_size);
        let mut reports = Vec::with_capacity(self.layers.len());

        for layer in self.layers.iter() {
            let features = self.source.fetch_layer(layer).await?;
            let mut report = LayerReport {
                layer: layer.id.clone(),
                fetched: features.len() as u64,
                written: 0,
                dropped: 0,
            };

            for feature in features {
                let Some(zone) = build_zone(layer, feature) else {
                    report.dropped += 1;
                    continue;
                };
                batch.push(zone);
                report.written += 1;
                if batch.len() >= self.batch_size {
                    flush(tx, &mut batch).await?;
                }
            }

            if report.dropped > 0 {
                tracing::debug!(
                    layer = %layer.id,
                    dropped = report.dropped,
                    "dropped features without convertible geometry"
                );
            }
            reports.push(report);
        }

        flush(tx, &mut batch).await?;
        Ok(reports)
    }
}

/// Releases the run flag when the cycle ends, including on panic or cancellation.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn flush(
    tx: &mut dyn ZoneReplacement,
    batch: &mut Vec<NewZone>,
) -> std::result::Result<(), RefreshError> {
    if batch.is_empty() {
        return Ok(());
    }
    tx.insert_batch(batch.as_slice())
        .await
        .map_err(RefreshError::persistence(PersistStage::Insert))?;
    batch.clear();
    Ok(())
}

/// Stage one feature, or `None` when its geometry cannot be converted.
pub fn build_zone(layer: &LayerDescriptor, feature: RawFeature) -> Option<NewZone> {
    let geometry = geometry::convert_feature(feature.geometry.as_ref())?;
    let name = layer
        .name_field
        .as_deref()
        .and_then(|field| feature.attributes.get(field))
        .and_then(attribute_text);
    Some(NewZone {
        layer: layer.id.clone(),
        name,
        properties: feature.attributes,
        geometry,
    })
}

fn attribute_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl ZoneRefresh for RefreshEngine {
    async fn refresh(&self) -> std::result::Result<RefreshReport, RefreshError> {
        RefreshEngine::refresh(self).await
    }
}
