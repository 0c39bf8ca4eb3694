//! ArcGIS feature-service client.
//!
//! Pages through `{base}{endpoint}/query` with `resultOffset`/`resultRecordCount`
//! until the service stops reporting `exceededTransferLimit`.

use crate::config::FetcherConfig;
use crate::error::error_chain;
use crate::models::LayerDescriptor;
use crate::refresh::error::FetchError;
use crate::refresh::models::{FeaturePage, RawFeature};
use crate::refresh::traits::FeatureSource;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Instant;
use tracing::instrument;

#[derive(Clone)]
pub struct ArcGisFetcher {
    client: Client,
    config: FetcherConfig,
}

impl ArcGisFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| Error::backend("build feature service client", e))?;
        Ok(Self { client, config })
    }

    fn query_url(&self, layer: &LayerDescriptor) -> String {
        format!("{}{}/query", self.config.base_url, layer.endpoint)
    }

    async fn fetch_page(
        &self,
        url: &str,
        layer: &LayerDescriptor,
        page: u32,
        offset: u64,
    ) -> std::result::Result<FeaturePage, FetchError> {
        let resp = self
            .client
            .get(url)
            .query(&[
                ("where", "1=1".to_string()),
                ("outFields", "*".to_string()),
                ("returnGeometry", "true".to_string()),
                ("outSR", "4326".to_string()),
                ("resultOffset", offset.to_string()),
                ("resultRecordCount", self.config.page_size.to_string()),
                ("f", "json".to_string()),
            ])
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&layer.id, page, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                layer: layer.id.clone(),
                page,
                status: status.as_u16(),
            });
        }

        let body: FeaturePage = resp
            .json()
            .await
            .map_err(|e| FetchError::from_reqwest(&layer.id, page, e))?;

        // ArcGIS reports query errors in a 200 body; an empty layer must not be inferred from it.
        if let Some(err) = body.error {
            return Err(FetchError::Service {
                layer: layer.id.clone(),
                page,
                code: err.code,
                message: err.message.unwrap_or_default(),
            });
        }
        Ok(body)
    }

    /// One page, retried with exponential backoff on retryable failures.
    async fn fetch_page_with_retry(
        &self,
        url: &str,
        layer: &LayerDescriptor,
        page: u32,
        offset: u64,
    ) -> std::result::Result<FeaturePage, FetchError> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_page(url, layer, page, offset).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self
                        .config
                        .retry_backoff
                        .saturating_mul(1u32 << attempt.min(16));
                    tracing::warn!(
                        layer = %layer.id,
                        page,
                        offset,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error_chain(&e),
                        "feature page request failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl FeatureSource for ArcGisFetcher {
    #[instrument(level = "info", skip(self, layer), fields(layer = %layer.id))]
    async fn fetch_layer(
        &self,
        layer: &LayerDescriptor,
    ) -> std::result::Result<Vec<RawFeature>, FetchError> {
        let url = self.query_url(layer);
        let mut features: Vec<RawFeature> = Vec::new();
        let mut offset = 0u64;
        let mut page = 0u32;

        loop {
            page += 1;
            let started = Instant::now();
            let body = self.fetch_page_with_retry(&url, layer, page, offset).await?;
            let count = body.features.len();

            tracing::info!(
                layer = %layer.id,
                page,
                offset,
                features = count,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "fetched feature page"
            );

            features.extend(body.features);
            if !body.exceeded_transfer_limit {
                break;
            }
            if count == 0 {
                tracing::warn!(
                    layer = %layer.id,
                    page,
                    offset,
                    "service reported more results but returned an empty page; stopping"
                );
                break;
            }
            offset += count as u64;
        }

        tracing::info!(
            layer = %layer.id,
            total = features.len(),
            requests = page,
            "layer fetch complete"
        );
        Ok(features)
    }
}
