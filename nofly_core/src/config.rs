use crate::models::LayerCatalog;
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Largest insert batch: Postgres allows 65535 bind parameters per statement and
/// each zone row binds 4.
pub const MAX_BATCH_SIZE: usize = u16::MAX as usize / 4;

pub const DEFAULT_ARCGIS_BASE_URL: &str = "https://dronegis.caa.gov.tw/server/rest/services/Hosted";

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

/// Feature-service client settings.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub base_url: String,
    /// `resultRecordCount` sent with every page request.
    pub page_size: u32,
    /// Upper bound for a single page request.
    pub request_timeout: Duration,
    /// Extra attempts per page after a retryable failure (0 = fail fast).
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further attempt.
    pub retry_backoff: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ARCGIS_BASE_URL.to_string(),
            page_size: 2000,
            request_timeout: Duration::from_secs(30),
            max_retries: 0,
            retry_backoff: Duration::from_millis(500),
            accept_invalid_certs: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub interval: Duration,
    /// Zones per insert statement.
    pub batch_size: usize,
    pub scheduler_enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            batch_size: 500,
            scheduler_enabled: true,
        }
    }
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub postgres: PostgresConfig,
    pub fetcher: FetcherConfig,
    pub refresh: RefreshConfig,
    pub layers_file: Option<PathBuf>,
}

impl AppConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let url = match get("NOFLY_DATABASE_URL").or_else(|| get("DATABASE_URL")) {
            Some(url) => url,
            None => {
                let host = get("NOFLY_DB_HOST").unwrap_or_else(|| "localhost".to_string());
                let port: u16 = parse_or(get("NOFLY_DB_PORT"), "NOFLY_DB_PORT", 5432)?;
                let user = get("NOFLY_DB_USER").unwrap_or_else(|| "postgres".to_string());
                let password = get("NOFLY_DB_PASSWORD").unwrap_or_else(|| "postgres".to_string());
                let name = get("NOFLY_DB_NAME").unwrap_or_else(|| "caa_nfz".to_string());
                format!("postgres://{user}:{password}@{host}:{port}/{name}")
            }
        };
        let max_connections = parse_or(
            get("NOFLY_DB_MAX_CONNECTIONS"),
            "NOFLY_DB_MAX_CONNECTIONS",
            10u32,
        )?;
        let acquire_timeout_ms = parse_or(
            get("NOFLY_DB_ACQUIRE_TIMEOUT_MS"),
            "NOFLY_DB_ACQUIRE_TIMEOUT_MS",
            5_000u64,
        )?;

        let defaults = FetcherConfig::default();
        let page_size: u32 = parse_or(get("NOFLY_PAGE_SIZE"), "NOFLY_PAGE_SIZE", defaults.page_size)?;
        if page_size == 0 {
            return Err(Error::InvalidInput("NOFLY_PAGE_SIZE must be > 0".to_string()));
        }
        let timeout_secs: u64 = parse_or(
            get("NOFLY_REQUEST_TIMEOUT_SECS"),
            "NOFLY_REQUEST_TIMEOUT_SECS",
            defaults.request_timeout.as_secs(),
        )?;
        if timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "NOFLY_REQUEST_TIMEOUT_SECS must be > 0".to_string(),
            ));
        }
        let fetcher = FetcherConfig {
            base_url: get("NOFLY_ARCGIS_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            page_size,
            request_timeout: Duration::from_secs(timeout_secs),
            max_retries: parse_or(
                get("NOFLY_FETCH_MAX_RETRIES"),
                "NOFLY_FETCH_MAX_RETRIES",
                defaults.max_retries,
            )?,
            retry_backoff: Duration::from_millis(parse_or(
                get("NOFLY_FETCH_RETRY_BACKOFF_MS"),
                "NOFLY_FETCH_RETRY_BACKOFF_MS",
                500u64,
            )?),
            accept_invalid_certs: parse_flag(get("NOFLY_INSECURE_TLS"), false),
        };

        let interval_minutes: u64 = parse_or(
            get("NOFLY_REFRESH_INTERVAL_MINUTES"),
            "NOFLY_REFRESH_INTERVAL_MINUTES",
            60,
        )?;
        if interval_minutes == 0 {
            return Err(Error::InvalidInput(
                "NOFLY_REFRESH_INTERVAL_MINUTES must be > 0".to_string(),
            ));
        }
        let batch_size: usize = parse_or(
            get("NOFLY_REFRESH_BATCH_SIZE"),
            "NOFLY_REFRESH_BATCH_SIZE",
            500,
        )?;
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(Error::InvalidInput(format!(
                "NOFLY_REFRESH_BATCH_SIZE must be between 1 and {MAX_BATCH_SIZE}"
            )));
        }

        Ok(Self {
            postgres: PostgresConfig {
                url,
                max_connections,
                acquire_timeout: Duration::from_millis(acquire_timeout_ms),
            },
            fetcher,
            refresh: RefreshConfig {
                interval: Duration::from_secs(interval_minutes * 60),
                batch_size,
                scheduler_enabled: parse_flag(get("NOFLY_SCHEDULER_ENABLED"), true),
            },
            layers_file: get("NOFLY_LAYERS_FILE").map(PathBuf::from),
        })
    }

    /// Layer catalog from `NOFLY_LAYERS_FILE`, or the built-in CAA layers.
    pub fn layer_catalog(&self) -> Result<LayerCatalog> {
        match &self.layers_file {
            Some(path) => LayerCatalog::from_file(path),
            None => Ok(LayerCatalog::caa_default()),
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| Error::InvalidInput(format!("{key} is not a valid number: {v}"))),
        None => Ok(default),
    }
}

fn parse_flag(value: Option<String>, default: bool) -> bool {
    value
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
