use anyhow::Context;
use clap::Parser;
use nofly_core::refresh::engine::build_zone;
use nofly_core::{
    AppConfig, ArcGisFetcher, FeatureSource, LayerCatalog, MemoryZoneStore, PgZoneStore,
    RefreshEngine, ZoneStore,
};
use nofly_server::cli::{Cli, Commands, StoreBackend, redact_url};
use nofly_server::server::AppState;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nofly_core::o11y::init_from_env()?;
    let cli = Cli::parse();
    let mut cfg = AppConfig::from_env()?;

    // A bare `nofly` serves with the same env fallbacks as `nofly serve`.
    let cmd = match cli.command {
        Some(cmd) => cmd,
        None => Cli::parse_from(["nofly", "serve"])
            .command
            .unwrap_or_default(),
    };

    match cmd {
        Commands::Serve {
            host,
            port,
            store,
            skip_migrate,
        } => {
            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            let store: Arc<dyn ZoneStore> = match store {
                StoreBackend::Postgres => {
                    let pg = PgZoneStore::connect(&cfg.postgres).await?;
                    if !skip_migrate {
                        pg.migrate().await?;
                    }
                    Arc::new(pg)
                }
                StoreBackend::Memory => {
                    tracing::warn!("using in-memory zone store; data is lost on exit");
                    Arc::new(MemoryZoneStore::new())
                }
            };
            let engine = build_engine(&cfg, store.clone())?;
            let interval = cfg
                .refresh
                .scheduler_enabled
                .then_some(cfg.refresh.interval);
            nofly_server::server::serve(addr, AppState::new(store, engine), interval).await?;
        }
        Commands::Migrate { database_url } => {
            if let Some(url) = database_url {
                cfg.postgres.url = url;
            }
            let store = PgZoneStore::connect(&cfg.postgres).await?;
            store.migrate().await?;
            tracing::info!(url = %redact_url(&cfg.postgres.url), "zone store migrations applied");
        }
        Commands::Refresh { database_url } => {
            if let Some(url) = database_url {
                cfg.postgres.url = url;
            }
            let store = PgZoneStore::connect(&cfg.postgres).await?;
            store.migrate().await?;
            let engine = build_engine(&cfg, Arc::new(store))?;
            let report = engine.refresh().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Fetch { layer } => {
            let catalog = cfg.layer_catalog()?;
            let descriptor = catalog
                .get(&layer)
                .with_context(|| format!("unknown layer {layer:?}"))?;
            let fetcher = ArcGisFetcher::new(cfg.fetcher.clone())?;
            let features = fetcher.fetch_layer(descriptor).await?;
            let fetched = features.len();
            let converted = features
                .into_iter()
                .filter_map(|f| build_zone(descriptor, f))
                .count();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "layer": descriptor.id,
                    "fetched": fetched,
                    "converted": converted,
                    "dropped": fetched - converted,
                }))?
            );
        }
        Commands::Layers => {
            let catalog = cfg.layer_catalog()?;
            println!("{}", serde_json::to_string_pretty(&catalog)?);
        }
        Commands::Config => {
            let catalog = cfg.layer_catalog()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "database_url": redact_url(&cfg.postgres.url),
                    "db_max_connections": cfg.postgres.max_connections,
                    "arcgis_base_url": cfg.fetcher.base_url,
                    "page_size": cfg.fetcher.page_size,
                    "request_timeout_secs": cfg.fetcher.request_timeout.as_secs(),
                    "fetch_max_retries": cfg.fetcher.max_retries,
                    "insecure_tls": cfg.fetcher.accept_invalid_certs,
                    "refresh_interval_minutes": cfg.refresh.interval.as_secs() / 60,
                    "refresh_batch_size": cfg.refresh.batch_size,
                    "scheduler_enabled": cfg.refresh.scheduler_enabled,
                    "layers_file": cfg.layers_file,
                    "layers": catalog.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(),
                }))?
            );
        }
    }

    Ok(())
}

fn build_engine(cfg: &AppConfig, store: Arc<dyn ZoneStore>) -> anyhow::Result<Arc<RefreshEngine>> {
    let layers: Arc<LayerCatalog> = Arc::new(cfg.layer_catalog()?);
    let fetcher = Arc::new(ArcGisFetcher::new(cfg.fetcher.clone())?);
    let engine = RefreshEngine::new(layers, fetcher, store, cfg.refresh.batch_size)?;
    Ok(Arc::new(engine))
}
