use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "nofly",
    version,
    about = "Local replica and query API for CAA drone no-fly zones"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// PostGIS via `DATABASE_URL` / `NOFLY_DB_*`.
    Postgres,
    /// In-process store; contents are lost on exit.
    Memory,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default if no subcommand given).
    Serve {
        #[arg(long, env = "NOFLY_HOST", default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "NOFLY_PORT", default_value = "8000")]
        port: u16,

        #[arg(long, env = "NOFLY_STORE", value_enum, default_value = "postgres")]
        store: StoreBackend,

        /// Do not apply schema migrations before serving.
        #[arg(long)]
        skip_migrate: bool,
    },

    /// Create the PostGIS extension, zone table and indexes.
    Migrate {
        /// Postgres URL override (else `NOFLY_DATABASE_URL` / `DATABASE_URL` / `NOFLY_DB_*`).
        #[arg(long)]
        database_url: Option<String>,
    },

    /// Run one refresh cycle against Postgres and print the report.
    Refresh {
        #[arg(long)]
        database_url: Option<String>,
    },

    /// Download one layer and print conversion counts without touching the store.
    Fetch {
        /// Layer id from the catalog (e.g. `UAV`).
        layer: String,
    },

    /// Print the layer catalog.
    Layers,

    /// Print current configuration (redacted secrets).
    Config,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Serve {
            host: "0.0.0.0".to_string(),
            port: 8000,
            store: StoreBackend::Postgres,
            skip_migrate: false,
        }
    }
}

/// Mask the password component of a connection URL.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}
