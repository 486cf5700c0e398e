use clap::{Parser, ValueEnum};
use dealroom_core::StoreConfig;
use dealroom_service::{build_router, ServiceConfig, ServiceState};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StoreMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "dealroomd", version, about = "Dealroom negotiation and settlement REST service")]
struct Cli {
    /// REST socket address to bind, e.g. 127.0.0.1:8092
    #[arg(long, default_value = "127.0.0.1:8092")]
    listen: SocketAddr,
    /// Persistence backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = StoreMode::Auto, env = "DEALROOM_STORE")]
    store: StoreMode,
    /// PostgreSQL url for ideas, connections, messages, transactions and the ledger.
    #[arg(long, env = "DEALROOM_DATABASE_URL")]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "DEALROOM_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// Directory for uploaded payment proofs. Kept in memory when unset.
    #[arg(long, env = "DEALROOM_BLOB_DIR")]
    blob_dir: Option<PathBuf>,
    /// Settlement currency code.
    #[arg(long, default_value = "INR", env = "DEALROOM_CURRENCY")]
    currency: String,
}

fn resolve_store(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let store = match cli.store {
        StoreMode::Memory => StoreConfig::Memory,
        StoreMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("store=postgres requires --database-url or DATABASE_URL")
            })?;
            StoreConfig::postgres(database_url, cli.pg_max_connections)
        }
        StoreMode::Auto => match resolved_url {
            Some(database_url) => StoreConfig::postgres(database_url, cli.pg_max_connections),
            None => StoreConfig::Memory,
        },
    };

    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "dealroom_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let store = resolve_store(&cli)?;
    let config = ServiceConfig {
        store,
        currency: cli.currency,
        blob_dir: cli.blob_dir,
    };
    info!(store = config.store.label(), "Bootstrapping dealroom");

    let state = ServiceState::bootstrap(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("dealroom-service REST listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
