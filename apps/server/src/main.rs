#![warn(clippy::all, clippy::pedantic)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use anyhow::Context;
use clap::Parser;
use regionwatch::store::LibsqlStore;
use regionwatch::{
    CoordinationContext, CycleCoordinator, LeaseStore, MemoryStore, OwnerId, ResultStore, Scheduler, SystemClock,
};
use tracing::{info, warn};

mod config;
mod error;
mod routes;
mod state;
mod tasks;

use config::{Config, StoreBackend};
use error::AppError;
use logger::{LogFormat, init_with};
use state::AppState;

/// Seconds in-flight requests (including event streams) get on shutdown
const SHUTDOWN_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Parser)]
#[command(version, about = "Lease-coordinated regional endpoint monitoring")]
struct Cli {
    /// Path of the TOML config file, created with defaults if missing
    #[arg(short, long, env = "REGIONWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Override the HTTP port from the config file
    #[arg(short, long, env = "REGIONWATCH_PORT")]
    port: Option<u16>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_config(cli.config.as_deref()).context("loading configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate()?;

    if cli.print_config {
        print!("{config}");
        return Ok(());
    }

    init_with(&config.logging.level, LogFormat::parse(&config.logging.format));

    let (leases, results) = open_store(&config).await?;
    let owner_id = OwnerId::generate();
    info!(owner_id = %owner_id, backend = %config.store.backend, targets = config.targets.len(), "Starting replica");

    let ctx = CoordinationContext {
        owner_id,
        leases,
        results,
        clock: Arc::new(SystemClock),
        settings: config.cycle_settings(),
    };
    let coordinator = Arc::new(CycleCoordinator::new(ctx).context("building HTTP client")?);

    let mut scheduler = Scheduler::new();
    tasks::schedule(&mut scheduler, &coordinator, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse().map_err(AppError::from)?;
    let state = web::Data::new(AppState::new(coordinator, config.maintenance.retention_days));
    let served = run_server(addr, state).await;

    scheduler.shutdown().await;
    served?;

    info!("Shutdown complete");
    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<(Arc<dyn LeaseStore>, Arc<dyn ResultStore>)> {
    match config.store.backend {
        StoreBackend::Libsql => {
            let store = Arc::new(
                LibsqlStore::open(&config.store.path, config.store.pool_size)
                    .await
                    .with_context(|| format!("opening database {}", config.store.path))?,
            );
            let leases: Arc<dyn LeaseStore> = store.clone();
            let results: Arc<dyn ResultStore> = store;
            Ok((leases, results))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; replicas will not coordinate with each other");
            let store = Arc::new(MemoryStore::new());
            let leases: Arc<dyn LeaseStore> = store.clone();
            let results: Arc<dyn ResultStore> = store;
            Ok((leases, results))
        }
    }
}

async fn run_server(addr: SocketAddr, state: web::Data<AppState>) -> Result<(), AppError> {
    info!("Listening on http://{addr}");

    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes::routes))
        .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
        .bind(addr)?
        .run()
        .await?;

    Ok(())
}
