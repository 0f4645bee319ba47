use std::net::SocketAddr;

use tokio_cron_scheduler::JobScheduler;
use tracing_subscriber::{fmt, EnvFilter};

use catalog_service::api::{router, AppState};
use catalog_service::cli::{open_store, print_usage, run_ingest_cli, run_migration_cli, run_statistics_cli};
use catalog_service::config::Config;
use catalog_service::scheduler::start_statistics_scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load this crate's .env regardless of current working directory, and override any pre-set envs
    let _ = dotenvy::from_filename_override(concat!(env!("CARGO_MANIFEST_DIR"), "/.env"));
    let filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    fmt()
        .with_env_filter(filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(true)
        .init();

    let cfg = Config::from_env()?;

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        let rest = &args[2..];
        match args[1].as_str() {
            "migrate" => return run_migration_cli(&cfg, rest).await,
            "ingest" => return run_ingest_cli(&cfg, rest).await,
            "statistics" => return run_statistics_cli(&cfg).await,
            "help" | "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => {
                print_usage();
                anyhow::bail!("unknown command '{}'", other);
            }
        }
    }
    tracing::info!(
        database = %cfg.database_name,
        storage_backend = ?cfg.storage_backend,
        scheduler_enabled = cfg.enable_scheduler,
        "Loaded configuration"
    );

    let store = open_store(&cfg).await?;
    let state = AppState::new(store, cfg.clone());

    let scheduler = JobScheduler::new().await?;
    if cfg.enable_scheduler {
        start_statistics_scheduler(&scheduler, state.aggregator.clone(), &cfg.statistics_cron).await?;
        scheduler.start().await?;
        tracing::info!("Statistics scheduler started");
    }

    let app = router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.port).parse()?;
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                tracing::error!(port = cfg.port, "Port is already in use. Try changing the PORT env var or stop the other process.");
            }
            return Err(e.into());
        }
    };
    tracing::info!(port = cfg.port, "Catalog service listening");
    axum::serve(listener, app).await?;

    Ok(())
}
