use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing::{info, warn};

use worker_api::config::{Cli, Command, Config, StoreKind};
use worker_api::store::{self, MemoryWorkerStore, PgWorkerStore, WorkerStore};
use worker_api::worker::default_seed;
use worker_api::{App, AuthGate, Metrics, Server, api, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Version => {
            println!("worker-api - v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Start(args) => start(args.into()).await,
    }
}

async fn start(config: Config) -> anyhow::Result<()> {
    let _log_guard = logging::init(&config.log_level, config.log_dir.as_deref());

    let auth = AuthGate::new(config.credentials, config.bypass_auth);
    if auth.is_bypassed() {
        warn!("authentication bypass is ENABLED: anyone can create, update and delete workers");
    }

    let store: Arc<dyn WorkerStore> = match config.store {
        StoreKind::Postgres => Arc::new(
            PgWorkerStore::connect(&config.database_url, config.pool_size, &config.timezone)
                .await
                .context("failed to connect to the database")?,
        ),
        StoreKind::Memory => {
            warn!("using the in-memory store; workers will not survive a restart");
            Arc::new(MemoryWorkerStore::new())
        }
    };

    // Without the table there is nothing to serve.
    store.ensure_schema().await.context("failed to create the workers table")?;

    if config.seed {
        let inserted = store::seed(store.as_ref(), default_seed())
            .await
            .context("failed to seed initial workers")?;
        info!(inserted, "initial worker profiles in place");
    }

    let metrics = Metrics::new().context("failed to register metrics")?;
    let app = Arc::new(App::new(Arc::clone(&store), auth, metrics));
    let router = api::router(app).request_timeout(config.request_timeout);

    info!(addr = %config.addr, "starting the server");
    Server::bind(config.addr)
        .shutdown_delay(config.shutdown_delay)
        .grace_period(config.grace_period)
        .read_timeout(config.read_timeout)
        .serve(router)
        .await
        .context("server failed")?;

    store.close().await.context("failed to close the store")?;
    Ok(())
}
