use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reportflow::config::Config;
use reportflow::ingest::Ingestor;
use reportflow::locks::ProjectLocks;
use reportflow::metadata::ReportStore;
use reportflow::pipeline::{GenerateReport, PipelineContext};
use reportflow::reports::{ReportService, ReportTree};
use reportflow::server::{self, AppState};
use reportflow::{RunHandle, Runner};
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "info,reportflow=info";

/// Test report ingestion and generation service
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the report workers in one process
    Serve(Config),
    /// Run only the HTTP API
    Api(Config),
    /// Run only the report workers
    Worker(Config),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with(tracing_subscriber::fmt::layer().compact())
        .init();

    match Cli::parse().command {
        Command::Serve(config) => {
            let services = Services::connect(&config).await?;
            let workers = services.start_workers(&config);
            serve_api(&config, &services).await?;
            stop_workers(workers).await;
        }
        Command::Api(config) => {
            let services = Services::connect(&config).await?;
            serve_api(&config, &services).await?;
        }
        Command::Worker(config) => {
            let services = Services::connect(&config).await?;
            let workers = services.start_workers(&config);
            shutdown_signal().await;
            stop_workers(workers).await;
        }
    }

    Ok(())
}

struct Services {
    queue: SqlitePool,
    reports: ReportService,
}

impl Services {
    async fn connect(config: &Config) -> Result<Self> {
        let queue = reportflow::connect(&config.queue_url)
            .await
            .with_context(|| format!("Failed to open queue database {}", config.queue_url))?;
        reportflow::setup_database(&queue)
            .await
            .context("Failed to set up queue database")?;

        let metadata = reportflow::connect(&config.database_url)
            .await
            .with_context(|| format!("Failed to open metadata database {}", config.database_url))?;
        reportflow::setup_database(&metadata)
            .await
            .context("Failed to set up metadata database")?;

        let reports = ReportService::new(
            ReportStore::new(metadata),
            ReportTree::new(&config.report_root),
            config.retention(),
            ProjectLocks::default(),
        );

        Ok(Self { queue, reports })
    }

    fn start_workers(&self, config: &Config) -> RunHandle {
        let context = PipelineContext {
            reports: self.reports.clone(),
            compiler: config.compiler(),
            max_extracted_bytes: config.max_extracted_bytes,
        };

        info!(
            workers = config.num_workers(),
            max_reports = config.retention().max_reports(),
            "Starting report workers"
        );
        Runner::new(self.queue.clone(), context)
            .configure_queue("reports", |queue| {
                queue
                    .num_workers(config.num_workers())
                    .poll_interval(config.poll_interval())
                    .register::<GenerateReport>()
            })
            .start()
    }
}

async fn serve_api(config: &Config, services: &Services) -> Result<()> {
    let ingestor = Ingestor::new(&config.upload_root, services.queue.clone())
        .max_upload_bytes(config.max_upload_bytes);
    let state = AppState::new(ingestor, services.reports.clone(), config.auth_token());

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Listening");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

async fn stop_workers(workers: RunHandle) {
    info!("Stopping report workers…");
    workers.stop().await;
    info!("Report workers stopped");
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
