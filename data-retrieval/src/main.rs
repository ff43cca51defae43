use clap::{Args, Parser};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use retriever::api::{self, ApiError, AppState};
use retriever::config::{Config as RetrieverConfig, DispatchConfig};
use retriever::delivery::{DeliveryRouter, HttpMailer, MailError};
use retriever::orchestrator::{
    DispatchError, Dispatcher, HttpDispatcher, InProcessDispatcher, Orchestrator,
};
use retriever::pipeline::Pipeline;
use retriever::store::{StoreError, build_backend};
use retriever::worker::Worker;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod config;

#[derive(Parser)]
#[command(name = "data-retrieval")]
enum CliCommand {
    /// Run the retrieval API and the admin listener
    Serve(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, short)]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not install metrics recorder: {0}")]
    Metrics(String),
    #[error("object store setup failed: {0}")]
    Store(#[from] StoreError),
    #[error("mailer setup failed: {0}")]
    Mail(#[from] MailError),
    #[error("dispatcher setup failed: {0}")]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn main() -> Result<(), CliError> {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::Serve(args) => {
            let config = Config::from_file(&args.config)?;

            // Sentry must be initialised before the runtime starts
            let _sentry = init_logging(config.common.logging.as_ref());
            if let Some(metrics) = &config.common.metrics {
                init_metrics(metrics)?;
            }

            tracing::info!("starting data-retrieval");
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(serve(config.retriever))
        }
    }
}

fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(metrics: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
        .build(Some("data_retrieval"))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    ::metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    shared::metrics_defs::describe_all(retriever::metrics_defs::ALL_METRICS);
    Ok(())
}

async fn serve(config: RetrieverConfig) -> Result<(), CliError> {
    let config = Arc::new(config);

    let backend = build_backend(&config.store).await?;
    let mailer = Arc::new(HttpMailer::new(&config.mailer)?);
    let delivery = Arc::new(DeliveryRouter::new(
        config.delivery.clone(),
        backend.objects.clone(),
        mailer,
    ));
    let worker = Arc::new(Worker::new(
        backend.query.clone(),
        delivery.clone(),
        &config.extraction,
    ));

    let dispatcher: Arc<dyn Dispatcher> = match &config.dispatch {
        DispatchConfig::InProcess => Arc::new(InProcessDispatcher::new(worker.clone())),
        DispatchConfig::Http { url, timeout_secs } => Arc::new(HttpDispatcher::new(
            url,
            Duration::from_secs(*timeout_secs),
        )?),
    };
    let orchestrator = Orchestrator::new(dispatcher, delivery.clone());
    let pipeline = Arc::new(Pipeline::new(
        config.clone(),
        backend.objects.clone(),
        delivery,
        orchestrator,
    ));

    let state = AppState { pipeline, worker };
    let admin = AdminService::<_, std::io::Error>::new(|| true);
    let admin_listener = config.admin_listener.clone();

    tokio::try_join!(
        async {
            api::serve(config.listener.clone(), state)
                .await
                .map_err(CliError::from)
        },
        async {
            run_http_service(&admin_listener.host, admin_listener.port, admin)
                .await
                .map_err(CliError::from)
        },
    )?;

    Ok(())
}
