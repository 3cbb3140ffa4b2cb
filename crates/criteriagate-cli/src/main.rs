// crates/criteriagate-cli/src/main.rs
// ============================================================================
// Module: CriteriaGate CLI Entry Point
// Description: Command dispatcher for running the pipeline worker, applying
//              the store schema, and triggering a protocol run locally.
// Purpose: Give operators a single binary to run the dispatcher/pipeline
//          loop and a way to drive the pipeline without a real upload path
//          for local development.
// Dependencies: clap, criteriagate-config, criteriagate-core,
//               criteriagate-outbox, criteriagate-pipeline,
//               criteriagate-providers, criteriagate-store-sqlite, tokio
// ============================================================================

//! ## Overview
//! `serve` runs the outbox dispatcher loop against a real `SQLite` store,
//! wiring the pipeline's capability roster from environment variables
//! (`criteriagate_cli::config::CliConfig`). `migrate` opens the store,
//! which applies the schema as a side effect of opening, and reports the
//! resulting schema version. `trigger` inserts a protocol row and its
//! `protocol_uploaded` outbox event directly, standing in for whatever
//! upload path a deployment fronts this pipeline with.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use criteriagate_cli::config::CliConfig;
use criteriagate_config::PipelineConfig;
use criteriagate_core::EventHandler;
use criteriagate_outbox::DispatcherConfig;
use criteriagate_outbox::HandlerRegistry;
use criteriagate_outbox::OutboxStore;
use criteriagate_pipeline::IdAllocator;
use criteriagate_pipeline::LlmRoster;
use criteriagate_pipeline::PipelineDeps;
use criteriagate_pipeline::ProtocolUploadedHandler;
use criteriagate_providers::HttpStructuredLlm;
use criteriagate_providers::LocalBlobStore;
use criteriagate_providers::RoutingTable;
use criteriagate_providers::TerminologyRouter;
use criteriagate_store_sqlite::SqliteStore;
use criteriagate_store_sqlite::SqliteStoreConfig;
use thiserror::Error;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "criteriagate", arg_required_else_help = true)]
struct Cli {
    /// Path to the `SQLite` database file, overriding `CRITERIAGATE_DB_PATH`.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,
    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the outbox dispatcher and pipeline worker loop.
    Serve,
    /// Open the store, applying the schema if it is not already current.
    Migrate,
    /// Enqueue a `protocol_uploaded` event for a newly inserted protocol.
    Trigger {
        /// Source document location (`local://...` or `gs://...`).
        #[arg(long)]
        file_uri: String,
        /// Human-readable protocol title.
        #[arg(long)]
        title: String,
    },
    /// Read a protocol's current status, applying lazy archival if its
    /// failure or dead-letter age has passed `ARCHIVE_TTL_SECONDS`.
    Status {
        /// Protocol id to read.
        #[arg(long)]
        protocol_id: u64,
    },
}

/// Errors surfaced to the process exit code.
#[derive(Debug, Error)]
enum CliError {
    /// A required or malformed environment variable.
    #[error("configuration error: {0}")]
    Config(#[from] criteriagate_cli::config::CliConfigError),
    /// The durable store rejected an operation.
    #[error("store error: {0}")]
    Store(#[from] criteriagate_store_sqlite::StoreError),
    /// An HTTP-backed adapter client could not be constructed.
    #[error("failed to build adapter client: {0}")]
    Adapter(criteriagate_core::ClassifiedError),
    /// `--protocol-id` was zero, which can never be a valid opaque id.
    #[error("protocol id must be non-zero")]
    InvalidProtocolId,
}

/// Parses arguments, dispatches the requested subcommand, and maps any
/// error to a non-zero exit code.
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "command failed");
            ExitCode::FAILURE
        }
    }
}

/// Routes a parsed [`Cli`] invocation to its subcommand implementation.
async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Serve => serve(cli.db_path).await,
        Command::Migrate => migrate(cli.db_path),
        Command::Trigger { file_uri, title } => trigger(cli.db_path, &file_uri, &title),
        Command::Status { protocol_id } => status(cli.db_path, protocol_id),
    }
}

/// Opens the store at `db_path` (or `CRITERIAGATE_DB_PATH`), which applies
/// the schema as a side effect, and reports the resulting schema version.
fn migrate(db_path: Option<PathBuf>) -> Result<(), CliError> {
    let path = db_path.map_or_else(CliConfig::db_path_from_env, Ok)?;
    SqliteStore::open(&SqliteStoreConfig { path: path.clone(), ..SqliteStoreConfig::default() })?;
    info!(db_path = %path.display(), schema_version = criteriagate_store_sqlite::SCHEMA_VERSION, "schema applied");
    Ok(())
}

/// Inserts a protocol row and its `protocol_uploaded` trigger event.
fn trigger(db_path: Option<PathBuf>, file_uri: &str, title: &str) -> Result<(), CliError> {
    let path = db_path.map_or_else(CliConfig::db_path_from_env, Ok)?;
    let store = SqliteStore::open(&SqliteStoreConfig { path, ..SqliteStoreConfig::default() })?;
    let now = now();
    let protocol_id = store.insert_protocol(title, file_uri, now)?;
    let payload = serde_json::json!({ "protocol_id": protocol_id.get(), "file_uri": file_uri });
    let idempotency_key = format!("{}:protocol_uploaded", protocol_id.get());
    store.insert_trigger_event("protocol_uploaded", protocol_id, &idempotency_key, &payload, now)?;
    info!(protocol_id = protocol_id.get(), file_uri, "protocol_uploaded event enqueued");
    Ok(())
}

/// Reads a protocol's status, applying lazy archival (SPEC_FULL §7) before
/// reporting it.
fn status(db_path: Option<PathBuf>, protocol_id: u64) -> Result<(), CliError> {
    let path = db_path.map_or_else(CliConfig::db_path_from_env, Ok)?;
    let store = SqliteStore::open(&SqliteStoreConfig { path, ..SqliteStoreConfig::default() })?;
    let pipeline_config = PipelineConfig::from_env().map_err(|err| CliError::Config(config_err(err)))?;
    let id = criteriagate_core::ProtocolId::from_raw(protocol_id).ok_or(CliError::InvalidProtocolId)?;
    let archive_ttl = time::Duration::try_from(pipeline_config.archive_ttl)
        .unwrap_or_else(|_| time::Duration::seconds(7 * 24 * 60 * 60));
    let protocol = store.access_protocol(id, now(), archive_ttl)?;
    info!(
        protocol_id = protocol.id.get(),
        status = %protocol.status,
        error_reason = protocol.error_reason.as_deref().unwrap_or(""),
        "protocol status"
    );
    Ok(())
}

/// Wires the pipeline's capability roster from the environment and runs
/// the dispatcher loop until interrupted.
async fn serve(db_path: Option<PathBuf>) -> Result<(), CliError> {
    let mut config = CliConfig::from_env()?;
    if let Some(path) = db_path {
        config.db_path = path;
    }
    let pipeline_config = PipelineConfig::from_env().map_err(|err| CliError::Config(config_err(err)))?;

    let store = SqliteStore::open(&SqliteStoreConfig { path: config.db_path.clone(), ..SqliteStoreConfig::default() })?;
    let blob_store = Arc::new(LocalBlobStore::new(config.blob_root.clone()));
    let llm = HttpStructuredLlm::new(config.llm.clone()).map_err(CliError::Adapter)?;
    let providers = config.build_providers()?;
    let router = Arc::new(TerminologyRouter::new(RoutingTable::default_table(), providers));
    let ids = Arc::new(IdAllocator::new(now()));

    let deps = PipelineDeps::new(store.clone(), pipeline_config.clone(), blob_store, LlmRoster::uniform(Arc::new(llm)), router, ids);
    let handler: Arc<dyn EventHandler> = Arc::new(ProtocolUploadedHandler::new(deps));
    let registry = HandlerRegistry::new().with_handler("protocol_uploaded", handler);
    let dispatcher_config = DispatcherConfig {
        poll_interval: pipeline_config.outbox_poll_interval,
        max_retries: pipeline_config.outbox_max_retries,
        ..DispatcherConfig::default()
    };

    info!(db_path = %config.db_path.display(), "serving");
    let mut ticker = tokio::time::interval(dispatcher_config.poll_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match criteriagate_outbox::run_once(&store as &dyn OutboxStore, &registry, &dispatcher_config, now()).await {
                    Ok(dispatched) if dispatched > 0 => info!(dispatched, "poll cycle dispatched events"),
                    Ok(_) => {}
                    Err(err) => warn!(%err, "poll cycle failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}

/// Reads the wall clock; the CLI's only clock-read site.
fn now() -> criteriagate_core::Timestamp {
    criteriagate_core::Timestamp::new(time::OffsetDateTime::now_utc())
}

/// Adapts [`criteriagate_config::ConfigError`] into [`CliError::Config`]'s
/// underlying variant by re-wrapping its message; the two error enums are
/// unrelated but both ultimately report a malformed environment variable.
fn config_err(err: criteriagate_config::ConfigError) -> criteriagate_cli::config::CliConfigError {
    criteriagate_cli::config::CliConfigError::Adapter(err.to_string())
}
