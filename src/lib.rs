//! Edgelens - edge inference node for computer-vision detectors.
//!
//! Answers image queries with locally cached models when confident enough and
//! escalates the rest to a cloud service.

#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod constants;
pub mod detector;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod inference;
pub mod models;
pub mod server;

use clap::Parser;
use cli::{Cli, Command, ConfigAction, DetectorsAction, ServeArgs};
use config::{Config, LogFormat, load_config_file, resolve_config_path, save_config, validate_config};
use detector::{DetectorRegistry, DetectorState};
use engine::{DecisionEngine, EngineBuilder, ImageQuery, QueryOutcome, WorkerPool};
use server::AppState;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use error::{Error, Result};

/// Main entry point for the edgelens CLI.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.global.config.as_deref())?;
    let config = load_config_file(&config_path)?;

    let format = cli.global.log_format.unwrap_or(config.logging.format);
    init_logging(cli.global.verbose, cli.global.quiet, format);

    handle_command(cli.command, config, &config_path)
}

fn init_logging(verbose: u8, quiet: bool, format: LogFormat) {
    use tracing_subscriber::{EnvFilter, fmt};

    // ONNX Runtime is chatty at info; only let it through at -vvv.
    let filter_str = if quiet {
        "warn,ort=off"
    } else {
        match verbose {
            0 => "info,ort=off",
            1 => "debug,ort=warn",
            2 => "trace,ort=info",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));

    match format {
        LogFormat::Pretty => fmt().with_env_filter(filter).init(),
        LogFormat::Json => fmt().json().with_env_filter(filter).init(),
    }
}

fn handle_command(command: Command, config: Config, config_path: &Path) -> Result<()> {
    match command {
        Command::Serve(args) => runtime()?.block_on(serve_node(config, config_path.to_path_buf(), args)),
        Command::Query {
            detector_id,
            image,
            want_async,
        } => runtime()?.block_on(run_query(&config, detector_id, &image, want_async)),
        Command::Config { action } => handle_config_command(action, &config, config_path),
        Command::Detectors { action } => handle_detectors_command(action, &config),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

async fn serve_node(mut config: Config, config_path: PathBuf, args: ServeArgs) -> Result<()> {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(workers) = args.workers {
        config.engine.workers = Some(workers);
    }
    validate_config(&config)?;

    let engine = Arc::new(EngineBuilder::from_config(&config)?.build());
    let status = engine.status();
    info!(
        detectors = status.detectors,
        ready = status.ready_detectors,
        config = %config_path.display(),
        "detectors loaded"
    );

    let pool = Arc::new(WorkerPool::start(
        Arc::clone(&engine),
        config.engine.worker_count(),
        config.engine.queue_capacity,
    ));

    let refresh = tokio::spawn(refresh_detectors_loop(
        Arc::clone(&engine),
        config_path,
        Duration::from_secs(config.server.detector_refresh_secs),
    ));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState {
        engine: Arc::clone(&engine),
        pool: Arc::clone(&pool),
    };
    let result = server::serve(&addr, state, shutdown_signal()).await;

    refresh.abort();
    match Arc::try_unwrap(pool) {
        Ok(pool) => pool.shutdown().await,
        Err(_) => warn!("worker pool still referenced at shutdown"),
    }
    engine
        .drain_escalations(Duration::from_millis(config.cloud.request_timeout_ms))
        .await;

    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Re-read the configuration file every `period` and apply its detectors.
/// A file that fails to load leaves the current detectors in place.
async fn refresh_detectors_loop(engine: Arc<DecisionEngine>, path: PathBuf, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; detectors were just loaded.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let file = path.clone();
        let loaded = match tokio::task::spawn_blocking(move || load_config_file(&file)).await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("detector refresh task failed: {e}");
                continue;
            }
        };

        match loaded {
            Ok(config) => {
                let summary = engine.refresh_detectors(&config.detectors);
                if !summary.is_empty() {
                    info!(
                        added = ?summary.added,
                        removed = ?summary.removed,
                        changed = ?summary.changed,
                        updated = ?summary.updated,
                        "detectors refreshed"
                    );
                }
            }
            Err(e) => warn!(path = %path.display(), "keeping current detectors: {e}"),
        }
    }
}

#[allow(clippy::print_stdout)]
async fn run_query(config: &Config, detector_id: String, image: &Path, want_async: bool) -> Result<()> {
    validate_config(config)?;

    let bytes = tokio::fs::read(image).await.map_err(|e| Error::ImageRead {
        path: image.to_path_buf(),
        source: e,
    })?;

    let engine = EngineBuilder::from_config(config)?.build();
    let query = ImageQuery::new(detector_id, bytes).with_async(want_async);
    let outcome = engine.process(query).await?;

    // Background escalations die with the runtime; give them the request timeout.
    engine
        .drain_escalations(Duration::from_millis(config.cloud.request_timeout_ms))
        .await;

    let json = match &outcome {
        QueryOutcome::Answered(response) => serde_json::to_string_pretty(response),
        QueryOutcome::Accepted(accepted) => serde_json::to_string_pretty(accepted),
    }
    .map_err(|e| Error::Internal {
        message: format!("failed to encode response: {e}"),
    })?;
    println!("{json}");
    Ok(())
}

#[allow(clippy::print_stdout)]
fn handle_config_command(action: ConfigAction, config: &Config, path: &Path) -> Result<()> {
    match action {
        ConfigAction::Init => {
            if path.exists() {
                println!("Configuration file already exists: {}", path.display());
            } else {
                save_config(&Config::default(), path)?;
                println!("Created configuration file: {}", path.display());
                println!("\nNext steps:");
                println!("  add a [detectors.<id>] section, then run 'edgelens detectors check'");
            }
            Ok(())
        }
        ConfigAction::Show => {
            let contents =
                toml::to_string_pretty(config).map_err(|e| Error::ConfigSerialize { source: e })?;
            println!("{contents}");
            Ok(())
        }
        ConfigAction::Path => {
            println!("{}", path.display());
            Ok(())
        }
    }
}

#[allow(clippy::print_stdout)]
fn handle_detectors_command(action: DetectorsAction, config: &Config) -> Result<()> {
    let registry = DetectorRegistry::load(&config.detectors);
    let detectors = registry.list();

    if detectors.is_empty() {
        println!("No detectors configured.");
        return Ok(());
    }

    match action {
        DetectorsAction::List => {
            println!("Configured detectors:");
            for (id, state) in &detectors {
                match state {
                    DetectorState::Ready(detector) => println!(
                        "  {id}: {} threshold={} profile={}",
                        detector.mode, detector.confidence_threshold, detector.profile
                    ),
                    DetectorState::Unusable { .. } => println!("  {id}: (invalid)"),
                }
            }
            Ok(())
        }
        DetectorsAction::Check => {
            let mut invalid = 0;
            for (id, state) in &detectors {
                match state {
                    DetectorState::Ready(_) => println!("  ok       {id}"),
                    DetectorState::Unusable { reason } => {
                        invalid += 1;
                        println!("  invalid  {id}: {reason}");
                    }
                }
            }
            if invalid > 0 {
                return Err(Error::ConfigValidation {
                    message: format!("{invalid} of {} detector(s) are invalid", detectors.len()),
                });
            }
            println!("All {} detector(s) valid.", detectors.len());
            Ok(())
        }
    }
}
