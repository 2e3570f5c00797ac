use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use s3pal::core::config::AppConfig;
use s3pal::core::port::allocate_port;
use s3pal::core::redact::redact_access_key;
use s3pal::core::shutdown::{ShutdownCoordinator, SHUTDOWN_TIMEOUT_SECS};
use s3pal::core::types::UploadSource;
use s3pal::delivery::router::{self, AppState};
use s3pal::ingest::orchestrator::UploadOrchestrator;
use s3pal::observability::metrics as obs_metrics;
use s3pal::storage::cache::ListingCache;
use s3pal::storage::memory::InMemoryObjectStore;
use s3pal::storage::{self, ListingView, ObjectStore};
use s3pal::watch::{clipboard, StabilityDetector};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(
    name = "s3pal",
    version,
    about = "A server + cli tool for uploading to, and listing, S3 buckets"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "s3pal.toml", env = "S3PAL_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a local or remote file.
    Upload {
        /// Local file path or http(s) URL.
        path_or_url: String,
        #[arg(long)]
        prefix: Option<String>,
        /// Bucket to upload to, if different from the configured one.
        #[arg(long)]
        bucket: Option<String>,
    },
    /// Run the upload server (and the folder watcher when a watch path is set).
    Server {
        /// Preferred port; the next free port is used if it is taken.
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        bucket: Option<String>,
    },
    /// Upload files dropped into a folder.
    Watch {
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
    },
    /// List stored keys.
    List {
        #[arg(long, default_value = "")]
        prefix: String,
        /// Print public URLs instead of keys.
        #[arg(long)]
        urls: bool,
        /// With --urls, print presigned GET URLs.
        #[arg(long, requires = "urls")]
        sign: bool,
        /// Presign lifetime in seconds (defaults to aws.sign_ttl_secs).
        #[arg(long, requires = "sign")]
        ttl: Option<u64>,
    },
}

impl Command {
    /// Command line flags win over file and environment settings.
    fn apply_overrides(&self, config: &mut AppConfig) {
        match self {
            Command::Upload {
                bucket: Some(bucket),
                ..
            }
            | Command::Server {
                bucket: Some(bucket),
                ..
            } => config.aws.bucket = bucket.clone(),
            _ => {}
        }
        match self {
            Command::Server {
                port: Some(port), ..
            } => config.server.port = *port,
            Command::Watch { path, prefix } => {
                if let Some(path) = path {
                    config.folder_watch.path = path.clone();
                }
                if let Some(prefix) = prefix {
                    config.folder_watch.prefix = prefix.clone();
                }
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match AppConfig::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    cli.command.apply_overrides(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    init_tracing(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bucket = %config.aws.bucket,
        region = %config.aws.region,
        backend = %config.aws.backend,
        access_key = %redact_access_key(&config.aws.access_key),
        "s3pal starting"
    );

    let config = Arc::new(config);
    let result = match config.aws.backend.as_str() {
        "memory" => {
            let store = InMemoryObjectStore::new(&config.aws.bucket, &config.aws.region);
            run(cli.command, config, Arc::new(store)).await
        }
        _ => run_s3(cli.command, config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = format!("{e:#}");
            error!(error = %message, "command failed");
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "s3")]
async fn run_s3(command: Command, config: Arc<AppConfig>) -> anyhow::Result<()> {
    let store = s3pal::storage::s3::S3ObjectStore::new(&config.aws);
    run(command, config, Arc::new(store)).await
}

#[cfg(not(feature = "s3"))]
async fn run_s3(_command: Command, _config: Arc<AppConfig>) -> anyhow::Result<()> {
    anyhow::bail!("built without the `s3` feature; set aws.backend = \"memory\" or rebuild with it")
}

/// Wire the shared components over `store` and run one command.
async fn run<S: ObjectStore + 'static>(
    command: Command,
    config: Arc<AppConfig>,
    store: Arc<S>,
) -> anyhow::Result<()> {
    let listing = Arc::new(ListingCache::new(store.clone(), &config.cache));
    let orchestrator = Arc::new(UploadOrchestrator::new(
        store.clone(),
        Some(listing.clone()),
        &config,
    ));

    match command {
        Command::Upload {
            path_or_url,
            prefix,
            ..
        } => {
            let source = UploadSource::from_path_or_url(&path_or_url);
            let prefix = prefix.unwrap_or_default();
            let outcome = orchestrator
                .upload(source, &prefix)
                .await
                .with_context(|| format!("uploading '{}'", path_or_url))?;
            println!("{}", outcome.url);
            Ok(())
        }
        Command::List {
            prefix,
            urls,
            sign,
            ttl,
        } => {
            let ttl_secs = ttl.unwrap_or(config.aws.sign_ttl_secs);
            let Some(ttl) = storage::presign_ttl(ttl_secs) else {
                anyhow::bail!(
                    "--ttl must be between 1 and {} seconds",
                    storage::MAX_PRESIGN_TTL_SECS
                );
            };
            let keys = listing
                .get(&prefix)
                .await
                .with_context(|| format!("listing bucket '{}'", config.aws.bucket))?;
            info!(prefix = %prefix, count = keys.len(), "listing complete");
            let lines = storage::present_listing(
                store.as_ref(),
                keys,
                ListingView::from_flags(urls, sign, ttl),
            )
            .await
            .context("presigning listing URLs")?;
            for line in lines {
                println!("{}", line);
            }
            Ok(())
        }
        Command::Watch { .. } => {
            let shutdown = ShutdownCoordinator::new();
            let detector = StabilityDetector::new(
                orchestrator,
                &config.folder_watch,
                clipboard::default_sink(),
            );

            let signal = shutdown.clone();
            tokio::spawn(async move {
                signal.wait_for_signal_and_shutdown().await;
            });

            detector
                .start(shutdown.token())
                .await
                .context("folder watcher stopped")?;
            Ok(())
        }
        Command::Server { .. } => run_server(config, orchestrator, listing).await,
    }
}

async fn run_server<S: ObjectStore + 'static>(
    config: Arc<AppConfig>,
    orchestrator: Arc<UploadOrchestrator<S>>,
    listing: Arc<ListingCache<S>>,
) -> anyhow::Result<()> {
    let metrics_handle = match obs_metrics::install_prometheus_recorder() {
        Ok(handle) => {
            obs_metrics::describe_all_metrics();
            Some(handle)
        }
        Err(e) => {
            warn!(error = %e, "failed to install metrics recorder, /metrics disabled");
            None
        }
    };

    let shutdown = ShutdownCoordinator::new();
    let start_time = std::time::Instant::now();

    let uptime_cancel = shutdown.token();
    tokio::spawn(async move {
        obs_metrics::run_uptime_task(start_time, uptime_cancel).await;
    });

    // The folder watcher runs alongside the server when a path is configured.
    let watcher_task = if config.watch_path().is_some() {
        let detector = StabilityDetector::new(
            orchestrator.clone(),
            &config.folder_watch,
            clipboard::default_sink(),
        );
        let watch_cancel = shutdown.token();
        Some(tokio::spawn(async move {
            if let Err(e) = detector.start(watch_cancel).await {
                error!(error = %e, "folder watcher not running");
            }
        }))
    } else {
        info!("no folder watch path configured, watcher disabled");
        None
    };

    let app_state = AppState {
        orchestrator,
        listing,
        config: config.clone(),
        start_time,
        metrics_handle,
    };
    let app = router::build_router(app_state);

    let port = allocate_port(&config.server.host, config.server.port).await?;
    if port != config.server.port {
        warn!(
            requested = config.server.port,
            port, "requested port in use, using next free port"
        );
    }
    let http_addr: SocketAddr = format!("{}:{}", config.server.host, port)
        .parse()
        .with_context(|| format!("invalid bind address '{}:{}'", config.server.host, port))?;

    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("failed to bind {}", http_addr))?;
    info!(%http_addr, "HTTP server listening");

    let signal = shutdown.clone();
    tokio::spawn(async move {
        signal.wait_for_signal_and_shutdown().await;
    });

    let shutdown_token = shutdown.token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
        })
        .await
        .context("HTTP server error")?;

    if let Some(task) = watcher_task {
        match tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS), task).await {
            Ok(_) => info!("folder watcher stopped"),
            Err(_) => warn!(
                timeout_secs = SHUTDOWN_TIMEOUT_SECS,
                "folder watcher did not stop in time"
            ),
        }
    }

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(log_level: &str, log_format: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    match log_format {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
