use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use services::config::{DEFAULT_DB_URL, DEFAULT_ZOOM_API_BASE_URL};
use services::{AppServices, Clock, ServiceConfig};
use storage::repository::Storage;

mod routes;
mod seed;

#[derive(Parser, Debug)]
#[command(author, version, about = "Course progress tracking and live-class recording service")]
struct Cli {
    /// `SQLite` database URL
    #[arg(long = "db", env = "LMS_DB_URL", default_value = DEFAULT_DB_URL, global = true)]
    db_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API and webhook receiver
    Serve(ServeArgs),
    /// Insert a demo course with a live class and an enrolled learner
    Seed,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "LMS_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Directory recordings are written to and served from under `/media`
    #[arg(long, env = "LMS_MEDIA_ROOT", default_value = "media")]
    media_root: PathBuf,

    /// Public URL prefix of the media directory
    #[arg(long, env = "LMS_MEDIA_BASE_URL", default_value = "http://localhost:8080/media")]
    media_base_url: String,

    #[arg(long, env = "ZOOM_API_BASE_URL", default_value = DEFAULT_ZOOM_API_BASE_URL)]
    zoom_api_base_url: String,

    #[arg(long, env = "ZOOM_API_TOKEN", hide_env_values = true)]
    zoom_api_token: Option<String>,

    #[arg(long, env = "ZOOM_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,

    /// Hours to wait before deleting the provider's copy of a recording
    #[arg(long, env = "LMS_RECORDING_CLEANUP_HOURS", default_value_t = 48)]
    recording_cleanup_hours: u64,
}

impl ServeArgs {
    fn service_config(self, db_url: String) -> ServiceConfig {
        ServiceConfig {
            db_url,
            media_root: self.media_root,
            media_base_url: self.media_base_url,
            zoom_api_base_url: self.zoom_api_base_url,
            zoom_api_token: self.zoom_api_token,
            webhook_secret: self.webhook_secret,
            recording_cleanup_delay: ServiceConfig::cleanup_delay_from_hours(
                self.recording_cleanup_hours,
            ),
            ..ServiceConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    prepare_sqlite_file(&cli.db_url)?;

    match cli.command {
        Command::Serve(args) => {
            let listen = args.listen;
            serve(args.service_config(cli.db_url), listen).await
        }
        Command::Seed => run_seed(&cli.db_url).await,
    }
}

async fn serve(config: ServiceConfig, listen: SocketAddr) -> anyhow::Result<()> {
    let services = AppServices::new_sqlite(&config, Clock::System)
        .await
        .with_context(|| format!("failed to open database {}", config.db_url))?;

    let app = routes::router(services)
        .nest_service("/media", ServeDir::new(&config.media_root))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    tracing::info!(%listen, media_root = %config.media_root.display(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server shutdown complete");
    Ok(())
}

async fn run_seed(db_url: &str) -> anyhow::Result<()> {
    let storage = Storage::sqlite(db_url)
        .await
        .with_context(|| format!("failed to open database {db_url}"))?;
    match seed::seed_demo(&storage, &Clock::System).await? {
        Some(summary) => tracing::info!(
            course_id = %summary.course_id,
            learner_id = %summary.learner_id,
            meeting_number = summary.meeting_number,
            "seeded demo course"
        ),
        None => tracing::info!("demo course already present"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        () = terminate => tracing::info!("received terminate signal, shutting down"),
    }
}

/// `SQLite` refuses to open a missing file without `mode=rwc`; create it
/// and its parent directory up front.
fn prepare_sqlite_file(db_url: &str) -> anyhow::Result<()> {
    if db_url.contains(":memory:") || db_url.contains("mode=memory") {
        return Ok(());
    }
    let raw = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))
        .with_context(|| format!("unsupported database url: {db_url}"))?;
    let raw = raw.split('?').next().unwrap_or(raw);
    if raw.is_empty() {
        anyhow::bail!("database url has no file path: {db_url}");
    }

    let path = Path::new(raw);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
    }
    Ok(())
}
