use crate::alertmanager::AlertBatch;
use crate::buildinfo;
use crate::chat;
use crate::config::{Config, DEFAULT_CONFIG_PATH, LogLevel, Overrides};
use crate::delivery::GoogleChatClient;
use crate::metrics::{PrometheusTelemetry, Telemetry, setup_metrics};
use crate::server::{ServerConfig, start_server};
use clap::Parser;
use std::error::Error;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Forward Alertmanager webhook notifications to Google Chat
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the TOML configuration file. A missing file means defaults.
    #[arg(long, env = "CONFIG_PATH", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Start the webhook server
    Serve(ServeArgs),
    /// Render an Alertmanager payload as a Google Chat message without sending it
    Render {
        /// Payload file, or "-" for stdin
        #[arg(short, long)]
        file: PathBuf,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
}

/// Settings that override the config file.
#[derive(clap::Args, Debug, Default, PartialEq)]
pub struct ServeArgs {
    /// Address to listen on (e.g., "0.0.0.0:7000")
    #[arg(long, env = "LISTEN_ADDR")]
    pub listen_addr: Option<String>,

    /// Google Chat incoming webhook URL
    #[arg(long, env = "GOOGLE_CHAT_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Timeout for a single delivery, in seconds
    #[arg(long, env = "GOOGLE_CHAT_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// How long idle connections to Google Chat are kept, in seconds
    #[arg(long, env = "GOOGLE_CHAT_POOL_IDLE_TIMEOUT_SECS")]
    pub pool_idle_timeout_secs: Option<u64>,

    /// Log verbosity
    #[arg(long, env = "LOG_LEVEL", ignore_case = true)]
    pub log_level: Option<LogLevel>,
}

impl From<ServeArgs> for Overrides {
    fn from(args: ServeArgs) -> Self {
        Overrides {
            listen_addr: args.listen_addr,
            webhook_url: args.webhook_url,
            timeout_secs: args.timeout_secs,
            pool_idle_timeout_secs: args.pool_idle_timeout_secs,
            log_level: args.log_level,
        }
    }
}

pub async fn run() -> ExitCode {
    // Load environment variables from .env file if it exists
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    match args.command {
        Command::Serve(serve_args) => {
            if let Err(e) = serve(&args.config, serve_args.into()).await {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        Command::Render { file, pretty } => match render(&file, pretty) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error rendering {}: {}", file.display(), e);
                return ExitCode::FAILURE;
            }
        },
    }
    ExitCode::SUCCESS
}

fn init_tracing(level: LogLevel) {
    tracing_subscriber::registry()
        .with(EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(
            |_| format!("alertchat={},tower_http={}", level, level),
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(config_path: &Path, overrides: Overrides) -> Result<(), Box<dyn Error>> {
    let settings = Config::load(config_path, overrides)?;
    init_tracing(settings.log_level);
    info!(
        "Starting {} (log level: {}, delivery timeout: {:?})",
        buildinfo::version_full(),
        settings.log_level,
        settings.client.timeout
    );

    let prometheus_handle = setup_metrics();
    let telemetry: Arc<dyn Telemetry> = Arc::new(PrometheusTelemetry);
    let client = GoogleChatClient::new(settings.webhook_url, settings.client, telemetry.clone())?;

    let listener = TcpListener::bind(settings.listen_addr).await?;
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        tx.send(()).ok();
    });

    start_server(
        listener,
        rx,
        ServerConfig {
            sender: Arc::new(client),
            telemetry,
            prometheus_handle,
        },
    )
    .await?;
    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Decodes, validates and renders a payload the same way the webhook does.
fn render(file: &Path, pretty: bool) -> Result<String, Box<dyn Error>> {
    let body = if file == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        buf
    } else {
        std::fs::read(file)?
    };

    let batch = AlertBatch::from_slice(&body)?;
    batch.validate()?;
    let document = chat::transform(&batch);

    let json = if pretty {
        serde_json::to_string_pretty(&document)?
    } else {
        serde_json::to_string(&document)?
    };
    Ok(json)
}
