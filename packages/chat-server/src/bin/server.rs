//! CLI entry point: loads configuration, wires up tracing, and runs the
//! server until Ctrl-C.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chat_server::ChatServer;
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "chat-server", about = "Line-oriented multi-user chat server")]
struct Args {
    /// Path to the JSON config file. Created with defaults if it doesn't exist.
    #[arg(long, env = "CHAT_SERVER_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Overrides the host from the config file.
    #[arg(long, env = "CHAT_SERVER_HOST")]
    host: Option<String>,

    /// Overrides the port from the config file.
    #[arg(long, env = "CHAT_SERVER_PORT")]
    port: Option<u16>,

    /// Emit logs as JSON instead of human-readable text.
    #[arg(long, env = "CHAT_SERVER_LOG_JSON")]
    log_json: bool,
}

type BoxedLayer = Box<
    dyn tracing_subscriber::Layer<tracing_subscriber::layer::Layered<EnvFilter, tracing_subscriber::Registry>>
        + Send
        + Sync,
>;

/// Builds the file-sink layer from `logging.log_to_file`/`logging.log_file`,
/// alongside the `WorkerGuard` that must stay alive for the process's
/// lifetime for buffered writes to actually flush to disk.
fn file_layer(config: &chat_core::config::LoggingSection) -> (Option<BoxedLayer>, Option<tracing_appender::non_blocking::WorkerGuard>) {
    if !config.log_to_file {
        return (None, None);
    }

    let log_path = Path::new(&config.log_file);
    let dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name: OsString = log_path.file_name().map(OsString::from).unwrap_or_else(|| OsString::from("server.log"));

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let layer: BoxedLayer = Box::new(fmt::layer().with_writer(non_blocking).with_ansi(false));
    (Some(layer), Some(guard))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = chat_core::AppConfig::load_or_create(&args.config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()));
    let (file_layer, _file_guard) = file_layer(&config.logging);
    let registry = tracing_subscriber::registry().with(env_filter).with(file_layer);
    if args.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    let mut server = ChatServer::new(config);
    let port = server.start().await?;
    tracing::info!(port, "chat server listening");

    server
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
