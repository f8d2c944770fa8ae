use clap::Parser;
use std::path::PathBuf;
use std::process::exit;

use rredis::config::Config;
use rredis::server::Server;

/// A Redis-protocol-compatible in-memory key-value server.
#[derive(Parser, Debug)]
#[command(name = "rredis")]
struct Cli {
    /// Path to a config file, following the directive syntax in spec §6.
    config_file: Option<PathBuf>,

    /// Overrides the `listen_addr` from the config file (or its default).
    #[arg(long)]
    listen_addr: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config_file {
        Some(path) => match Config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!(error = %e, "failed to load config file");
                exit(1);
            }
        },
        None => {
            tracing::warn!(
                "no config file specified, using the default config. \
                 In order to specify a config file use 'rredis /path/to/redis.conf'"
            );
            Config::default()
        }
    };

    if let Some(addr) = cli.listen_addr {
        config.listen_addr = addr;
    }

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind server");
            exit(1);
        }
    };

    if let Err(e) = server.load_persisted_state().await {
        tracing::error!(error = %e, "failed to load persisted state");
        exit(1);
    }

    server.spawn_background_tasks();

    tracing::info!("the server is now ready to accept connections");
    server.run(shutdown_signal()).await;

    server.final_flush().await;
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate.recv() => {}
    }
}
