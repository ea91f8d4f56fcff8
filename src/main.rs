//! loopguard HTTP server and command-line tools

use clap::Parser;
use loopguard::cli::{self, Cli, Command};
use loopguard::config::Config;
use loopguard::{handlers, telemetry};
use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Config { output }) => write_template(output.as_deref()),
        Some(Command::Scan {
            input,
            fragment_size,
        }) => run_scan(&cli.config, input.as_deref(), fragment_size),
        Some(Command::Serve) | None => serve(&cli.config).await,
    }
}

fn write_template(output: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let template = cli::generate_config_template();
    match output {
        Some(path) => {
            std::fs::write(path, template)?;
            eprintln!("Configuration template written to {}", path);
        }
        None => print!("{}", template),
    }
    Ok(())
}

fn run_scan(
    config_path: &str,
    input: Option<&str>,
    fragment_size: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = if Path::new(config_path).exists() {
        Config::from_file(config_path)?
    } else {
        let mut config = Config::default();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config
    };
    telemetry::init(&config.observability.log_level);

    let text = match input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let report = cli::scan(config.loop_detection, &text, fragment_size)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn serve(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_file(config_path)?;

    telemetry::init(&config.observability.log_level);

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        loop_detection_enabled = config.loop_detection.enabled(),
        content_chunk_size = config.loop_detection.content_chunk_size(),
        content_loop_threshold = config.loop_detection.content_loop_threshold(),
        "Starting loopguard server"
    );

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    let state = handlers::AppState::new(Arc::new(config))?;
    let app = handlers::app(state);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
