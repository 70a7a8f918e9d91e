use std::io::Write as _;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

mod bridge;
mod cli;
mod config;
mod stdio;

use cli::Cli;
use config::ConfigRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    // Config problems are fatal before anything is served
    let config_path = config::discover(cli.config.as_deref())?;
    let bridge_config = config::load(&config_path)?;
    let registry = Arc::new(ConfigRegistry::new(bridge_config));
    log::info!(
        "loaded {} server(s) from {}",
        registry.len(),
        config_path.display()
    );

    if cli.list_servers {
        println!("Configured servers:");
        for name in registry.enabled_names() {
            let descriptor = registry.get(&name).expect("enabled name is registered");
            match &descriptor.description {
                Some(description) => println!("  - {name}: {description}"),
                None => println!("  - {name} ({})", descriptor.command),
            }
        }
        return Ok(());
    }

    // Create cancellation token for graceful shutdown
    let shutdown_token = tokio_util::sync::CancellationToken::new();

    // Spawn cross-platform signal handler
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        wait_for_interrupt().await;
        log::debug!("received interrupt signal, shutting down");
        signal_token.cancel();
    });

    let settings = bridge::BridgeSettings::default();
    let sweep_interval = settings.sweep_interval;
    let dispatcher = Arc::new(bridge::dispatcher::Dispatcher::new(
        registry,
        settings,
        shutdown_token.clone(),
    ));

    let sweeper = dispatcher
        .results()
        .spawn_sweeper(sweep_interval, shutdown_token.clone());

    let server = stdio::BridgeServer::new(dispatcher.clone());
    let serve_result = server.serve_stdio(shutdown_token.clone()).await;

    // Clean shutdown: stop the sweep and close every child process
    shutdown_token.cancel();
    dispatcher.close().await;
    let _ = sweeper.await;

    serve_result
}

/// Diagnostics go to stderr so the JSON-RPC channel on stdout stays clean.
fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(buf, "[mcpbridge] {} {}", record.level(), record.args())
        })
        .init();
}

/// Wait for SIGINT, plus SIGTERM on unix.
async fn wait_for_interrupt() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            return;
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}
