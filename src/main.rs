//! linerpc - line-delimited JSON RPC server
//!
//! Serves registered functions over TCP, one request per connection, with
//! blocking functions offloaded so they never stall other connections.

use linerpc_server::metrics::run_metrics_server;
use linerpc_server::{
    Config, Dispatcher, FunctionRegistry, Metrics, ServeMode, Server, ServerConfig, Service,
    StaticFiles,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if LINERPC_CONFIG is set, then env overrides)
    let config_path = std::env::var("LINERPC_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // An explicitly named config file must load
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::from_env()
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting linerpc server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Mode: {}", config.mode);
    tracing::info!("  Max connections: {}", config.network.max_connections);

    let mut server_config = ServerConfig::from_network(&config.network);

    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        server_config = server_config.with_metrics(metrics.clone());
        tracing::info!("  Metrics: http://{}/metrics", config.metrics.bind_addr);
        Some(metrics)
    } else {
        tracing::info!("  Metrics: disabled");
        None
    };

    let service = match config.mode {
        ServeMode::Rpc => {
            let registry = FunctionRegistry::with_builtins();
            tracing::info!("  Functions: {}", registry.names().join(", "));
            let mut dispatcher = Dispatcher::new(Arc::new(registry));
            if let Some(ref metrics) = metrics {
                dispatcher = dispatcher.with_metrics(metrics.clone());
            }
            Service::Rpc(Arc::new(dispatcher))
        }
        ServeMode::Echo => Service::Echo,
        ServeMode::Static => {
            tracing::info!("  Static root: {}", config.static_files.root.display());
            Service::StaticFiles(Arc::new(StaticFiles::new(&config.static_files.root)))
        }
    };

    let server = Arc::new(Server::new(server_config, service));

    let metrics_handle = metrics.map(|metrics| {
        let addr = config.metrics.bind_addr;
        let shutdown = server.subscribe_shutdown();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics, shutdown).await {
                tracing::error!("Metrics server failed: {}", e);
            }
        })
    });

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    tracing::info!("Server stopped");
    Ok(())
}
