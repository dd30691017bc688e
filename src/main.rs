//! # hub
//!
//! Hub server binary: registers the built-in handlers, installs logging and
//! serves WebSocket and HTTP until ctrl-c.

#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hub_core::ConnectionRegistry;
use hub_rpc::handlers::{register_all, HubServices};
use hub_rpc::{Dispatcher, HandlerRegistry, LoggingMiddleware, RegistryBuilder, RegistryError};
use hub_server::{HubServer, ServerConfig};

/// JSON-RPC hub over WebSocket and HTTP.
#[derive(Parser, Debug)]
#[command(name = "hub", about = "JSON-RPC hub over WebSocket and HTTP")]
struct Cli {
    /// Host to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Maximum concurrent WebSocket connections.
    #[arg(long, default_value = "1024")]
    max_connections: usize,

    /// Outbound frames buffered per connection before drops.
    #[arg(long, default_value = "256")]
    send_queue_capacity: usize,

    /// Seconds between heartbeat pings.
    #[arg(long, default_value = "30")]
    heartbeat_interval: u64,

    /// Seconds to wait for connections to drain on shutdown.
    #[arg(long, default_value = "10")]
    shutdown_timeout: u64,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Print the registered methods and events as JSON and exit.
    #[arg(long)]
    dump_api: bool,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            max_connections: self.max_connections,
            send_queue_capacity: self.send_queue_capacity,
            heartbeat_interval_secs: self.heartbeat_interval,
            shutdown_timeout_secs: self.shutdown_timeout,
            ..ServerConfig::default()
        }
    }
}

/// `RUST_LOG` wins over the default `info` level.
fn init_logging(json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

fn build_handlers(registry: &Arc<ConnectionRegistry>) -> Result<HandlerRegistry, RegistryError> {
    let services = HubServices::new(Arc::clone(registry));
    let mut builder = RegistryBuilder::new();
    register_all(&mut builder, &services);
    builder.build()
}

fn build_dispatcher(registry: &Arc<ConnectionRegistry>) -> Result<Dispatcher, RegistryError> {
    Ok(Dispatcher::new(Arc::new(build_handlers(registry)?)).with_middleware(LoggingMiddleware))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let config = args.server_config();

    if args.dump_api {
        // Descriptors do not depend on live state; a throwaway registry will do.
        let handlers = build_handlers(&Arc::new(ConnectionRegistry::new(1)))
            .context("Invalid handler registration")?;
        let json = serde_json::to_string_pretty(handlers.descriptors())
            .context("Failed to serialize API descriptors")?;
        println!("{json}");
        return Ok(());
    }

    init_logging(args.log_json);

    let server = HubServer::new(config, build_dispatcher).context("Invalid server setup")?;
    let handle = server.listen().await.context("Failed to bind server")?;

    tracing::info!(
        "hub listening on http://{} ({} RPC methods registered)",
        handle.addr(),
        server.dispatcher().registry().methods().len()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if server.stop(handle).await {
        tracing::info!("Shutdown complete");
    } else {
        tracing::warn!("Shutdown deadline passed with connections still open");
    }
    Ok(())
}
