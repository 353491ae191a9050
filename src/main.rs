//! Vaiz MCP Proxy
//!
//! Bridges a local MCP client on stdio to the remote Vaiz MCP API over
//! HTTPS, surviving outages with cached responses and a recovery prober.

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use vaiz_mcp_proxy::config::{Args, Config};
use vaiz_mcp_proxy::mcp::transport::StdioTransport;
use vaiz_mcp_proxy::proxy::ProxyServer;
use vaiz_mcp_proxy::VERSION;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // stdout carries the protocol; all logging goes to stderr.
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!("Vaiz MCP proxy v{}", VERSION);
    info!("Upstream: {}", config.api_url);

    let server = match ProxyServer::new(&config) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start proxy: {}", e);
            std::process::exit(1);
        }
    };

    let transport = StdioTransport::new();

    // SIGINT/SIGTERM and stdin EOF share one shutdown path: the proxy stops
    // its prober and transport before returning.
    if let Err(e) = server.run_until(transport, shutdown_signal()).await {
        error!("Proxy terminated with error: {}", e);
        std::process::exit(1);
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
