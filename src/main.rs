//! Connect Tunnel endpoint
//!
//! Runs a listener that answers HTTP `CONNECT` requests by opening an opaque
//! tunnel to the requested destination, or through an upstream proxy when
//! one is configured.

#![deny(clippy::correctness)]
#![warn(clippy::suspicious)]
#![warn(clippy::style)]
#![warn(clippy::complexity)]
#![warn(clippy::perf)]

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use connect_tunnel::config::{self, Config, PortValue};
use connect_tunnel::{ProxyServer, TunnelHandler};

#[derive(Parser, Debug)]
#[command(name = "connect-tunnel")]
#[command(author, version, about = "HTTP CONNECT tunneling endpoint")]
struct Cli {
    /// Config file (defaults to the per-user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = "CONNECT_TUNNEL_LISTEN")]
    listen: Option<SocketAddr>,

    /// Upstream proxy to chain tunnels through
    #[arg(long, env = "CONNECT_TUNNEL_PROXY_HOST")]
    proxy_host: Option<String>,

    /// Upstream proxy port (decimal, 0x-hex or 0-octal; defaults to 80)
    #[arg(long, env = "CONNECT_TUNNEL_PROXY_PORT")]
    proxy_port: Option<String>,

    /// Proxy-Authorization value sent to the upstream proxy
    #[arg(long, env = "CONNECT_TUNNEL_AUTH", hide_env_values = true)]
    auth: Option<String>,

    /// Identity used to tag log output
    #[arg(long)]
    prefix: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load(cli.config.as_deref())?;

    // CLI > env > file
    if cli.proxy_host.is_some() {
        config.tunnel.proxy_host = cli.proxy_host;
    }
    if let Some(port) = cli.proxy_port {
        config.tunnel.proxy_port = Some(PortValue::Text(port));
    }
    if cli.auth.is_some() {
        config.tunnel.auth = cli.auth;
    }
    if cli.prefix.is_some() {
        config.tunnel.prefix = cli.prefix;
    }

    let listen = match cli.listen.or(config.server.listen) {
        Some(addr) => addr,
        None => config::DEFAULT_LISTEN
            .parse()
            .context("Invalid default listen address")?,
    };

    let tunnel = config.tunnel.resolve();
    match &tunnel.upstream_host {
        Some(host) => info!("Chaining tunnels through {}:{}", host, tunnel.upstream_port),
        None => info!("Opening tunnels directly"),
    }

    let handler = TunnelHandler::new(tunnel, config.tunnel.prefix());
    let server = ProxyServer::bind(listen, handler)
        .await
        .with_context(|| format!("Failed to listen on {}", listen))?;

    tokio::select! {
        result = server.run() => result.context("Tunnel endpoint stopped")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
