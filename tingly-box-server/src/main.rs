//! Binary entry point for the Tingly Box proxy server.
//!
//! ## Usage
//!
//! ```bash
//! tingly-box --config routing.toml --host 0.0.0.0 --port 3000
//! ```

use clap::Parser;
use std::net::SocketAddr;
use tingly_box_core::config::RoutingConfig;
use tingly_box_server::create_server;

/// Command line arguments for the Tingly Box server.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the routing configuration file (TOML).
    #[arg(short, long, default_value = "routing.toml")]
    config: String,

    /// Port number for the HTTP server.
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Host address to bind the server to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Logging level: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let config = RoutingConfig::load(&args.config)?;
    let app = create_server(config).await?;

    let addr = SocketAddr::new(args.host.parse()?, args.port);
    tracing::info!("starting tingly-box on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
