//! Unfurl Gate - link preview service for the portfolio admin.
//!
//! Serves `GET /api/unfurl?url=...`, fetching the target page's preview
//! metadata without letting the caller reach private networks or exhaust
//! the server.

mod cli;
mod config;
mod error;
mod unfurl;
mod web;

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::Args;
use unfurl::{SystemResolver, Unfurler};
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    // Initialize logging
    init_logging(args.verbose);

    let config = args.unfurl_config();
    info!(
        "Unfurl limits: timeout={:?}, max_body_bytes={}, max_redirects={}",
        config.timeout, config.max_body_bytes, config.max_redirects
    );
    if !config.allow_hosts.is_empty() {
        info!("Allow list active ({} patterns)", config.allow_hosts.len());
    }
    if !config.deny_hosts.is_empty() {
        info!("Deny list active ({} patterns)", config.deny_hosts.len());
    }
    if config.allow_private_addresses {
        warn!("Private address protection is DISABLED (--allow-private)");
    }

    let unfurler = Unfurler::new(&config, Arc::new(SystemResolver));
    let state = AppState::new(unfurler);

    web::start_server(state, &args.host, args.port).await
}

/// Initialize the tracing subscriber for logging
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
