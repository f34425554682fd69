//! `taskboard-server` -- reference task store.
//!
//! An axum WebSocket server that holds one task table, answers the
//! owner-scoped store calls and pushes row changes to subscribed clients.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000
//! cargo run --bin taskboard-server
//!
//! # Serve a table without the sprint column
//! cargo run --bin taskboard-server -- --bind 127.0.0.1:8080 --legacy-schema
//! ```

use std::sync::Arc;

use clap::Parser;
use taskboard_server::config::{ServerCliArgs, ServerConfig};
use taskboard_server::server::{self, StoreState};

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        legacy_schema = config.legacy_schema,
        unfiltered_feed = config.unfiltered_feed,
        "starting taskboard store server"
    );

    let state = Arc::new(StoreState::from_config(&config));

    match server::start_server_with_state(&config.bind_addr.to_string(), state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "store server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "store server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start store server");
            std::process::exit(1);
        }
    }
}
