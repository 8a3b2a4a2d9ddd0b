//! gcad - GCA regional collection daemon
//!
//! Ingests signed power-production telemetry from solar-monitoring IoT
//! devices over UDP, answers missing-report sync requests over TCP, and
//! serves the onboarding/query/archive HTTP API.

use clap::Parser;
use gcad::config::Config;
use gcad::server::Server;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("gcad=info".parse().unwrap()))
        .init();

    // Parse configuration
    let config = Config::parse();
    if let Err(e) = config.validate() {
        error!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        "gcad v{} - GCA Regional Collection Daemon",
        env!("CARGO_PKG_VERSION")
    );

    // Create and run server
    match Server::new(config) {
        Ok(server) => {
            let server = Arc::new(server);

            let signal_server = server.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("received shutdown signal");
                signal_server.shutdown();
            });

            if let Err(e) = server.run().await {
                error!("server error: {e}");
                return ExitCode::FAILURE;
            }
        }
        Err(e) => {
            error!("failed to initialize server: {e}");
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
