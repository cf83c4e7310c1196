// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Mutex;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use slotrush::config::RushConfig;
use slotrush::dispatch::http::ensure_crypto_provider;

#[tokio::main]
async fn main() {
    let config = RushConfig::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e:#}");
        std::process::exit(2);
    }

    init_tracing(&config);
    ensure_crypto_provider();

    let shutdown = CancellationToken::new();
    let sd = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received, shutting down");
                sd.cancel();
            }
            Err(e) => error!("failed to listen for interrupt: {e}"),
        }
    });

    match slotrush::run(config, shutdown).await {
        Ok(summary) => {
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!("failed to encode run summary: {e}"),
            }
            info!(outcome = %summary.outcome, "exiting");
            std::process::exit(summary.outcome.exit_code());
        }
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &RushConfig) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let fallback = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let writer = Mutex::new(std::io::stderr());

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(writer).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(writer).init();
        }
    }
}
