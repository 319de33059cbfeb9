// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Strata API server
//!
//! Serves the query surface (plan queries, emit work units) and the result
//! broker (stream, fetch, poll) over one axum app. All per-process state
//! lives on the stream bus; this process can be scaled out freely.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use strata_core::infrastructure::{BusManifestStore, CallerGate, Keyring, RedisBus};
use strata_core::presentation::{app, AppState};

/// Strata - distributed query engine for seismic volumes
#[derive(Parser)]
#[command(name = "strata-server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address to bind the HTTP server to
    #[arg(long, env = "STRATA_BIND", default_value = "0.0.0.0:8080")]
    bind: String,

    /// Stream bus (Redis) connection URL
    #[arg(long, env = "STRATA_BUS_URL", default_value = "redis://127.0.0.1:6379")]
    bus_url: String,

    /// Object store base URL handed to workers for fragment reads
    #[arg(long, env = "STRATA_STORAGE_URL")]
    storage_url: String,

    /// Pre-shared key for signing result tokens
    #[arg(long, env = "STRATA_SIGN_KEY", hide_env_values = true)]
    sign_key: String,

    /// OpenID Connect provider base URL; omit to disable caller auth
    #[arg(long, env = "STRATA_AUTH_SERVER")]
    auth_server: Option<String>,

    /// Expected audience claim on caller tokens
    #[arg(long, env = "STRATA_AUDIENCE", requires = "auth_server")]
    audience: Option<String>,

    /// Worker queue the planned task messages are pushed onto
    #[arg(long, env = "STRATA_TASK_QUEUE", default_value = "tasks")]
    task_queue: String,

    /// Upper bound on fragments per work unit
    #[arg(long, env = "STRATA_TASK_SIZE", default_value_t = 32)]
    task_size: usize,

    /// Lifetime of per-process state on the bus, in seconds
    #[arg(long, env = "STRATA_HEADER_TTL", default_value_t = 600)]
    header_ttl: u64,

    /// Per-request deadline on the result endpoints, in seconds
    #[arg(long, env = "STRATA_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "STRATA_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&cli.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let bus = Arc::new(
        RedisBus::connect(&cli.bus_url)
            .await
            .context("failed to connect to the stream bus")?,
    );

    let caller_gate = match (&cli.auth_server, &cli.audience) {
        (Some(authserver), Some(audience)) => Some(
            CallerGate::from_provider(authserver, audience)
                .await
                .context("failed to configure the identity provider gate")?,
        ),
        _ => {
            tracing::warn!("caller authentication is DISABLED; /query is open");
            None
        }
    };

    let state = Arc::new(AppState {
        bus: bus.clone(),
        manifests: Arc::new(BusManifestStore::new(bus)),
        keyring: Keyring::new(cli.sign_key.into_bytes()),
        caller_gate,
        storage_endpoint: cli.storage_url,
        task_queue: cli.task_queue,
        task_size: cli.task_size,
        header_ttl: Duration::from_secs(cli.header_ttl),
        timeout: Duration::from_secs(cli.timeout),
    });

    let listener = TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("failed to bind to {}", cli.bind))?;
    info!("listening on {}", cli.bind);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C signal");
        },
        _ = terminate => {
            info!("received SIGTERM signal");
        },
    }
}
