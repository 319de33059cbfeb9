// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP surface.
//!
//! Two route families share one state: `/query/...` (plan a query, behind
//! the caller gate) and `/result/:pid/...` (deliver results, behind the
//! result gate). Per-process state lives on the stream bus; the handlers
//! keep nothing in memory between requests.

pub mod middleware;
pub mod query;
pub mod result;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;

use crate::infrastructure::keyring::Keyring;
use crate::infrastructure::manifest_store::ManifestStore;
use crate::infrastructure::openid::CallerGate;
use crate::infrastructure::stream_bus::StreamBus;

pub struct AppState {
    pub bus: Arc<dyn StreamBus>,
    pub manifests: Arc<dyn ManifestStore>,
    pub keyring: Keyring,
    /// `None` disables caller authentication (development setups).
    pub caller_gate: Option<CallerGate>,
    /// Base URL of the object store holding the fragments, forwarded to
    /// workers inside task messages.
    pub storage_endpoint: String,
    /// Worker queue the planned task messages are pushed onto.
    pub task_queue: String,
    /// Upper bound on fragments per work unit.
    pub task_size: usize,
    /// Lifetime of `<pid>/header.json` and the per-pid stream.
    pub header_ttl: Duration,
    /// Per-request deadline on the result endpoints.
    pub timeout: Duration,
}

pub fn app(state: Arc<AppState>) -> Router {
    let query_routes = Router::new()
        .route("/query/:guid", get(query::manifest_summary))
        .route("/query/:guid/slice/:dim/:lineno", get(query::slice))
        .route("/query/:guid/curtain", post(query::curtain))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::caller_auth,
        ));

    let result_routes = Router::new()
        .route("/result/:pid", get(result::fetch))
        .route("/result/:pid/stream", get(result::stream))
        .route("/result/:pid/status", get(result::status))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::result_auth,
        ));

    Router::new()
        .merge(query_routes)
        .merge(result_routes)
        .with_state(state)
}
