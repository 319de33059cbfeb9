// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Authentication gates.
//!
//! Two independent gates guard the surface. The caller gate checks bearer
//! tokens from the identity provider on `/query`. The result gate checks
//! the per-process token minted at scheduling time on `/result/:pid`: get
//! the Authorization header, check the signature, and check that the pid in
//! the token matches the pid of the request. Only the caller that scheduled
//! a process can observe it.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{header::AUTHORIZATION, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::infrastructure::keyring::AuthError;
use crate::presentation::AppState;

fn bearer(req: &Request) -> Result<&str, AuthError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingCredentials)?;
    header.strip_prefix("Bearer ").ok_or(AuthError::NotBearer)
}

/// Caller gate for the `/query` family. A missing gate means authentication
/// is switched off for this deployment.
pub async fn caller_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(gate) = &state.caller_gate else {
        return next.run(req).await;
    };

    let token = match bearer(&req) {
        Ok(token) => token,
        Err(e) => {
            warn!("query rejected: {e}");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    if let Err(e) = gate.verify(token) {
        warn!("query rejected: {e}");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    next.run(req).await
}

/// Result gate for the `/result/:pid` family. Unreadable credentials are
/// 401; a readable token that does not entitle the caller to this pid is
/// 403.
pub async fn result_auth(
    State(state): State<Arc<AppState>>,
    Path(pid): Path<String>,
    req: Request,
    next: Next,
) -> Response {
    let token = match bearer(&req) {
        Ok(token) => token,
        Err(e) => {
            warn!(%pid, "result access rejected: {e}");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    if let Err(e) = state.keyring.validate(token, &pid) {
        warn!(%pid, "result access rejected: {e}");
        return StatusCode::FORBIDDEN.into_response();
    }
    next.run(req).await
}
