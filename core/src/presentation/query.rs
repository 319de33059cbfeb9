// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Query scheduling surface.
//!
//! Planning a query means: fetch and decode the manifest, mint a pid and its
//! result token, pack the task, run the planner, persist the process header,
//! and push the work units onto the worker queue. The response hands the
//! caller everything needed to follow up: the result location, the status
//! location, and the token that unlocks both.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_bytes::ByteBuf;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::planner::{schedule, PlanError};
use crate::domain::geometry::{Dim, Geometry, GeometryError};
use crate::domain::manifest::Manifest;
use crate::domain::messages::{CurtainTask, ProcessHeader, SliceTask};
use crate::infrastructure::manifest_store::ManifestStoreError;
use crate::presentation::AppState;

/// `GET /query/:guid` - the manifest summary clients use to map line numbers
/// to index positions.
pub async fn manifest_summary(
    State(state): State<Arc<AppState>>,
    Path(guid): Path<String>,
) -> Response {
    let manifest = match fetch_manifest(&state, &guid).await {
        Ok(manifest) => manifest,
        Err(response) => return response,
    };

    let dimensions: Vec<serde_json::Value> = manifest
        .dimensions
        .iter()
        .map(|keys| json!({ "keys": keys }))
        .collect();
    Json(json!({ "guid": guid, "dimensions": dimensions })).into_response()
}

/// `GET /query/:guid/slice/:dim/:lineno`
pub async fn slice(
    State(state): State<Arc<AppState>>,
    Path((guid, dim, lineno)): Path<(String, usize, i64)>,
) -> Response {
    plan(&state, &guid, QueryKind::Slice { dim, lineno }).await
}

#[derive(Debug, Deserialize)]
pub struct CurtainRequest {
    pub intersections: Vec<(u64, u64)>,
}

/// `POST /query/:guid/curtain`
pub async fn curtain(
    State(state): State<Arc<AppState>>,
    Path(guid): Path<String>,
    Json(request): Json<CurtainRequest>,
) -> Response {
    if request.intersections.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "intersections must be non-empty" })),
        )
            .into_response();
    }
    let (dim0s, dim1s) = request.intersections.into_iter().unzip();
    plan(&state, &guid, QueryKind::Curtain { dim0s, dim1s }).await
}

enum QueryKind {
    Slice { dim: usize, lineno: i64 },
    Curtain { dim0s: Vec<u64>, dim1s: Vec<u64> },
}

async fn fetch_manifest(state: &AppState, guid: &str) -> Result<Manifest, Response> {
    let raw = match state.manifests.fetch(guid).await {
        Ok(raw) => raw,
        Err(ManifestStoreError::NotFound(_)) => {
            warn!(guid, "query for unknown survey");
            return Err(StatusCode::NOT_FOUND.into_response());
        }
        Err(e) => {
            error!(guid, "manifest fetch failed: {e}");
            return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    };
    Manifest::decode(&raw).map_err(|e| {
        error!(guid, "stored manifest is unusable: {e}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

async fn plan(state: &AppState, guid: &str, kind: QueryKind) -> Response {
    let manifest = match fetch_manifest(state, guid).await {
        Ok(manifest) => manifest,
        Err(response) => return response,
    };
    let fragment = match manifest.fragment_shape() {
        Ok(fragment) => fragment,
        Err(e) => {
            error!(guid, "stored manifest is unusable: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let pid = Uuid::new_v4().to_string();
    let token = match state.keyring.sign(&pid) {
        Ok(token) => token,
        Err(e) => {
            error!(%pid, "unable to sign result token: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let manifest_raw = match serde_json::to_vec(&manifest) {
        Ok(raw) => raw,
        Err(e) => {
            error!(guid, "unable to re-encode manifest: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let packed = {
        let packed = match &kind {
            QueryKind::Slice { dim, lineno } => SliceTask {
                pid: pid.clone(),
                token: token.clone(),
                guid: guid.to_string(),
                storage_endpoint: state.storage_endpoint.clone(),
                manifest: ByteBuf::from(manifest_raw),
                function: "slice".to_string(),
                shape: fragment.0,
                dim: *dim,
                lineno: *lineno,
            }
            .pack(),
            QueryKind::Curtain { dim0s, dim1s } => CurtainTask {
                pid: pid.clone(),
                token: token.clone(),
                guid: guid.to_string(),
                storage_endpoint: state.storage_endpoint.clone(),
                manifest: ByteBuf::from(manifest_raw),
                function: "curtain".to_string(),
                shape: fragment.0,
                dim0s: dim0s.clone(),
                dim1s: dim1s.clone(),
            }
            .pack(),
        };
        match packed {
            Ok(packed) => packed,
            Err(e) => {
                error!(%pid, "unable to pack task: {e}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    };

    let tasks = match schedule(&packed, state.task_size) {
        Ok(tasks) => tasks,
        Err(e) => return plan_error_response(&pid, e),
    };

    let (shape, index) = match result_dimensions(&manifest, fragment, &kind) {
        Ok(parts) => parts,
        Err(e) => {
            error!(%pid, "unable to derive result dimensions: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let header = ProcessHeader {
        pid: pid.clone(),
        ntasks: tasks.len() as i64,
        shape,
        index,
    };
    let packed_header = match header.pack() {
        Ok(packed_header) => packed_header,
        Err(e) => {
            error!(%pid, "unable to pack process header: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Err(e) = state
        .bus
        .set_with_ttl(&format!("{pid}/header.json"), &packed_header, state.header_ttl)
        .await
    {
        error!(%pid, "unable to persist process header: {e}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    if let Err(e) = state.bus.enqueue(&state.task_queue, &tasks).await {
        error!(%pid, "unable to enqueue work units: {e}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    info!(%pid, guid, ntasks = header.ntasks, "query scheduled");
    Json(json!({
        "location": format!("result/{pid}"),
        "status": format!("result/{pid}/status"),
        "authorization": token,
    }))
    .into_response()
}

fn plan_error_response(pid: &str, e: PlanError) -> Response {
    match e {
        PlanError::LineNotFound { .. } => {
            warn!(%pid, "{e}");
            (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() }))).into_response()
        }
        PlanError::Geometry(GeometryError::DimensionOutOfRange(_)) => {
            warn!(%pid, "{e}");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
        }
        _ => {
            error!(%pid, "planning failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// The assembled-result shape and index recorded in the process header.
///
/// For a slice, the result buffer is fragment-aligned (edge fragments are
/// zero-padded) while the index carries the true line numbers of the two
/// free axes. For a curtain, the index carries the zero-based coordinates of
/// each trace plus the sample axis, and the buffer is one padded trace per
/// intersection.
fn result_dimensions(
    manifest: &Manifest,
    fragment: crate::domain::geometry::FragmentShape,
    kind: &QueryKind,
) -> Result<(Vec<u64>, Vec<Vec<i64>>), GeometryError> {
    let geometry = Geometry::new(manifest.cube_shape(), fragment)?;
    let cube = geometry.cube_shape();
    let frag = geometry.fragment_shape();
    let padded = |axis: usize| cube[axis].div_ceil(frag[axis]) * frag[axis];

    match kind {
        QueryKind::Slice { dim, .. } => {
            let (a, b) = Dim::new(*dim)?.others();
            Ok((
                vec![padded(a), padded(b)],
                vec![
                    manifest.dimensions[a].clone(),
                    manifest.dimensions[b].clone(),
                ],
            ))
        }
        QueryKind::Curtain { dim0s, dim1s } => {
            let index = vec![
                dim0s.iter().map(|&x| x as i64).collect(),
                dim1s.iter().map(|&y| y as i64).collect(),
                (0..cube[2] as i64).collect(),
            ];
            Ok((vec![dim0s.len() as u64, padded(2)], index))
        }
    }
}
