// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Result delivery.
//!
//! Workers push one bundle per completed work unit onto the per-pid stream;
//! these handlers turn that stream back into HTTP responses. Three shapes:
//! a long-lived chunked stream, a one-shot assembled payload, and a polling
//! status document.
//!
//! Within a request, a producer task performs the blocking bus reads and a
//! consumer (the handler) writes to the socket, coupled by a bounded channel
//! so that TCP backpressure propagates all the way to the bus reads. Tile
//! order is exactly bus-append order, the result header is always the first
//! frame, and the producer is the sole closer of the tile channel (the close
//! is the completion signal).

use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::messages::{ProcessHeader, ResultHeader};
use crate::infrastructure::stream_bus::{BusError, StreamBus};
use crate::presentation::AppState;

const OCTET_STREAM: &str = "application/octet-stream";

/// Capacity of the tile channel when assembling a one-shot response; smooths
/// bursts without unbounded buffering.
const ASSEMBLE_CHANNEL_CAPACITY: usize = 1000;

/// The name/key of the header object, in one place.
fn header_key(pid: &str) -> String {
    format!("{pid}/header.json")
}

enum HeaderError {
    Missing,
    Unusable,
}

async fn load_header(bus: &dyn StreamBus, pid: &str) -> Result<ProcessHeader, HeaderError> {
    let doc = match bus.get(&header_key(pid)).await {
        Ok(Some(doc)) => doc,
        Ok(None) => return Err(HeaderError::Missing),
        Err(e) => {
            error!(%pid, "unable to get process header: {e}");
            return Err(HeaderError::Unusable);
        }
    };
    ProcessHeader::unpack(&doc).map_err(|e| {
        error!(%pid, "bad process header: {e}");
        HeaderError::Unusable
    })
}

enum CollectFailure {
    Worker(String),
    Bus(BusError),
    Header(crate::domain::messages::MessageError),
}

impl fmt::Display for CollectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectFailure::Worker(detail) => write!(f, "worker reported failure: {detail}"),
            CollectFailure::Bus(e) => write!(f, "{e}"),
            CollectFailure::Header(e) => write!(f, "{e}"),
        }
    }
}

/// Read partial results off the per-pid stream until all expected tiles are
/// in, a worker reports failure, or the request is cancelled.
///
/// Dropping `tiles` on return is the completion signal to the consumer, so
/// every path out of this function must flow through it once - hence the
/// single return points per arm and no early panics.
async fn collect_results(
    bus: Arc<dyn StreamBus>,
    pid: String,
    head: ProcessHeader,
    tiles: mpsc::Sender<Vec<u8>>,
    failure: mpsc::Sender<CollectFailure>,
    cancel: CancellationToken,
) {
    let header = ResultHeader::from(&head);
    let packed = match header.pack() {
        Ok(packed) => packed,
        Err(e) => {
            let _ = failure.send(CollectFailure::Header(e)).await;
            return;
        }
    };
    if tiles.send(packed).await.is_err() {
        return;
    }

    let mut cursor = "0".to_string();
    let mut count: i64 = 0;
    debug!(%pid, ntasks = head.ntasks, "collecting partial results");

    while count < head.ntasks {
        let entries = tokio::select! {
            () = cancel.cancelled() => return,
            read = bus.read_after(&pid, &cursor) => match read {
                Ok(entries) => entries,
                Err(e) => {
                    let _ = failure.send(CollectFailure::Bus(e)).await;
                    return;
                }
            },
        };

        for entry in entries {
            for (field, value) in entry.fields {
                // A key named "error" means fetching fragments failed
                // somewhere; the first one terminates the whole exchange.
                if field == "error" {
                    let detail = String::from_utf8_lossy(&value).into_owned();
                    let _ = failure.send(CollectFailure::Worker(detail)).await;
                    return;
                }
                if tiles.send(value).await.is_err() {
                    return;
                }
                count += 1;
            }
            cursor = entry.id;
        }
    }
    debug!(%pid, count, "collection complete");
}

/// Length-prefix a frame so clients can reassemble messages across HTTP
/// chunk boundaries: ten ASCII decimal digits counting the prefix itself
/// plus the payload.
fn frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = format!("{:010}", 10 + payload.len()).into_bytes();
    framed.extend_from_slice(payload);
    framed
}

/// `GET /result/:pid/stream` - chunked delivery of length-prefixed frames as
/// tiles arrive.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path(pid): Path<String>,
) -> Response {
    let head = match load_header(state.bus.as_ref(), &pid).await {
        Ok(head) => head,
        Err(HeaderError::Missing) => return StatusCode::NOT_FOUND.into_response(),
        Err(HeaderError::Unusable) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let (tiles_tx, mut tiles_rx) = mpsc::channel::<Vec<u8>>(1);
    let (failure_tx, mut failure_rx) = mpsc::channel::<CollectFailure>(1);
    let cancel = CancellationToken::new();

    tokio::spawn(collect_results(
        state.bus.clone(),
        pid.clone(),
        head,
        tiles_tx,
        failure_tx,
        cancel.clone(),
    ));

    // Cancels the producer when the body is dropped: client disconnect,
    // server shutdown, or normal end of response.
    let guard = cancel.drop_guard();
    let timeout = state.timeout;

    let body = Body::from_stream(async_stream::stream! {
        let _guard = guard;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                Some(failure) = failure_rx.recv() => {
                    error!(%pid, "failure while streaming: {failure}");
                    yield Err(std::io::Error::other(failure.to_string()));
                    break;
                }
                () = &mut deadline => {
                    warn!(%pid, "deadline exceeded mid-stream");
                    yield Err(std::io::Error::other("deadline exceeded"));
                    break;
                }
                tile = tiles_rx.recv() => match tile {
                    Some(payload) => yield Ok::<Vec<u8>, std::io::Error>(frame(&payload)),
                    None => {
                        info!(%pid, "stream finished");
                        break;
                    }
                },
            }
        }
    });

    ([(CONTENT_TYPE, OCTET_STREAM)], body).into_response()
}

/// `GET /result/:pid` - one-shot delivery. 202 until every tile has been
/// written, then the result header and all tiles concatenated.
pub async fn fetch(
    State(state): State<Arc<AppState>>,
    Path(pid): Path<String>,
) -> Response {
    let head = match load_header(state.bus.as_ref(), &pid).await {
        Ok(head) => head,
        Err(HeaderError::Missing) => return StatusCode::NOT_FOUND.into_response(),
        Err(HeaderError::Unusable) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    match state.bus.len(&pid).await {
        Ok(count) if count < head.ntasks as u64 => return StatusCode::ACCEPTED.into_response(),
        Ok(_) => {}
        Err(e) => {
            error!(%pid, "unable to count partial results: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let ntasks = head.ntasks;
    let (tiles_tx, mut tiles_rx) = mpsc::channel::<Vec<u8>>(ASSEMBLE_CHANNEL_CAPACITY);
    let (failure_tx, mut failure_rx) = mpsc::channel::<CollectFailure>(1);
    let cancel = CancellationToken::new();

    tokio::spawn(collect_results(
        state.bus.clone(),
        pid.clone(),
        head,
        tiles_tx,
        failure_tx,
        cancel.clone(),
    ));
    let _guard = cancel.drop_guard();

    let drained = tokio::time::timeout(state.timeout, async {
        let mut assembled: Vec<u8> = Vec::new();
        let mut frames: i64 = 0;
        loop {
            tokio::select! {
                biased;
                Some(failure) = failure_rx.recv() => return Err(failure),
                tile = tiles_rx.recv() => match tile {
                    Some(payload) => {
                        assembled.extend_from_slice(&payload);
                        frames += 1;
                    }
                    None => break,
                },
            }
        }
        Ok((assembled, frames))
    })
    .await;

    match drained {
        Err(_) => {
            warn!(%pid, "deadline exceeded assembling result");
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
        Ok(Err(failure)) => {
            error!(%pid, "failure assembling result: {failure}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Ok(Ok((assembled, frames))) => {
            // The first frame is the result header, so tiles = frames - 1.
            // Coming up short here means the stream lied about its length.
            if frames - 1 < ntasks {
                error!(%pid, frames, ntasks, "assembled fewer tiles than scheduled");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            info!(%pid, bytes = assembled.len(), "returning assembled result");
            ([(CONTENT_TYPE, OCTET_STREAM)], assembled).into_response()
        }
    }
}

/// `GET /result/:pid/status` - polling.
///
/// A valid token with no header yet means the job is enqueued but the
/// header-write step has not completed: pending, not missing. Partial
/// results also expire, and requests after expiration still carry a valid
/// token; those too read as pending.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(pid): Path<String>,
) -> Response {
    let head = match load_header(state.bus.as_ref(), &pid).await {
        Ok(head) => head,
        Err(HeaderError::Missing) => {
            return (
                StatusCode::ACCEPTED,
                Json(json!({
                    "location": format!("result/{pid}/status"),
                    "status": "pending",
                })),
            )
                .into_response();
        }
        Err(HeaderError::Unusable) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let count = match state.bus.len(&pid).await {
        Ok(count) => count,
        Err(e) => {
            error!(%pid, "unable to count partial results: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let progress = format!("{count}/{}", head.ntasks);
    if count == head.ntasks as u64 {
        (
            StatusCode::OK,
            Json(json!({
                "location": format!("result/{pid}"),
                "status": "finished",
                "progress": progress,
            })),
        )
            .into_response()
    } else {
        (
            StatusCode::ACCEPTED,
            Json(json!({
                "location": format!("result/{pid}/status"),
                "status": "working",
                "progress": progress,
            })),
        )
            .into_response()
    }
}
