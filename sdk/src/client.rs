// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Client for interacting with a Strata deployment.
//!
//! Scheduling a query returns a [`Process`] handle carrying the result
//! token; the handle can poll status, fetch the assembled payload, or stream
//! frames as workers complete.

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("malformed result document: {0}")]
    Decode(String),
}

/// Client for scheduling queries against a Strata server.
pub struct StrataClient {
    base_url: String,
    http: Client,
    bearer: Option<String>,
}

impl StrataClient {
    /// Create a new client against `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: Client::new(),
            bearer: None,
        }
    }

    /// Set the identity-provider bearer token used on `/query` requests.
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.get(format!("{}/{path}", self.base_url));
        if let Some(token) = &self.bearer {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        req
    }

    /// The survey's manifest summary: per axis, the line numbers at every
    /// index position.
    pub async fn manifest(&self, guid: &str) -> Result<serde_json::Value, SdkError> {
        let response = self
            .get(&format!("query/{guid}"))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Schedule a slice query: the cross-section at `lineno` along `dim`.
    pub async fn slice(&self, guid: &str, dim: usize, lineno: i64) -> Result<Process, SdkError> {
        let response = self
            .get(&format!("query/{guid}/slice/{dim}/{lineno}"))
            .send()
            .await?
            .error_for_status()?;
        self.process_from(response.json().await?)
    }

    /// Schedule a curtain query through the given `(dim0, dim1)` pairs.
    pub async fn curtain(
        &self,
        guid: &str,
        intersections: &[(u64, u64)],
    ) -> Result<Process, SdkError> {
        let mut req = self
            .http
            .post(format!("{}/query/{guid}/curtain", self.base_url))
            .json(&serde_json::json!({ "intersections": intersections }));
        if let Some(token) = &self.bearer {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let response = req.send().await?.error_for_status()?;
        self.process_from(response.json().await?)
    }

    fn process_from(&self, scheduled: Scheduled) -> Result<Process, SdkError> {
        let pid = scheduled
            .location
            .rsplit('/')
            .next()
            .filter(|pid| !pid.is_empty())
            .ok_or_else(|| SdkError::Protocol(format!("bad location: {}", scheduled.location)))?
            .to_string();
        Ok(Process {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            result_url: scheduled.location,
            status_url: scheduled.status,
            token: scheduled.authorization,
            pid,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Scheduled {
    location: String,
    status: String,
    authorization: String,
}

/// Status of a scheduled process, as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    Pending,
    Working { progress: String },
    Finished { progress: String },
}

/// Handle to a server-side process: poll status, fetch or stream the result.
pub struct Process {
    http: Client,
    base_url: String,
    result_url: String,
    status_url: String,
    token: String,
    pid: String,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
    #[serde(default)]
    progress: Option<String>,
}

impl Process {
    pub fn pid(&self) -> &str {
        &self.pid
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}/{url}", self.base_url))
            .header("Authorization", format!("Bearer {}", self.token))
    }

    /// Poll the process status once.
    pub async fn status(&self) -> Result<ProcessStatus, SdkError> {
        let response = self.get(&self.status_url).send().await?;
        let code = response.status();
        let body: StatusBody = response.json().await?;
        match (code, body.status.as_str()) {
            (StatusCode::ACCEPTED, "pending") => Ok(ProcessStatus::Pending),
            (StatusCode::ACCEPTED, "working") => Ok(ProcessStatus::Working {
                progress: body.progress.unwrap_or_default(),
            }),
            (StatusCode::OK, "finished") => Ok(ProcessStatus::Finished {
                progress: body.progress.unwrap_or_default(),
            }),
            (code, status) => Err(SdkError::Protocol(format!(
                "unhandled status {code}: {status}"
            ))),
        }
    }

    /// Fetch the assembled result in one shot. `None` while the process is
    /// still working.
    pub async fn fetch(&self) -> Result<Option<Vec<u8>>, SdkError> {
        let response = self.get(&self.result_url).send().await?;
        if response.status() == StatusCode::ACCEPTED {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        Ok(Some(response.bytes().await?.to_vec()))
    }

    /// Stream the result as it is produced, yielding one decoded frame per
    /// message. Concatenating the frames gives the same document `fetch`
    /// returns.
    pub async fn stream(&self) -> Result<Vec<Vec<u8>>, SdkError> {
        let response = self
            .get(&format!("{}/stream", self.result_url))
            .send()
            .await?
            .error_for_status()?;

        let mut buffer: Vec<u8> = Vec::new();
        let mut frames = Vec::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
            drain_frames(&mut buffer, &mut frames)?;
        }
        if !buffer.is_empty() {
            return Err(SdkError::Protocol(format!(
                "stream ended inside a frame; {} bytes left over",
                buffer.len()
            )));
        }
        Ok(frames)
    }
}

/// Split as many complete length-prefixed frames off the front of `buffer`
/// as are available. The ten-digit ASCII prefix counts itself plus the
/// payload.
fn drain_frames(buffer: &mut Vec<u8>, frames: &mut Vec<Vec<u8>>) -> Result<(), SdkError> {
    loop {
        if buffer.len() < 10 {
            return Ok(());
        }
        let total: usize = std::str::from_utf8(&buffer[..10])
            .ok()
            .and_then(|prefix| prefix.parse().ok())
            .ok_or_else(|| SdkError::Protocol("bad frame length prefix".to_string()))?;
        if total < 10 {
            return Err(SdkError::Protocol(format!(
                "frame length {total} shorter than its prefix"
            )));
        }
        if buffer.len() < total {
            return Ok(());
        }
        frames.push(buffer[10..total].to_vec());
        buffer.drain(..total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut out = format!("{:010}", 10 + payload.len()).into_bytes();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_drain_frames_across_chunk_boundaries() {
        let mut wire = framed(b"first-frame");
        wire.extend(framed(b"second"));

        // Feed the wire bytes in awkward pieces.
        let mut buffer = Vec::new();
        let mut frames = Vec::new();
        for chunk in wire.chunks(7) {
            buffer.extend_from_slice(chunk);
            drain_frames(&mut buffer, &mut frames).unwrap();
        }

        assert!(buffer.is_empty());
        assert_eq!(frames, vec![b"first-frame".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn test_drain_frames_rejects_garbage_prefix() {
        let mut buffer = b"not-a-number-at-all".to_vec();
        let mut frames = Vec::new();
        assert!(matches!(
            drain_frames(&mut buffer, &mut frames),
            Err(SdkError::Protocol(_))
        ));
    }

    #[test]
    fn test_drain_frames_keeps_partial_frame() {
        let wire = framed(b"payload");
        let mut buffer = wire[..12].to_vec();
        let mut frames = Vec::new();
        drain_frames(&mut buffer, &mut frames).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.len(), 12);
    }
}
