// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Wire messages for the task and result planes.
//!
//! Everything on the wire is MessagePack with string-keyed maps, so messages
//! are self-describing and producers can add fields without breaking older
//! consumers (unknown keys are ignored; missing required keys are decode
//! errors).
//!
//! The one piece of hand-rolled encoding is [`ResultHeader::pack`]: the
//! header frame opens a two-element array and closes with an array-length
//! marker for the bundles that follow, so that the byte-wise concatenation of
//! the header frame and every bundle frame forms a single well-formed
//! MessagePack document `[header, [bundle, ...]]`. Clients can either decode
//! frames incrementally or buffer the whole body and decode once.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_bytes::ByteBuf;
use thiserror::Error;

use crate::domain::geometry::{FragmentId, SliceLayout};

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Decode(String),

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("process header ntasks = {0}; want >= 1")]
    BadTaskCount(i64),
}

fn pack<T: Serialize>(value: &T) -> Result<Vec<u8>, MessageError> {
    rmp_serde::to_vec_named(value).map_err(|e| MessageError::Encode(e.to_string()))
}

fn unpack<T: DeserializeOwned>(doc: &[u8]) -> Result<T, MessageError> {
    rmp_serde::from_slice(doc).map_err(|e| MessageError::Decode(e.to_string()))
}

/// Peek at the `function` field of a packed query document without decoding
/// the rest, for builder dispatch.
pub fn unpack_function(doc: &[u8]) -> Result<String, MessageError> {
    #[derive(Deserialize)]
    struct Probe {
        function: String,
    }
    unpack::<Probe>(doc).map(|p| p.function)
}

/// The per-process record written to `<pid>/header.json` when a query is
/// scheduled. Everything a result consumer needs to know up front: how many
/// bundles to expect and what shape the assembled result has.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessHeader {
    pub pid: String,
    pub ntasks: i64,
    pub shape: Vec<u64>,
    pub index: Vec<Vec<i64>>,
}

impl ProcessHeader {
    pub fn pack(&self) -> Result<Vec<u8>, MessageError> {
        pack(self)
    }

    pub fn unpack(doc: &[u8]) -> Result<Self, MessageError> {
        let header: ProcessHeader = unpack(doc)?;
        if header.ntasks < 1 {
            return Err(MessageError::BadTaskCount(header.ntasks));
        }
        Ok(header)
    }
}

/// The first frame of every result exchange, derived from the process header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultHeader {
    pub bundles: i64,
    pub shape: Vec<u64>,
    pub index: Vec<Vec<i64>>,
}

impl From<&ProcessHeader> for ResultHeader {
    fn from(head: &ProcessHeader) -> Self {
        Self {
            bundles: head.ntasks,
            shape: head.shape.clone(),
            index: head.index.clone(),
        }
    }
}

impl ResultHeader {
    /// Pack the header frame, including the envelope markers described in the
    /// module docs. `bundles` frames are expected to follow on the wire.
    pub fn pack(&self) -> Result<Vec<u8>, MessageError> {
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, 2)
            .map_err(|e| MessageError::Encode(e.to_string()))?;
        rmp_serde::encode::write_named(&mut buf, self)
            .map_err(|e| MessageError::Encode(e.to_string()))?;
        rmp::encode::write_array_len(&mut buf, self.bundles as u32)
            .map_err(|e| MessageError::Encode(e.to_string()))?;
        Ok(buf)
    }
}

/// A slice query as submitted to the planner. `lineno` is the caller-facing
/// line number; the planner rewrites it to the in-fragment index before the
/// task ever reaches a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceTask {
    pub pid: String,
    pub token: String,
    pub guid: String,
    pub storage_endpoint: String,
    /// The manifest JSON, carried opaquely; workers re-parse it.
    pub manifest: ByteBuf,
    pub function: String,
    pub shape: [u64; 3],
    pub dim: usize,
    pub lineno: i64,
}

impl SliceTask {
    pub fn pack(&self) -> Result<Vec<u8>, MessageError> {
        pack(self)
    }

    pub fn unpack(doc: &[u8]) -> Result<Self, MessageError> {
        unpack(doc)
    }
}

/// A curtain query: the trace surface through the listed `(dim0, dim1)`
/// coordinate pairs. The two arrays are parallel and equally long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurtainTask {
    pub pid: String,
    pub token: String,
    pub guid: String,
    pub storage_endpoint: String,
    pub manifest: ByteBuf,
    pub function: String,
    pub shape: [u64; 3],
    pub dim0s: Vec<u64>,
    pub dim1s: Vec<u64>,
}

impl CurtainTask {
    pub fn pack(&self) -> Result<Vec<u8>, MessageError> {
        pack(self)
    }

    pub fn unpack(doc: &[u8]) -> Result<Self, MessageError> {
        unpack(doc)
    }
}

/// A fully planned slice query: the task plus everything a worker needs to
/// locate each fragment and place its tile. Partitioning slices `ids`; all
/// other fields repeat verbatim in every work unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceFetch {
    pub pid: String,
    pub token: String,
    pub guid: String,
    pub storage_endpoint: String,
    pub manifest: ByteBuf,
    pub function: String,
    pub shape: [u64; 3],
    pub dim: usize,
    /// The in-fragment index of the requested line.
    pub lineno: i64,
    pub cube_shape: Vec<u64>,
    pub ids: Vec<FragmentId>,
}

impl From<SliceTask> for SliceFetch {
    fn from(task: SliceTask) -> Self {
        Self {
            pid: task.pid,
            token: task.token,
            guid: task.guid,
            storage_endpoint: task.storage_endpoint,
            manifest: task.manifest,
            function: task.function,
            shape: task.shape,
            dim: task.dim,
            lineno: task.lineno,
            cube_shape: Vec::new(),
            ids: Vec::new(),
        }
    }
}

impl SliceFetch {
    pub fn pack(&self) -> Result<Vec<u8>, MessageError> {
        pack(self)
    }

    pub fn unpack(doc: &[u8]) -> Result<Self, MessageError> {
        unpack(doc)
    }
}

/// One fragment of a curtain plan and the local coordinates to extract from
/// it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurtainBucket {
    pub id: FragmentId,
    pub coordinates: Vec<(u64, u64)>,
}

/// A fully planned curtain query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurtainFetch {
    pub pid: String,
    pub token: String,
    pub guid: String,
    pub storage_endpoint: String,
    pub manifest: ByteBuf,
    pub function: String,
    pub shape: [u64; 3],
    pub ids: Vec<CurtainBucket>,
}

impl From<CurtainTask> for CurtainFetch {
    fn from(task: CurtainTask) -> Self {
        Self {
            pid: task.pid,
            token: task.token,
            guid: task.guid,
            storage_endpoint: task.storage_endpoint,
            manifest: task.manifest,
            function: task.function,
            shape: task.shape,
            ids: Vec::new(),
        }
    }
}

impl CurtainFetch {
    pub fn pack(&self) -> Result<Vec<u8>, MessageError> {
        pack(self)
    }

    pub fn unpack(doc: &[u8]) -> Result<Self, MessageError> {
        unpack(doc)
    }
}

/// One extracted tile and the plan for placing it in the assembled slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceTile {
    pub initial_skip: u64,
    pub chunk_size: u64,
    pub superstride: u64,
    pub substride: u64,
    pub iterations: u64,
    pub v: Vec<f32>,
}

impl SliceTile {
    pub fn new(layout: SliceLayout, v: Vec<f32>) -> Self {
        Self {
            initial_skip: layout.initial_skip,
            chunk_size: layout.chunk_size,
            superstride: layout.superstride,
            substride: layout.substride,
            iterations: layout.iterations,
            v,
        }
    }

    pub fn layout(&self) -> SliceLayout {
        SliceLayout {
            initial_skip: self.initial_skip,
            chunk_size: self.chunk_size,
            superstride: self.superstride,
            substride: self.substride,
            iterations: self.iterations,
        }
    }
}

/// The bundle a worker writes per slice work unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceTileBundle {
    pub tiles: Vec<SliceTile>,
}

impl SliceTileBundle {
    pub fn pack(&self) -> Result<Vec<u8>, MessageError> {
        pack(self)
    }

    pub fn unpack(doc: &[u8]) -> Result<Self, MessageError> {
        unpack(doc)
    }
}

/// One vertical trace segment of a curtain result, anchored at the global
/// zero-based `(dim0, dim1, dim2)` coordinate of its first sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurtainTrace {
    pub coordinates: [u64; 3],
    pub v: Vec<f32>,
}

/// The bundle a worker writes per curtain work unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurtainBundle {
    pub traces: Vec<CurtainTrace>,
}

impl CurtainBundle {
    pub fn pack(&self) -> Result<Vec<u8>, MessageError> {
        pack(self)
    }

    pub fn unpack(doc: &[u8]) -> Result<Self, MessageError> {
        unpack(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice_task() -> SliceTask {
        SliceTask {
            pid: "pid-1".into(),
            token: "token-1".into(),
            guid: "survey-1".into(),
            storage_endpoint: "https://fragments.example".into(),
            manifest: ByteBuf::from(br#"{"dimensions": [[0], [0], [0]]}"#.to_vec()),
            function: "slice".into(),
            shape: [3, 9, 5],
            dim: 0,
            lineno: 4,
        }
    }

    #[test]
    fn test_slice_task_round_trip() {
        let task = slice_task();
        assert_eq!(SliceTask::unpack(&task.pack().unwrap()).unwrap(), task);
    }

    #[test]
    fn test_function_probe_ignores_everything_else() {
        let doc = slice_task().pack().unwrap();
        assert_eq!(unpack_function(&doc).unwrap(), "slice");
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let doc = rmp_serde::to_vec_named(&serde_json::json!({
            "pid": "p",
            "ntasks": 2,
            "shape": [1, 2, 3],
            "index": [[0], [1]],
            "some-future-field": true,
        }))
        .unwrap();
        let header = ProcessHeader::unpack(&doc).unwrap();
        assert_eq!(header.ntasks, 2);
    }

    #[test]
    fn test_missing_required_key_is_a_decode_error() {
        let doc = rmp_serde::to_vec_named(&serde_json::json!({ "pid": "p" })).unwrap();
        assert!(matches!(
            ProcessHeader::unpack(&doc),
            Err(MessageError::Decode(_))
        ));
    }

    #[test]
    fn test_nonpositive_ntasks_rejected() {
        for ntasks in [0i64, -4] {
            let doc = rmp_serde::to_vec_named(&serde_json::json!({
                "pid": "p",
                "ntasks": ntasks,
                "shape": [1, 2, 3],
                "index": [[0]],
            }))
            .unwrap();
            assert!(matches!(
                ProcessHeader::unpack(&doc),
                Err(MessageError::BadTaskCount(n)) if n == ntasks
            ));
        }
    }

    #[test]
    fn test_result_header_envelope_markers() {
        let header = ResultHeader {
            bundles: 3,
            shape: vec![5, 14],
            index: vec![vec![0, 1], vec![2, 3]],
        };
        let packed = header.pack().unwrap();

        // fixarray(2), then fixmap(3), and a trailing fixarray(3) for the
        // bundles that follow on the wire.
        assert_eq!(packed[0], 0x92);
        assert_eq!(packed[1], 0x83);
        assert_eq!(*packed.last().unwrap(), 0x93);
    }

    #[test]
    fn test_concatenated_frames_form_one_document() {
        let header = ResultHeader {
            bundles: 2,
            shape: vec![1, 5, 14],
            index: vec![vec![10, 11], vec![0, 4]],
        };
        let bundle = SliceTileBundle {
            tiles: vec![SliceTile {
                initial_skip: 0,
                chunk_size: 7,
                superstride: 14,
                substride: 7,
                iterations: 5,
                v: vec![1.0; 35],
            }],
        };

        let mut wire = header.pack().unwrap();
        wire.extend(bundle.pack().unwrap());
        wire.extend(bundle.pack().unwrap());

        let (decoded_header, bundles): (ResultHeader, Vec<SliceTileBundle>) =
            rmp_serde::from_slice(&wire).unwrap();
        assert_eq!(decoded_header, header);
        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles[0], bundle);
    }

    #[test]
    fn test_curtain_fetch_round_trip() {
        let fetch = CurtainFetch {
            pid: "pid-2".into(),
            token: "t".into(),
            guid: "survey-1".into(),
            storage_endpoint: "https://fragments.example".into(),
            manifest: ByteBuf::from(b"{}".to_vec()),
            function: "curtain".into(),
            shape: [3, 9, 5],
            ids: vec![
                CurtainBucket {
                    id: FragmentId::new(0, 0, 0),
                    coordinates: vec![(1, 2), (1, 3)],
                },
                CurtainBucket {
                    id: FragmentId::new(0, 0, 1),
                    coordinates: vec![(1, 2), (1, 3)],
                },
            ],
        };
        assert_eq!(CurtainFetch::unpack(&fetch.pack().unwrap()).unwrap(), fetch);
    }
}
