// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Query scheduling.
//!
//! Scheduling is the whole journey from a packed query document to the packed
//! work units handed to workers:
//!
//! 1. decode the document and dispatch on its `function` field,
//! 2. **build** the fetch: the full set of fragment ids (plus per-fragment
//!    extraction detail) the query touches,
//! 3. **partition** the fetch into units of at most `task_size` ids and pack
//!    one task message per unit.
//!
//! The build step is the only shape-specific part; everything else is shared
//! through the [`Fetch`] trait. I/O (actually dispatching the messages) is
//! outside this module.

use std::ops::Range;

use crate::domain::geometry::{CubePoint, Dim, Geometry, GeometryError};
use crate::domain::manifest::{Manifest, ManifestError};
use crate::domain::messages::{
    unpack_function, CurtainBucket, CurtainFetch, CurtainTask, MessageError, SliceFetch, SliceTask,
};

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("task_size (= {0}) < 1")]
    InvalidTaskSize(usize),

    #[error("line (= {lineno}) not found along dimension {dim}")]
    LineNotFound { dim: usize, lineno: i64 },

    #[error("no handler for function '{0}'")]
    UnknownFunction(String),

    #[error("query produced no work units; likely arithmetic overflow")]
    EmptyPlan,

    #[error("no bucket for fragment {0}; curtain allocation pass is incomplete")]
    MissingBucket(crate::domain::geometry::FragmentId),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Message(#[from] MessageError),
}

/// A planned query whose `ids` can be chunked into work units. Implementors
/// repack themselves with a sub-range of ids; every other field repeats
/// verbatim in each unit.
trait Fetch {
    fn ids_len(&self) -> usize;
    fn pack_range(&self, range: Range<usize>) -> Result<Vec<u8>, MessageError>;
}

impl Fetch for SliceFetch {
    fn ids_len(&self) -> usize {
        self.ids.len()
    }

    fn pack_range(&self, range: Range<usize>) -> Result<Vec<u8>, MessageError> {
        let mut unit = self.clone();
        unit.ids = self.ids[range].to_vec();
        unit.pack()
    }
}

impl Fetch for CurtainFetch {
    fn ids_len(&self) -> usize {
        self.ids.len()
    }

    fn pack_range(&self, range: Range<usize>) -> Result<Vec<u8>, MessageError> {
        let mut unit = self.clone();
        unit.ids = self.ids[range].to_vec();
        unit.pack()
    }
}

/// Number of task-size'd units needed to cover all jobs.
fn task_count(jobs: usize, task_size: usize) -> Result<usize, PlanError> {
    let count = jobs.div_ceil(task_size);
    if count < 1 {
        return Err(PlanError::EmptyPlan);
    }
    Ok(count)
}

fn partition<F: Fetch>(fetch: &F, task_size: usize) -> Result<Vec<Vec<u8>>, PlanError> {
    if task_size < 1 {
        return Err(PlanError::InvalidTaskSize(task_size));
    }

    let jobs = fetch.ids_len();
    let ntasks = task_count(jobs, task_size)?;

    let mut units = Vec::with_capacity(ntasks);
    for i in 0..ntasks {
        let fst = i * task_size;
        let lst = jobs.min(fst + task_size);
        units.push(fetch.pack_range(fst..lst)?);
    }
    Ok(units)
}

fn build_slice(task: SliceTask, manifest: &Manifest) -> Result<SliceFetch, PlanError> {
    let dim = Dim::new(task.dim)?;
    let pin = manifest
        .position_of(dim, task.lineno)
        .ok_or(PlanError::LineNotFound {
            dim: task.dim,
            lineno: task.lineno,
        })?;

    let geometry = Geometry::new(manifest.cube_shape(), task.shape.into())?;

    let mut fetch = SliceFetch::from(task);
    fetch.lineno = (pin % geometry.fragment_shape()[dim.get()]) as i64;
    fetch.cube_shape = geometry.cube_shape().0.to_vec();
    fetch.ids = geometry.slice(dim, pin);
    Ok(fetch)
}

fn build_curtain(task: CurtainTask, manifest: &Manifest) -> Result<CurtainFetch, PlanError> {
    let geometry = Geometry::new(manifest.cube_shape(), task.shape.into())?;
    let fragment = geometry.fragment_shape();
    let zfrags = geometry.fragment_count(Dim::new(2)?);

    // Guess the number of coordinates landing in each fragment: roughly a
    // plane through it, with some margin. Overestimating slightly is cheap
    // for a structure this short-lived.
    let approx_coordinates = (fragment[0].max(fragment[1]) as f64 * 1.2) as usize;

    let dim0s = task.dim0s.clone();
    let dim1s = task.dim1s.clone();
    let mut fetch = CurtainFetch::from(task);

    // First pass: allocate the buckets. Every touched (x, y) column gets the
    // full vertical stack of fragments, inserted in lexicographic position so
    // the list stays sorted throughout.
    for (&x, &y) in dim0s.iter().zip(&dim1s) {
        let top = CubePoint::new(x, y, 0);
        let fid = geometry.frag_id(top);

        if let Err(pos) = fetch.ids.binary_search_by(|bucket| bucket.id.cmp(&fid)) {
            for z in 0..zfrags {
                let mut id = fid;
                id.0[2] = z;
                fetch.ids.insert(
                    pos + z as usize,
                    CurtainBucket {
                        id,
                        coordinates: Vec::with_capacity(approx_coordinates),
                    },
                );
            }
        }
    }

    // Second pass: drop every coordinate pair into each fragment of its
    // column.
    for (&x, &y) in dim0s.iter().zip(&dim1s) {
        let point = CubePoint::new(x, y, 0);
        let fid = geometry.frag_id(point);
        let local = geometry.to_local(point);

        let pos = fetch
            .ids
            .binary_search_by(|bucket| bucket.id.cmp(&fid))
            .map_err(|_| PlanError::MissingBucket(fid))?;
        for bucket in &mut fetch.ids[pos..pos + zfrags as usize] {
            bucket.coordinates.push((local[0], local[1]));
        }
    }

    Ok(fetch)
}

/// Plan a packed query document into packed work units of at most `task_size`
/// fragments each.
pub fn schedule(doc: &[u8], task_size: usize) -> Result<Vec<Vec<u8>>, PlanError> {
    match unpack_function(doc)?.as_str() {
        "slice" => {
            let task = SliceTask::unpack(doc)?;
            let manifest = Manifest::decode(&task.manifest)?;
            let fetch = build_slice(task, &manifest)?;
            partition(&fetch, task_size)
        }
        "curtain" => {
            let task = CurtainTask::unpack(doc)?;
            let manifest = Manifest::decode(&task.manifest)?;
            let fetch = build_curtain(task, &manifest)?;
            partition(&fetch, task_size)
        }
        function => Err(PlanError::UnknownFunction(function.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geometry::FragmentId;
    use serde_bytes::ByteBuf;

    /// A 9 x 15 x 23 survey cut into (3, 9, 5) fragments, with line numbers
    /// 1..=9, 2 * (1..=15) and 4 * (0..23) along the three axes.
    fn manifest_json() -> Vec<u8> {
        let dim0: Vec<i64> = (1..=9).collect();
        let dim1: Vec<i64> = (1..=15).map(|x| x * 2).collect();
        let dim2: Vec<i64> = (0..23).map(|x| x * 4).collect();
        serde_json::json!({
            "guid": "survey-1",
            "dimensions": [dim0, dim1, dim2],
            "shape": [3, 9, 5],
        })
        .to_string()
        .into_bytes()
    }

    fn slice_task(dim: usize, lineno: i64) -> SliceTask {
        SliceTask {
            pid: "pid-1".into(),
            token: "token-1".into(),
            guid: "survey-1".into(),
            storage_endpoint: "https://fragments.example".into(),
            manifest: ByteBuf::from(manifest_json()),
            function: "slice".into(),
            shape: [3, 9, 5],
            dim,
            lineno,
        }
    }

    fn curtain_task(dim0s: Vec<u64>, dim1s: Vec<u64>) -> CurtainTask {
        CurtainTask {
            pid: "pid-1".into(),
            token: "token-1".into(),
            guid: "survey-1".into(),
            storage_endpoint: "https://fragments.example".into(),
            manifest: ByteBuf::from(manifest_json()),
            function: "curtain".into(),
            shape: [3, 9, 5],
            dim0s,
            dim1s,
        }
    }

    // ── Slice builder ─────────────────────────────────────────────────────────

    #[test]
    fn test_slice_lineno_is_rewritten_to_fragment_local() {
        // Line 8 along dimension 0 sits at pin 7; 7 mod 3 = 1.
        let manifest = Manifest::decode(&manifest_json()).unwrap();
        let fetch = build_slice(slice_task(0, 8), &manifest).unwrap();
        assert_eq!(fetch.lineno, 1);
        assert_eq!(fetch.cube_shape, vec![9, 15, 23]);
    }

    #[test]
    fn test_slice_ids_cover_the_plane() {
        let manifest = Manifest::decode(&manifest_json()).unwrap();
        // Line 0 along dimension 2 is pin 0: the top time-slab.
        let fetch = build_slice(slice_task(2, 0), &manifest).unwrap();
        let expected: Vec<FragmentId> = [
            [0, 0, 0],
            [0, 1, 0],
            [1, 0, 0],
            [1, 1, 0],
            [2, 0, 0],
            [2, 1, 0],
        ]
        .into_iter()
        .map(FragmentId)
        .collect();
        assert_eq!(fetch.ids, expected);
    }

    #[test]
    fn test_slice_unknown_lineno_is_not_found() {
        let manifest = Manifest::decode(&manifest_json()).unwrap();
        let err = build_slice(slice_task(1, 3), &manifest).unwrap_err();
        assert!(matches!(
            err,
            PlanError::LineNotFound { dim: 1, lineno: 3 }
        ));
    }

    // ── Partitioning ──────────────────────────────────────────────────────────

    #[test]
    fn test_schedule_rejects_task_size_below_one() {
        let doc = slice_task(0, 1).pack().unwrap();
        assert!(matches!(
            schedule(&doc, 0),
            Err(PlanError::InvalidTaskSize(0))
        ));
    }

    #[test]
    fn test_schedule_rejects_unknown_function() {
        let mut task = slice_task(0, 1);
        task.function = "horizon".into();
        let err = schedule(&task.pack().unwrap(), 4).unwrap_err();
        assert!(matches!(err, PlanError::UnknownFunction(f) if f == "horizon"));
    }

    #[test]
    fn test_partition_chunks_and_preserves_order() {
        // slice(dim = 0) over the 9 x 15 x 23 survey touches 2 * 5 fragments.
        let doc = slice_task(0, 1).pack().unwrap();
        let units = schedule(&doc, 4).unwrap();
        assert_eq!(units.len(), 3); // ceil(10 / 4)

        let fetches: Vec<SliceFetch> = units
            .iter()
            .map(|unit| SliceFetch::unpack(unit).unwrap())
            .collect();
        assert_eq!(fetches[0].ids.len(), 4);
        assert_eq!(fetches[1].ids.len(), 4);
        assert_eq!(fetches[2].ids.len(), 2);

        let manifest = Manifest::decode(&manifest_json()).unwrap();
        let whole = build_slice(slice_task(0, 1), &manifest).unwrap();
        let rejoined: Vec<FragmentId> = fetches.iter().flat_map(|f| f.ids.clone()).collect();
        assert_eq!(rejoined, whole.ids);

        // Everything but the ids repeats verbatim.
        for fetch in &fetches {
            assert_eq!(fetch.lineno, whole.lineno);
            assert_eq!(fetch.cube_shape, whole.cube_shape);
            assert_eq!(fetch.pid, whole.pid);
        }
    }

    #[test]
    fn test_single_chunk_when_task_size_exceeds_ids() {
        let doc = slice_task(2, 0).pack().unwrap();
        let units = schedule(&doc, 100).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(SliceFetch::unpack(&units[0]).unwrap().ids.len(), 6);
    }

    // ── Curtain builder ───────────────────────────────────────────────────────

    #[test]
    fn test_curtain_builds_full_columns() {
        let manifest = Manifest::decode(&manifest_json()).unwrap();
        // Two coordinates in the same column, one in another.
        let task = curtain_task(vec![0, 1, 4], vec![0, 1, 10]);
        let fetch = build_curtain(task, &manifest).unwrap();

        // 23 samples deep at 5 per fragment: 5 fragments per column.
        let expected: Vec<FragmentId> = [
            [0, 0, 0],
            [0, 0, 1],
            [0, 0, 2],
            [0, 0, 3],
            [0, 0, 4],
            [1, 1, 0],
            [1, 1, 1],
            [1, 1, 2],
            [1, 1, 3],
            [1, 1, 4],
        ]
        .into_iter()
        .map(FragmentId)
        .collect();
        let ids: Vec<FragmentId> = fetch.ids.iter().map(|b| b.id).collect();
        assert_eq!(ids, expected);

        // The first column holds both of its coordinate pairs, at every depth.
        for bucket in &fetch.ids[..5] {
            assert_eq!(bucket.coordinates, vec![(0, 0), (1, 1)]);
        }
        for bucket in &fetch.ids[5..] {
            assert_eq!(bucket.coordinates, vec![(1, 1)]);
        }
    }

    #[test]
    fn test_curtain_ids_sorted_and_distinct() {
        let manifest = Manifest::decode(&manifest_json()).unwrap();
        // Deliberately unsorted input with duplicates per column.
        let task = curtain_task(vec![8, 0, 3, 8, 1], vec![14, 0, 4, 13, 1]);
        let fetch = build_curtain(task, &manifest).unwrap();

        let ids: Vec<FragmentId> = fetch.ids.iter().map(|b| b.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_curtain_schedule_end_to_end() {
        let doc = curtain_task(vec![0, 4], vec![0, 10]).pack().unwrap();
        let units = schedule(&doc, 3).unwrap();
        assert_eq!(units.len(), 4); // two columns of 5 fragments: ceil(10 / 3)

        let total: usize = units
            .iter()
            .map(|unit| CurtainFetch::unpack(unit).unwrap().ids.len())
            .sum();
        assert_eq!(total, 10);
    }
}
