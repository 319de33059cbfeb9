// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Client-side assembly of results.
//!
//! A complete result document is `[header, [bundle, ...]]`. Slice bundles
//! carry tiles with their own copy plans; curtain bundles carry vertical
//! trace segments anchored at a global coordinate. Applying every bundle
//! against a zeroed buffer of the header's shape reproduces the assembled
//! result.

use std::collections::HashMap;

use strata_core::domain::messages::{CurtainBundle, ResultHeader, SliceTileBundle};

use crate::client::SdkError;

/// An assembled 2-D slice: row-major samples plus the axis labels.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledSlice {
    /// Buffer dimensions, fragment-aligned (edges are zero-padded).
    pub shape: Vec<u64>,
    /// Line numbers of the free axes, unpadded.
    pub index: Vec<Vec<i64>>,
    pub samples: Vec<f32>,
}

/// Decode a complete slice result document and place every tile.
pub fn assemble_slice(document: &[u8]) -> Result<AssembledSlice, SdkError> {
    let (header, bundles): (ResultHeader, Vec<SliceTileBundle>) =
        rmp_serde::from_slice(document).map_err(|e| SdkError::Decode(e.to_string()))?;

    let len = header.shape.iter().product::<u64>() as usize;
    let mut samples = vec![0f32; len];

    for bundle in &bundles {
        for tile in &bundle.tiles {
            let chunk = tile.chunk_size as usize;
            let mut src = 0usize;
            let mut dst = tile.initial_skip as usize;
            for _ in 0..tile.iterations {
                let Some(target) = samples.get_mut(dst..dst + chunk) else {
                    return Err(SdkError::Decode(format!(
                        "tile writes past the result buffer (offset {dst}, chunk {chunk})"
                    )));
                };
                let Some(source) = tile.v.get(src..src + chunk) else {
                    return Err(SdkError::Decode(format!(
                        "tile shorter than its own layout (offset {src}, chunk {chunk})"
                    )));
                };
                target.copy_from_slice(source);
                src += tile.substride as usize;
                dst += tile.superstride as usize;
            }
        }
    }

    Ok(AssembledSlice {
        shape: header.shape,
        index: header.index,
        samples,
    })
}

/// An assembled curtain: one row of samples per requested `(dim0, dim1)`
/// intersection, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledCurtain {
    /// `[traces, depth]`; the depth is fragment-aligned (zero-padded).
    pub shape: Vec<u64>,
    /// Zero-based `dim0` and `dim1` coordinates of each trace, then the
    /// sample axis, unpadded.
    pub index: Vec<Vec<i64>>,
    pub samples: Vec<f32>,
}

/// Decode a complete curtain result document and place every trace segment.
///
/// Segments land in the row the header's index assigns to their `(dim0,
/// dim1)` coordinate, starting at their `dim2` sample offset.
pub fn assemble_curtain(document: &[u8]) -> Result<AssembledCurtain, SdkError> {
    let (header, bundles): (ResultHeader, Vec<CurtainBundle>) =
        rmp_serde::from_slice(document).map_err(|e| SdkError::Decode(e.to_string()))?;

    if header.shape.len() != 2 || header.index.len() != 3 {
        return Err(SdkError::Decode(format!(
            "curtain header has shape rank {} and index rank {}; want 2 and 3",
            header.shape.len(),
            header.index.len()
        )));
    }
    let depth = header.shape[1] as usize;
    let mut samples = vec![0f32; (header.shape[0] as usize) * depth];

    // Where each trace goes, from the header's coordinate index.
    let rows: HashMap<(i64, i64), usize> = header.index[0]
        .iter()
        .zip(&header.index[1])
        .enumerate()
        .map(|(row, (&x, &y))| ((x, y), row))
        .collect();

    for bundle in &bundles {
        for trace in &bundle.traces {
            let [x, y, z] = trace.coordinates;
            let Some(&row) = rows.get(&(x as i64, y as i64)) else {
                return Err(SdkError::Decode(format!(
                    "trace at ({x}, {y}) is not in the result index"
                )));
            };
            if z as usize + trace.v.len() > depth {
                return Err(SdkError::Decode(format!(
                    "trace segment at ({x}, {y}, {z}) runs past the sample axis"
                )));
            }
            let dst = row * depth + z as usize;
            let Some(target) = samples.get_mut(dst..dst + trace.v.len()) else {
                return Err(SdkError::Decode(format!(
                    "trace at ({x}, {y}) lands outside the result buffer"
                )));
            };
            target.copy_from_slice(&trace.v);
        }
    }

    Ok(AssembledCurtain {
        shape: header.shape,
        index: header.index,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::domain::geometry::{
        CubeShape, Dim, FragmentId, FragmentShape, Geometry,
    };
    use strata_core::domain::messages::{CurtainTrace, SliceTile};

    /// Build the wire document for a dim-0 slice over a survey that is two
    /// fragments wide along the last axis, one tile per fragment.
    fn slice_document() -> Vec<u8> {
        let fragment = FragmentShape::new(3, 5, 7);
        let assembled =
            Geometry::new(CubeShape::new(1, 5, 14), FragmentShape::new(1, 5, 7)).unwrap();
        let dim = Dim::new(0).unwrap();

        // Each fragment's tile holds its fragment number in every sample.
        let tiles: Vec<SliceTile> = (0..2u64)
            .map(|column| {
                let extracted = vec![column as f32 + 1.0; (fragment[1] * fragment[2]) as usize];
                let layout = assembled.slice_stride(dim, FragmentId::new(0, 0, column));
                SliceTile::new(layout, extracted)
            })
            .collect();

        let header = ResultHeader {
            bundles: 2,
            shape: vec![5, 14],
            index: vec![vec![10, 11, 12, 13, 14], (0..14).collect()],
        };

        let mut document = header.pack().unwrap();
        for tile in tiles {
            document.extend(SliceTileBundle { tiles: vec![tile] }.pack().unwrap());
        }
        document
    }

    #[test]
    fn test_assemble_places_every_tile() {
        let document = slice_document();
        let slice = assemble_slice(&document).unwrap();

        assert_eq!(slice.shape, vec![5, 14]);
        assert_eq!(slice.samples.len(), 70);
        // Left half of every row came from fragment 0, right half from
        // fragment 1.
        for row in 0..5 {
            for col in 0..14 {
                let expected = if col < 7 { 1.0 } else { 2.0 };
                assert_eq!(slice.samples[row * 14 + col], expected, "row {row} col {col}");
            }
        }
    }

    #[test]
    fn test_assemble_rejects_truncated_document() {
        let document = slice_document();
        assert!(matches!(
            assemble_slice(&document[..document.len() - 3]),
            Err(SdkError::Decode(_))
        ));
    }

    /// Build the wire document for a two-trace curtain, ten samples deep in
    /// two fragment-length segments per trace.
    fn curtain_document() -> Vec<u8> {
        let header = ResultHeader {
            bundles: 2,
            shape: vec![2, 10],
            index: vec![vec![0, 4], vec![0, 10], (0..9).collect()],
        };

        // One bundle per column; each trace holds its column number.
        let bundles = [
            CurtainBundle {
                traces: vec![
                    CurtainTrace {
                        coordinates: [0, 0, 0],
                        v: vec![1.0; 5],
                    },
                    CurtainTrace {
                        coordinates: [0, 0, 5],
                        v: vec![1.0; 5],
                    },
                ],
            },
            CurtainBundle {
                traces: vec![
                    CurtainTrace {
                        coordinates: [4, 10, 0],
                        v: vec![2.0; 5],
                    },
                    CurtainTrace {
                        coordinates: [4, 10, 5],
                        v: vec![2.0; 5],
                    },
                ],
            },
        ];

        let mut document = header.pack().unwrap();
        for bundle in &bundles {
            document.extend(bundle.pack().unwrap());
        }
        document
    }

    #[test]
    fn test_assemble_curtain_places_every_segment() {
        let curtain = assemble_curtain(&curtain_document()).unwrap();

        assert_eq!(curtain.shape, vec![2, 10]);
        assert_eq!(curtain.samples.len(), 20);
        assert_eq!(curtain.samples[..10], [1.0; 10]);
        assert_eq!(curtain.samples[10..], [2.0; 10]);
    }

    #[test]
    fn test_assemble_curtain_rejects_unindexed_trace() {
        let header = ResultHeader {
            bundles: 1,
            shape: vec![1, 5],
            index: vec![vec![0], vec![0], (0..5).collect()],
        };
        let stray = CurtainBundle {
            traces: vec![CurtainTrace {
                coordinates: [7, 7, 0],
                v: vec![0.0; 5],
            }],
        };
        let mut document = header.pack().unwrap();
        document.extend(stray.pack().unwrap());

        assert!(matches!(
            assemble_curtain(&document),
            Err(SdkError::Decode(_))
        ));
    }

    #[test]
    fn test_assemble_curtain_rejects_overlong_segment() {
        let header = ResultHeader {
            bundles: 1,
            shape: vec![1, 5],
            index: vec![vec![0], vec![0], (0..5).collect()],
        };
        let overlong = CurtainBundle {
            traces: vec![CurtainTrace {
                coordinates: [0, 0, 3],
                v: vec![0.0; 5],
            }],
        };
        let mut document = header.pack().unwrap();
        document.extend(overlong.pack().unwrap());

        assert!(matches!(
            assemble_curtain(&document),
            Err(SdkError::Decode(_))
        ));
    }

    #[test]
    fn test_assemble_rejects_out_of_bounds_tile() {
        let header = ResultHeader {
            bundles: 1,
            shape: vec![2, 2],
            index: vec![vec![0, 1], vec![0, 1]],
        };
        let rogue = SliceTile {
            initial_skip: 3,
            chunk_size: 4,
            superstride: 4,
            substride: 4,
            iterations: 1,
            v: vec![0.0; 4],
        };
        let mut document = header.pack().unwrap();
        document.extend(SliceTileBundle { tiles: vec![rogue] }.pack().unwrap());

        assert!(matches!(
            assemble_slice(&document),
            Err(SdkError::Decode(_))
        ));
    }
}
