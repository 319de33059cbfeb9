// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordinate arithmetic for fragmented survey volumes.
//!
//! A survey is a dense 3-D array of samples cut into equally shaped
//! rectangular fragments. This module translates between the three coordinate
//! systems in play (global survey, fragment-local, fragment grid) and derives
//! the strided copy plans used to move axis-aligned tiles between fragment
//! buffers and assembled result buffers.
//!
//! Everything in here is pure arithmetic. All quantities are in samples, not
//! bytes, and use `u64` so that surveys up to ~10^12 samples cannot overflow.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("dimension {0} out of range; the survey is 3-dimensional")]
    DimensionOutOfRange(usize),

    #[error("shape component {0} is zero; shapes must be componentwise positive")]
    ZeroShapeComponent(usize),
}

/// A validated axis index in `0..3`.
///
/// Raw integers arrive from query documents; forcing them through `Dim::new`
/// keeps out-of-range axes from silently indexing the wrong component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dim(usize);

impl Dim {
    pub fn new(dim: usize) -> Result<Self, GeometryError> {
        if dim < 3 {
            Ok(Self(dim))
        } else {
            Err(GeometryError::DimensionOutOfRange(dim))
        }
    }

    pub fn get(self) -> usize {
        self.0
    }

    /// The two non-pinned axes, in increasing order.
    pub fn others(self) -> (usize, usize) {
        match self.0 {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        }
    }
}

impl std::fmt::Display for Dim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! triple {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {$(
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub [u64; 3]);

        impl $name {
            pub fn new(a: u64, b: u64, c: u64) -> Self {
                Self([a, b, c])
            }
        }

        impl std::ops::Index<usize> for $name {
            type Output = u64;

            fn index(&self, i: usize) -> &u64 {
                &self.0[i]
            }
        }

        impl From<[u64; 3]> for $name {
            fn from(v: [u64; 3]) -> Self {
                Self(v)
            }
        }
    )*};
}

triple! {
    /// A coordinate in the global survey grid.
    CubePoint,
    /// The size of the global survey, per axis.
    CubeShape,
    /// A coordinate inside a single fragment.
    FragmentPoint,
    /// The size of a fragment, per axis.
    FragmentShape,
    /// The grid position of a fragment within the survey.
    ///
    /// Ordered lexicographically, which is also the order fragments are
    /// enumerated in by [`Geometry::slice`].
    FragmentId,
}

impl std::fmt::Display for FragmentId {
    /// The object-store key form, e.g. `3-5-7`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.0[0], self.0[1], self.0[2])
    }
}

/// A rectangular copy plan for moving an axis-aligned 2-D tile between a
/// fragment-ordered buffer and a dense tile buffer.
///
/// All fields are in samples. Starting `initial_skip` samples into the
/// structured side, `chunk_size` contiguous samples are copied per round for
/// `iterations` rounds; between rounds the structured side advances by
/// `superstride` and the dense side by `substride`. Extraction reads the
/// structured side, assembly writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceLayout {
    pub initial_skip: u64,
    pub chunk_size: u64,
    pub superstride: u64,
    pub substride: u64,
    pub iterations: u64,
}

impl CubeShape {
    /// Row-major linearisation of a point within this shape.
    pub fn to_offset(&self, p: CubePoint) -> u64 {
        p[0] * self.0[1] * self.0[2] + p[1] * self.0[2] + p[2]
    }
}

impl FragmentShape {
    /// The copy plan for extracting the tile at local index `pin` along `dim`
    /// out of a single fragment with this shape.
    pub fn slice_stride(&self, dim: Dim, pin: u64) -> SliceLayout {
        let [f0, f1, f2] = self.0;
        match dim.get() {
            0 => SliceLayout {
                initial_skip: pin * f1 * f2,
                chunk_size: f1 * f2,
                superstride: f1 * f2,
                substride: f1 * f2,
                iterations: 1,
            },
            1 => SliceLayout {
                initial_skip: pin * f2,
                chunk_size: f2,
                superstride: f1 * f2,
                substride: f2,
                iterations: f0,
            },
            _ => SliceLayout {
                initial_skip: pin,
                chunk_size: 1,
                superstride: f2,
                substride: 1,
                iterations: f0 * f1,
            },
        }
    }
}

/// The pairing of a survey shape with its fragment shape.
///
/// The survey dimensions need not be multiples of the fragment dimensions;
/// the last fragment along an axis is implicitly zero-padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    cube: CubeShape,
    fragment: FragmentShape,
}

impl Geometry {
    pub fn new(cube: CubeShape, fragment: FragmentShape) -> Result<Self, GeometryError> {
        for i in 0..3 {
            if cube[i] == 0 || fragment[i] == 0 {
                return Err(GeometryError::ZeroShapeComponent(i));
            }
        }
        Ok(Self { cube, fragment })
    }

    pub fn cube_shape(&self) -> CubeShape {
        self.cube
    }

    pub fn fragment_shape(&self) -> FragmentShape {
        self.fragment
    }

    /// Total number of addressable samples in the survey.
    pub fn global_size(&self) -> u64 {
        self.cube[0] * self.cube[1] * self.cube[2]
    }

    pub fn to_local(&self, p: CubePoint) -> FragmentPoint {
        FragmentPoint([
            p[0] % self.fragment[0],
            p[1] % self.fragment[1],
            p[2] % self.fragment[2],
        ])
    }

    pub fn frag_id(&self, p: CubePoint) -> FragmentId {
        FragmentId([
            p[0] / self.fragment[0],
            p[1] / self.fragment[1],
            p[2] / self.fragment[2],
        ])
    }

    pub fn to_global(&self, id: FragmentId, local: FragmentPoint) -> CubePoint {
        CubePoint([
            id[0] * self.fragment[0] + local[0],
            id[1] * self.fragment[1] + local[1],
            id[2] * self.fragment[2] + local[2],
        ])
    }

    /// Number of fragments along `dim`, counting the padded edge fragment.
    pub fn fragment_count(&self, dim: Dim) -> u64 {
        let d = dim.get();
        self.cube[d].div_ceil(self.fragment[d])
    }

    /// Every fragment intersected by the hyperplane at global index `pin`
    /// along `dim`, in lexicographic order.
    pub fn slice(&self, dim: Dim, pin: u64) -> Vec<FragmentId> {
        let d = dim.get();
        let (a, b) = dim.others();
        let pinned = pin / self.fragment[d];

        let na = self.fragment_count(Dim(a));
        let nb = self.fragment_count(Dim(b));

        let mut ids = Vec::with_capacity((na * nb) as usize);
        for i in 0..na {
            for j in 0..nb {
                let mut id = [0u64; 3];
                id[d] = pinned;
                id[a] = i;
                id[b] = j;
                ids.push(FragmentId(id));
            }
        }
        ids
    }

    /// The copy plan that places the tile extracted from fragment `id` into
    /// the correct rectangular region of the assembled slice.
    ///
    /// `self` here is the geometry of the assembled slice: the survey and
    /// fragment shapes with the pinned axis collapsed to one. The pinned
    /// component of `id` is irrelevant to the placement and ignored.
    pub fn slice_stride(&self, dim: Dim, id: FragmentId) -> SliceLayout {
        let (a, b) = dim.others();
        SliceLayout {
            initial_skip: id[a] * self.fragment[a] * self.cube[b] + id[b] * self.fragment[b],
            chunk_size: self.fragment[b],
            superstride: self.cube[b],
            substride: self.fragment[b],
            iterations: self.fragment[a],
        }
    }
}
