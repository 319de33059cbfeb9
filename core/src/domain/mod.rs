// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod geometry;
pub mod manifest;
pub mod messages;

pub use geometry::{
    CubePoint, CubeShape, Dim, FragmentId, FragmentPoint, FragmentShape, Geometry, GeometryError,
    SliceLayout,
};
pub use manifest::{Manifest, ManifestError};
pub use messages::{
    CurtainBucket, CurtainBundle, CurtainFetch, CurtainTask, CurtainTrace, MessageError,
    ProcessHeader, ResultHeader, SliceFetch, SliceTask, SliceTile, SliceTileBundle,
};
