// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Survey manifests.
//!
//! A manifest is the per-survey metadata document: for each axis, the line
//! numbers stored at every index position, plus the fragment shape the volume
//! was cut into. It is read-only; the planner consults it to translate
//! caller-supplied line numbers into zero-based pin indices.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::geometry::{CubeShape, Dim, FragmentShape};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("malformed manifest: {0}")]
    Malformed(String),

    #[error("manifest has {0} dimensions; expected 3")]
    WrongRank(usize),

    #[error("manifest carries no fragment shape")]
    MissingShape,
}

/// The decoded manifest document. Unknown keys are ignored so that manifest
/// producers can grow the schema without breaking the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Per axis, the line number at every index position.
    pub dimensions: Vec<Vec<i64>>,

    /// The fragment shape the survey was cut into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<[u64; 3]>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
}

impl Manifest {
    /// Decode and validate a raw manifest document.
    pub fn decode(raw: &[u8]) -> Result<Self, ManifestError> {
        let manifest: Manifest =
            serde_json::from_slice(raw).map_err(|e| ManifestError::Malformed(e.to_string()))?;
        if manifest.dimensions.len() != 3 {
            return Err(ManifestError::WrongRank(manifest.dimensions.len()));
        }
        Ok(manifest)
    }

    /// The survey shape implied by the index: one sample per listed line.
    pub fn cube_shape(&self) -> CubeShape {
        CubeShape([
            self.dimensions[0].len() as u64,
            self.dimensions[1].len() as u64,
            self.dimensions[2].len() as u64,
        ])
    }

    pub fn fragment_shape(&self) -> Result<FragmentShape, ManifestError> {
        self.shape
            .map(FragmentShape)
            .ok_or(ManifestError::MissingShape)
    }

    /// The zero-based index of `lineno` along `dim`, if the line exists.
    pub fn position_of(&self, dim: Dim, lineno: i64) -> Option<u64> {
        self.dimensions[dim.get()]
            .iter()
            .position(|&line| line == lineno)
            .map(|pos| pos as u64)
    }
}
