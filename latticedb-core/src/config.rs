// SPDX-License-Identifier: AGPL-3.0-or-later
// LatticeDB - Verifiable Retrieval Database
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Normalized database configuration.
//!
//! Every knob that affects numerics lives here and enters the Merkle root
//! through `config_hash = sha256(canonical_json(config))`. Operational
//! overlays (display names, ACL columns, in-flight limits) deliberately do
//! not: changing them must not re-attest the database.

use serde::{Deserialize, Serialize};

use crate::canonical::canonical_sha256_hex;
use crate::error::{LatticeError, Result};
use crate::solver::Lambdas;

/// Schema version governing on-disk compatibility. A mismatch makes a
/// store not-ready.
pub const SCHEMA_VERSION: u32 = 1;

/// The attested, normalized configuration of one database root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatticeConfig {
    pub schema_version: u32,
    /// Embedding dimension d.
    pub dim: usize,
    /// Neighbor count k for per-lattice mutual-kNN graphs.
    pub k_neighbors: usize,
    #[serde(rename = "lambda_G")]
    pub lambda_g: f64,
    #[serde(rename = "lambda_C")]
    pub lambda_c: f64,
    #[serde(rename = "lambda_Q")]
    pub lambda_q: f64,
    /// CG relative tolerance.
    pub tol: f64,
    /// CG iteration cap per coordinate.
    pub max_iter: u32,
    /// How `cg_iters` aggregates across coordinates. Always "sum" here;
    /// recorded so receipts are self-describing.
    pub cg_iters_mode: String,
    /// Composite representative policy. Always "centroid-only" here.
    pub compose_representatives: String,
    /// Default neighbor count for composite graphs; the effective value is
    /// `min(compose_k_neighbors, |V|−1)`.
    pub compose_k_neighbors: usize,
    /// Caller-supplied embedding model identity (`name@revision`).
    pub embed_model: String,
    /// SHA-256 fingerprint of `embed_model`.
    pub model_sha256: String,
}

impl LatticeConfig {
    /// Defaults mirroring the reference deployment; callers typically
    /// override `dim` and `embed_model`.
    pub fn new(dim: usize, embed_model: impl Into<String>) -> Self {
        let embed_model = embed_model.into();
        let model_sha256 = crate::canonical::sha256_hex(embed_model.as_bytes());
        Self {
            schema_version: SCHEMA_VERSION,
            dim,
            k_neighbors: 4,
            lambda_g: 1.0,
            lambda_c: 0.5,
            lambda_q: 4.0,
            tol: 1e-5,
            max_iter: 256,
            cg_iters_mode: "sum".to_string(),
            compose_representatives: "centroid-only".to_string(),
            compose_k_neighbors: 4,
            embed_model,
            model_sha256,
        }
    }

    pub fn lambdas(&self) -> Lambdas {
        Lambdas {
            g: self.lambda_g,
            c: self.lambda_c,
            q: self.lambda_q,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(LatticeError::InvalidInput("dim must be positive".into()));
        }
        if self.k_neighbors == 0 {
            return Err(LatticeError::InvalidInput(
                "k_neighbors must be positive".into(),
            ));
        }
        if self.max_iter == 0 {
            return Err(LatticeError::InvalidInput("max_iter must be positive".into()));
        }
        if !(self.tol > 0.0 && self.tol.is_finite()) {
            return Err(LatticeError::InvalidInput(format!(
                "tol must be positive and finite, got {}",
                self.tol
            )));
        }
        self.lambdas().validate()?;
        if self.cg_iters_mode != "sum" {
            return Err(LatticeError::InvalidInput(format!(
                "unsupported cg_iters_mode: {}",
                self.cg_iters_mode
            )));
        }
        if self.compose_representatives != "centroid-only" {
            return Err(LatticeError::InvalidInput(format!(
                "unsupported compose_representatives: {}",
                self.compose_representatives
            )));
        }
        Ok(())
    }

    /// SHA-256 over the canonical JSON of this config — the last Merkle
    /// leaf of every database root.
    pub fn config_hash(&self) -> Result<String> {
        let value = serde_json::to_value(self)
            .map_err(|e| LatticeError::Integrity(format!("config serialization: {e}")))?;
        Ok(canonical_sha256_hex(&value))
    }
}
