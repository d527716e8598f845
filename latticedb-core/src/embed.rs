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

//! # Embedding Space Adapter
//!
//! Embedding vectors are produced by external model backends; the core only
//! adapts them into its fixed-dimension space: dimension verification, unit
//! L2 normalization, and a model fingerprint that flows into every receipt.
//!
//! The one embedding backend that ships in-tree is [`StubEmbedder`], a
//! deterministic text-to-vector fallback (SHA-256-seeded ChaCha draws) used
//! by tests and demos. Real deployments hand vectors in from the outside.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::canonical::{sha256_digest, sha256_hex};
use crate::error::{LatticeError, Result};

/// Floor on L2 norms before division, so zero vectors normalize to zero
/// instead of NaN.
pub const NORM_EPS: f32 = 1e-12;

/// Tolerance on stored row norms: every sealed row satisfies
/// `|‖x‖₂ − 1| ≤ NORM_TOLERANCE` (or is the zero vector).
pub const NORM_TOLERANCE: f32 = 1e-6;

// =============================================================================
// Vector block
// =============================================================================

/// A dense row-major `n×d` block of f32 vectors.
///
/// This is the in-memory shape of `embeds.f32` / `ustar.f32` and the input
/// to the graph builder and the SPD solver.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorBlock {
    data: Vec<f32>,
    n: usize,
    dim: usize,
}

impl VectorBlock {
    /// Wrap a flat row-major buffer. Fails if the length is not `n·d`.
    pub fn from_flat(data: Vec<f32>, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(LatticeError::InvalidInput("dim must be positive".into()));
        }
        if data.len() % dim != 0 {
            return Err(LatticeError::InvalidInput(format!(
                "flat buffer of {} floats is not a multiple of dim {}",
                data.len(),
                dim
            )));
        }
        let n = data.len() / dim;
        Ok(Self { data, n, dim })
    }

    /// Build from per-row vectors, verifying each row's dimension.
    pub fn from_rows(rows: &[Vec<f32>], dim: usize) -> Result<Self> {
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            if row.len() != dim {
                return Err(LatticeError::EmbedDimMismatch {
                    expected: dim,
                    got: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Self::from_flat(data, dim)
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    /// Unit-L2-normalize every row in place (divisor `max(‖v‖₂, ε)`).
    pub fn normalize_rows(&mut self) {
        for i in 0..self.n {
            let row = &mut self.data[i * self.dim..(i + 1) * self.dim];
            let norm = l2_norm(row).max(NORM_EPS);
            for x in row.iter_mut() {
                *x /= norm;
            }
        }
    }

    /// Mean of all rows, unit-normalized — the lattice pin target q_L.
    pub fn normalized_centroid(&self) -> Vec<f32> {
        let mut mean = vec![0.0f32; self.dim];
        for i in 0..self.n {
            for (m, x) in mean.iter_mut().zip(self.row(i)) {
                *m += x;
            }
        }
        let inv = 1.0 / self.n as f32;
        for m in mean.iter_mut() {
            *m *= inv;
        }
        let norm = l2_norm(&mean).max(NORM_EPS);
        for m in mean.iter_mut() {
            *m /= norm;
        }
        mean
    }

    /// Check the stored-row normalization invariant.
    pub fn rows_unit_normalized(&self) -> bool {
        (0..self.n).all(|i| {
            let n = l2_norm(self.row(i));
            n == 0.0 || (n - 1.0).abs() <= NORM_TOLERANCE
        })
    }
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Normalize a single query vector, verifying its dimension.
pub fn normalize_query(q: &[f32], dim: usize) -> Result<Vec<f32>> {
    if q.len() != dim {
        return Err(LatticeError::EmbedDimMismatch {
            expected: dim,
            got: q.len(),
        });
    }
    let norm = l2_norm(q).max(NORM_EPS);
    Ok(q.iter().map(|x| x / norm).collect())
}

// =============================================================================
// Embedding space
// =============================================================================

/// The shared vector space all lattices live in: a dimension plus the
/// fingerprint of the model that produced the vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSpace {
    dim: usize,
    model_id: String,
    model_sha256: String,
}

impl EmbeddingSpace {
    /// `model_id` is the caller-supplied model identity (`name@revision`);
    /// its SHA-256 becomes the `model_sha256` recorded in every receipt.
    pub fn new(dim: usize, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        let model_sha256 = sha256_hex(model_id.as_bytes());
        Self {
            dim,
            model_id,
            model_sha256,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn model_sha256(&self) -> &str {
        &self.model_sha256
    }

    /// Adapt externally produced vectors into this space: verify dimension,
    /// then unit-normalize rows.
    pub fn adapt(&self, rows: &[Vec<f32>]) -> Result<VectorBlock> {
        let mut block = VectorBlock::from_rows(rows, self.dim)?;
        block.normalize_rows();
        Ok(block)
    }
}

// =============================================================================
// Deterministic stub embedder
// =============================================================================

/// Deterministic fallback embedding backend.
///
/// Each text hashes to a ChaCha seed; d standard-normal draws are then
/// unit-normalized. The same text always produces the same vector, on any
/// platform, with no model weights involved.
#[derive(Debug, Clone)]
pub struct StubEmbedder {
    space: EmbeddingSpace,
}

impl StubEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            space: EmbeddingSpace::new(dim, "stub@deterministic"),
        }
    }

    pub fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let digest = sha256_digest(text.as_bytes());
        let seed: [u8; 32] = digest;
        let mut rng = ChaCha8Rng::from_seed(seed);
        let mut v: Vec<f32> = (0..self.space.dim())
            .map(|_| StandardNormal.sample(&mut rng))
            .collect();
        let norm = l2_norm(&v).max(NORM_EPS);
        for x in v.iter_mut() {
            *x /= norm;
        }
        v
    }

    pub fn embed(&self, texts: &[&str]) -> Result<VectorBlock> {
        let rows: Vec<Vec<f32>> = texts.iter().map(|t| self.embed_one(t)).collect();
        self.space.adapt(&rows)
    }
}
