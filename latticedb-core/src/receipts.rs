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

//! # Receipts
//!
//! Every build and every query emits a receipt; receipts chain into the
//! database attestation. A receipt's `state_sig` is SHA-256 over the
//! canonical JSON of all its other fields, so any recipient can recompute
//! it from the JSON alone. Per-lattice `state_sig`s are the Merkle leaves
//! of the `db_root`.
//!
//! Receipts are write-once: sealed to disk once and never edited.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::{state_sig_of, CanonicalF64};
use crate::error::{LatticeError, Result};

/// Receipt schema version.
pub const RECEIPT_VERSION: &str = "1";

fn sign<T: Serialize>(receipt: &T) -> Result<String> {
    let value = serde_json::to_value(receipt)
        .map_err(|e| LatticeError::Integrity(format!("receipt serialization: {e}")))?;
    Ok(state_sig_of(&value))
}

// =============================================================================
// Per-lattice receipt
// =============================================================================

/// Attestation of one sealed micro-lattice build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatticeReceipt {
    pub version: String,
    pub lattice_id: String,
    pub group_id: String,
    pub dim: usize,
    #[serde(rename = "lambda_G")]
    pub lambda_g: f64,
    #[serde(rename = "lambda_C")]
    pub lambda_c: f64,
    #[serde(rename = "lambda_Q")]
    pub lambda_q: f64,
    /// SHA-256 over the packed, sorted edge buffer.
    pub edge_hash: String,
    /// Energy drop of the settle; never negative.
    #[serde(rename = "deltaH_total")]
    pub delta_h_total: CanonicalF64,
    /// Sum of CG iterations across output coordinates.
    pub cg_iters: u64,
    /// Max final residual norm across output coordinates.
    pub final_residual: CanonicalF64,
    /// SHA-256 of the source file this lattice was built from.
    pub file_sha256: String,
    /// Fingerprint of the embedding model identity.
    pub model_sha256: String,
    /// SHA-256 over the canonical JSON of all preceding fields.
    pub state_sig: String,
}

impl LatticeReceipt {
    /// Fill in `state_sig` over the current field values.
    pub fn sealed(mut self) -> Result<Self> {
        self.state_sig = String::new();
        self.state_sig = sign(&self)?;
        Ok(self)
    }

    /// Recompute the signature and compare against the stored one.
    pub fn verify_state_sig(&self) -> Result<bool> {
        Ok(sign(self)? == self.state_sig)
    }
}

// =============================================================================
// Database receipt
// =============================================================================

/// The whole-database attestation: a Merkle root over every sealed
/// lattice's `state_sig` (ascending) plus the config hash as final leaf.
///
/// `leaves` carries the exact leaf sequence for verification convenience;
/// it is derived state, recomputed (not trusted) by verifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbReceipt {
    pub version: String,
    pub db_root: String,
    pub config_hash: String,
    pub lattice_count: u64,
    pub leaves: Vec<String>,
}

impl DbReceipt {
    /// Assemble from per-lattice signatures and the config hash.
    pub fn assemble(state_sigs: &[String], config_hash: &str) -> Result<Self> {
        let leaves = crate::merkle::db_leaves(state_sigs, config_hash);
        let db_root = crate::merkle::root_over_hex_leaves(&leaves)?;
        Ok(Self {
            version: RECEIPT_VERSION.to_string(),
            db_root,
            config_hash: config_hash.to_string(),
            lattice_count: state_sigs.len() as u64,
            leaves,
        })
    }
}

// =============================================================================
// Composite (query-time) receipt
// =============================================================================

/// Attestation of one composite settle, anchored to the `db_root` read at
/// the start of the compose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeReceipt {
    pub version: String,
    pub db_root: String,
    /// Selected lattice IDs, sorted ascending.
    pub lattice_ids: Vec<String>,
    pub edge_hash_composite: String,
    #[serde(rename = "deltaH_total")]
    pub delta_h_total: CanonicalF64,
    pub cg_iters: u64,
    pub final_residual: CanonicalF64,
    /// Abstain floor on ΔH.
    pub epsilon: f64,
    /// Coherence floor on the max per-item contribution.
    pub tau: f64,
    /// ACL bindings the query ran under (empty when unfiltered).
    pub filters: std::collections::BTreeMap<String, String>,
    pub model_sha256: String,
    pub state_sig: String,
}

impl CompositeReceipt {
    pub fn sealed(mut self) -> Result<Self> {
        self.lattice_ids.sort_unstable();
        self.state_sig = String::new();
        self.state_sig = sign(&self)?;
        Ok(self)
    }

    pub fn verify_state_sig(&self) -> Result<bool> {
        Ok(sign(self)? == self.state_sig)
    }
}

/// Recompute the state signature of any receipt-shaped JSON value.
pub fn state_sig_of_value(value: &Value) -> String {
    state_sig_of(value)
}
