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

//! # Composite Settler
//!
//! Query-time settling across lattices. The selected lattices' centroid
//! rows (representative policy: `centroid-only`) become the vertex set of a
//! small composite graph; every vertex is pinned to the query and the same
//! SPD/CG core runs over it. The result is either a Context Pack or a
//! structured abstention — both carry a CompositeReceipt anchored to the
//! `db_root` read when the compose started.

use latticedb_core::canonical::CanonicalF64;
use latticedb_core::config::LatticeConfig;
use latticedb_core::deadline::Deadline;
use latticedb_core::embed::{dot, normalize_query, VectorBlock};
use latticedb_core::error::{LatticeError, Result};
use latticedb_core::graph;
use latticedb_core::receipts::{CompositeReceipt, RECEIPT_VERSION};
use latticedb_core::solver::{pin_contributions, settle, Lambdas, SettleParams};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::acl::AclClaims;
use crate::builder;
use crate::layout::DbLayout;
use crate::router::RouterSnapshot;

/// Per-call compose knobs. λ overrides fall back to the attested config.
#[derive(Debug, Clone)]
pub struct ComposeOptions {
    /// Abstain floor on ΔH.
    pub epsilon: f64,
    /// Coherence floor on the max per-item pin contribution.
    pub tau: f64,
    pub lambda_overrides: Option<Lambdas>,
    /// Override of the composite neighbor count k_c.
    pub k_neighbors: Option<usize>,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            epsilon: 1e-3,
            tau: 0.3,
            lambda_overrides: None,
            k_neighbors: None,
        }
    }
}

/// One item of a Context Pack: a selected lattice with provenance and its
/// best-matching chunk as the excerpt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub lattice_id: String,
    pub group_id: String,
    /// Cosine of this lattice's centroid against the query.
    pub score: f32,
    pub source_file: String,
    pub excerpt: String,
}

/// The ordered, provenance-carrying output of compose.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextPack {
    pub items: Vec<ContextItem>,
}

/// A refusal to produce a context bundle, with a stable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abstention {
    pub reason: String,
}

impl Abstention {
    pub const WEAK_COHERENCE: &'static str = "weak_coherence";
    pub const ACL_NO_CANDIDATES: &'static str = "acl_no_candidates";
}

/// Compose result: pack + receipt, plus the abstention marker when the
/// energy evidence was too weak (the receipt is emitted either way).
#[derive(Debug, Clone)]
pub struct ComposeOutcome {
    pub context_pack: ContextPack,
    pub composite_receipt: CompositeReceipt,
    pub abstain: Option<Abstention>,
}

/// Run a composite settle against a router snapshot.
///
/// Unknown lattice IDs are dropped; ACL-filtered candidates may empty the
/// set, which abstains with `acl_no_candidates`.
pub fn compose(
    layout: &DbLayout,
    config: &LatticeConfig,
    snapshot: &RouterSnapshot,
    q_raw: &[f32],
    lattice_ids: &[String],
    opts: &ComposeOptions,
    claims: Option<&AclClaims>,
    deadline: Deadline,
) -> Result<ComposeOutcome> {
    deadline.check()?;
    let q = normalize_query(q_raw, config.dim)?;
    let db_root = snapshot.db_root.clone();

    // Resolve requested ids against the snapshot, preserving request order.
    let mut rows: Vec<usize> = Vec::new();
    for id in lattice_ids {
        if let Some(r) = snapshot.row_index_of(id) {
            if !rows.contains(&r) {
                rows.push(r);
            }
        }
    }
    let before_acl = rows.len();
    if let Some(c) = claims {
        rows.retain(|&r| snapshot.meta()[r].acl.allows(c));
    }
    let acl_dropped = before_acl - rows.len();

    let filters = claims.map(AclClaims::as_filters).unwrap_or_default();
    let seal = |ids: Vec<String>,
                edge_hash: String,
                delta_h: f64,
                cg_iters: u64,
                residual: f64|
     -> Result<CompositeReceipt> {
        CompositeReceipt {
            version: RECEIPT_VERSION.to_string(),
            db_root: db_root.clone(),
            lattice_ids: ids,
            edge_hash_composite: edge_hash,
            delta_h_total: CanonicalF64(delta_h),
            cg_iters,
            final_residual: CanonicalF64(residual),
            epsilon: opts.epsilon,
            tau: opts.tau,
            filters: filters.clone(),
            model_sha256: config.model_sha256.clone(),
            state_sig: String::new(),
        }
        .sealed()
    };

    if rows.is_empty() {
        let reason = if acl_dropped > 0 {
            Abstention::ACL_NO_CANDIDATES
        } else {
            Abstention::WEAK_COHERENCE
        };
        info!(requested = lattice_ids.len(), reason = reason, "compose abstained with no candidates");
        return Ok(ComposeOutcome {
            context_pack: ContextPack::default(),
            composite_receipt: seal(Vec::new(), graph::edge_hash(&[]), 0.0, 0, 0.0)?,
            abstain: Some(Abstention { reason: reason.to_string() }),
        });
    }

    // Representatives: centroid-only, |V| = number of selected lattices.
    let reps: Vec<Vec<f32>> = rows.iter().map(|&r| snapshot.centroid(r).to_vec()).collect();
    let mut block = VectorBlock::from_rows(&reps, config.dim)?;
    block.normalize_rows();

    let k_c = opts
        .k_neighbors
        .unwrap_or(config.compose_k_neighbors)
        .min(block.n().saturating_sub(1));
    let edges = graph::mutual_knn(&block, k_c);
    let edge_hash = graph::edge_hash(&edges);

    let params = SettleParams {
        lambdas: opts.lambda_overrides.unwrap_or_else(|| config.lambdas()),
        tol: config.tol,
        max_iter: config.max_iter,
    };
    let mask = vec![true; block.n()];
    let outcome = settle(&block, &edges, &q, &mask, &params, deadline)?;
    let contributions = pin_contributions(&outcome.ustar, &block, &q, &mask, params.lambdas.q);
    let max_contribution = contributions.iter().cloned().fold(0.0f64, f64::max);

    let ids: Vec<String> = rows
        .iter()
        .map(|&r| snapshot.meta()[r].lattice_id.clone())
        .collect();
    let receipt = seal(
        ids,
        edge_hash,
        outcome.delta_h,
        outcome.cg_iters,
        outcome.final_residual,
    )?;

    if outcome.delta_h < opts.epsilon || max_contribution < opts.tau {
        debug!(
            delta_h = outcome.delta_h,
            max_contribution, "compose abstained on weak coherence"
        );
        return Ok(ComposeOutcome {
            context_pack: ContextPack::default(),
            composite_receipt: receipt,
            abstain: Some(Abstention {
                reason: Abstention::WEAK_COHERENCE.to_string(),
            }),
        });
    }

    // Assemble the pack: one item per selected lattice, best chunk as the
    // excerpt, ordered by descending centroid score.
    let mut scored: Vec<(usize, f32)> = rows
        .iter()
        .map(|&r| (r, dot(snapshot.centroid(r), &q)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut items = Vec::with_capacity(scored.len());
    for (r, score) in scored {
        deadline.check()?;
        let meta = &snapshot.meta()[r];
        let (source_file, excerpt) = best_chunk(layout, config, meta, &q)?;
        items.push(ContextItem {
            lattice_id: meta.lattice_id.clone(),
            group_id: meta.group_id.clone(),
            score,
            source_file,
            excerpt,
        });
    }
    info!(
        items = items.len(),
        delta_h = outcome.delta_h,
        cg_iters = outcome.cg_iters,
        "compose produced context pack"
    );

    Ok(ComposeOutcome {
        context_pack: ContextPack { items },
        composite_receipt: receipt,
        abstain: None,
    })
}

/// Pick the chunk of a lattice with the highest cosine to the query.
fn best_chunk(
    layout: &DbLayout,
    config: &LatticeConfig,
    meta: &crate::router::RouterMetaRow,
    q: &[f32],
) -> Result<(String, String)> {
    let chunks = builder::load_chunks(layout, &meta.group_id, &meta.lattice_id)?;
    if chunks.is_empty() {
        return Err(LatticeError::Integrity(format!(
            "sealed lattice {} has no chunks",
            meta.lattice_id
        )));
    }
    let embeds = builder::load_embeds(layout, &meta.group_id, &meta.lattice_id, config.dim)?;
    if embeds.n() != chunks.len() {
        return Err(LatticeError::Integrity(format!(
            "lattice {}: {} chunks but {} embedding rows",
            meta.lattice_id,
            chunks.len(),
            embeds.n()
        )));
    }
    let best = (0..embeds.n())
        .max_by(|&a, &b| {
            dot(embeds.row(a), q)
                .total_cmp(&dot(embeds.row(b), q))
                .then(b.cmp(&a))
        })
        .expect("non-empty block");
    Ok((chunks[best].source_file.clone(), chunks[best].text.clone()))
}
