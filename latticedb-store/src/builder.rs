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

//! # Lattice Builder
//!
//! Glues the kernel together for one ingest: normalize vectors, derive the
//! pin target and mask, build the mutual-kNN graph, settle, and seal the
//! lattice directory atomically. Any failure before the rename leaves no
//! trace — the temp dir is deleted and nothing under `groups/**` changes.

use latticedb_core::canonical::CanonicalF64;
use latticedb_core::config::LatticeConfig;
use latticedb_core::deadline::Deadline;
use latticedb_core::embed::{dot, EmbeddingSpace, VectorBlock};
use latticedb_core::error::{LatticeError, Result};
use latticedb_core::graph::{self, Edge};
use latticedb_core::receipts::{LatticeReceipt, RECEIPT_VERSION};
use latticedb_core::solver::{settle, SettleParams};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fsio;
use crate::layout::DbLayout;

/// One chunk handed in by the external chunker.
#[derive(Debug, Clone)]
pub struct ChunkInput {
    pub text: String,
    pub offset_start: u64,
    pub offset_end: u64,
}

/// Provenance of the source the chunks came from.
#[derive(Debug, Clone)]
pub struct SourceMeta {
    pub source_file: String,
    pub file_sha256: String,
    pub file_bytes: u64,
}

/// The row shape persisted to `chunks.jsonl`. Immutable once sealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub group_id: String,
    pub lattice_id: String,
    pub index: u32,
    pub text: String,
    pub source_file: String,
    pub file_sha256: String,
    pub offset_start: u64,
    pub offset_end: u64,
}

/// Everything a seal needs, produced without touching disk.
#[derive(Debug)]
pub struct BuiltLattice {
    pub group_id: String,
    pub lattice_id: String,
    pub block: VectorBlock,
    pub edges: Vec<Edge>,
    pub ustar: VectorBlock,
    /// q_L — also the lattice's router centroid row.
    pub centroid: Vec<f32>,
    pub chunks: Vec<ChunkRecord>,
    pub receipt: LatticeReceipt,
}

/// Pin mask b_L: the top `⌈0.1·n⌉` rows by cosine to q_L (ties: smaller
/// index), at least one.
pub fn pin_mask(block: &VectorBlock, q: &[f32]) -> Vec<bool> {
    let n = block.n();
    let take = (n as f64 * 0.1).ceil().max(1.0) as usize;
    let mut ranked: Vec<usize> = (0..n).collect();
    ranked.sort_by(|&a, &b| {
        dot(block.row(b), q)
            .total_cmp(&dot(block.row(a), q))
            .then(a.cmp(&b))
    });
    let mut mask = vec![false; n];
    for &i in ranked.iter().take(take) {
        mask[i] = true;
    }
    mask
}

/// Run steps 1–4 of a lattice build: adapt vectors, derive (q_L, b_L),
/// build edges, settle, and assemble the receipt.
pub fn build_lattice(
    config: &LatticeConfig,
    group_id: String,
    lattice_id: String,
    chunks: &[ChunkInput],
    vectors: &[Vec<f32>],
    source: &SourceMeta,
    deadline: Deadline,
) -> Result<BuiltLattice> {
    if chunks.is_empty() {
        return Err(LatticeError::InvalidInput("a lattice needs at least one chunk".into()));
    }
    if chunks.len() != vectors.len() {
        return Err(LatticeError::InvalidInput(format!(
            "{} chunks but {} vectors",
            chunks.len(),
            vectors.len()
        )));
    }
    deadline.check()?;

    let space = EmbeddingSpace::new(config.dim, config.embed_model.clone());
    let block = space.adapt(vectors)?;
    let centroid = block.normalized_centroid();
    let mask = pin_mask(&block, &centroid);
    let edges = graph::mutual_knn(&block, config.k_neighbors);

    let params = SettleParams {
        lambdas: config.lambdas(),
        tol: config.tol,
        max_iter: config.max_iter,
    };
    let outcome = settle(&block, &edges, &centroid, &mask, &params, deadline)?;
    debug!(
        %lattice_id,
        n = block.n(),
        edges = edges.len(),
        cg_iters = outcome.cg_iters,
        delta_h = outcome.delta_h,
        "lattice settled"
    );

    let receipt = LatticeReceipt {
        version: RECEIPT_VERSION.to_string(),
        lattice_id: lattice_id.clone(),
        group_id: group_id.clone(),
        dim: config.dim,
        lambda_g: config.lambda_g,
        lambda_c: config.lambda_c,
        lambda_q: config.lambda_q,
        edge_hash: graph::edge_hash(&edges),
        delta_h_total: CanonicalF64(outcome.delta_h),
        cg_iters: outcome.cg_iters,
        final_residual: CanonicalF64(outcome.final_residual),
        file_sha256: source.file_sha256.clone(),
        model_sha256: config.model_sha256.clone(),
        state_sig: String::new(),
    }
    .sealed()?;

    let chunk_records = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| ChunkRecord {
            group_id: group_id.clone(),
            lattice_id: lattice_id.clone(),
            index: i as u32,
            text: c.text.clone(),
            source_file: source.source_file.clone(),
            file_sha256: source.file_sha256.clone(),
            offset_start: c.offset_start,
            offset_end: c.offset_end,
        })
        .collect();

    Ok(BuiltLattice {
        group_id,
        lattice_id,
        block,
        edges,
        ustar: outcome.ustar,
        centroid,
        chunks: chunk_records,
        receipt,
    })
}

/// Step 5: write all artifacts into a temp dir (each fsynced) and move it
/// to its final path in one rename. Re-sealing an existing lattice is an
/// append-only violation.
pub fn seal_lattice_dir(layout: &DbLayout, built: &BuiltLattice) -> Result<()> {
    let final_dir = layout.lattice_dir(&built.group_id, &built.lattice_id);
    if final_dir.exists() {
        return Err(LatticeError::Integrity(format!(
            "lattice dir already sealed: {}",
            final_dir.display()
        )));
    }
    let group_dir = layout.groups_dir().join(&built.group_id);
    std::fs::create_dir_all(&group_dir)?;

    let tmp = tempfile::Builder::new()
        .prefix(".seal-")
        .tempdir_in(&group_dir)?;

    fsio::atomic_write_jsonl(&tmp.path().join("chunks.jsonl"), &built.chunks)?;
    fsio::atomic_write_bytes(
        &tmp.path().join("embeds.f32"),
        &fsio::encode_f32(built.block.as_flat()),
    )?;
    fsio::atomic_write_bytes(
        &tmp.path().join("edges.bin"),
        &graph::encode_edges(&built.edges),
    )?;
    fsio::atomic_write_bytes(
        &tmp.path().join("ustar.f32"),
        &fsio::encode_f32(built.ustar.as_flat()),
    )?;
    fsio::atomic_write_canonical_json(&tmp.path().join("receipt.json"), &built.receipt)?;

    // The files are durable; now the rename publishes the whole directory.
    let tmp_path = tmp.into_path();
    std::fs::rename(&tmp_path, &final_dir)?;
    fsio::sync_dir(&group_dir)?;
    fsio::sync_dir(&layout.groups_dir())?;
    Ok(())
}

/// Load a sealed lattice's chunk rows.
pub fn load_chunks(layout: &DbLayout, group_id: &str, lattice_id: &str) -> Result<Vec<ChunkRecord>> {
    fsio::read_jsonl(&layout.lattice_dir(group_id, lattice_id).join("chunks.jsonl"))
}

/// Load a sealed lattice's embedding block.
pub fn load_embeds(
    layout: &DbLayout,
    group_id: &str,
    lattice_id: &str,
    dim: usize,
) -> Result<VectorBlock> {
    let flat = fsio::read_f32_file(&layout.lattice_dir(group_id, lattice_id).join("embeds.f32"))?;
    VectorBlock::from_flat(flat, dim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use latticedb_core::embed::StubEmbedder;

    fn config() -> LatticeConfig {
        let mut c = LatticeConfig::new(4, "stub@deterministic");
        c.k_neighbors = 2;
        c.tol = 1e-6;
        c
    }

    fn inputs(n: usize, dim: usize) -> (Vec<ChunkInput>, Vec<Vec<f32>>, SourceMeta) {
        let embedder = StubEmbedder::new(dim);
        let chunks: Vec<ChunkInput> = (0..n)
            .map(|i| ChunkInput {
                text: format!("chunk {i} alpha beta gamma"),
                offset_start: (i * 100) as u64,
                offset_end: (i * 100 + 99) as u64,
            })
            .collect();
        let vectors = chunks.iter().map(|c| embedder.embed_one(&c.text)).collect();
        let source = SourceMeta {
            source_file: "doc.txt".into(),
            file_sha256: latticedb_core::canonical::sha256_hex(b"doc"),
            file_bytes: 1234,
        };
        (chunks, vectors, source)
    }

    #[test]
    fn build_is_deterministic() {
        let cfg = config();
        let (chunks, vectors, source) = inputs(6, 4);
        let b1 = build_lattice(&cfg, "G-000001".into(), "L-000001".into(), &chunks, &vectors, &source, Deadline::none()).unwrap();
        let b2 = build_lattice(&cfg, "G-000001".into(), "L-000001".into(), &chunks, &vectors, &source, Deadline::none()).unwrap();
        assert_eq!(b1.receipt.edge_hash, b2.receipt.edge_hash);
        assert_eq!(b1.receipt.state_sig, b2.receipt.state_sig);
        assert_eq!(b1.ustar.as_flat(), b2.ustar.as_flat());
    }

    #[test]
    fn receipt_invariants_hold() {
        let cfg = config();
        let (chunks, vectors, source) = inputs(6, 4);
        let b = build_lattice(&cfg, "G-000001".into(), "L-000001".into(), &chunks, &vectors, &source, Deadline::none()).unwrap();
        assert!(b.receipt.delta_h_total.value() >= 0.0);
        assert!(b.receipt.verify_state_sig().unwrap());
        assert_eq!(b.receipt.edge_hash, graph::edge_hash(&b.edges));
        assert!(b.block.rows_unit_normalized());
    }

    #[test]
    fn single_chunk_lattice_is_trivial() {
        let cfg = config();
        let (chunks, vectors, source) = inputs(1, 4);
        let b = build_lattice(&cfg, "G-000001".into(), "L-000001".into(), &chunks, &vectors, &source, Deadline::none()).unwrap();
        assert!(b.edges.is_empty());
        assert_eq!(b.ustar.as_flat(), b.block.as_flat());
        assert_eq!(b.receipt.delta_h_total.value(), 0.0);
        assert_eq!(b.receipt.cg_iters, 0);
    }

    #[test]
    fn pin_mask_top_decile_min_one() {
        let embedder = StubEmbedder::new(8);
        let block = embedder.embed(&["a", "b", "c", "d", "e"]).unwrap();
        let q = block.normalized_centroid();
        let mask = pin_mask(&block, &q);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 1);

        let texts: Vec<String> = (0..25).map(|i| format!("t{i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let block = embedder.embed(&refs).unwrap();
        let q = block.normalized_centroid();
        let mask = pin_mask(&block, &q);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 3); // ceil(2.5)
    }

    #[test]
    fn mismatched_vector_count_rejected() {
        let cfg = config();
        let (chunks, mut vectors, source) = inputs(3, 4);
        vectors.pop();
        assert!(build_lattice(&cfg, "G-000001".into(), "L-000001".into(), &chunks, &vectors, &source, Deadline::none()).is_err());
    }

    #[test]
    fn seal_writes_all_artifacts_and_refuses_reseal() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DbLayout::new(dir.path());
        let cfg = config();
        let (chunks, vectors, source) = inputs(6, 4);
        let b = build_lattice(&cfg, "G-000001".into(), "L-000001".into(), &chunks, &vectors, &source, Deadline::none()).unwrap();
        seal_lattice_dir(&layout, &b).unwrap();

        let ldir = layout.lattice_dir("G-000001", "L-000001");
        for f in ["chunks.jsonl", "embeds.f32", "edges.bin", "ustar.f32", "receipt.json"] {
            assert!(ldir.join(f).exists(), "missing {f}");
        }
        let loaded = load_embeds(&layout, "G-000001", "L-000001", 4).unwrap();
        assert_eq!(loaded.as_flat(), b.block.as_flat());
        assert_eq!(load_chunks(&layout, "G-000001", "L-000001").unwrap().len(), 6);

        let err = seal_lattice_dir(&layout, &b).unwrap_err();
        assert!(matches!(err, LatticeError::Integrity(_)));
    }

    #[test]
    fn sealed_receipt_bytes_are_deterministic() {
        let cfg = config();
        let (chunks, vectors, source) = inputs(6, 4);

        let mut receipts = Vec::new();
        for run in 0..2 {
            let dir = tempfile::tempdir().unwrap();
            let layout = DbLayout::new(dir.path());
            let b = build_lattice(&cfg, "G-000001".into(), "L-000001".into(), &chunks, &vectors, &source, Deadline::none()).unwrap();
            seal_lattice_dir(&layout, &b).unwrap();
            let bytes =
                std::fs::read(layout.lattice_dir("G-000001", "L-000001").join("receipt.json"))
                    .unwrap();
            receipts.push(bytes);
            let _ = run;
        }
        assert_eq!(receipts[0], receipts[1]);
    }
}
