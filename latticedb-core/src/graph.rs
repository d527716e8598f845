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

//! # Mutual-kNN Graph Builder
//!
//! Builds the undirected edge set of a micro-lattice: (i,j) is an edge iff
//! each of i,j appears in the other's top-k cosine neighbors. The graph is
//! stored as a flat, deduplicated, sorted edge list — never as linked
//! nodes — and the solver consumes it by index iteration.
//!
//! Determinism: neighbor selection breaks similarity ties by smaller index,
//! and the serialized form (`edges.bin`) is the lexicographically sorted
//! sequence of little-endian `(u32 i, u32 j)` pairs with `i < j`. The
//! `edge_hash` is SHA-256 over exactly that buffer.

use crate::canonical::sha256_hex;
use crate::embed::{dot, VectorBlock};

/// Undirected edge with `i < j`, indices into the lattice's row order.
pub type Edge = (u32, u32);

/// Build the mutual-kNN edge set over a row-normalized block.
///
/// If `n ≤ k` there are not enough distinct neighbors to rank, and the
/// graph is complete: all pairs (i,j), i<j.
pub fn mutual_knn(block: &VectorBlock, k: usize) -> Vec<Edge> {
    let n = block.n();
    if n <= 1 {
        return Vec::new();
    }
    if n <= k {
        let mut edges = Vec::with_capacity(n * (n - 1) / 2);
        for i in 0..n as u32 {
            for j in (i + 1)..n as u32 {
                edges.push((i, j));
            }
        }
        return edges;
    }

    // Directed top-k adjacency. Rows are unit vectors, so cosine is a dot.
    let mut neighbors: Vec<Vec<u32>> = Vec::with_capacity(n);
    for i in 0..n {
        let row_i = block.row(i);
        let mut scored: Vec<(f32, u32)> = (0..n)
            .filter(|&j| j != i)
            .map(|j| (dot(row_i, block.row(j)), j as u32))
            .collect();
        // Descending similarity; ties broken by smaller index.
        scored.sort_unstable_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);
        let mut ids: Vec<u32> = scored.into_iter().map(|(_, j)| j).collect();
        ids.sort_unstable();
        neighbors.push(ids);
    }

    let mut edges = Vec::new();
    for i in 0..n {
        for &j in &neighbors[i] {
            let j = j as usize;
            if j > i && neighbors[j].binary_search(&(i as u32)).is_ok() {
                edges.push((i as u32, j as u32));
            }
        }
    }
    edges.sort_unstable();
    edges
}

/// Serialize an edge list as the canonical `edges.bin` buffer:
/// lexicographically sorted `(u32 i, u32 j)` pairs, little-endian, i<j.
pub fn encode_edges(edges: &[Edge]) -> Vec<u8> {
    debug_assert!(edges.windows(2).all(|w| w[0] < w[1]), "edges must be sorted");
    let mut buf = Vec::with_capacity(edges.len() * 8);
    for &(i, j) in edges {
        debug_assert!(i < j, "edge indices must satisfy i < j");
        buf.extend_from_slice(&i.to_le_bytes());
        buf.extend_from_slice(&j.to_le_bytes());
    }
    buf
}

/// Decode an `edges.bin` buffer back into an edge list.
pub fn decode_edges(buf: &[u8]) -> Option<Vec<Edge>> {
    if buf.len() % 8 != 0 {
        return None;
    }
    let mut edges = Vec::with_capacity(buf.len() / 8);
    for pair in buf.chunks_exact(8) {
        let i = u32::from_le_bytes(pair[0..4].try_into().ok()?);
        let j = u32::from_le_bytes(pair[4..8].try_into().ok()?);
        if i >= j {
            return None;
        }
        edges.push((i, j));
    }
    Some(edges)
}

/// SHA-256 over the canonical packed edge buffer, hex.
pub fn edge_hash(edges: &[Edge]) -> String {
    sha256_hex(&encode_edges(edges))
}

/// Per-node degree array for an edge list over `n` nodes.
pub fn degrees(n: usize, edges: &[Edge]) -> Vec<u32> {
    let mut deg = vec![0u32; n];
    for &(i, j) in edges {
        deg[i as usize] += 1;
        deg[j as usize] += 1;
    }
    deg
}
