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

//! # Centroid Router
//!
//! An N×d row-major f32 centroid table (`router/centroids.f32`,
//! memory-mapped) with parallel metadata rows (`router/meta.jsonl`), one
//! per lattice in creation order. Scoring is a dot product against the
//! unit-normalized query; top-K with ties broken by smaller row index.
//!
//! The table is derived state: writers replace both files atomically under
//! the writer lock and readers work from an immutable [`RouterSnapshot`]
//! tagged with the `db_root` it was loaded under. Snapshots are swapped,
//! never mutated, so a query is always consistent with some database
//! receipt.

use std::fs::File;
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use latticedb_core::error::{LatticeError, Result};

use crate::acl::{AclBinding, AclClaims};
use crate::fsio;
use crate::layout::DbLayout;

/// Default K for nearest-lattice queries.
pub const DEFAULT_ROUTE_K: usize = 8;

/// Metadata row parallel to one centroid row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterMetaRow {
    pub lattice_id: String,
    pub group_id: String,
    #[serde(flatten)]
    pub acl: AclBinding,
}

/// One routing hit: lattice plus its cosine score.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteHit {
    pub lattice_id: String,
    pub score: f32,
}

/// An immutable, mmap-backed view of the centroid table.
pub struct RouterSnapshot {
    mmap: Option<Mmap>,
    meta: Vec<RouterMetaRow>,
    dim: usize,
    /// The `db_root` current when this snapshot was loaded.
    pub db_root: String,
}

impl RouterSnapshot {
    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }

    pub fn meta(&self) -> &[RouterMetaRow] {
        &self.meta
    }

    pub fn row_index_of(&self, lattice_id: &str) -> Option<usize> {
        self.meta.iter().position(|m| m.lattice_id == lattice_id)
    }

    /// Centroid row `r`, borrowed straight from the mapping.
    pub fn centroid(&self, r: usize) -> &[f32] {
        let floats: &[f32] = bytemuck::cast_slice(
            self.mmap
                .as_ref()
                .expect("non-empty snapshot always has a mapping"),
        );
        &floats[r * self.dim..(r + 1) * self.dim]
    }

    fn scores(&self, q: &[f32]) -> Vec<f32> {
        (0..self.len())
            .map(|r| {
                self.centroid(r)
                    .iter()
                    .zip(q)
                    .map(|(c, x)| c * x)
                    .sum::<f32>()
            })
            .collect()
    }
}

/// Reader-facing router over one database root.
pub struct Router {
    layout: DbLayout,
    dim: usize,
    snapshot: RwLock<Option<Arc<RouterSnapshot>>>,
}

impl Router {
    pub fn new(layout: DbLayout, dim: usize) -> Self {
        Self {
            layout,
            dim,
            snapshot: RwLock::new(None),
        }
    }

    /// Drop the cached snapshot (called after every seal).
    pub fn invalidate(&self) {
        *self.snapshot.write() = None;
    }

    /// Current snapshot, reloading iff the on-disk `db_root` moved.
    pub fn snapshot(&self) -> Result<Arc<RouterSnapshot>> {
        let current_root = self.current_db_root()?;
        if let Some(snap) = self.snapshot.read().as_ref() {
            if snap.db_root == current_root {
                return Ok(Arc::clone(snap));
            }
        }
        let fresh = Arc::new(self.load_snapshot(current_root)?);
        *self.snapshot.write() = Some(Arc::clone(&fresh));
        Ok(fresh)
    }

    fn current_db_root(&self) -> Result<String> {
        let v = fsio::read_json_value(&self.layout.db_receipt_path())?;
        v.get("db_root")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| LatticeError::Integrity("db_receipt has no db_root".into()))
    }

    fn load_snapshot(&self, db_root: String) -> Result<RouterSnapshot> {
        // The two router files are each swapped atomically but not as a
        // pair; a reader racing the single writer may see them disagree
        // for an instant. Re-read until they agree.
        for attempt in 0..4 {
            let meta: Vec<RouterMetaRow> = fsio::read_jsonl(&self.layout.router_meta_path())?;
            let centroids_path = self.layout.centroids_path();
            let mmap = if meta.is_empty() {
                None
            } else {
                let file = File::open(&centroids_path)?;
                Some(unsafe { Mmap::map(&file)? })
            };
            let expected = meta.len() * self.dim * 4;
            let actual = mmap.as_ref().map_or(0, |m| m.len());
            if actual == expected {
                debug!(rows = meta.len(), dim = self.dim, "router snapshot loaded");
                return Ok(RouterSnapshot {
                    mmap,
                    meta,
                    dim: self.dim,
                    db_root,
                });
            }
            if attempt < 3 {
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
        }
        Err(LatticeError::Integrity(format!(
            "router centroids/meta row count disagree under {}",
            self.layout.root().display()
        )))
    }

    /// Nearest-K lattices for a unit-normalized query.
    ///
    /// `strict_claims` makes an absent-claims call fail instead of running
    /// unfiltered.
    pub fn route(
        &self,
        q: &[f32],
        k: usize,
        claims: Option<&AclClaims>,
        strict_claims: bool,
    ) -> Result<Vec<RouteHit>> {
        if strict_claims && claims.is_none() {
            return Err(LatticeError::AclDenyMissingClaims);
        }
        if q.len() != self.dim {
            return Err(LatticeError::EmbedDimMismatch {
                expected: self.dim,
                got: q.len(),
            });
        }
        let snap = self.snapshot()?;
        if snap.is_empty() {
            return Ok(Vec::new());
        }

        let scores = snap.scores(q);
        let mut ranked: Vec<usize> = (0..snap.len())
            .filter(|&r| match claims {
                Some(c) => snap.meta[r].acl.allows(c),
                None => true,
            })
            .collect();
        // Descending score; ties by smaller row index.
        ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
        let k = k.clamp(1, snap.len());
        ranked.truncate(k);

        Ok(ranked
            .into_iter()
            .map(|r| RouteHit {
                lattice_id: snap.meta[r].lattice_id.clone(),
                score: scores[r],
            })
            .collect())
    }
}

/// Writer-side append of one centroid + meta row pair. Caller holds the
/// writer lock. Both files are rewritten atomically.
pub fn append_row(layout: &DbLayout, centroid: &[f32], meta_row: RouterMetaRow) -> Result<()> {
    let centroids_path = layout.centroids_path();
    let mut table = if centroids_path.exists() {
        std::fs::read(&centroids_path)?
    } else {
        Vec::new()
    };
    table.extend_from_slice(&fsio::encode_f32(centroid));

    let mut meta: Vec<RouterMetaRow> = fsio::read_jsonl(&layout.router_meta_path())?;
    meta.push(meta_row);

    // Centroids first: a racing reader retries while the counts disagree.
    fsio::atomic_write_bytes(&centroids_path, &table)?;
    fsio::atomic_write_jsonl(&layout.router_meta_path(), &meta)
}
