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

//! On-disk layout of one database root.
//!
//! ```text
//! <root>/
//!   manifest.jsonl
//!   groups/G-XXXXXX/L-XXXXXX/{chunks.jsonl, embeds.f32, edges.bin, ustar.f32, receipt.json}
//!   router/{centroids.f32, meta.jsonl}
//!   receipts/{config.json, db_receipt.json, ingest.wal.jsonl, dedup_map.jsonl}
//!   metadata/names.json
//!   .writer.lock
//! ```
//!
//! The store exclusively owns everything under the root; `groups/**` is
//! append-only and never mutated after seal.

use std::path::{Path, PathBuf};

/// Path helper for a database root. Cheap to clone; owns no handles.
#[derive(Debug, Clone)]
pub struct DbLayout {
    root: PathBuf,
}

impl DbLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.jsonl")
    }

    pub fn groups_dir(&self) -> PathBuf {
        self.root.join("groups")
    }

    pub fn lattice_dir(&self, group_id: &str, lattice_id: &str) -> PathBuf {
        self.groups_dir().join(group_id).join(lattice_id)
    }

    pub fn router_dir(&self) -> PathBuf {
        self.root.join("router")
    }

    pub fn centroids_path(&self) -> PathBuf {
        self.router_dir().join("centroids.f32")
    }

    pub fn router_meta_path(&self) -> PathBuf {
        self.router_dir().join("meta.jsonl")
    }

    pub fn receipts_dir(&self) -> PathBuf {
        self.root.join("receipts")
    }

    pub fn config_path(&self) -> PathBuf {
        self.receipts_dir().join("config.json")
    }

    pub fn db_receipt_path(&self) -> PathBuf {
        self.receipts_dir().join("db_receipt.json")
    }

    pub fn wal_path(&self) -> PathBuf {
        self.receipts_dir().join("ingest.wal.jsonl")
    }

    pub fn dedup_map_path(&self) -> PathBuf {
        self.receipts_dir().join("dedup_map.jsonl")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    pub fn names_path(&self) -> PathBuf {
        self.metadata_dir().join("names.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".writer.lock")
    }
}

/// `G-000001`-style group label for a 1-based index.
pub fn group_label(index: u64) -> String {
    format!("G-{index:06}")
}

/// `L-000001`-style lattice label for a 1-based index.
pub fn lattice_label(index: u64) -> String {
    format!("L-{index:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_zero_padded() {
        assert_eq!(group_label(1), "G-000001");
        assert_eq!(lattice_label(42), "L-000042");
        assert_eq!(lattice_label(1_000_000), "L-1000000");
    }

    #[test]
    fn paths_hang_off_root() {
        let l = DbLayout::new("/tmp/db");
        assert_eq!(l.manifest_path(), PathBuf::from("/tmp/db/manifest.jsonl"));
        assert_eq!(
            l.lattice_dir("G-000001", "L-000002"),
            PathBuf::from("/tmp/db/groups/G-000001/L-000002")
        );
        assert_eq!(l.centroids_path(), PathBuf::from("/tmp/db/router/centroids.f32"));
        assert_eq!(l.names_path(), PathBuf::from("/tmp/db/metadata/names.json"));
    }
}
