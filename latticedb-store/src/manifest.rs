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

//! Manifest table over all sealed lattices.
//!
//! One JSONL row per lattice, in creation order (the writer-lock acquire
//! order). The attested columns (edge_hash, deltaH_total, file_sha256, …)
//! are duplicates of receipt content for listing convenience; the receipt
//! stays authoritative. `display_name` and the ACL columns are non-attested
//! overlays and may change without re-rooting the database.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use latticedb_core::error::{LatticeError, Result};

use crate::acl::AclBinding;
use crate::fsio;

/// One manifest row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRow {
    pub group_id: String,
    pub lattice_id: String,
    pub edge_hash: String,
    #[serde(rename = "deltaH_total")]
    pub delta_h_total: f64,
    /// ISO-8601 UTC seal time.
    pub created_at: String,
    pub source_file: String,
    pub chunk_count: u64,
    pub file_bytes: u64,
    pub file_sha256: String,
    #[serde(flatten)]
    pub acl: AclBinding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Row predicate for `get_manifest`.
#[derive(Debug, Clone, Default)]
pub struct ManifestFilter {
    pub group_id: Option<String>,
    pub lattice_id: Option<String>,
    /// Substring match on the source file name.
    pub source_contains: Option<String>,
    /// Inclusive ISO-8601 bounds; lexicographic comparison is correct for
    /// the fixed RFC 3339 rendering used in `created_at`.
    pub created_after: Option<String>,
    pub created_before: Option<String>,
}

impl ManifestFilter {
    fn matches(&self, row: &ManifestRow) -> bool {
        if let Some(g) = &self.group_id {
            if &row.group_id != g {
                return false;
            }
        }
        if let Some(l) = &self.lattice_id {
            if &row.lattice_id != l {
                return false;
            }
        }
        if let Some(s) = &self.source_contains {
            if !row.source_file.contains(s.as_str()) {
                return false;
            }
        }
        if let Some(after) = &self.created_after {
            if row.created_at.as_str() < after.as_str() {
                return false;
            }
        }
        if let Some(before) = &self.created_before {
            if row.created_at.as_str() > before.as_str() {
                return false;
            }
        }
        true
    }
}

/// Sort key for `get_manifest`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ManifestSortKey {
    /// Creation order as stored (no re-sort).
    #[default]
    Stored,
    CreatedAt,
    LatticeId,
    DeltaH,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestSort {
    pub key: ManifestSortKey,
    pub descending: bool,
}

/// Paging window; `limit = None` means "to the end".
#[derive(Debug, Clone, Copy, Default)]
pub struct Page {
    pub offset: usize,
    pub limit: Option<usize>,
}

/// The manifest file handle.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
}

impl Manifest {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// All rows in stored (creation) order. Missing file reads as empty.
    pub fn load(&self) -> Result<Vec<ManifestRow>> {
        fsio::read_jsonl(&self.path)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.load()?.is_empty())
    }

    /// Append rows durably. Caller must hold the writer lock; the file is
    /// rewritten atomically so readers never see a torn table.
    pub fn append(&self, rows: &[ManifestRow]) -> Result<()> {
        let mut all = self.load()?;
        all.extend_from_slice(rows);
        fsio::atomic_write_jsonl(&self.path, &all)
    }

    /// Replace a single row (display-name / ACL overlay updates only).
    pub fn update_row(
        &self,
        lattice_id: &str,
        f: impl FnOnce(&mut ManifestRow),
    ) -> Result<()> {
        let mut all = self.load()?;
        let row = all
            .iter_mut()
            .find(|r| r.lattice_id == lattice_id)
            .ok_or_else(|| LatticeError::NotFound(format!("lattice {lattice_id}")))?;
        f(row);
        fsio::atomic_write_jsonl(&self.path, &all)
    }

    /// Filtered, sorted, paged view.
    pub fn query(
        &self,
        filter: &ManifestFilter,
        sort: ManifestSort,
        page: Page,
    ) -> Result<Vec<ManifestRow>> {
        let mut rows: Vec<ManifestRow> = self
            .load()?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        match sort.key {
            ManifestSortKey::Stored => {}
            ManifestSortKey::CreatedAt => {
                rows.sort_by(|a, b| a.created_at.cmp(&b.created_at))
            }
            ManifestSortKey::LatticeId => {
                rows.sort_by(|a, b| a.lattice_id.cmp(&b.lattice_id))
            }
            ManifestSortKey::DeltaH => {
                rows.sort_by(|a, b| a.delta_h_total.total_cmp(&b.delta_h_total))
            }
        }
        if sort.descending {
            rows.reverse();
        }
        let end = page
            .limit
            .map(|l| (page.offset + l).min(rows.len()))
            .unwrap_or(rows.len());
        if page.offset >= rows.len() {
            return Ok(Vec::new());
        }
        Ok(rows[page.offset..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(lid: &str, created: &str, dh: f64) -> ManifestRow {
        ManifestRow {
            group_id: "G-000001".into(),
            lattice_id: lid.into(),
            edge_hash: "e".repeat(64),
            delta_h_total: dh,
            created_at: created.into(),
            source_file: format!("{lid}.txt"),
            chunk_count: 3,
            file_bytes: 100,
            file_sha256: "f".repeat(64),
            acl: AclBinding::default(),
            display_name: None,
        }
    }

    fn manifest_with(rows: &[ManifestRow]) -> (tempfile::TempDir, Manifest) {
        let dir = tempfile::tempdir().unwrap();
        let m = Manifest::new(dir.path().join("manifest.jsonl"));
        m.append(rows).unwrap();
        (dir, m)
    }

    #[test]
    fn append_preserves_order() {
        let (_d, m) = manifest_with(&[
            row("L-000001", "2026-01-01T00:00:00Z", 0.1),
            row("L-000002", "2026-01-02T00:00:00Z", 0.3),
        ]);
        m.append(&[row("L-000003", "2026-01-03T00:00:00Z", 0.2)]).unwrap();
        let all = m.load().unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.lattice_id.as_str()).collect();
        assert_eq!(ids, ["L-000001", "L-000002", "L-000003"]);
    }

    #[test]
    fn filter_sort_page() {
        let (_d, m) = manifest_with(&[
            row("L-000001", "2026-01-01T00:00:00Z", 0.1),
            row("L-000002", "2026-01-02T00:00:00Z", 0.3),
            row("L-000003", "2026-01-03T00:00:00Z", 0.2),
        ]);

        let by_dh = m
            .query(
                &ManifestFilter::default(),
                ManifestSort { key: ManifestSortKey::DeltaH, descending: true },
                Page::default(),
            )
            .unwrap();
        assert_eq!(by_dh[0].lattice_id, "L-000002");

        let after = m
            .query(
                &ManifestFilter {
                    created_after: Some("2026-01-02T00:00:00Z".into()),
                    ..Default::default()
                },
                ManifestSort::default(),
                Page::default(),
            )
            .unwrap();
        assert_eq!(after.len(), 2);

        let paged = m
            .query(
                &ManifestFilter::default(),
                ManifestSort::default(),
                Page { offset: 1, limit: Some(1) },
            )
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].lattice_id, "L-000002");

        let past_end = m
            .query(
                &ManifestFilter::default(),
                ManifestSort::default(),
                Page { offset: 10, limit: Some(5) },
            )
            .unwrap();
        assert!(past_end.is_empty());
    }

    #[test]
    fn update_row_only_touches_target() {
        let (_d, m) = manifest_with(&[
            row("L-000001", "2026-01-01T00:00:00Z", 0.1),
            row("L-000002", "2026-01-02T00:00:00Z", 0.3),
        ]);
        m.update_row("L-000002", |r| r.display_name = Some("Q3 Report".into()))
            .unwrap();
        let all = m.load().unwrap();
        assert_eq!(all[0].display_name, None);
        assert_eq!(all[1].display_name.as_deref(), Some("Q3 Report"));

        assert!(m.update_row("L-999999", |_| ()).is_err());
    }

    #[test]
    fn acl_columns_roundtrip_flattened() {
        let mut r = row("L-000001", "2026-01-01T00:00:00Z", 0.1);
        r.acl = AclBinding::tenants(["acme"]);
        let line = serde_json::to_string(&r).unwrap();
        assert!(line.contains("\"acl_tenants\":[\"acme\"]"));
        let back: ManifestRow = serde_json::from_str(&line).unwrap();
        assert_eq!(back.acl, r.acl);
    }
}
