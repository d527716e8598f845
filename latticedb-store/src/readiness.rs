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

//! Store readiness probe.
//!
//! Observation-only: checks existence and mutual consistency of the
//! router, config, manifest, and database receipt. Hard inconsistencies
//! (hash mismatch, row-count disagreement, schema drift) make the store
//! not-ready; soft findings on individual lattices (missing artifact
//! files, malformed receipts) are reported as warnings and never repaired
//! here.

use serde::Serialize;

use latticedb_core::canonical::canonical_sha256_hex;
use latticedb_core::config::{LatticeConfig, SCHEMA_VERSION};
use latticedb_core::receipts::DbReceipt;

use crate::fsio;
use crate::layout::DbLayout;
use crate::manifest::{Manifest, ManifestRow};
use crate::router::RouterMetaRow;

/// The result of one readiness probe.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    /// Hard failures; empty iff `ready`.
    pub reasons: Vec<String>,
    /// Warn-mode findings that do not block readiness.
    pub warnings: Vec<String>,
    pub lattice_count: u64,
}

/// Probe a database root.
pub fn check(layout: &DbLayout) -> ReadinessReport {
    let mut reasons = Vec::new();
    let mut warnings = Vec::new();

    // Config: present, parseable, valid, and on the supported schema.
    let config_value = match fsio::read_json_value(&layout.config_path()) {
        Ok(v) => Some(v),
        Err(e) => {
            reasons.push(format!("config_unreadable: {e}"));
            None
        }
    };

    let config: Option<LatticeConfig> = config_value.as_ref().and_then(|v| {
        match serde_json::from_value::<LatticeConfig>(v.clone()) {
            Ok(c) => Some(c),
            Err(e) => {
                reasons.push(format!("config_malformed: {e}"));
                None
            }
        }
    });
    if let Some(cfg) = &config {
        if let Err(e) = cfg.validate() {
            reasons.push(format!("config_invalid: {e}"));
        }
        if cfg.schema_version != SCHEMA_VERSION {
            reasons.push(format!(
                "schema_version_mismatch: store has {}, supported is {}",
                cfg.schema_version, SCHEMA_VERSION
            ));
        }
    }

    // DB receipt: present and bound to the config bytes on disk.
    let db: Option<DbReceipt> = match fsio::read_json(&layout.db_receipt_path()) {
        Ok(db) => Some(db),
        Err(e) => {
            reasons.push(format!("db_receipt_unreadable: {e}"));
            None
        }
    };
    if let (Some(db), Some(cfg_value)) = (&db, &config_value) {
        if db.config_hash != canonical_sha256_hex(cfg_value) {
            reasons.push("config_hash_mismatch".to_string());
        }
    }

    // Manifest and router tables must agree row-for-row.
    let manifest_rows: Vec<ManifestRow> = match Manifest::new(layout.manifest_path()).load() {
        Ok(rows) => rows,
        Err(e) => {
            reasons.push(format!("manifest_unreadable: {e}"));
            Vec::new()
        }
    };
    let lattice_count = manifest_rows.len() as u64;

    let router_rows: Vec<RouterMetaRow> = match fsio::read_jsonl(&layout.router_meta_path()) {
        Ok(rows) => rows,
        Err(e) => {
            reasons.push(format!("router_meta_unreadable: {e}"));
            Vec::new()
        }
    };

    if router_rows.len() != manifest_rows.len() {
        reasons.push(format!(
            "router_manifest_count_mismatch: router has {}, manifest has {}",
            router_rows.len(),
            manifest_rows.len()
        ));
    }
    {
        let manifest_ids: std::collections::BTreeSet<&str> =
            manifest_rows.iter().map(|r| r.lattice_id.as_str()).collect();
        for row in &router_rows {
            if !manifest_ids.contains(row.lattice_id.as_str()) {
                reasons.push(format!("router_row_not_in_manifest: {}", row.lattice_id));
            }
        }
    }

    // Centroid table must be exactly N·d·4 bytes.
    if let Some(cfg) = &config {
        let expected = router_rows.len() * cfg.dim * 4;
        let actual = std::fs::metadata(layout.centroids_path())
            .map(|m| m.len() as usize)
            .unwrap_or(0);
        if actual != expected {
            reasons.push(format!(
                "centroid_table_size_mismatch: {actual} bytes for {} rows of dim {}",
                router_rows.len(),
                cfg.dim
            ));
        }
    }

    // Per-lattice artifacts: warn-mode only.
    for row in &manifest_rows {
        let dir = layout.lattice_dir(&row.group_id, &row.lattice_id);
        for artifact in ["chunks.jsonl", "embeds.f32", "edges.bin", "ustar.f32"] {
            if !dir.join(artifact).exists() {
                warnings.push(format!("{}: missing {artifact}", row.lattice_id));
            }
        }
        match fsio::read_json_value(&dir.join("receipt.json")) {
            Ok(v) => {
                if v.get("state_sig").and_then(|s| s.as_str()).unwrap_or("").is_empty() {
                    warnings.push(format!("{}: receipt missing state_sig", row.lattice_id));
                }
                if v.get("version").is_none() {
                    warnings.push(format!("{}: receipt missing version", row.lattice_id));
                }
            }
            Err(e) => warnings.push(format!("{}: receipt unreadable: {e}", row.lattice_id)),
        }
    }

    ReadinessReport {
        ready: reasons.is_empty(),
        reasons,
        warnings,
        lattice_count,
    }
}
