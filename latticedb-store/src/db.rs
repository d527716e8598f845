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

//! # LatticeDb — the public facade
//!
//! One handle per database root, owning the layout, the attested config,
//! the router cache, and the bounded in-flight query counter. Ingest runs
//! under the single-writer file lock; route/compose are multi-reader and
//! lock-free. All operations take a [`Deadline`] and return values from
//! the enumerated error surface.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{debug, info};

use latticedb_core::config::LatticeConfig;
use latticedb_core::deadline::Deadline;
use latticedb_core::embed::normalize_query;
use latticedb_core::error::{LatticeError, Result};
use latticedb_core::receipts::{DbReceipt, LatticeReceipt};

use crate::acl::{AclBinding, AclClaims};
use crate::builder::{self, ChunkInput, SourceMeta};
use crate::compose::{self, ComposeOptions, ComposeOutcome};
use crate::fsio;
use crate::layout::{group_label, lattice_label, DbLayout};
use crate::lock::WriterLock;
use crate::manifest::{Manifest, ManifestFilter, ManifestRow, ManifestSort, Page};
use crate::readiness::{self, ReadinessReport};
use crate::router::{Router, RouteHit, RouterMetaRow};
use crate::verify::{self, Verification};

/// Operational (non-attested) knobs of one handle.
#[derive(Debug, Clone)]
pub struct DbOptions {
    /// Bound on concurrently executing route/compose calls.
    pub max_in_flight: usize,
    /// Fail route/compose that carry no ACL claims at all.
    pub strict_claims: bool,
    /// Skip re-building lattices whose source file hash was already sealed.
    pub dedup: bool,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            strict_claims: false,
            dedup: true,
        }
    }
}

/// One ingest request: a cohort of chunks plus their externally produced
/// vectors and source provenance.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Explicit group; auto-assigned when absent.
    pub group_id: Option<String>,
    pub chunks: Vec<ChunkInput>,
    pub vectors: Vec<Vec<f32>>,
    pub source: SourceMeta,
    /// ACL columns for the new lattice (non-attested overlay).
    pub acl: AclBinding,
}

/// A LatticeDB database rooted at one directory.
pub struct LatticeDb {
    layout: DbLayout,
    config: LatticeConfig,
    config_hash: String,
    options: DbOptions,
    router: Router,
    in_flight: AtomicUsize,
}

impl std::fmt::Debug for LatticeDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatticeDb")
            .field("layout", &self.layout)
            .field("config_hash", &self.config_hash)
            .field("options", &self.options)
            .finish()
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn validate_label(kind: &str, label: &str) -> Result<()> {
    let ok = !label.is_empty()
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(LatticeError::InvalidInput(format!("bad {kind} label: {label:?}")))
    }
}

impl LatticeDb {
    /// Open (and initialize, if empty) a database root.
    ///
    /// If the root already carries a config, the supplied one must hash to
    /// the same value — numerics drift between a store and its handle is
    /// an integrity failure, not something to silently adopt.
    pub fn open(root: impl Into<std::path::PathBuf>, config: LatticeConfig, options: DbOptions) -> Result<Self> {
        config.validate()?;
        let layout = DbLayout::new(root);
        let config_hash = config.config_hash()?;

        if layout.config_path().exists() {
            let stored = fsio::read_json_value(&layout.config_path())?;
            let stored_hash = latticedb_core::canonical::canonical_sha256_hex(&stored);
            if stored_hash != config_hash {
                return Err(LatticeError::Integrity(format!(
                    "config mismatch: store has {stored_hash}, caller has {config_hash}"
                )));
            }
        } else {
            let _lock = WriterLock::acquire(&layout.lock_path(), Deadline::none())?;
            // Re-check under the lock; a racing opener may have won.
            if !layout.config_path().exists() {
                fsio::atomic_write_canonical_json(&layout.config_path(), &config)?;
                fsio::atomic_write_jsonl::<ManifestRow>(&layout.manifest_path(), &[])?;
                fsio::atomic_write_jsonl::<RouterMetaRow>(&layout.router_meta_path(), &[])?;
                fsio::atomic_write_bytes(&layout.centroids_path(), &[])?;
                let db = DbReceipt::assemble(&[], &config_hash)?;
                fsio::atomic_write_canonical_json(&layout.db_receipt_path(), &db)?;
                info!(root = %layout.root().display(), "initialized empty database root");
            }
        }

        let dim = config.dim;
        Ok(Self {
            router: Router::new(layout.clone(), dim),
            layout,
            config,
            config_hash,
            options,
            in_flight: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &LatticeConfig {
        &self.config
    }

    pub fn layout(&self) -> &DbLayout {
        &self.layout
    }

    fn enter_query(&self) -> Result<InFlightGuard<'_>> {
        let prev = self.in_flight.fetch_add(1, Ordering::SeqCst);
        if prev >= self.options.max_in_flight {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(LatticeError::Busy(format!(
                "{} queries in flight (limit {})",
                prev, self.options.max_in_flight
            )));
        }
        Ok(InFlightGuard(&self.in_flight))
    }

    // =========================================================================
    // Ingest (single-writer)
    // =========================================================================

    /// Build and seal one micro-lattice, then re-attest the database.
    ///
    /// Runs entirely under the writer lock: manifest append order equals
    /// lock-acquire order. Any failure before the seal rename leaves no
    /// side effects.
    pub fn ingest(&self, req: IngestRequest, deadline: Deadline) -> Result<LatticeReceipt> {
        deadline.check()?;
        if let Some(g) = &req.group_id {
            validate_label("group", g)?;
        }
        let _lock = WriterLock::acquire(&self.layout.lock_path(), deadline)?;

        if self.options.dedup {
            if let Some(receipt) = self.dedup_hit(&req.source)? {
                return Ok(receipt);
            }
        }

        let manifest = Manifest::new(self.layout.manifest_path());
        let index = manifest.len()? as u64 + 1;
        let lattice_id = lattice_label(index);
        let group_id = req.group_id.clone().unwrap_or_else(|| group_label(index));

        let built = builder::build_lattice(
            &self.config,
            group_id.clone(),
            lattice_id.clone(),
            &req.chunks,
            &req.vectors,
            &req.source,
            deadline,
        )?;
        builder::seal_lattice_dir(&self.layout, &built)?;

        manifest.append(&[ManifestRow {
            group_id: group_id.clone(),
            lattice_id: lattice_id.clone(),
            edge_hash: built.receipt.edge_hash.clone(),
            delta_h_total: built.receipt.delta_h_total.value(),
            created_at: now_iso8601(),
            source_file: req.source.source_file.clone(),
            chunk_count: req.chunks.len() as u64,
            file_bytes: req.source.file_bytes,
            file_sha256: req.source.file_sha256.clone(),
            acl: req.acl.clone(),
            display_name: None,
        }])?;
        crate::router::append_row(
            &self.layout,
            &built.centroid,
            RouterMetaRow {
                lattice_id: lattice_id.clone(),
                group_id: group_id.clone(),
                acl: req.acl.clone(),
            },
        )?;
        let db = self.recompute_db_receipt_locked()?;

        fsio::append_jsonl(
            &self.layout.dedup_map_path(),
            &json!({
                "file_sha256": req.source.file_sha256,
                "lattice_id": lattice_id,
                "source": req.source.source_file,
            }),
        )?;
        fsio::append_jsonl(
            &self.layout.wal_path(),
            &json!({
                "ts": now_iso8601(),
                "event": "ingest_ok",
                "lattice_id": lattice_id,
                "group_id": group_id,
                "file_sha256": req.source.file_sha256,
                "chunks": req.chunks.len(),
            }),
        )?;

        self.router.invalidate();
        info!(
            %lattice_id,
            %group_id,
            chunks = req.chunks.len(),
            db_root = %db.db_root,
            "lattice sealed"
        );
        Ok(built.receipt)
    }

    /// Content dedup: an already-sealed source hash returns its existing
    /// receipt instead of re-building.
    fn dedup_hit(&self, source: &SourceMeta) -> Result<Option<LatticeReceipt>> {
        let entries: Vec<Value> = fsio::read_jsonl(&self.layout.dedup_map_path())?;
        let hit = entries.iter().find(|e| {
            e.get("file_sha256").and_then(Value::as_str) == Some(source.file_sha256.as_str())
        });
        let Some(hit) = hit else {
            return Ok(None);
        };
        let lattice_id = hit
            .get("lattice_id")
            .and_then(Value::as_str)
            .ok_or_else(|| LatticeError::Integrity("dedup entry missing lattice_id".into()))?;
        let row = Manifest::new(self.layout.manifest_path())
            .load()?
            .into_iter()
            .find(|r| r.lattice_id == lattice_id)
            .ok_or_else(|| {
                LatticeError::Integrity(format!("dedup entry references unknown lattice {lattice_id}"))
            })?;
        let receipt: LatticeReceipt = fsio::read_json(
            &self
                .layout
                .lattice_dir(&row.group_id, &row.lattice_id)
                .join("receipt.json"),
        )?;
        fsio::append_jsonl(
            &self.layout.wal_path(),
            &json!({
                "ts": now_iso8601(),
                "event": "dedup_skip",
                "lattice_id": row.lattice_id,
                "file_sha256": source.file_sha256,
                "source": source.source_file,
            }),
        )?;
        debug!(lattice_id = %row.lattice_id, "dedup hit; returning existing receipt");
        Ok(Some(receipt))
    }

    /// Re-root the database from the sealed receipts on disk. Called after
    /// every seal; also the recovery path after external tamper checks.
    pub fn recompute_db_receipt(&self) -> Result<DbReceipt> {
        let _lock = WriterLock::acquire(&self.layout.lock_path(), Deadline::none())?;
        self.recompute_db_receipt_locked()
    }

    fn recompute_db_receipt_locked(&self) -> Result<DbReceipt> {
        let mut sigs = Vec::new();
        let groups = self.layout.groups_dir();
        if groups.exists() {
            let mut group_dirs: Vec<_> = std::fs::read_dir(&groups)?
                .collect::<std::io::Result<Vec<_>>>()?
                .into_iter()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            group_dirs.sort();
            for gdir in group_dirs {
                let mut lattice_dirs: Vec<_> = std::fs::read_dir(&gdir)?
                    .collect::<std::io::Result<Vec<_>>>()?
                    .into_iter()
                    .map(|e| e.path())
                    .filter(|p| p.is_dir())
                    .collect();
                lattice_dirs.sort();
                for ldir in lattice_dirs {
                    let receipt = fsio::read_json_value(&ldir.join("receipt.json"))?;
                    let sig = receipt
                        .get("state_sig")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            LatticeError::Integrity(format!(
                                "receipt missing state_sig: {}",
                                ldir.display()
                            ))
                        })?;
                    sigs.push(sig.to_string());
                }
            }
        }
        let db = DbReceipt::assemble(&sigs, &self.config_hash)?;
        fsio::atomic_write_canonical_json(&self.layout.db_receipt_path(), &db)?;
        self.router.invalidate();
        Ok(db)
    }

    // =========================================================================
    // Query path (multi-reader)
    // =========================================================================

    /// Nearest-K lattices for a query vector. `k = 0` selects the default
    /// of 8; the effective K is clamped to the table size.
    pub fn route(
        &self,
        q: &[f32],
        k: usize,
        claims: Option<&AclClaims>,
        deadline: Deadline,
    ) -> Result<Vec<RouteHit>> {
        let _guard = self.enter_query()?;
        deadline.check()?;
        let k = if k == 0 { crate::router::DEFAULT_ROUTE_K } else { k };
        let qn = normalize_query(q, self.config.dim)?;
        self.router.route(&qn, k, claims, self.options.strict_claims)
    }

    /// Settle a context bundle over selected lattices.
    pub fn compose(
        &self,
        q: &[f32],
        lattice_ids: &[String],
        opts: &ComposeOptions,
        claims: Option<&AclClaims>,
        deadline: Deadline,
    ) -> Result<ComposeOutcome> {
        let _guard = self.enter_query()?;
        if self.options.strict_claims && claims.is_none() {
            return Err(LatticeError::AclDenyMissingClaims);
        }
        // The snapshot fixes the db_root the receipt anchors to.
        let snapshot = self.router.snapshot()?;
        compose::compose(
            &self.layout,
            &self.config,
            &snapshot,
            q,
            lattice_ids,
            opts,
            claims,
            deadline,
        )
    }

    /// Verify a composite receipt (JSON form) against this store.
    pub fn verify(&self, composite: &Value, witnesses: Option<&[Value]>) -> Result<Verification> {
        verify::verify_composite(&self.layout, composite, witnesses)
    }

    /// The current database receipt.
    pub fn db_receipt(&self) -> Result<DbReceipt> {
        fsio::read_json(&self.layout.db_receipt_path())
    }

    /// Manifest rows with the display-name overlay applied.
    pub fn manifest(
        &self,
        filter: &ManifestFilter,
        sort: ManifestSort,
        page: Page,
    ) -> Result<Vec<ManifestRow>> {
        let names: BTreeMap<String, String> = if self.layout.names_path().exists() {
            fsio::read_json(&self.layout.names_path())?
        } else {
            BTreeMap::new()
        };
        let mut rows = Manifest::new(self.layout.manifest_path()).query(filter, sort, page)?;
        for row in rows.iter_mut() {
            if let Some(name) = names.get(&row.lattice_id) {
                row.display_name = Some(name.clone());
            }
        }
        Ok(rows)
    }

    /// Set the non-attested display name of a lattice. Does not touch any
    /// receipt or the Merkle root.
    pub fn set_display_name(&self, lattice_id: &str, name: &str) -> Result<()> {
        let _lock = WriterLock::acquire(&self.layout.lock_path(), Deadline::none())?;
        let known = Manifest::new(self.layout.manifest_path())
            .load()?
            .iter()
            .any(|r| r.lattice_id == lattice_id);
        if !known {
            return Err(LatticeError::NotFound(format!("lattice {lattice_id}")));
        }
        let mut names: BTreeMap<String, String> = if self.layout.names_path().exists() {
            fsio::read_json(&self.layout.names_path())?
        } else {
            BTreeMap::new()
        };
        names.insert(lattice_id.to_string(), name.to_string());
        fsio::atomic_write_canonical_json(&self.layout.names_path(), &names)
    }

    /// Readiness probe of the root this handle points at.
    pub fn readiness(&self) -> ReadinessReport {
        readiness::check(&self.layout)
    }
}

// =============================================================================
// Tests — end-to-end seal/route/compose/verify scenarios plus the
// operational envelope
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use latticedb_core::canonical::sha256_hex;
    use latticedb_core::embed::StubEmbedder;

    fn test_config() -> LatticeConfig {
        let mut cfg = LatticeConfig::new(4, "stub@deterministic");
        cfg.k_neighbors = 2;
        cfg.lambda_g = 1.0;
        cfg.lambda_c = 0.5;
        cfg.lambda_q = 4.0;
        cfg.tol = 1e-6;
        cfg
    }

    fn open_db(dir: &tempfile::TempDir) -> LatticeDb {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        LatticeDb::open(dir.path(), test_config(), DbOptions::default()).unwrap()
    }

    fn request(texts: &[&str], source_tag: &str, acl: AclBinding) -> IngestRequest {
        let embedder = StubEmbedder::new(4);
        let chunks: Vec<ChunkInput> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| ChunkInput {
                text: t.to_string(),
                offset_start: (i * 100) as u64,
                offset_end: (i * 100 + 99) as u64,
            })
            .collect();
        let vectors = texts.iter().map(|t| embedder.embed_one(t)).collect();
        IngestRequest {
            group_id: None,
            chunks,
            vectors,
            source: SourceMeta {
                source_file: format!("{source_tag}.txt"),
                file_sha256: sha256_hex(source_tag.as_bytes()),
                file_bytes: 1000,
            },
            acl,
        }
    }

    fn corpus6() -> Vec<&'static str> {
        vec![
            "chunk 0 alpha beta gamma",
            "chunk 1 alpha beta gamma",
            "chunk 2 alpha beta gamma",
            "chunk 3 alpha beta gamma",
            "chunk 4 alpha beta gamma",
            "chunk 5 alpha beta gamma",
        ]
    }

    fn permissive() -> ComposeOptions {
        ComposeOptions {
            epsilon: 1e-12,
            tau: 1e-12,
            ..Default::default()
        }
    }

    fn query_vec(text: &str) -> Vec<f32> {
        StubEmbedder::new(4).embed_one(text)
    }

    fn disk_witnesses(db: &LatticeDb) -> Vec<Value> {
        db.manifest(&ManifestFilter::default(), ManifestSort::default(), Page::default())
            .unwrap()
            .iter()
            .map(|row| {
                fsio::read_json_value(
                    &db.layout.lattice_dir(&row.group_id, &row.lattice_id).join("receipt.json"),
                )
                .unwrap()
            })
            .collect()
    }

    // Ingesting the same corpus twice into fresh roots must reproduce the
    // same edge_hash, state_sig, and db_root.
    #[test]
    fn double_ingest_is_byte_identical() {
        let texts = corpus6();
        let mut sigs = Vec::new();
        let mut roots = Vec::new();
        let mut edge_hashes = Vec::new();
        for _ in 0..2 {
            let dir = tempfile::tempdir().unwrap();
            let db = open_db(&dir);
            let receipt = db.ingest(request(&texts, "doc", AclBinding::default()), Deadline::none()).unwrap();
            sigs.push(receipt.state_sig.clone());
            edge_hashes.push(receipt.edge_hash.clone());
            roots.push(db.db_receipt().unwrap().db_root);
        }
        assert_eq!(sigs[0], sigs[1]);
        assert_eq!(edge_hashes[0], edge_hashes[1]);
        assert_eq!(roots[0], roots[1]);
    }

    // An n=1 lattice has no edges and settles at its warm start.
    #[test]
    fn single_chunk_lattice() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        let receipt = db
            .ingest(request(&["lonely chunk"], "solo", AclBinding::default()), Deadline::none())
            .unwrap();
        assert_eq!(receipt.cg_iters, 0);
        assert_eq!(receipt.delta_h_total.value(), 0.0);
        assert_eq!(
            receipt.edge_hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(receipt.verify_state_sig().unwrap());
    }

    // Full query path: route, compose, then verify against the store.
    #[test]
    fn route_compose_verify_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        for tag in ["doc-a", "doc-b", "doc-c"] {
            let texts: Vec<String> = (0..4).map(|i| format!("{tag} passage {i}")).collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            db.ingest(request(&refs, tag, AclBinding::default()), Deadline::none()).unwrap();
        }

        let q = query_vec("doc-a passage 1");
        let hits = db.route(&q, 8, None, Deadline::none()).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        let ids: Vec<String> = hits.iter().map(|h| h.lattice_id.clone()).collect();
        let outcome = db.compose(&q, &ids, &permissive(), None, Deadline::none()).unwrap();
        assert!(outcome.abstain.is_none());
        assert_eq!(outcome.context_pack.items.len(), 3);
        assert_eq!(outcome.composite_receipt.db_root, db.db_receipt().unwrap().db_root);
        assert_eq!(outcome.composite_receipt.lattice_ids.len(), 3);

        let composite = serde_json::to_value(&outcome.composite_receipt).unwrap();
        let witnesses = disk_witnesses(&db);
        let v = db.verify(&composite, Some(&witnesses)).unwrap();
        assert!(v.verified, "reason: {}", v.reason);
        assert_eq!(v.reason, "ok");
    }

    // A flipped byte in a sealed receipt surfaces through the Merkle root.
    #[test]
    fn tampered_receipt_breaks_verification() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        for tag in ["doc-a", "doc-b", "doc-c"] {
            let texts: Vec<String> = (0..4).map(|i| format!("{tag} passage {i}")).collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            db.ingest(request(&refs, tag, AclBinding::default()), Deadline::none()).unwrap();
        }
        let q = query_vec("doc-b passage 0");
        let ids: Vec<String> = db
            .route(&q, 8, None, Deadline::none())
            .unwrap()
            .into_iter()
            .map(|h| h.lattice_id)
            .collect();
        let outcome = db.compose(&q, &ids, &permissive(), None, Deadline::none()).unwrap();
        let composite = serde_json::to_value(&outcome.composite_receipt).unwrap();

        // Flip one byte of a sealed receipt's edge_hash (the stored
        // state_sig stays as-is, so the recomputed db_root is unchanged).
        let rows = db
            .manifest(&ManifestFilter::default(), ManifestSort::default(), Page::default())
            .unwrap();
        let row = &rows[0];
        let receipt_path = db.layout.lattice_dir(&row.group_id, &row.lattice_id).join("receipt.json");
        let mut text = std::fs::read_to_string(&receipt_path).unwrap();
        let eh = row.edge_hash.clone();
        let flipped = if eh.as_bytes()[0] == b'0' { "1" } else { "0" };
        text = text.replace(&eh, &format!("{flipped}{}", &eh[1..]));
        std::fs::write(&receipt_path, text).unwrap();

        db.recompute_db_receipt().unwrap();

        let witnesses = disk_witnesses(&db);
        let v = db.verify(&composite, Some(&witnesses)).unwrap();
        assert!(!v.verified);
        assert_eq!(v.reason, "merkle_root_mismatch");
    }

    // Tampering the state_sig itself moves the recomputed root instead.
    #[test]
    fn tampered_state_sig_moves_db_root() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        db.ingest(request(&corpus6(), "doc", AclBinding::default()), Deadline::none()).unwrap();
        let q = query_vec("chunk 1 alpha beta gamma");
        let ids = vec!["L-000001".to_string()];
        let outcome = db.compose(&q, &ids, &permissive(), None, Deadline::none()).unwrap();
        let composite = serde_json::to_value(&outcome.composite_receipt).unwrap();

        let receipt_path = db.layout.lattice_dir("G-000001", "L-000001").join("receipt.json");
        let mut receipt = fsio::read_json_value(&receipt_path).unwrap();
        receipt["state_sig"] = Value::String("0".repeat(64));
        std::fs::write(&receipt_path, serde_json::to_string(&receipt).unwrap()).unwrap();
        db.recompute_db_receipt().unwrap();

        let v = db.verify(&composite, None).unwrap();
        assert!(!v.verified);
        assert_eq!(v.reason, "db_root_mismatch");
    }

    // Weak energy evidence abstains but still emits a receipt.
    #[test]
    fn abstains_on_weak_coherence() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        for tag in ["topic-x", "topic-y", "topic-z"] {
            let texts: Vec<String> = (0..4).map(|i| format!("{tag} passage {i}")).collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            db.ingest(request(&refs, tag, AclBinding::default()), Deadline::none()).unwrap();
        }
        let q = query_vec("entirely unrelated question");
        let ids: Vec<String> = db
            .route(&q, 8, None, Deadline::none())
            .unwrap()
            .into_iter()
            .map(|h| h.lattice_id)
            .collect();

        let opts = ComposeOptions {
            epsilon: 1e9, // above any observable ΔH
            tau: 1e-12,
            ..Default::default()
        };
        let outcome = db.compose(&q, &ids, &opts, None, Deadline::none()).unwrap();
        let abstain = outcome.abstain.expect("must abstain");
        assert_eq!(abstain.reason, "weak_coherence");
        assert!(outcome.context_pack.items.is_empty());
        // The receipt is still emitted and verifiable.
        assert_eq!(outcome.composite_receipt.db_root, db.db_receipt().unwrap().db_root);
        let v = db
            .verify(&serde_json::to_value(&outcome.composite_receipt).unwrap(), None)
            .unwrap();
        assert!(v.verified);
    }

    // Tenant gating on route; compose over invisible lattices abstains.
    #[test]
    fn acl_filtering_and_abstention() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        let acme = AclBinding::tenants(["acme"]);
        db.ingest(request(&["acme secret one"], "acme-1", acme.clone()), Deadline::none()).unwrap();
        db.ingest(request(&["acme secret two"], "acme-2", acme), Deadline::none()).unwrap();
        let pub_receipt = db
            .ingest(request(&["public knowledge"], "pub-1", AclBinding::public()), Deadline::none())
            .unwrap();

        let q = query_vec("anything");
        let other = AclClaims::tenant("other");
        let hits = db.route(&q, 8, Some(&other), Deadline::none()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].lattice_id, pub_receipt.lattice_id);

        // Compose over only the tenant-gated lattices abstains.
        let gated = vec!["L-000001".to_string(), "L-000002".to_string()];
        let outcome = db.compose(&q, &gated, &permissive(), Some(&other), Deadline::none()).unwrap();
        assert_eq!(outcome.abstain.unwrap().reason, "acl_no_candidates");
        assert!(outcome.composite_receipt.lattice_ids.is_empty());
    }

    #[test]
    fn unknown_lattice_ids_compose_to_empty_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        db.ingest(request(&corpus6(), "doc", AclBinding::default()), Deadline::none()).unwrap();
        let q = query_vec("anything");
        let outcome = db
            .compose(&q, &["L-DOES-NOT-EXIST".to_string()], &permissive(), None, Deadline::none())
            .unwrap();
        assert!(outcome.composite_receipt.lattice_ids.is_empty());
        assert_eq!(outcome.composite_receipt.delta_h_total.value(), 0.0);
        assert_eq!(outcome.composite_receipt.db_root, db.db_receipt().unwrap().db_root);
        assert_eq!(outcome.abstain.unwrap().reason, "weak_coherence");
    }

    #[test]
    fn dedup_returns_existing_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        let r1 = db.ingest(request(&corpus6(), "doc", AclBinding::default()), Deadline::none()).unwrap();
        let r2 = db.ingest(request(&corpus6(), "doc", AclBinding::default()), Deadline::none()).unwrap();
        assert_eq!(r1.lattice_id, r2.lattice_id);
        assert_eq!(r1.state_sig, r2.state_sig);
        assert_eq!(
            db.manifest(&ManifestFilter::default(), ManifestSort::default(), Page::default())
                .unwrap()
                .len(),
            1
        );
        let wal: Vec<Value> = fsio::read_jsonl(&db.layout.wal_path()).unwrap();
        assert!(wal
            .iter()
            .any(|e| e.get("event").and_then(Value::as_str) == Some("dedup_skip")));
    }

    #[test]
    fn append_only_growth_and_router_consistency() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        for tag in ["a", "b", "c"] {
            db.ingest(request(&[tag], tag, AclBinding::default()), Deadline::none()).unwrap();
        }
        let report = db.readiness();
        assert!(report.ready, "reasons: {:?}", report.reasons);
        assert_eq!(report.lattice_count, 3);

        let rows = db
            .manifest(&ManifestFilter::default(), ManifestSort::default(), Page::default())
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.lattice_id.as_str()).collect();
        assert_eq!(ids, ["L-000001", "L-000002", "L-000003"]);
    }

    #[test]
    fn busy_when_in_flight_limit_hit() {
        let dir = tempfile::tempdir().unwrap();
        let db = LatticeDb::open(
            dir.path(),
            test_config(),
            DbOptions { max_in_flight: 0, ..Default::default() },
        )
        .unwrap();
        let err = db.route(&[1.0, 0.0, 0.0, 0.0], 1, None, Deadline::none()).unwrap_err();
        assert!(matches!(err, LatticeError::Busy(_)));
    }

    #[test]
    fn strict_claims_mode_denies_claimless_queries() {
        let dir = tempfile::tempdir().unwrap();
        let db = LatticeDb::open(
            dir.path(),
            test_config(),
            DbOptions { strict_claims: true, ..Default::default() },
        )
        .unwrap();
        db.ingest(request(&["x"], "x", AclBinding::default()), Deadline::none()).unwrap();
        let q = query_vec("x");
        assert!(matches!(
            db.route(&q, 1, None, Deadline::none()).unwrap_err(),
            LatticeError::AclDenyMissingClaims
        ));
        assert!(matches!(
            db.compose(&q, &["L-000001".into()], &permissive(), None, Deadline::none())
                .unwrap_err(),
            LatticeError::AclDenyMissingClaims
        ));
        // With claims present the same calls succeed.
        let claims = AclClaims::tenant("acme");
        assert!(db.route(&q, 1, Some(&claims), Deadline::none()).is_ok());
    }

    #[test]
    fn expired_deadline_rejects_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        let expired =
            Deadline::at(std::time::Instant::now() - std::time::Duration::from_millis(1));
        let err = db
            .ingest(request(&corpus6(), "doc", AclBinding::default()), expired)
            .unwrap_err();
        assert!(matches!(err, LatticeError::DeadlineExceeded));
        // No side effects: store is still empty.
        assert_eq!(db.db_receipt().unwrap().lattice_count, 0);
    }

    #[test]
    fn display_name_overlay_does_not_reroot() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        db.ingest(request(&corpus6(), "doc", AclBinding::default()), Deadline::none()).unwrap();
        let root_before = db.db_receipt().unwrap().db_root;

        db.set_display_name("L-000001", "Quarterly Report").unwrap();
        let rows = db
            .manifest(&ManifestFilter::default(), ManifestSort::default(), Page::default())
            .unwrap();
        assert_eq!(rows[0].display_name.as_deref(), Some("Quarterly Report"));
        assert_eq!(db.db_receipt().unwrap().db_root, root_before);

        assert!(matches!(
            db.set_display_name("L-999999", "nope").unwrap_err(),
            LatticeError::NotFound(_)
        ));
    }

    #[test]
    fn reopen_requires_matching_config() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open_db(&dir);
            db.ingest(request(&corpus6(), "doc", AclBinding::default()), Deadline::none()).unwrap();
        }
        // Same config reopens fine.
        let db = open_db(&dir);
        assert_eq!(db.db_receipt().unwrap().lattice_count, 1);

        // A numerics drift is an integrity failure.
        let mut other = test_config();
        other.lambda_q = 2.0;
        let err = LatticeDb::open(dir.path(), other, DbOptions::default()).unwrap_err();
        assert!(matches!(err, LatticeError::Integrity(_)));
    }

    #[test]
    fn readiness_detects_config_tamper() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        db.ingest(request(&corpus6(), "doc", AclBinding::default()), Deadline::none()).unwrap();
        assert!(db.readiness().ready);

        let mut cfg = fsio::read_json_value(&db.layout.config_path()).unwrap();
        cfg["lambda_Q"] = Value::from(99.0);
        std::fs::write(
            &db.layout.config_path(),
            latticedb_core::canonical::canonical_json(&cfg),
        )
        .unwrap();

        let report = db.readiness();
        assert!(!report.ready);
        assert!(report.reasons.iter().any(|r| r.contains("config_hash_mismatch")));
    }

    #[test]
    fn manifest_query_respects_group_override() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);
        let mut req = request(&["grouped"], "g", AclBinding::default());
        req.group_id = Some("G-custom_7".to_string());
        db.ingest(req, Deadline::none()).unwrap();
        let rows = db
            .manifest(
                &ManifestFilter { group_id: Some("G-custom_7".into()), ..Default::default() },
                ManifestSort::default(),
                Page::default(),
            )
            .unwrap();
        assert_eq!(rows.len(), 1);

        let mut bad = request(&["bad"], "bad", AclBinding::default());
        bad.group_id = Some("../escape".to_string());
        assert!(matches!(
            db.ingest(bad, Deadline::none()).unwrap_err(),
            LatticeError::InvalidInput(_)
        ));
    }
}
