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

//! Receipt verification protocol.
//!
//! A verifier holds a CompositeReceipt (as JSON — possibly produced by a
//! different implementation) and optionally a witness set of
//! LatticeReceipts. Verification never trusts derived fields: the
//! composite's `state_sig` is recomputed from its canonical JSON, the
//! witness Merkle root is recomputed from the witnesses' signatures plus
//! the stored config hash, and both are compared against the on-disk
//! DBReceipt. Reasons are stable strings.

use serde::Serialize;
use serde_json::Value;

use latticedb_core::canonical::state_sig_of;
use latticedb_core::merkle;
use latticedb_core::receipts::DbReceipt;
use latticedb_core::error::Result;

use crate::fsio;
use crate::layout::DbLayout;

/// Verification verdict with a stable reason code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub verified: bool,
    pub reason: String,
}

impl Verification {
    pub const OK: &'static str = "ok";
    pub const DB_RECEIPT_MISSING: &'static str = "db_receipt_missing";
    pub const STATE_SIG_MISMATCH: &'static str = "state_sig_mismatch";
    pub const MERKLE_ROOT_MISMATCH: &'static str = "merkle_root_mismatch";
    pub const DB_ROOT_MISMATCH: &'static str = "db_root_mismatch";

    fn fail(reason: &str) -> Self {
        Self {
            verified: false,
            reason: reason.to_string(),
        }
    }

    fn ok() -> Self {
        Self {
            verified: true,
            reason: Self::OK.to_string(),
        }
    }
}

/// Verify a composite receipt against the store's DBReceipt.
///
/// Steps: (1) recompute the composite `state_sig` over its canonical JSON
/// minus `state_sig`; (2) if witnesses are supplied, recompute the Merkle
/// root over their sorted state_sigs plus the stored `config_hash` and
/// compare to the stored `db_root`; (3) compare the composite's witnessed
/// `db_root` to the stored one.
pub fn verify_composite(
    layout: &DbLayout,
    composite: &Value,
    witnesses: Option<&[Value]>,
) -> Result<Verification> {
    let db_receipt_path = layout.db_receipt_path();
    if !db_receipt_path.exists() {
        return Ok(Verification::fail(Verification::DB_RECEIPT_MISSING));
    }
    let db: DbReceipt = fsio::read_json(&db_receipt_path)?;

    let claimed_sig = composite
        .get("state_sig")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if state_sig_of(composite) != claimed_sig {
        return Ok(Verification::fail(Verification::STATE_SIG_MISMATCH));
    }

    if let Some(witnesses) = witnesses {
        // Witness signatures are recomputed from content, never trusted
        // from the stored field, so a flipped byte anywhere in a witness
        // receipt surfaces here.
        let sigs: Vec<String> = witnesses.iter().map(state_sig_of).collect();
        let recomputed = merkle::db_root_hex(&sigs, &db.config_hash)?;
        if recomputed != db.db_root {
            return Ok(Verification::fail(Verification::MERKLE_ROOT_MISMATCH));
        }
    }

    let witnessed_root = composite
        .get("db_root")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if witnessed_root != db.db_root {
        return Ok(Verification::fail(Verification::DB_ROOT_MISMATCH));
    }

    Ok(Verification::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use latticedb_core::canonical::{sha256_hex, CanonicalF64};
    use latticedb_core::receipts::{CompositeReceipt, RECEIPT_VERSION};

    fn store_with_db_receipt(sigs: &[String], cfg: &str) -> (tempfile::TempDir, DbLayout, DbReceipt) {
        let dir = tempfile::tempdir().unwrap();
        let layout = DbLayout::new(dir.path());
        let db = DbReceipt::assemble(sigs, cfg).unwrap();
        fsio::atomic_write_canonical_json(&layout.db_receipt_path(), &db).unwrap();
        (dir, layout, db)
    }

    fn composite(db_root: &str) -> Value {
        let c = CompositeReceipt {
            version: RECEIPT_VERSION.to_string(),
            db_root: db_root.to_string(),
            lattice_ids: vec!["L-000001".into()],
            edge_hash_composite: sha256_hex(b"edges"),
            delta_h_total: CanonicalF64(0.2),
            cg_iters: 7,
            final_residual: CanonicalF64(2e-8),
            epsilon: 1e-3,
            tau: 0.3,
            filters: Default::default(),
            model_sha256: sha256_hex(b"model"),
            state_sig: String::new(),
        }
        .sealed()
        .unwrap();
        serde_json::to_value(&c).unwrap()
    }

    #[test]
    fn missing_db_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DbLayout::new(dir.path());
        let v = verify_composite(&layout, &composite("irrelevant"), None).unwrap();
        assert_eq!(v.reason, "db_receipt_missing");
        assert!(!v.verified);
    }

    #[test]
    fn tampered_composite_sig() {
        let (_d, layout, db) = store_with_db_receipt(&[sha256_hex(b"s1")], &sha256_hex(b"cfg"));
        let mut c = composite(&db.db_root);
        c["state_sig"] = Value::String("0".repeat(64));
        let v = verify_composite(&layout, &c, None).unwrap();
        assert_eq!(v.reason, "state_sig_mismatch");
    }

    #[test]
    fn witness_root_must_match() {
        let mut witness = serde_json::json!({ "lattice_id": "L-000001", "cg_iters": 12 });
        let sig = state_sig_of(&witness);
        witness["state_sig"] = Value::String(sig.clone());
        let (_d, layout, db) = store_with_db_receipt(&[sig], &sha256_hex(b"cfg"));

        let v =
            verify_composite(&layout, &composite(&db.db_root), Some(&[witness.clone()])).unwrap();
        assert!(v.verified);
        assert_eq!(v.reason, "ok");

        // Flipping a non-signature field in the witness breaks the root.
        witness["cg_iters"] = Value::from(13);
        let v = verify_composite(&layout, &composite(&db.db_root), Some(&[witness])).unwrap();
        assert_eq!(v.reason, "merkle_root_mismatch");
    }

    #[test]
    fn stale_db_root_detected() {
        let (_d, layout, _db) = store_with_db_receipt(&[sha256_hex(b"s1")], &sha256_hex(b"cfg"));
        let v = verify_composite(&layout, &composite(&sha256_hex(b"old-root")), None).unwrap();
        assert_eq!(v.reason, "db_root_mismatch");
    }

    #[test]
    fn intact_composite_verifies_ok() {
        let (_d, layout, db) = store_with_db_receipt(&[sha256_hex(b"s1")], &sha256_hex(b"cfg"));
        let v = verify_composite(&layout, &composite(&db.db_root), None).unwrap();
        assert_eq!(v, Verification { verified: true, reason: "ok".into() });
    }
}
