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

//! Binary Merkle tree over receipt state signatures.
//!
//! The database attestation (`db_root`) is the root over the leaf sequence
//! `[sorted(state_sigs)..., config_hash]`: state signatures ascending in
//! byte order, with the normalized config hash appended as the final leaf.
//! Odd levels duplicate their last node; an empty leaf set hashes to
//! SHA-256 of the empty string.

use sha2::{Digest, Sha256};

use crate::error::{LatticeError, Result};

/// Merkle root over an already-ordered leaf sequence.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"").into();
    }
    let mut layer: Vec<[u8; 32]> = leaves.to_vec();
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len().div_ceil(2));
        for pair in layer.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            let mut h = Sha256::new();
            h.update(left);
            h.update(right);
            next.push(h.finalize().into());
        }
        layer = next;
    }
    layer[0]
}

/// Decode a 64-char lowercase hex digest into 32 bytes.
pub fn decode_leaf(hex_sig: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_sig)
        .map_err(|_| LatticeError::Integrity(format!("bad hex leaf: {hex_sig}")))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| LatticeError::Integrity(format!("leaf is not 32 bytes: {hex_sig}")))?;
    Ok(arr)
}

/// The canonical leaf ordering for a database root: state_sigs sorted
/// ascending (byte-lex; equivalent to sorting the fixed-width lowercase hex
/// strings), followed by config_hash.
pub fn db_leaves(state_sigs: &[String], config_hash: &str) -> Vec<String> {
    let mut sigs: Vec<String> = state_sigs.to_vec();
    sigs.sort_unstable();
    sigs.push(config_hash.to_string());
    sigs
}

/// Database root over sorted state signatures plus the config hash, hex.
pub fn db_root_hex(state_sigs: &[String], config_hash: &str) -> Result<String> {
    let leaves = db_leaves(state_sigs, config_hash);
    root_over_hex_leaves(&leaves)
}

/// Root over an already-ordered sequence of hex leaves, hex-encoded.
pub fn root_over_hex_leaves(leaves: &[String]) -> Result<String> {
    let decoded: Result<Vec<[u8; 32]>> = leaves.iter().map(|l| decode_leaf(l)).collect();
    Ok(hex::encode(merkle_root(&decoded?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::sha256_hex;

    fn leaf(tag: &str) -> String {
        sha256_hex(tag.as_bytes())
    }

    #[test]
    fn empty_root_is_sha256_of_nothing() {
        assert_eq!(
            hex::encode(merkle_root(&[])),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let l = decode_leaf(&leaf("a")).unwrap();
        assert_eq!(merkle_root(&[l]), l);
    }

    #[test]
    fn odd_levels_duplicate_last() {
        let a = decode_leaf(&leaf("a")).unwrap();
        let b = decode_leaf(&leaf("b")).unwrap();
        let c = decode_leaf(&leaf("c")).unwrap();

        let mut h = Sha256::new();
        h.update(a);
        h.update(b);
        let ab: [u8; 32] = h.finalize().into();
        let mut h = Sha256::new();
        h.update(c);
        h.update(c);
        let cc: [u8; 32] = h.finalize().into();
        let mut h = Sha256::new();
        h.update(ab);
        h.update(cc);
        let expect: [u8; 32] = h.finalize().into();

        assert_eq!(merkle_root(&[a, b, c]), expect);
    }

    #[test]
    fn db_root_sorts_sigs_but_keeps_config_last() {
        let sigs = vec![leaf("z"), leaf("a")];
        let cfg = leaf("config");
        let leaves = db_leaves(&sigs, &cfg);
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[2], cfg);
        assert!(leaves[0] <= leaves[1]);

        // Sig ordering on input must not change the root.
        let r1 = db_root_hex(&[leaf("z"), leaf("a")], &cfg).unwrap();
        let r2 = db_root_hex(&[leaf("a"), leaf("z")], &cfg).unwrap();
        assert_eq!(r1, r2);
    }

    #[test]
    fn tampered_leaf_changes_root() {
        let cfg = leaf("config");
        let r1 = db_root_hex(&[leaf("a"), leaf("b")], &cfg).unwrap();
        let r2 = db_root_hex(&[leaf("a"), leaf("tampered")], &cfg).unwrap();
        assert_ne!(r1, r2);
    }

    #[test]
    fn malformed_leaf_is_integrity_error() {
        assert!(decode_leaf("not-hex").is_err());
        assert!(decode_leaf("abcd").is_err());
    }
}
