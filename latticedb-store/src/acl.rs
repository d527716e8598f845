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

//! Capability gating over lattices.
//!
//! ACL columns live beside the router metadata and manifest rows; they are
//! a non-attested overlay (changing them never re-roots the database). A
//! row is visible to a caller iff
//!
//! ```text
//! acl_public ∨ "public" ∈ acl_tenants ∨
//!     (tenant ∈ acl_tenants ∧ roles ∩ acl_roles ≠ ∅)
//! ```
//!
//! with missing columns defaulting to allow. In strict-claims mode an
//! operation with no claims at all fails with `ACLDenyMissingClaims`
//! instead of filtering.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Caller identity presented to route/compose.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AclClaims {
    pub tenant: Option<String>,
    pub roles: BTreeSet<String>,
}

impl AclClaims {
    pub fn tenant(tenant: impl Into<String>) -> Self {
        Self {
            tenant: Some(tenant.into()),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Receipt-facing rendering of the bindings a query ran under.
    pub fn as_filters(&self) -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        if let Some(t) = &self.tenant {
            m.insert("tenant".to_string(), t.clone());
        }
        if !self.roles.is_empty() {
            let joined: Vec<&str> = self.roles.iter().map(String::as_str).collect();
            m.insert("roles".to_string(), joined.join(","));
        }
        m
    }
}

/// Optional ACL columns attached to a lattice's router/manifest rows.
/// All-absent means unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AclBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl_tenants: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl_roles: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl_public: Option<bool>,
}

impl AclBinding {
    pub fn public() -> Self {
        Self {
            acl_public: Some(true),
            ..Default::default()
        }
    }

    pub fn tenants<I, S>(tenants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            acl_tenants: Some(tenants.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn with_role_set<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acl_roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_unrestricted(&self) -> bool {
        self.acl_tenants.is_none() && self.acl_roles.is_none() && self.acl_public.is_none()
    }

    /// Visibility rule; see the module docs.
    pub fn allows(&self, claims: &AclClaims) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        if self.acl_public == Some(true) {
            return true;
        }
        if let Some(tenants) = &self.acl_tenants {
            if tenants.contains("public") {
                return true;
            }
        }
        let tenant_ok = match (&self.acl_tenants, &claims.tenant) {
            (None, _) => true,
            (Some(tenants), Some(t)) => tenants.contains(t),
            (Some(_), None) => false,
        };
        let roles_ok = match &self.acl_roles {
            None => true,
            Some(required) => claims.roles.iter().any(|r| required.contains(r)),
        };
        tenant_ok && roles_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_columns_allow_everyone() {
        let binding = AclBinding::default();
        assert!(binding.allows(&AclClaims::default()));
        assert!(binding.allows(&AclClaims::tenant("acme")));
    }

    #[test]
    fn public_flag_overrides_everything() {
        let binding = AclBinding {
            acl_tenants: Some(["acme".to_string()].into()),
            acl_public: Some(true),
            ..Default::default()
        };
        assert!(binding.allows(&AclClaims::tenant("other")));
        assert!(binding.allows(&AclClaims::default()));
    }

    #[test]
    fn public_tenant_sentinel_allows() {
        let binding = AclBinding::tenants(["public", "acme"]);
        assert!(binding.allows(&AclClaims::tenant("someone-else")));
    }

    #[test]
    fn tenant_gating() {
        let binding = AclBinding::tenants(["acme"]);
        assert!(binding.allows(&AclClaims::tenant("acme")));
        assert!(!binding.allows(&AclClaims::tenant("other")));
        assert!(!binding.allows(&AclClaims::default()));
    }

    #[test]
    fn role_intersection_required_when_present() {
        let binding = AclBinding::tenants(["acme"]).with_role_set(["analyst", "admin"]);
        assert!(binding.allows(&AclClaims::tenant("acme").with_roles(["analyst"])));
        assert!(!binding.allows(&AclClaims::tenant("acme").with_roles(["intern"])));
        assert!(!binding.allows(&AclClaims::tenant("acme")));
    }

    #[test]
    fn filters_render_for_receipts() {
        let claims = AclClaims::tenant("acme").with_roles(["b", "a"]);
        let f = claims.as_filters();
        assert_eq!(f["tenant"], "acme");
        assert_eq!(f["roles"], "a,b");
    }
}
