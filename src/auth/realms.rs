//! Realm and scope bit allocation
//!
//! Every realm owns one or more claim-variants, each constrained by an
//! optional issuer and audience. A claim-variant holds one realm bit and its
//! own scope-name to scope-bit map; scope bits are drawn from a cursor shared
//! by all variants of the realm.
//!
//! Reads work on an immutable snapshot that writers replace wholesale, so a
//! lookup never sees a half-built variant and never waits on a resolve.

use crate::auth::credentials::Claims;
use crate::auth::token::{AuthorizationToken, MAX_REALMS, MAX_SCOPES};
use arc_swap::{ArcSwap, Guard};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct ClaimVariant {
    realm_bit: AuthorizationToken,
    issuer: Option<String>,
    audience: Option<String>,
    scopes: HashMap<String, AuthorizationToken>,
}

impl ClaimVariant {
    fn new(realm_bit: AuthorizationToken, issuer: Option<&str>, audience: Option<&str>) -> Self {
        Self {
            realm_bit,
            issuer: issuer.map(str::to_string),
            audience: audience.map(str::to_string),
            scopes: HashMap::new(),
        }
    }

    fn accepts_issuer(&self, issuer: Option<&str>) -> bool {
        self.issuer.is_none() || self.issuer.as_deref() == issuer
    }

    /// Constraint match used when resolving from the control plane
    fn accepts(&self, issuer: Option<&str>, audience: Option<&str>) -> bool {
        self.accepts_issuer(issuer) && (self.audience.is_none() || self.audience.as_deref() == audience)
    }

    /// Constraint match used on the data path, where a credential may name several audiences
    fn accepts_any<A: AsRef<str>>(&self, issuer: Option<&str>, audiences: &[A]) -> bool {
        self.accepts_issuer(issuer)
            && match &self.audience {
                None => true,
                Some(required) => audiences.iter().any(|a| a.as_ref() == required),
            }
    }

    fn scope_bit(&self, name: &str) -> AuthorizationToken {
        self.scopes.get(name).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
struct Realm {
    variants: Vec<ClaimVariant>,
    next_scope_bit: usize,
}

#[derive(Debug, Clone, Default)]
struct Realms {
    by_name: HashMap<String, Realm>,
    /// Realm bits currently held by live claim-variants
    used_realm_bits: AuthorizationToken,
}

impl Realms {
    fn free_realm_bit(&self) -> Option<AuthorizationToken> {
        (0..MAX_REALMS)
            .map(AuthorizationToken::realm)
            .find(|bit| (self.used_realm_bits & *bit).is_none())
    }

    fn resolve<S: AsRef<str>>(
        &mut self,
        realm_name: &str,
        issuer: Option<&str>,
        audience: Option<&str>,
        scope_names: &[S],
    ) -> AuthorizationToken {
        // Every resolve is gated on a free realm bit, even one that reuses a variant
        let Some(realm_bit) = self.free_realm_bit() else {
            warn!(realm = realm_name, "Realm bit budget exhausted");
            return AuthorizationToken::NONE;
        };

        let existing = self
            .by_name
            .get(realm_name)
            .and_then(|realm| realm.variants.iter().position(|v| v.accepts(issuer, audience)));

        let realm = self.by_name.entry(realm_name.to_string()).or_default();

        let index = match existing {
            Some(index) => index,
            None => {
                debug!(
                    realm = realm_name,
                    issuer = ?issuer,
                    audience = ?audience,
                    realm_bit = %realm_bit,
                    "Allocated claim-variant"
                );
                realm.variants.push(ClaimVariant::new(realm_bit, issuer, audience));
                self.used_realm_bits |= realm_bit;
                realm.variants.len() - 1
            }
        };

        let mut fresh: Vec<&str> = Vec::new();
        for name in scope_names {
            let name = name.as_ref();
            if !realm.variants[index].scopes.contains_key(name) && !fresh.contains(&name) {
                fresh.push(name);
            }
        }

        if realm.next_scope_bit + fresh.len() > MAX_SCOPES {
            warn!(
                realm = realm_name,
                allocated = realm.next_scope_bit,
                requested = fresh.len(),
                "Scope bit budget exhausted"
            );
            return AuthorizationToken::NONE;
        }

        for name in fresh {
            let bit = AuthorizationToken::scope(realm.next_scope_bit);
            realm.next_scope_bit += 1;
            debug!(realm = realm_name, scope = name, scope_bit = %bit, "Allocated scope");
            realm.variants[index].scopes.insert(name.to_string(), bit);
        }

        let variant = &realm.variants[index];
        scope_names
            .iter()
            .fold(variant.realm_bit, |token, name| token | variant.scope_bit(name.as_ref()))
    }

    fn lookup<A: AsRef<str>, S: AsRef<str>>(
        &self,
        realm_name: &str,
        issuer: Option<&str>,
        audiences: &[A],
        scope_names: &[S],
    ) -> AuthorizationToken {
        let Some(variant) = self
            .by_name
            .get(realm_name)
            .and_then(|realm| realm.variants.iter().find(|v| v.accepts_any(issuer, audiences)))
        else {
            return AuthorizationToken::NONE;
        };

        scope_names
            .iter()
            .fold(variant.realm_bit, |token, name| token | variant.scope_bit(name.as_ref()))
    }

    fn unresolve(&mut self, realm_bit: AuthorizationToken) -> bool {
        let mut removed = false;

        for (name, realm) in self.by_name.iter_mut() {
            let before = realm.variants.len();
            realm.variants.retain(|v| v.realm_bit != realm_bit);
            if realm.variants.len() != before {
                info!(realm = %name, realm_bit = %realm_bit, "Released claim-variant");
                removed = true;
                break;
            }
        }

        if removed {
            self.used_realm_bits = AuthorizationToken::from_bits(self.used_realm_bits.bits() & !realm_bit.bits());
            self.by_name.retain(|name, realm| {
                if realm.variants.is_empty() {
                    info!(realm = %name, "Dropped empty realm");
                    false
                } else {
                    true
                }
            });
        }

        removed
    }
}

/// Shared registry of realms, claim-variants and scopes
#[derive(Debug, Default)]
pub struct RealmRegistry {
    snapshot: ArcSwap<Realms>,
    /// Serializes writers; readers never take it
    writer: Mutex<()>,
}

impl RealmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Guard<Arc<Realms>> {
        self.snapshot.load()
    }

    /// Apply a mutation to a private copy and publish it when `publish` approves the result
    fn update<T>(&self, mutate: impl FnOnce(&mut Realms) -> T, publish: impl FnOnce(&T) -> bool) -> T {
        let _writer = self.writer.lock();
        let mut next = Realms::clone(&self.snapshot());
        let result = mutate(&mut next);
        if publish(&result) {
            self.snapshot.store(Arc::new(next));
        }
        result
    }

    /// Find or create the realm and matching claim-variant, granting `scope_names`.
    ///
    /// Returns [`AuthorizationToken::NONE`] when either bit budget would be
    /// exceeded; nothing is granted in that case.
    pub fn resolve<S: AsRef<str>>(
        &self,
        realm_name: &str,
        issuer: Option<&str>,
        audience: Option<&str>,
        scope_names: &[S],
    ) -> AuthorizationToken {
        self.update(
            |realms| realms.resolve(realm_name, issuer, audience, scope_names),
            |token| !token.is_none(),
        )
    }

    /// Resolve a realm with no claim constraints and no scopes
    pub fn resolve_realm(&self, realm_name: &str) -> AuthorizationToken {
        self.resolve::<&str>(realm_name, None, None, &[])
    }

    /// Read-only authorization for an already verified credential.
    ///
    /// Never allocates; unknown scope names contribute no bits.
    pub fn lookup<A: AsRef<str>, S: AsRef<str>>(
        &self,
        realm_name: &str,
        issuer: Option<&str>,
        audiences: &[A],
        scope_names: &[S],
    ) -> AuthorizationToken {
        self.snapshot().lookup(realm_name, issuer, audiences, scope_names)
    }

    /// [`lookup`](Self::lookup) keyed by the credential's key identifier
    pub fn lookup_claims(&self, claims: &Claims) -> AuthorizationToken {
        let scopes = claims.scopes();
        self.lookup(
            &claims.key_id,
            claims.issuer.as_deref(),
            claims.audience.as_slice(),
            scopes.as_slice(),
        )
    }

    /// Release the claim-variant owning the token's realm bit.
    ///
    /// Scope bits carried by the token are ignored; releasing the variant
    /// discards every scope granted under it.
    pub fn unresolve(&self, authorization: AuthorizationToken) -> bool {
        let realm_bit = authorization.realm_bits();
        if realm_bit.realm_count() != 1 {
            debug!(authorization = %authorization, "Unresolve without a single realm bit");
            return false;
        }

        self.update(|realms| realms.unresolve(realm_bit), |removed| *removed)
    }

    pub fn contains_realm(&self, realm_name: &str) -> bool {
        self.snapshot().by_name.contains_key(realm_name)
    }

    pub fn realm_count(&self) -> usize {
        self.snapshot().by_name.len()
    }

    /// Number of live claim-variants across all realms
    pub fn variant_count(&self) -> usize {
        self.snapshot().by_name.values().map(|r| r.variants.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_SCOPES: &[&str] = &[];
    const NO_AUDIENCES: &[&str] = &[];

    #[test]
    fn test_resolve_is_stable() {
        let registry = RealmRegistry::new();

        let first = registry.resolve("tenantA", Some("idp"), Some("api"), NO_SCOPES);
        let second = registry.resolve("tenantA", Some("idp"), Some("api"), NO_SCOPES);

        assert!(!first.is_none());
        assert_eq!(first.realm_bits(), second.realm_bits());
        assert_eq!(registry.variant_count(), 1);
    }

    #[test]
    fn test_scopes_accumulate() {
        let registry = RealmRegistry::new();

        let first = registry.resolve("tenantA", None, None, &["read"]);
        let second = registry.resolve("tenantA", None, None, &["read", "write"]);

        let read_bit = first.scope_bits();
        let write_bit = second.scope_bits().bits() & !read_bit.bits();

        assert_ne!(write_bit, 0);
        assert_ne!(write_bit, read_bit.bits());
        assert_eq!(second, first | AuthorizationToken::from_bits(write_bit));

        let write_only = registry.resolve("tenantA", None, None, &["write"]);
        assert_eq!(write_only, first.realm_bits() | AuthorizationToken::from_bits(write_bit));
    }

    #[test]
    fn test_distinct_claims_get_distinct_realm_bits() {
        let registry = RealmRegistry::new();

        let a = registry.resolve("svc", Some("idp1"), None, NO_SCOPES);
        let b = registry.resolve("svc", Some("idp2"), None, NO_SCOPES);
        let c = registry.resolve("other", None, None, NO_SCOPES);

        assert_ne!(a.realm_bits(), b.realm_bits());
        assert_ne!(a.realm_bits(), c.realm_bits());
        assert_eq!(registry.realm_count(), 2);
        assert_eq!(registry.variant_count(), 3);
    }

    #[test]
    fn test_wildcard_variant_matches_any_issuer() {
        let registry = RealmRegistry::new();

        let open = registry.resolve("svc", None, None, NO_SCOPES);
        let constrained = registry.resolve("svc", Some("idp1"), Some("aud"), NO_SCOPES);

        assert_eq!(open, constrained);
        assert_eq!(registry.variant_count(), 1);
    }

    #[test]
    fn test_realm_budget_exhaustion() {
        let registry = RealmRegistry::new();

        for i in 0..MAX_REALMS {
            assert!(!registry.resolve_realm(&format!("realm-{i}")).is_none());
        }

        assert!(registry.resolve_realm("one-too-many").is_none());
        assert!(!registry.contains_realm("one-too-many"));

        // Existing variants fail closed too, and gain no scopes
        assert!(registry.resolve("realm-0", None, None, &["newscope"]).is_none());
        assert!(registry
            .lookup("realm-0", None, NO_AUDIENCES, &["newscope"])
            .scope_bits()
            .is_none());

        // Lookups are unaffected by the exhausted budget
        assert!(!registry.lookup("realm-0", None, NO_AUDIENCES, NO_SCOPES).is_none());
    }

    #[test]
    fn test_released_realm_bits_are_reused() {
        let registry = RealmRegistry::new();

        let tokens: Vec<_> = (0..MAX_REALMS)
            .map(|i| registry.resolve_realm(&format!("realm-{i}")))
            .collect();

        assert!(registry.unresolve(tokens[4]));
        let reused = registry.resolve_realm("newcomer");
        assert_eq!(reused.realm_bits(), tokens[4].realm_bits());
    }

    #[test]
    fn test_scope_budget_is_all_or_nothing() {
        let registry = RealmRegistry::new();

        let names: Vec<String> = (0..MAX_SCOPES - 1).map(|i| format!("scope-{i}")).collect();
        let token = registry.resolve("big", None, None, &names);
        assert_eq!(token.scope_bits().bits().count_ones() as usize, MAX_SCOPES - 1);

        let denied = registry.resolve("big", None, None, &["x", "y"]);
        assert!(denied.is_none());
        assert_eq!(registry.lookup("big", None, NO_AUDIENCES, &["x"]), token.realm_bits());

        let granted = registry.resolve("big", None, None, &["x"]);
        assert_eq!(granted.scope_bits().bits().count_ones(), 1);
    }

    #[test]
    fn test_duplicate_scope_names_count_once() {
        let registry = RealmRegistry::new();

        let names: Vec<String> = (0..MAX_SCOPES - 1).map(|i| format!("scope-{i}")).collect();
        registry.resolve("big", None, None, &names);

        let token = registry.resolve("big", None, None, &["last", "last", "scope-0"]);
        assert!(!token.is_none());
    }

    #[test]
    fn test_lookup_never_creates() {
        let registry = RealmRegistry::new();

        assert!(registry.lookup("ghost", None, NO_AUDIENCES, &["read"]).is_none());
        assert_eq!(registry.realm_count(), 0);

        let token = registry.resolve("tenantA", None, None, &["read"]);
        let looked_up = registry.lookup("tenantA", None, NO_AUDIENCES, &["read", "unknown"]);
        assert_eq!(looked_up, token);
    }

    #[test]
    fn test_lookup_respects_claims() {
        let registry = RealmRegistry::new();

        let token = registry.resolve("svcA", Some("idp1"), Some("orders"), &["invoke"]);

        assert_eq!(registry.lookup("svcA", Some("idp1"), &["billing", "orders"], &["invoke"]), token);
        assert!(registry.lookup("svcA", Some("idp2"), &["orders"], &["invoke"]).is_none());
        assert!(registry.lookup("svcA", Some("idp1"), &["billing"], &["invoke"]).is_none());
        assert!(registry.lookup("svcA", None, NO_AUDIENCES, NO_SCOPES).is_none());
    }

    #[test]
    fn test_unresolve_unknown_token_mutates_nothing() {
        let registry = RealmRegistry::new();
        registry.resolve("tenantA", None, None, &["read"]);

        assert!(!registry.unresolve(AuthorizationToken::NONE));
        assert!(!registry.unresolve(AuthorizationToken::realm(9)));
        assert!(!registry.unresolve(AuthorizationToken::scope(0)));
        assert!(!registry.unresolve(AuthorizationToken::realm(0) | AuthorizationToken::realm(1)));

        assert_eq!(registry.variant_count(), 1);
    }

    #[test]
    fn test_unresolve_with_scope_bits_releases_variant() {
        let registry = RealmRegistry::new();

        let token = registry.resolve("tenantA", None, None, &["read", "write"]);
        assert!(registry.unresolve(token));

        assert!(!registry.contains_realm("tenantA"));
        assert!(registry.lookup("tenantA", None, NO_AUDIENCES, &["read"]).is_none());
        assert!(!registry.unresolve(token));
    }

    #[test]
    fn test_unresolve_keeps_sibling_variants() {
        let registry = RealmRegistry::new();

        let a = registry.resolve("svc", Some("idp1"), None, NO_SCOPES);
        let b = registry.resolve("svc", Some("idp2"), None, NO_SCOPES);

        assert!(registry.unresolve(a));
        assert!(registry.contains_realm("svc"));
        assert_eq!(registry.lookup("svc", Some("idp2"), NO_AUDIENCES, NO_SCOPES), b);
        assert!(registry.lookup("svc", Some("idp1"), NO_AUDIENCES, NO_SCOPES).is_none());
    }

    #[test]
    fn test_lookup_proceeds_while_writer_holds_lock() {
        let registry = RealmRegistry::new();
        let token = registry.resolve("tenantA", None, None, &["read"]);

        let _writer = registry.writer.lock();
        assert_eq!(registry.lookup("tenantA", None, NO_AUDIENCES, &["read"]), token);
        assert!(registry.contains_realm("tenantA"));
    }
}
