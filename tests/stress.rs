//! Concurrency tests for the shared registries
//!
//! Control-plane writers and data-plane readers hit the realm registry and the
//! correlation table from many tasks at once.

use realmgate::auth::{RealmRegistry, MAX_REALMS};
use realmgate::proxy::{Correlation, CorrelationTable};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolve_is_stable() {
    let realms = Arc::new(RealmRegistry::new());

    let mut handles = vec![];
    for _ in 0..64 {
        let realms = realms.clone();
        handles.push(tokio::spawn(async move {
            realms.resolve("svcA", Some("idp1"), None, &["read", "write"])
        }));
    }

    let mut tokens = HashSet::new();
    for handle in handles {
        tokens.insert(handle.await.unwrap());
    }

    assert_eq!(tokens.len(), 1);
    assert_eq!(realms.variant_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_realm_budget_under_contention() {
    let realms = Arc::new(RealmRegistry::new());

    let mut handles = vec![];
    for i in 0..(MAX_REALMS * 2) {
        let realms = realms.clone();
        handles.push(tokio::spawn(async move {
            realms.resolve_realm(&format!("realm-{i}"))
        }));
    }

    let mut granted = HashSet::new();
    for handle in handles {
        let token = handle.await.unwrap();
        if !token.is_none() {
            assert!(granted.insert(token.realm_bits()), "realm bit handed out twice");
        }
    }

    assert_eq!(granted.len(), MAX_REALMS);
    assert_eq!(realms.realm_count(), MAX_REALMS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lookup_never_sees_partial_variant() {
    let realms = Arc::new(RealmRegistry::new());
    let realm_only = realms.resolve_realm("svcA");
    let scopes: Vec<String> = (0..32).map(|i| format!("scope-{i}")).collect();

    let reader = {
        let realms = realms.clone();
        let scopes = scopes.clone();
        tokio::spawn(async move {
            let mut seen = HashSet::new();
            for _ in 0..2_000 {
                seen.insert(realms.lookup::<&str, String>("svcA", None, &[], &scopes));
                tokio::task::yield_now().await;
            }
            seen
        })
    };

    let writer = {
        let realms = realms.clone();
        let scopes = scopes.clone();
        tokio::spawn(async move { realms.resolve("svcA", None, None, &scopes) })
    };

    let full = writer.await.unwrap();
    assert_eq!(full.scope_bits().bits().count_ones(), 32);

    for token in reader.await.unwrap() {
        assert!(token == realm_only || token == full, "observed partial token {token}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resolve_unresolve_churn() {
    let realms = Arc::new(RealmRegistry::new());

    let mut handles = vec![];
    for worker in 0..8 {
        let realms = realms.clone();
        handles.push(tokio::spawn(async move {
            for round in 0..200 {
                let name = format!("worker-{worker}-{}", round % 2);
                let token = realms.resolve(&name, None, None, &["read"]);
                if token.is_none() {
                    continue;
                }
                assert!(token.is_well_formed());
                assert!(realms.unresolve(token));
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(realms.realm_count(), 0);
    assert_eq!(realms.variant_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_correlation_claimed_exactly_once() {
    let table = Arc::new(CorrelationTable::new());
    let ids: Vec<u64> = (0..500).map(|_| table.next_id()).collect();

    for (i, id) in ids.iter().enumerate() {
        table.insert(
            *id,
            Correlation {
                accept_name: "client".to_string(),
                accept_correlation_id: i as u64,
                accept_stream_id: i as u64,
                connect_stream_id: i as u64 + 1,
            },
        );
    }

    let claimed = Arc::new(AtomicUsize::new(0));
    let ids = Arc::new(ids);

    // Every id is raced by several duplicate replies
    let mut handles = vec![];
    for _ in 0..8 {
        let table = table.clone();
        let claimed = claimed.clone();
        let ids = ids.clone();
        handles.push(tokio::spawn(async move {
            for id in ids.iter() {
                if table.claim(*id).is_some() {
                    claimed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(claimed.load(Ordering::Relaxed), 500);
    assert!(table.is_empty());
}

#[test]
fn test_correlation_ids_unique_across_threads() {
    let table = Arc::new(CorrelationTable::new());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let table = table.clone();
            std::thread::spawn(move || (0..1_000).map(|_| table.next_id()).collect::<Vec<_>>())
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert_ne!(id, 0);
            assert!(seen.insert(id));
        }
    }

    assert_eq!(seen.len(), 4_000);
}
