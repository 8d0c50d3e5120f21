//! Namespace registry behaviour shared across threads.

use std::sync::Arc;
use std::thread;

use tether::Budget;
use tether::Error;
use tether::NamespaceRegistry;
use tether::WireValue;
use tether::namespace::CreateMode;

// --- Test 1: Idempotent Creation ---

#[test]
fn test_create_if_absent_twice() {
    let registry = NamespaceRegistry::new(Budget::default());
    let first = registry.create(Some("scopeA"), CreateMode::IfAbsent).unwrap();
    registry.get("scopeA").unwrap().exec("var seen = 1;", None, &[]).unwrap();
    let second = registry.create(Some("scopeA"), CreateMode::IfAbsent).unwrap();

    assert_eq!(first.key, second.key);
    assert_eq!(registry.get("scopeA").unwrap().get_var("seen").unwrap(), WireValue::from(1));
}

// --- Test 2: Destroyed Namespaces Are Gone ---

#[test]
fn test_exec_after_destroy() {
    let registry = NamespaceRegistry::new(Budget::default());
    registry.create(Some("scopeA"), CreateMode::IfAbsent).unwrap();
    registry.destroy("scopeA").unwrap();

    let result = registry.get("scopeA").and_then(|ns| ns.exec("1", None, &[]));
    match result {
        Err(Error::NamespaceNotFound(key)) => assert_eq!(key, "scopeA"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(registry.create(Some("scopeA"), CreateMode::IfAbsent).unwrap().is_new);
}

// --- Test 3: Concurrent Creation ---

#[test]
fn test_concurrent_creators_agree() {
    let registry = Arc::new(NamespaceRegistry::new(Budget::default()));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || {
                registry.create(Some("race"), CreateMode::IfAbsent).unwrap().is_new
            })
        })
        .collect();
    let created = handles.into_iter().map(|h| h.join().unwrap()).filter(|is_new| *is_new).count();
    assert_eq!(created, 1);
    assert_eq!(registry.keys(), vec!["race".to_string()]);
}

#[test]
fn test_concurrent_generated_keys() {
    let registry = Arc::new(NamespaceRegistry::new(Budget::default()));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || registry.create(None, CreateMode::IfAbsent).unwrap().key)
        })
        .collect();
    let mut keys: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 8);
    assert_eq!(registry.keys(), keys);
}

// --- Test 4: Shared Namespace Across Threads ---

#[test]
fn test_namespace_shared_between_threads() {
    let registry = Arc::new(NamespaceRegistry::new(Budget::default()));
    registry.init().unwrap();
    registry.get("main").unwrap().exec("var hits = 0;", None, &[]).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || {
                let main = registry.get("main").unwrap();
                for _ in 0..25 {
                    main.exec("hits += 1;", None, &[]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(registry.get("main").unwrap().get_var("hits").unwrap(), WireValue::from(100));
}
