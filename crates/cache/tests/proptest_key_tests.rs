//! Property-based tests for cache key stability and sensitivity.
//!
//! - Determinism: the same envelope always yields the same key
//! - Sensitivity: changing URL, host, method or argument yields a new key
//! - Order invariance: argument member order does not affect the key

use netkit_cache::{CacheKey, CacheKeyEnvelope};
use proptest::prelude::*;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// =============================================================================
// Strategies
// =============================================================================

fn method_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("GET".to_string()),
        Just("POST".to_string()),
        Just("PUT".to_string()),
        Just("DELETE".to_string()),
    ]
}

fn host_strategy() -> impl Strategy<Value = String> {
    "https://[a-z]{1,10}\\.example\\.com".prop_map(String::from)
}

fn path_strategy() -> impl Strategy<Value = String> {
    "(/[a-z0-9]{1,8}){1,4}".prop_map(String::from)
}

fn argument_strategy() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::vec(("[a-z]{1,6}", any::<i64>()), 0..6)
}

fn to_object(pairs: &[(String, i64)]) -> Value {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert(k.clone(), Value::from(*v));
    }
    Value::Object(map)
}

fn envelope_strategy() -> impl Strategy<Value = CacheKeyEnvelope> {
    (
        method_strategy(),
        host_strategy(),
        path_strategy(),
        prop::option::of(argument_strategy()),
    )
        .prop_map(|(method, host, url, argument)| CacheKeyEnvelope {
            method,
            host,
            url,
            argument: argument.as_deref().map(to_object),
        })
}

fn key(envelope: &CacheKeyEnvelope) -> CacheKey {
    CacheKey::derive(envelope).expect("key derivation should succeed")
}

// =============================================================================
// Determinism
// =============================================================================

proptest! {
    /// Same envelope, same key
    #[test]
    fn cache_key_is_deterministic(envelope in envelope_strategy()) {
        prop_assert_eq!(key(&envelope), key(&envelope.clone()));
    }

    /// Keys are always addressable file names
    #[test]
    fn cache_key_is_valid_hex(envelope in envelope_strategy()) {
        let derived = key(&envelope);
        prop_assert_eq!(derived.as_str().len(), 64);
        prop_assert!(derived
            .as_str()
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
    }

    /// Argument member insertion order does not change the key
    #[test]
    fn argument_order_is_irrelevant(
        base in envelope_strategy(),
        pairs in argument_strategy(),
    ) {
        let unique: BTreeMap<String, i64> = pairs.into_iter().collect();
        let ascending: Vec<_> = unique.clone().into_iter().collect();
        let descending: Vec<_> = unique.into_iter().rev().collect();

        let mut forward = base.clone();
        forward.argument = Some(to_object(&ascending));
        let mut backward = base;
        backward.argument = Some(to_object(&descending));

        prop_assert_eq!(key(&forward), key(&backward));
    }
}

// =============================================================================
// Sensitivity
// =============================================================================

proptest! {
    /// A different path invalidates the entry
    #[test]
    fn different_url_produces_different_key(
        base in envelope_strategy(),
        url in path_strategy(),
    ) {
        prop_assume!(base.url != url);
        let mut modified = base.clone();
        modified.url = url;
        prop_assert_ne!(key(&base), key(&modified));
    }

    /// A different host invalidates the entry
    #[test]
    fn different_host_produces_different_key(
        base in envelope_strategy(),
        host in host_strategy(),
    ) {
        prop_assume!(base.host != host);
        let mut modified = base.clone();
        modified.host = host;
        prop_assert_ne!(key(&base), key(&modified));
    }

    /// A different method invalidates the entry
    #[test]
    fn different_method_produces_different_key(
        base in envelope_strategy(),
        method in method_strategy(),
    ) {
        prop_assume!(base.method != method);
        let mut modified = base.clone();
        modified.method = method;
        prop_assert_ne!(key(&base), key(&modified));
    }

    /// Adding or changing an argument member invalidates the entry
    #[test]
    fn different_argument_produces_different_key(
        base in envelope_strategy(),
        name in "[a-z]{1,6}",
        value in any::<i64>(),
    ) {
        let mut object = match &base.argument {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        prop_assume!(object.get(&name) != Some(&Value::from(value)));
        object.insert(name, Value::from(value));

        let mut modified = base.clone();
        modified.argument = Some(Value::Object(object));
        prop_assert_ne!(key(&base), key(&modified));
    }
}
