use std::thread::sleep;
use std::time::Duration;

use bifrost::cache::{MAX_TTL_SECS, ResponseCache};
use bifrost::dns::{QCLASS_IN, QTYPE_A, QuestionKey};
use bytes::Bytes;

fn key(name: &str) -> QuestionKey {
    QuestionKey::new(name.to_string(), QTYPE_A, QCLASS_IN)
}

#[test]
fn insert_then_lookup_returns_latest_bytes() {
    let cache = ResponseCache::new(true);
    cache.insert(key("example.com"), Bytes::from_static(b"first"), 300);
    let (bytes, remaining) = cache.lookup(&key("example.com")).expect("hit");
    assert_eq!(bytes.as_ref(), b"first");
    assert!((1..=300).contains(&remaining));

    cache.insert(key("example.com"), Bytes::from_static(b"second"), 300);
    let (bytes, _) = cache.lookup(&key("example.com")).expect("hit");
    assert_eq!(bytes.as_ref(), b"second");
    assert_eq!(cache.size(), 1);
}

#[test]
fn zero_ttl_is_clamped_to_one_second() {
    let cache = ResponseCache::new(true);
    cache.insert(key("short.example"), Bytes::from_static(b"x"), 0);
    let (_, remaining) = cache.lookup(&key("short.example")).expect("hit");
    assert_eq!(remaining, 1);

    sleep(Duration::from_millis(1200));
    assert!(cache.lookup(&key("short.example")).is_none());
}

#[test]
fn oversized_ttl_is_clamped_to_one_hour() {
    let cache = ResponseCache::new(true);
    cache.insert(key("long.example"), Bytes::from_static(b"x"), 7200);
    let (_, remaining) = cache.lookup(&key("long.example")).expect("hit");
    assert!(remaining <= MAX_TTL_SECS);
    assert!(remaining >= MAX_TTL_SECS - 1);
}

#[test]
fn disabled_cache_misses_and_ignores_inserts() {
    let cache = ResponseCache::new(false);
    cache.insert(key("example.com"), Bytes::from_static(b"x"), 300);
    assert!(cache.lookup(&key("example.com")).is_none());
    assert_eq!(cache.size(), 0);
    assert_eq!(cache.prune(), 0);
}

#[test]
fn prune_removes_only_expired_entries() {
    let cache = ResponseCache::new(true);
    cache.insert(key("gone.example"), Bytes::from_static(b"x"), 1);
    cache.insert(key("kept.example"), Bytes::from_static(b"y"), 300);
    assert_eq!(cache.size(), 2);

    sleep(Duration::from_millis(1100));
    assert_eq!(cache.prune(), 1);
    assert_eq!(cache.size(), 1);
    assert!(cache.lookup(&key("kept.example")).is_some());
}

#[test]
fn expired_entries_are_never_served() {
    let cache = ResponseCache::new(true);
    cache.insert(key("stale.example"), Bytes::from_static(b"x"), 1);
    sleep(Duration::from_millis(1100));
    assert!(cache.lookup(&key("stale.example")).is_none());
}

#[test]
fn stats_track_hits_and_misses() {
    let cache = ResponseCache::new(true);
    cache.insert(key("example.com"), Bytes::from_static(b"x"), 300);
    assert!(cache.lookup(&key("example.com")).is_some());
    assert!(cache.lookup(&key("other.example")).is_none());

    assert_eq!(cache.stats().hits(), 1);
    assert_eq!(cache.stats().misses(), 1);
    assert!((cache.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
}

#[test]
fn keys_with_different_types_do_not_collide() {
    let cache = ResponseCache::new(true);
    let a = QuestionKey::new("example.com".to_string(), QTYPE_A, QCLASS_IN);
    let aaaa = QuestionKey::new("example.com".to_string(), 28, QCLASS_IN);
    cache.insert(a.clone(), Bytes::from_static(b"v4"), 300);
    assert!(cache.lookup(&aaaa).is_none());
    let (bytes, _) = cache.lookup(&a).expect("hit");
    assert_eq!(bytes.as_ref(), b"v4");
}
