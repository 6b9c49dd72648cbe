// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use super::HashTtlCache;
use std::time::{Duration, Instant};

#[test]
fn insert_then_get_returns_value() {
    let now = Instant::now();
    let mut cache = HashTtlCache::new(now, Some(Duration::from_secs(30)));
    cache.insert("a", 1);
    assert_eq!(cache.get(&"a"), Some(&1));
}

#[test]
fn entry_expires_after_ttl() {
    let now = Instant::now();
    let mut cache = HashTtlCache::new(now, Some(Duration::from_secs(10)));
    cache.insert("a", 1);
    cache.advance_clock(now + Duration::from_secs(11));
    assert_eq!(cache.get(&"a"), None);
}

#[test]
fn retain_drops_non_matching_keys() {
    let now = Instant::now();
    let mut cache = HashTtlCache::new(now, None);
    cache.insert("keep", 1);
    cache.insert("drop", 2);
    cache.retain(|k, _| *k == "keep");
    assert_eq!(cache.get(&"keep"), Some(&1));
    assert_eq!(cache.get(&"drop"), None);
}

#[test]
fn refreshed_entry_survives_stale_tombstone() {
    let now = Instant::now();
    let mut cache = HashTtlCache::new(now, Some(Duration::from_secs(10)));
    cache.insert("a", 1);
    // Re-insert with a longer TTL before the first tombstone is due.
    cache.advance_clock(now + Duration::from_secs(5));
    cache.insert_with_ttl("a", 2, Some(Duration::from_secs(100)));
    cache.advance_clock(now + Duration::from_secs(11));
    assert_eq!(cache.get(&"a"), Some(&2));
}

#[test]
fn remove_drops_entry_immediately() {
    let now = Instant::now();
    let mut cache = HashTtlCache::new(now, None);
    cache.insert("a", 1);
    assert_eq!(cache.remove(&"a"), Some(1));
    assert_eq!(cache.get(&"a"), None);
}
