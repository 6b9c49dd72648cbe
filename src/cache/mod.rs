// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The directory cache (§4.2): a per-process structure, one record per
//! server (servers compared by [`Site::is_same_content`]), with TTL-aged,
//! LRU-evicted listings. The path cache is the teacher's
//! [`crate::collections::hashttlcache::HashTtlCache`] reused verbatim —
//! it already is exactly "map with a default TTL, evicted lazily on
//! lookup", which is everything a `(server, parent, subdir) -> canonical
//! path` memoization needs.

pub mod directory;

use crate::collections::hashttlcache::HashTtlCache;
use crate::path::ServerPath;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathCacheKey {
    pub server_label: String,
    pub parent: ServerPath,
    pub subdir: Box<str>,
}

/// `(server, parent_path, subdir_name) -> canonical_path`.
pub struct PathCache {
    inner: HashTtlCache<PathCacheKey, ServerPath>,
}

impl PathCache {
    pub fn new(now: Instant, ttl: Duration) -> Self {
        PathCache {
            inner: HashTtlCache::new(now, Some(ttl)),
        }
    }

    pub fn store(&mut self, key: PathCacheKey, resolved: ServerPath) {
        self.inner.insert(key, resolved);
    }

    pub fn lookup(&self, key: &PathCacheKey) -> Option<&ServerPath> {
        self.inner.get(key)
    }

    /// Invalidated in lock-step with the directory cache: called whenever
    /// `DirectoryCache` invalidates anything under `server_label`/`parent`.
    pub fn invalidate_server(&mut self, server_label: &str) {
        self.inner.retain(|k, _| k.server_label != server_label);
    }

    pub fn advance_clock(&mut self, now: Instant) {
        self.inner.advance_clock(now);
    }
}

pub use directory::{DirectoryCache, LookupFlags, LookupResult};
