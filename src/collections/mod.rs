// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Generic collection helpers shared by the caches (§4.2). Kept separate
//! from the cache module itself so `HashTtlCache` stays a general-purpose
//! "map with a default TTL, evicted lazily on lookup" type rather than
//! knowing anything about servers or listings.

pub mod hashttlcache;

pub use hashttlcache::HashTtlCache;
