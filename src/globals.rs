// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Process-global shared state (§5): one owning value per process, not a
//! singleton pattern — each guarded by its own `Mutex`, and per the
//! concurrency model's ordering rule, these locks are always taken
//! leaves-first and never nested.

use crate::cache::{DirectoryCache, PathCache};
use crate::failed_login::FailedLoginList;
use crate::oplock::OperationLockManager;
use crate::ratelimiter::RateLimiter;
use once_cell::sync::Lazy;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub static DIRECTORY_CACHE: Lazy<Mutex<DirectoryCache>> =
    Lazy::new(|| Mutex::new(DirectoryCache::new(Duration::from_secs(60))));

pub static PATH_CACHE: Lazy<Mutex<PathCache>> =
    Lazy::new(|| Mutex::new(PathCache::new(Instant::now(), Duration::from_secs(60))));

pub static OPERATION_LOCKS: Lazy<Mutex<OperationLockManager>> =
    Lazy::new(|| Mutex::new(OperationLockManager::new()));

pub static FAILED_LOGINS: Lazy<Mutex<FailedLoginList>> =
    Lazy::new(|| Mutex::new(FailedLoginList::new()));

pub static RATE_LIMITER: Lazy<Mutex<RateLimiter>> = Lazy::new(|| Mutex::new(RateLimiter::new()));

/// Registry of live engines, for cross-engine invalidation (§4.10). Keyed
/// by an opaque id rather than holding engines directly — a per-engine
/// `crossbeam_channel::Sender<Notification>` is all another engine needs
/// to reach it.
pub static ENGINE_REGISTRY: Lazy<Mutex<crate::engine::EngineRegistry>> =
    Lazy::new(|| Mutex::new(crate::engine::EngineRegistry::new()));
