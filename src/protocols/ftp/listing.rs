// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The list operation's cache/lock interaction (§4.6, scenario 5): change
//! directory, acquire a `list` oplock, check the cache, and only hit the
//! network on a miss or an outdated/refresh-forced entry. Kept separate
//! from the wire command choice (`MLSD` vs `LIST -a` vs `LIST`) so the
//! cache-contention behaviour can be tested without a transport.

use crate::cache::DirectoryCache;
use crate::entry::DirectoryListing;
use crate::oplock::{LockToken, OperationLockManager, Scope};
use crate::path::ServerPath;
use crate::site::Site;
use std::time::Instant;

/// Which wire command the listing should use, in the original's
/// preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingCommand {
    Mlsd,
    ListShowHidden,
    List,
}

pub fn choose_listing_command(mlsd_supported: bool, view_hidden: bool, list_a_supported: bool) -> ListingCommand {
    if mlsd_supported {
        ListingCommand::Mlsd
    } else if view_hidden && list_a_supported {
        ListingCommand::ListShowHidden
    } else {
        ListingCommand::List
    }
}

/// A server that answers a 5xx "no files found" to `LIST` on an empty
/// directory is tolerated as an empty listing rather than an error.
pub fn is_tolerated_empty_listing(reply_code: u16, reply_text: &str) -> bool {
    reply_code / 100 == 5 && {
        let lower = reply_text.to_ascii_lowercase();
        lower.contains("no files found") || lower.contains("no such file")
    }
}

pub enum ListDecision {
    /// Return this cached listing without touching the network.
    UseCache(DirectoryListing),
    /// Proceed to fetch; lock is already held.
    FetchWithLock(LockToken),
    /// The lock is held elsewhere; caller registers for `lock_obtained`
    /// and re-evaluates (re-checking the cache, per scenario 5) once
    /// called back.
    WaitForLock(LockToken),
}

/// Drives the cache-then-lock decision. `force_refresh` models the
/// `Refresh` command flag (§6); `time_before_locking` is the snapshot
/// the caller took before attempting to acquire the lock, used so a
/// waiter that wakes up after another engine's fetch can trust a cache
/// entry whose `first_list_time` is at least that recent.
pub fn decide(
    cache: &mut DirectoryCache,
    locks: &mut OperationLockManager,
    site: &Site,
    path: &ServerPath,
    force_refresh: bool,
    time_before_locking: Instant,
    now: Instant,
    on_obtained: Option<Box<dyn FnOnce(LockToken)>>,
) -> ListDecision {
    if !force_refresh {
        if let Some((listing, outdated)) = cache.lookup(site, path, true, now) {
            if !outdated && listing.first_list_time >= time_before_locking {
                return ListDecision::UseCache(listing);
            }
        }
    }
    let (token, acquired) = locks.acquire(
        site.clone(),
        path.clone(),
        crate::oplock::LockReason::List,
        Scope::ExactPath,
        true,
        on_obtained,
    );
    if acquired {
        ListDecision::FetchWithLock(token)
    } else {
        ListDecision::WaitForLock(token)
    }
}

/// Re-evaluation performed by a waiter once its lock is granted
/// (scenario 5): if another engine's fetch already produced a listing at
/// least as new as `time_before_locking`, reuse it instead of re-fetching.
pub fn reevaluate_after_wait(
    cache: &mut DirectoryCache,
    site: &Site,
    path: &ServerPath,
    time_before_locking: Instant,
    now: Instant,
) -> Option<DirectoryListing> {
    let (listing, outdated) = cache.lookup(site, path, true, now)?;
    if !outdated && listing.first_list_time >= time_before_locking {
        Some(listing)
    } else {
        None
    }
}
