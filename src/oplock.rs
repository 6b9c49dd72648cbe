// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Process-global operation lock manager (§4.4): advisory locks on
//! `(server, path, reason)` that serialise concurrent refreshes of the
//! same listing across engines. Notification is a plain callback list —
//! the engine has no async reactor, so a released lock is delivered as a
//! loop event like everything else, not as a future someone awaits.

use crate::path::ServerPath;
use crate::site::Site;
use slab::Slab;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockReason {
    List,
    Transfer,
    Mkdir,
}

struct Entry {
    site: Site,
    path: ServerPath,
    reason: LockReason,
    /// `None` while held; `Some` records the release is pending compaction
    /// (a later entry for the same key is still active).
    released: bool,
    waiters: Vec<Box<dyn FnOnce(LockToken)>>,
}

/// Whether `acquire` treats locks on ancestor/descendant paths as
/// conflicting, in addition to the exact path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    ExactPath,
    Inclusive,
}

#[derive(Default)]
pub struct OperationLockManager {
    entries: Slab<Entry>,
}

impl OperationLockManager {
    pub fn new() -> Self {
        OperationLockManager { entries: Slab::new() }
    }

    fn conflicts(&self, candidate_idx: usize, scope: Scope, case_sensitive: bool) -> bool {
        let candidate = &self.entries[candidate_idx];
        self.entries.iter().any(|(idx, other)| {
            if idx == candidate_idx || other.released {
                return false;
            }
            if !other.site.is_same_content(&candidate.site) || other.reason != candidate.reason {
                return false;
            }
            match scope {
                Scope::ExactPath => other.path == candidate.path,
                Scope::Inclusive => {
                    other.path == candidate.path
                        || other.path.is_parent_of(&candidate.path, case_sensitive, false)
                        || candidate.path.is_parent_of(&other.path, case_sensitive, false)
                },
            }
        })
    }

    /// Creates a new lock request. Returns `(token, acquired)`: if
    /// `acquired` is false the lock is in the `waiting` state and
    /// `on_obtained` will be invoked (once) when it is granted.
    pub fn acquire(
        &mut self,
        site: Site,
        path: ServerPath,
        reason: LockReason,
        scope: Scope,
        case_sensitive: bool,
        on_obtained: Option<Box<dyn FnOnce(LockToken)>>,
    ) -> (LockToken, bool) {
        let idx = self.entries.insert(Entry {
            site,
            path,
            reason,
            released: false,
            waiters: Vec::new(),
        });
        let token = LockToken(idx);
        if self.conflicts(idx, scope, case_sensitive) {
            log::trace!("lock {:?} contended, waiting", token);
            if let Some(cb) = on_obtained {
                self.entries[idx].waiters.push(cb);
            }
            (token, false)
        } else {
            (token, true)
        }
    }

    /// Marks `token` released. Last-in-slab (no later entry sharing its
    /// key) entries compact immediately; earlier ones stay as tombstones
    /// until the chain behind them clears, preserving issue order.
    pub fn release(&mut self, token: LockToken) {
        if !self.entries.contains(token.0) {
            return;
        }
        self.entries[token.0].released = true;
        self.compact();
    }

    fn compact(&mut self) {
        loop {
            let mut progressed = false;
            let released: Vec<usize> = self
                .entries
                .iter()
                .filter(|(_, e)| e.released)
                .map(|(idx, _)| idx)
                .collect();

            for idx in released {
                if !self.entries.contains(idx) {
                    continue;
                }
                // A waiting request never appears before the lock it waits
                // on, so once its blocking entries are gone it is free to
                // become a grant.
                let waiters: Vec<_> = std::mem::take(&mut self.entries[idx].waiters);
                self.entries.remove(idx);
                progressed = progressed || !waiters.is_empty();

                // Promote waiting entries whose conflicts have cleared.
                let candidates: Vec<usize> = self
                    .entries
                    .iter()
                    .filter(|(_, e)| !e.waiters.is_empty() && !e.released)
                    .map(|(i, _)| i)
                    .collect();
                for cand in candidates {
                    if !self.has_any_conflict(cand) {
                        let waiters = std::mem::take(&mut self.entries[cand].waiters);
                        for cb in waiters {
                            cb(LockToken(cand));
                        }
                        progressed = true;
                    }
                }

                for cb in waiters {
                    cb(LockToken(idx));
                }
            }

            if !progressed {
                break;
            }
        }
    }

    fn has_any_conflict(&self, idx: usize) -> bool {
        let candidate = &self.entries[idx];
        self.entries.iter().any(|(other_idx, other)| {
            other_idx != idx
                && !other.released
                && other.site.is_same_content(&candidate.site)
                && other.reason == candidate.reason
                && other.path == candidate.path
        })
    }

    pub fn is_held(&self, token: LockToken) -> bool {
        self.entries.get(token.0).map_or(false, |e| !e.released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathFormat;
    use crate::site::Protocol;

    fn site() -> Site {
        Site::new("host", 21, Protocol::Ftp)
    }

    fn path(s: &str) -> ServerPath {
        ServerPath::root(PathFormat::Unix).change_path(s)
    }

    /// Property P3.
    #[test]
    fn second_lock_on_same_path_waits() {
        let mut mgr = OperationLockManager::new();
        let (t1, g1) = mgr.acquire(site(), path("/a"), LockReason::List, Scope::ExactPath, true, None);
        assert!(g1);
        let (_t2, g2) = mgr.acquire(site(), path("/a"), LockReason::List, Scope::ExactPath, true, None);
        assert!(!g2);
        mgr.release(t1);
    }

    #[test]
    fn different_reasons_do_not_conflict() {
        let mut mgr = OperationLockManager::new();
        let (_t1, g1) = mgr.acquire(site(), path("/a"), LockReason::List, Scope::ExactPath, true, None);
        let (_t2, g2) = mgr.acquire(site(), path("/a"), LockReason::Transfer, Scope::ExactPath, true, None);
        assert!(g1);
        assert!(g2);
    }

    #[test]
    fn inclusive_scope_blocks_on_descendant() {
        let mut mgr = OperationLockManager::new();
        let (_t1, g1) = mgr.acquire(site(), path("/a"), LockReason::List, Scope::Inclusive, true, None);
        let (_t2, g2) = mgr.acquire(site(), path("/a/b"), LockReason::List, Scope::Inclusive, true, None);
        assert!(g1);
        assert!(!g2);
    }

    #[test]
    fn releasing_grants_a_waiter() {
        let mut mgr = OperationLockManager::new();
        let (t1, g1) = mgr.acquire(site(), path("/a"), LockReason::List, Scope::ExactPath, true, None);
        assert!(g1);

        let granted = std::rc::Rc::new(std::cell::Cell::new(false));
        let granted_clone = granted.clone();
        let (_t2, g2) = mgr.acquire(
            site(),
            path("/a"),
            LockReason::List,
            Scope::ExactPath,
            true,
            Some(Box::new(move |_tok| granted_clone.set(true))),
        );
        assert!(!g2);
        assert!(!granted.get());

        mgr.release(t1);
        assert!(granted.get());
    }

    #[test]
    fn different_servers_do_not_conflict() {
        let mut mgr = OperationLockManager::new();
        let mut other = site();
        other.host = "otherhost".into();
        let (_t1, g1) = mgr.acquire(site(), path("/a"), LockReason::List, Scope::ExactPath, true, None);
        let (_t2, g2) = mgr.acquire(other, path("/a"), LockReason::List, Scope::ExactPath, true, None);
        assert!(g1);
        assert!(g2);
    }
}
