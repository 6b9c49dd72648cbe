// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The directory cache proper (§4.2). Kept as a plain `Vec` of per-server
//! records rather than a `HashMap`, because servers are compared by
//! [`Site::is_same_content`] — a relation, not a hash-equal key — the same
//! tradeoff the original engine's linear `CServer`-keyed list makes.

use crate::entry::{DirectoryEntry, DirectoryListing, EntryFlags, ListingFlags};
use crate::path::ServerPath;
use crate::site::Site;
use bitflags::bitflags;
use std::time::{Duration, Instant};

bitflags! {
    /// Input flags to `lookup_file`.
    pub struct LookupFlags: u8 {
        const ALLOW_OUTDATED        = 0x01;
        const FORCE_CASEINSENSITIVE = 0x02;
    }
}

bitflags! {
    /// Output bits from `lookup_file`.
    #[derive(Default)]
    pub struct LookupResult: u8 {
        const FOUND       = 0x01;
        const OUTDATED    = 0x02;
        const DIREXISTS   = 0x04;
        const MATCHEDCASE = 0x08;
    }
}

const MIN_TTL: Duration = Duration::from_secs(30);
const MAX_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const MAX_LISTINGS: usize = 50_000;
const MAX_FILES_AT_1K_LISTINGS: (usize, usize) = (1_000_000, 1_000);
const MAX_FILES_AT_100_LISTINGS: (usize, usize) = (5_000_000, 100);

struct ListingRecord {
    listing: DirectoryListing,
    lru_seq: u64,
}

/// Segment-wise path equality independent of `ServerPath::is_parent_of`'s
/// format-driven floor (which forces full sensitivity for formats that are
/// inherently case-sensitive, e.g. Unix) — the cache's `case_sensitive`
/// flag reflects the *server's* case folding, not the local path syntax.
fn paths_equal(a: &ServerPath, b: &ServerPath, case_sensitive: bool) -> bool {
    let (a, b) = (a.segments(), b.segments());
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            if case_sensitive { x == y } else { x.eq_ignore_ascii_case(y) }
        })
}

struct ServerRecord {
    site: Site,
    listings: Vec<(ServerPath, ListingRecord)>,
}

impl ServerRecord {
    fn find(&self, path: &ServerPath) -> Option<usize> {
        self.listings.iter().position(|(p, _)| p == path)
    }

    /// Indices of every listing whose path matches `path` case-insensitively
    /// (§4.2: "for every listing whose path matches case-insensitively").
    fn find_ci(&self, path: &ServerPath) -> Vec<usize> {
        self.listings
            .iter()
            .enumerate()
            .filter(|(_, (p, _))| paths_equal(p, path, false))
            .map(|(i, _)| i)
            .collect()
    }
}

pub struct DirectoryCache {
    servers: Vec<ServerRecord>,
    lru_clock: u64,
    total_listings: usize,
    total_files: usize,
    ttl: Duration,
}

impl DirectoryCache {
    pub fn new(ttl: Duration) -> Self {
        DirectoryCache {
            servers: Vec::new(),
            lru_clock: 0,
            total_listings: 0,
            total_files: 0,
            ttl: ttl.max(MIN_TTL).min(MAX_TTL),
        }
    }

    fn tick(&mut self) -> u64 {
        self.lru_clock += 1;
        self.lru_clock
    }

    fn server_index(&self, site: &Site) -> Option<usize> {
        self.servers.iter().position(|r| r.site.is_same_content(site))
    }

    fn server_index_mut(&mut self, site: &Site) -> usize {
        match self.server_index(site) {
            Some(i) => i,
            None => {
                self.servers.push(ServerRecord {
                    site: site.clone(),
                    listings: Vec::new(),
                });
                self.servers.len() - 1
            },
        }
    }

    /// Replaces any existing listing for `path`, updating the running
    /// file-count total, then prunes.
    pub fn store(&mut self, site: &Site, listing: DirectoryListing) {
        let seq = self.tick();
        let idx = self.server_index_mut(site);
        let path = listing.path.clone();
        let new_len = listing.entries.len();
        let record = &mut self.servers[idx];
        match record.find(&path) {
            Some(pos) => {
                let old_len = record.listings[pos].1.listing.entries.len();
                self.total_files = self.total_files + new_len - old_len;
                record.listings[pos].1 = ListingRecord { listing, lru_seq: seq };
            },
            None => {
                self.total_listings += 1;
                self.total_files += new_len;
                record.listings.push((path, ListingRecord { listing, lru_seq: seq }));
            },
        }
        self.prune();
    }

    /// `lookup(site, path, allow_unsure)`: returns the listing (entries
    /// that are `unsure` are filtered out unless `allow_unsure`) plus
    /// whether it is past its TTL.
    pub fn lookup(
        &mut self,
        site: &Site,
        path: &ServerPath,
        allow_unsure: bool,
        now: Instant,
    ) -> Option<(DirectoryListing, bool)> {
        let seq = self.tick();
        let sidx = self.server_index(site)?;
        let record = &mut self.servers[sidx];
        let pos = record.find(path)?;
        record.listings[pos].1.lru_seq = seq;
        let listing = &record.listings[pos].1.listing;
        let outdated = now.saturating_duration_since(listing.first_list_time) > self.ttl;
        let mut listing = listing.clone();
        if !allow_unsure {
            listing.entries.retain(|e| !e.is_unsure());
        }
        Some((listing, outdated))
    }

    pub fn lookup_file(
        &mut self,
        site: &Site,
        path: &ServerPath,
        name: &str,
        flags: LookupFlags,
        case_sensitive: bool,
        now: Instant,
    ) -> (LookupResult, Option<DirectoryEntry>) {
        let force_ci = flags.contains(LookupFlags::FORCE_CASEINSENSITIVE);
        let allow_outdated = flags.contains(LookupFlags::ALLOW_OUTDATED);
        let effective_case_sensitive = case_sensitive && !force_ci;

        let (listing, outdated) = match self.lookup(site, path, true, now) {
            Some(v) => v,
            None => return (LookupResult::empty(), None),
        };
        if outdated && !allow_outdated {
            return (LookupResult::OUTDATED, None);
        }

        let mut result = LookupResult::empty();
        if outdated {
            result.insert(LookupResult::OUTDATED);
        }
        if listing.flags.contains(ListingFlags::LISTING_HAS_DIRS) {
            result.insert(LookupResult::DIREXISTS);
        }
        match listing.find(name, effective_case_sensitive) {
            Some((entry, exact)) => {
                result.insert(LookupResult::FOUND);
                if exact {
                    result.insert(LookupResult::MATCHEDCASE);
                }
                (result, Some(entry.clone()))
            },
            None => (result, None),
        }
    }

    /// For every listing whose path case-insensitively matches `path`,
    /// marks the entry named `name` as unsure (case-sensitive match
    /// preferred; falls back to any case-insensitive match). If no
    /// match exists and `may_create` is set, appends a new unsure entry.
    pub fn update_file(
        &mut self,
        site: &Site,
        path: &ServerPath,
        name: &str,
        may_create: bool,
        is_dir: bool,
        size: Option<u64>,
        owner_group: Option<String>,
        case_sensitive: bool,
    ) {
        let sidx = match self.server_index(site) {
            Some(i) => i,
            None => return,
        };
        let record = &mut self.servers[sidx];
        for pos in record.find_ci(path) {
            let listing = &mut record.listings[pos].1.listing;

            match listing.find_mut(name, case_sensitive) {
                Some((entry, _exact)) => {
                    entry.mark_unsure();
                    if let Some(sz) = size {
                        entry.size = Some(sz);
                    }
                    if owner_group.is_some() {
                        entry.owner_group = owner_group.clone();
                    }
                    listing.flags.insert(if is_dir {
                        ListingFlags::UNSURE_DIR_CHANGED
                    } else {
                        ListingFlags::UNSURE_FILE_CHANGED
                    });
                },
                None if may_create => {
                    let mut entry = DirectoryEntry::new(name);
                    entry.flags.insert(EntryFlags::UNSURE);
                    if is_dir {
                        entry.flags.insert(EntryFlags::DIR);
                    }
                    entry.size = size;
                    entry.owner_group = owner_group.clone();
                    listing.entries.push(entry);
                    listing.flags.insert(if is_dir {
                        ListingFlags::UNSURE_DIR_ADDED
                    } else {
                        ListingFlags::UNSURE_FILE_ADDED
                    });
                },
                None => {},
            }
        }
    }

    /// Marks matching entries unsure; if the target was a directory also
    /// marks descendant listings `unsure_unknown` ("safe side").
    pub fn invalidate_file(
        &mut self,
        site: &Site,
        path: &ServerPath,
        name: &str,
        is_dir: bool,
        case_sensitive: bool,
    ) {
        let target = path.change_path(name);
        let sidx = match self.server_index(site) {
            Some(i) => i,
            None => return,
        };
        let record = &mut self.servers[sidx];
        for pos in record.find_ci(path) {
            if let Some((entry, _)) = record.listings[pos].1.listing.find_mut(name, case_sensitive) {
                entry.mark_unsure();
            }
        }
        if is_dir {
            for (listing_path, rec) in record.listings.iter_mut() {
                if target.is_parent_of(listing_path, case_sensitive, true) {
                    rec.listing.flags.insert(ListingFlags::UNSURE_UNKNOWN);
                }
            }
        }
    }

    /// Deletes the exact-path listing and all descendants, then applies
    /// `invalidate_file` on the parent (`remove_file` semantics).
    pub fn remove_dir(
        &mut self,
        site: &Site,
        path: &ServerPath,
        name: &str,
        target_path: Option<&ServerPath>,
        case_sensitive: bool,
    ) {
        let target = target_path.cloned().unwrap_or_else(|| path.change_path(name));
        if let Some(sidx) = self.server_index(site) {
            let record = &mut self.servers[sidx];
            let before = record.listings.len();
            record.listings.retain(|(p, _)| {
                !(paths_equal(p, &target, false) || target.is_parent_of(p, case_sensitive, false))
            });
            let removed = before - record.listings.len();
            self.total_listings -= removed;
        }
        self.invalidate_file(site, path, name, true, case_sensitive);
    }

    /// If `from_path == to_path` and both cached: renames the entry in
    /// place. Otherwise invalidates the whole server ("safe side").
    pub fn rename(
        &mut self,
        site: &Site,
        from_path: &ServerPath,
        from_name: &str,
        to_path: &ServerPath,
        to_name: &str,
        case_sensitive: bool,
    ) {
        if paths_equal(from_path, to_path, false) {
            if let Some(sidx) = self.server_index(site) {
                let record = &mut self.servers[sidx];
                let mut renamed = false;
                for pos in record.find_ci(from_path) {
                    let listing = &mut record.listings[pos].1.listing;
                    if let Some((entry, _)) = listing.find_mut(from_name, case_sensitive) {
                        entry.name = to_name.to_string();
                        entry.mark_unsure();
                        listing.flags.insert(ListingFlags::UNSURE_FILE_CHANGED);
                        renamed = true;
                    }
                }
                if renamed {
                    return;
                }
            }
        }
        self.invalidate_server(site);
    }

    pub fn invalidate_server(&mut self, site: &Site) {
        if let Some(sidx) = self.server_index(site) {
            let removed = self.servers[sidx].listings.len();
            self.total_listings -= removed;
            self.total_files -= self.servers[sidx]
                .listings
                .iter()
                .map(|(_, r)| r.listing.entries.len())
                .sum::<usize>();
            self.servers[sidx].listings.clear();
        }
    }

    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl.max(MIN_TTL).min(MAX_TTL);
    }

    fn over_threshold(&self) -> bool {
        self.total_listings > MAX_LISTINGS
            || (self.total_files >= MAX_FILES_AT_1K_LISTINGS.0
                && self.total_listings >= MAX_FILES_AT_1K_LISTINGS.1)
            || (self.total_files >= MAX_FILES_AT_100_LISTINGS.0
                && self.total_listings >= MAX_FILES_AT_100_LISTINGS.1)
    }

    /// Runs after every `store`: evicts globally-LRU listings until under
    /// all three thresholds.
    fn prune(&mut self) {
        while self.over_threshold() {
            let mut victim: Option<(usize, usize, u64)> = None;
            for (sidx, server) in self.servers.iter().enumerate() {
                for (lidx, (_, rec)) in server.listings.iter().enumerate() {
                    if victim.map_or(true, |(_, _, seq)| rec.lru_seq < seq) {
                        victim = Some((sidx, lidx, rec.lru_seq));
                    }
                }
            }
            match victim {
                Some((sidx, lidx, _)) => {
                    let (_, rec) = self.servers[sidx].listings.remove(lidx);
                    self.total_listings -= 1;
                    self.total_files -= rec.listing.entries.len();
                },
                None => break,
            }
        }
    }

    pub fn total_listings(&self) -> usize {
        self.total_listings
    }

    pub fn total_files(&self) -> usize {
        self.total_files
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

    fn listing(path: ServerPath, names: &[&str], now: Instant) -> DirectoryListing {
        let entries = names.iter().map(|n| DirectoryEntry::new(*n)).collect();
        DirectoryListing::new(path, entries, now)
    }

    /// Property P1.
    #[test]
    fn store_then_lookup_round_trips_and_ages_out() {
        let now = Instant::now();
        let mut cache = DirectoryCache::new(Duration::from_secs(30));
        let s = site();
        let p = path("/a");
        cache.store(&s, listing(p.clone(), &["x", "y"], now));

        let (found, outdated) = cache.lookup(&s, &p, true, now).unwrap();
        assert_eq!(found.entries.len(), 2);
        assert!(!outdated);

        let later = now + Duration::from_secs(31);
        let (_, outdated) = cache.lookup(&s, &p, true, later).unwrap();
        assert!(outdated);
    }

    #[test]
    fn ttl_is_clamped_to_bounds() {
        let cache = DirectoryCache::new(Duration::from_secs(1));
        assert_eq!(cache.ttl, MIN_TTL);
        let cache = DirectoryCache::new(Duration::from_secs(999_999));
        assert_eq!(cache.ttl, MAX_TTL);
    }

    /// Property P2.
    #[test]
    fn lookup_file_case_sensitivity() {
        let now = Instant::now();
        let mut cache = DirectoryCache::new(Duration::from_secs(30));
        let s = site();
        let p = path("/a");
        cache.store(&s, listing(p.clone(), &["Foo"], now));

        let (res, _) = cache.lookup_file(&s, &p, "FOO", LookupFlags::empty(), false, now);
        assert!(res.contains(LookupResult::FOUND));
        assert!(!res.contains(LookupResult::MATCHEDCASE));

        let (res, _) = cache.lookup_file(&s, &p, "FOO", LookupFlags::empty(), true, now);
        assert!(!res.contains(LookupResult::FOUND));
    }

    #[test]
    fn update_file_marks_unsure_and_may_create() {
        let now = Instant::now();
        let mut cache = DirectoryCache::new(Duration::from_secs(30));
        let s = site();
        let p = path("/a");
        cache.store(&s, listing(p.clone(), &["existing"], now));

        cache.update_file(&s, &p, "existing", false, false, None, None, true);
        let (listing, _) = cache.lookup(&s, &p, true, now).unwrap();
        assert!(listing.find("existing", true).unwrap().0.is_unsure());

        cache.update_file(&s, &p, "new_file", true, false, Some(5), None, true);
        let (listing, _) = cache.lookup(&s, &p, true, now).unwrap();
        let (entry, _) = listing.find("new_file", true).unwrap();
        assert!(entry.is_unsure());
        assert_eq!(entry.size, Some(5));
    }

    #[test]
    fn update_file_reaches_listing_stored_under_different_case_path() {
        let now = Instant::now();
        let mut cache = DirectoryCache::new(Duration::from_secs(30));
        let s = site();
        cache.store(&s, listing(path("/A"), &["existing"], now));

        cache.update_file(&s, &path("/a"), "existing", false, false, None, None, true);
        let (listing, _) = cache.lookup(&s, &path("/A"), true, now).unwrap();
        assert!(listing.find("existing", true).unwrap().0.is_unsure());
    }

    #[test]
    fn invalidate_file_reaches_listing_stored_under_different_case_path() {
        let now = Instant::now();
        let mut cache = DirectoryCache::new(Duration::from_secs(30));
        let s = site();
        cache.store(&s, listing(path("/A"), &["existing"], now));

        cache.invalidate_file(&s, &path("/a"), "existing", false, true);
        let (listing, _) = cache.lookup(&s, &path("/A"), true, now).unwrap();
        assert!(listing.find("existing", true).unwrap().0.is_unsure());
    }

    #[test]
    fn remove_dir_drops_descendants() {
        let now = Instant::now();
        let mut cache = DirectoryCache::new(Duration::from_secs(30));
        let s = site();
        cache.store(&s, listing(path("/a"), &["b"], now));
        cache.store(&s, listing(path("/a/b"), &["c.txt"], now));
        cache.remove_dir(&s, &path("/a"), "b", None, true);
        assert!(cache.lookup(&s, &path("/a/b"), true, now).is_none());
    }

    #[test]
    fn rename_same_path_updates_in_place() {
        let now = Instant::now();
        let mut cache = DirectoryCache::new(Duration::from_secs(30));
        let s = site();
        let p = path("/a");
        cache.store(&s, listing(p.clone(), &["old.txt"], now));
        cache.rename(&s, &p, "old.txt", &p, "new.txt", true);
        let (listing, _) = cache.lookup(&s, &p, true, now).unwrap();
        assert!(listing.find("new.txt", true).is_some());
        assert!(listing.find("old.txt", true).is_none());
    }

    #[test]
    fn rename_across_paths_invalidates_whole_server() {
        let now = Instant::now();
        let mut cache = DirectoryCache::new(Duration::from_secs(30));
        let s = site();
        cache.store(&s, listing(path("/a"), &["f"], now));
        cache.store(&s, listing(path("/b"), &["g"], now));
        cache.rename(&s, &path("/a"), "f", &path("/c"), "f", true);
        assert!(cache.lookup(&s, &path("/a"), true, now).is_none());
        assert!(cache.lookup(&s, &path("/b"), true, now).is_none());
    }

    #[test]
    fn lru_eviction_drops_least_recently_used_listing() {
        let now = Instant::now();
        let mut cache = DirectoryCache::new(Duration::from_secs(30));
        let s = site();
        cache.store(&s, listing(path("/a"), &["f"], now));
        cache.store(&s, listing(path("/b"), &["g"], now));
        // Touch /a to make it MRU, leaving /b as the eviction victim.
        let _ = cache.lookup(&s, &path("/a"), true, now);

        // Force the threshold check to trip without storing 50k listings.
        cache.total_listings = MAX_LISTINGS + 1;
        cache.prune();

        assert_eq!(cache.total_listings(), 1);
        assert!(cache.lookup(&s, &path("/a"), true, now).is_some());
        assert!(cache.lookup(&s, &path("/b"), true, now).is_none());
    }

    #[test]
    fn different_servers_do_not_share_listings() {
        let now = Instant::now();
        let mut cache = DirectoryCache::new(Duration::from_secs(30));
        let mut other = site();
        other.host = "otherhost".into();
        cache.store(&site(), listing(path("/a"), &["f"], now));
        assert!(cache.lookup(&other, &path("/a"), true, now).is_none());
    }
}
