// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Directory entries and listings (§3). A listing's `unsure_*` flags
//! record which kind of mutation made the directory cache doubt an entry
//! without forcing a full refresh.

use bitflags::bitflags;
use std::time::Instant;

bitflags! {
    #[derive(Default)]
    pub struct ListingFlags: u32 {
        const UNSURE_UNKNOWN     = 0x01;
        const UNSURE_DIR_CHANGED  = 0x02;
        const UNSURE_FILE_CHANGED = 0x04;
        const UNSURE_DIR_ADDED    = 0x08;
        const UNSURE_FILE_ADDED   = 0x10;
        const UNSURE_INVALID      = 0x20;
        const LISTING_HAS_DIRS    = 0x40;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct EntryFlags: u8 {
        const DIR    = 0x01;
        const LINK   = 0x02;
        const UNSURE = 0x04;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    pub name: String,
    pub size: Option<u64>,
    pub modification_time: Option<i64>,
    pub permissions: Option<String>,
    pub owner_group: Option<String>,
    pub flags: EntryFlags,
    pub link_target: Option<String>,
}

impl DirectoryEntry {
    pub fn new(name: impl Into<String>) -> Self {
        DirectoryEntry {
            name: name.into(),
            size: None,
            modification_time: None,
            permissions: None,
            owner_group: None,
            flags: EntryFlags::empty(),
            link_target: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.flags.contains(EntryFlags::DIR)
    }

    pub fn is_unsure(&self) -> bool {
        self.flags.contains(EntryFlags::UNSURE)
    }

    pub fn mark_unsure(&mut self) {
        self.flags.insert(EntryFlags::UNSURE);
    }

    fn name_eq(&self, name: &str, case_sensitive: bool) -> bool {
        if case_sensitive {
            self.name == name
        } else {
            self.name.eq_ignore_ascii_case(name)
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryListing {
    pub path: crate::path::ServerPath,
    pub entries: Vec<DirectoryEntry>,
    pub first_list_time: Instant,
    pub flags: ListingFlags,
}

impl DirectoryListing {
    pub fn new(path: crate::path::ServerPath, entries: Vec<DirectoryEntry>, now: Instant) -> Self {
        let has_dirs = entries.iter().any(|e| e.is_dir());
        let mut flags = ListingFlags::empty();
        if has_dirs {
            flags.insert(ListingFlags::LISTING_HAS_DIRS);
        }
        DirectoryListing {
            path,
            entries,
            first_list_time: now,
            flags,
        }
    }

    /// Enforces the invariant that case-folded duplicate names may only
    /// coexist on a case-sensitive server.
    pub fn validate(&self, case_sensitive: bool) -> bool {
        if case_sensitive {
            return true;
        }
        let mut seen = std::collections::HashSet::new();
        self.entries
            .iter()
            .all(|e| seen.insert(e.name.to_ascii_lowercase()))
    }

    pub fn find(&self, name: &str, case_sensitive: bool) -> Option<(&DirectoryEntry, bool)> {
        if case_sensitive {
            return self
                .entries
                .iter()
                .find(|e| e.name_eq(name, true))
                .map(|e| (e, true));
        }
        if let Some(e) = self.entries.iter().find(|e| e.name_eq(name, true)) {
            return Some((e, true));
        }
        self.entries
            .iter()
            .find(|e| e.name_eq(name, false))
            .map(|e| (e, false))
    }

    pub fn find_mut(&mut self, name: &str, case_sensitive: bool) -> Option<(&mut DirectoryEntry, bool)> {
        if case_sensitive {
            return self
                .entries
                .iter_mut()
                .find(|e| e.name_eq(name, true))
                .map(|e| (e, true));
        }
        if let Some(idx) = self.entries.iter().position(|e| e.name_eq(name, true)) {
            return Some((&mut self.entries[idx], true));
        }
        if let Some(idx) = self.entries.iter().position(|e| e.name_eq(name, false)) {
            return Some((&mut self.entries[idx], false));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{PathFormat, ServerPath};

    fn listing(names: &[&str]) -> DirectoryListing {
        let entries = names.iter().map(|n| DirectoryEntry::new(*n)).collect();
        DirectoryListing::new(ServerPath::root(PathFormat::Unix), entries, Instant::now())
    }

    #[test]
    fn case_insensitive_duplicates_are_invalid() {
        let l = listing(&["Foo", "foo"]);
        assert!(!l.validate(false));
        assert!(l.validate(true));
    }

    #[test]
    fn find_prefers_case_sensitive_match() {
        let l = listing(&["foo", "FOO"]);
        let (entry, exact) = l.find("FOO", false).unwrap();
        assert_eq!(entry.name, "FOO");
        assert!(exact);
    }

    #[test]
    fn find_falls_back_to_case_insensitive() {
        let l = listing(&["Foo"]);
        let (entry, exact) = l.find("FOO", false).unwrap();
        assert_eq!(entry.name, "Foo");
        assert!(!exact);
        assert!(l.find("FOO", true).is_none());
    }
}
