// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! [`ServerPath`]: a protocol-typed, canonicalised sequence of path
//! segments (§3). `PathFormat::Default` resolves to the connection's
//! native format at first use, per the invariant "a path either is empty
//! or has a well-defined type".

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathFormat {
    Unix,
    Dos { forward_slashes: bool },
    Vms,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerPath {
    format: PathFormat,
    segments: Vec<Box<str>>,
}

impl ServerPath {
    pub fn root(format: PathFormat) -> Self {
        ServerPath {
            format,
            segments: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.format, PathFormat::Default) && self.segments.is_empty()
    }

    pub fn format(&self) -> PathFormat {
        self.format
    }

    pub fn segments(&self) -> &[Box<str>] {
        &self.segments
    }

    /// Resolves a `Default`-typed path to a concrete format. A no-op if
    /// the path is already typed.
    pub fn resolve_format(&mut self, format: PathFormat) {
        if matches!(self.format, PathFormat::Default) {
            self.format = format;
        }
    }

    fn case_sensitive_by_default(&self) -> bool {
        !matches!(self.format, PathFormat::Dos { .. } | PathFormat::Vms)
    }

    fn segment_eq(&self, a: &str, b: &str, case_sensitive: bool) -> bool {
        if case_sensitive {
            a == b
        } else {
            a.eq_ignore_ascii_case(b)
        }
    }

    pub fn parent(&self) -> Option<ServerPath> {
        if self.segments.is_empty() {
            return None;
        }
        let mut parent = self.clone();
        parent.segments.pop();
        Some(parent)
    }

    /// True if `self` is a (possibly indirect) parent of `other`.
    /// `allow_equal` additionally accepts `self == other`.
    pub fn is_parent_of(&self, other: &ServerPath, case_sensitive: bool, allow_equal: bool) -> bool {
        let case_sensitive = case_sensitive || self.case_sensitive_by_default();
        if self.segments.len() > other.segments.len() {
            return false;
        }
        if self.segments.len() == other.segments.len() {
            return allow_equal && self.segments.iter().zip(&other.segments).all(|(a, b)| {
                self.segment_eq(a, b, case_sensitive)
            });
        }
        self.segments
            .iter()
            .zip(&other.segments)
            .all(|(a, b)| self.segment_eq(a, b, case_sensitive))
    }

    /// Applies a relative path change (`..`, `.`, `sub/dir`) rooted at
    /// `self`. Absolute-looking input (leading separator) replaces the
    /// path outright.
    pub fn change_path(&self, relative: &str) -> ServerPath {
        let sep = self.separator();
        let mut result = if relative.starts_with(sep) {
            ServerPath::root(self.format)
        } else {
            self.clone()
        };
        for part in relative.split(sep).filter(|p| !p.is_empty()) {
            match part {
                "." => {},
                ".." => {
                    result.segments.pop();
                },
                _ => result.segments.push(part.into()),
            }
        }
        result
    }

    fn separator(&self) -> char {
        match self.format {
            PathFormat::Dos { .. } | PathFormat::Default => '\\',
            PathFormat::Unix => '/',
            PathFormat::Vms => '.',
        }
    }

    /// Renders a filename as the server would expect it, joined onto this
    /// path unless `omit_path` is set (in which case only the bare name is
    /// returned — used when the command already implies the directory,
    /// e.g. after a `CWD`).
    pub fn format_filename(&self, name: &str, omit_path: bool) -> String {
        if omit_path || self.segments.is_empty() {
            return name.to_string();
        }
        match self.format {
            PathFormat::Unix | PathFormat::Dos { forward_slashes: true } | PathFormat::Default => {
                format!("/{}/{}", self.segments.join("/"), name)
            },
            PathFormat::Dos { forward_slashes: false } => {
                format!("{}\\{}", self.segments.join("\\"), name)
            },
            PathFormat::Vms => format!("{}.{}", self.segments.join("."), name),
        }
    }
}

impl fmt::Display for ServerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        write!(f, "/{}", self.segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unix_path(s: &str) -> ServerPath {
        ServerPath::root(PathFormat::Unix).change_path(s)
    }

    #[test]
    fn parent_of_is_well_defined() {
        let base = unix_path("/a/b");
        let child = unix_path("/a/b/c");
        assert!(base.is_parent_of(&child, true, false));
        assert!(!child.is_parent_of(&base, true, false));
    }

    #[test]
    fn allow_equal_controls_self_match() {
        let a = unix_path("/a/b");
        let b = unix_path("/a/b");
        assert!(!a.is_parent_of(&b, true, false));
        assert!(a.is_parent_of(&b, true, true));
    }

    #[test]
    fn dos_paths_compare_case_insensitively_by_default() {
        let a = ServerPath::root(PathFormat::Dos { forward_slashes: false }).change_path("Foo");
        let b = ServerPath::root(PathFormat::Dos { forward_slashes: false }).change_path("FOO\\bar");
        assert!(a.is_parent_of(&b, false, false));
    }

    #[test]
    fn dotdot_moves_to_parent() {
        let a = unix_path("/a/b/c");
        let up = a.change_path("..");
        assert_eq!(up, unix_path("/a/b"));
    }

    #[test]
    fn format_filename_joins_path() {
        let a = unix_path("/a/b");
        assert_eq!(a.format_filename("c.txt", false), "/a/b/c.txt");
        assert_eq!(a.format_filename("c.txt", true), "c.txt");
    }
}
