// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! SFTP control socket (§4.8): a line protocol spoken over the stdio of
//! an external helper subprocess, rather than a socket this crate
//! drives directly. The subprocess itself is an out-of-scope
//! collaborator; what lives here is the line classifier, the quota/
//! rate-limiter handshake, the `AskPassword` challenge correlation, and
//! filename escaping for wildcard-safe arguments.

use std::collections::HashSet;

/// One classified output line from the helper, per the leading marker.
#[derive(Debug, Clone, PartialEq)]
pub enum HelperEvent {
    Reply(String),
    Done(i32),
    Error(String),
    Info(String),
    Verbose(String),
    Status(String),
    TransferProgress { bytes: u64 },
    ListEntry { mtime: String, size: u64, name: String },
    RequestHostKeyNew,
    RequestHostKeyChanged,
    RequestHostKeyBetterAlgo,
    RequestPassword,
    RequestPreamble(String),
    RequestInstruction(String),
    RequestQuota { recv: bool },
    VersionBanner { protocol_version: u32 },
}

/// Classifies one line of helper output. Returns `None` for a line this
/// protocol version doesn't recognize (the original tolerates unknown
/// markers rather than aborting the connection).
pub fn classify_line(line: &str) -> Option<HelperEvent> {
    if let Some(banner) = parse_version_banner(line) {
        return Some(banner);
    }
    if line.is_empty() {
        return None;
    }
    let (marker, rest) = split_marker(line);
    match marker {
        "R" => Some(HelperEvent::Reply(rest.to_string())),
        "D" => rest.trim().parse().ok().map(HelperEvent::Done),
        "E" => Some(HelperEvent::Error(rest.to_string())),
        "I" => Some(HelperEvent::Info(rest.to_string())),
        "V" => Some(HelperEvent::Verbose(rest.to_string())),
        "S" => Some(HelperEvent::Status(rest.to_string())),
        "P" => rest.trim().parse().ok().map(|bytes| HelperEvent::TransferProgress { bytes }),
        "L" => parse_list_entry(rest),
        "H" => match rest {
            "new" => Some(HelperEvent::RequestHostKeyNew),
            "changed" => Some(HelperEvent::RequestHostKeyChanged),
            "better-algo" => Some(HelperEvent::RequestHostKeyBetterAlgo),
            _ => None,
        },
        "A" => Some(HelperEvent::RequestPassword),
        "M" => Some(HelperEvent::RequestPreamble(rest.to_string())),
        "N" => Some(HelperEvent::RequestInstruction(rest.to_string())),
        "Q" => match rest {
            "recv" => Some(HelperEvent::RequestQuota { recv: true }),
            "send" => Some(HelperEvent::RequestQuota { recv: false }),
            _ => None,
        },
        _ => None,
    }
}

fn split_marker(line: &str) -> (&str, &str) {
    match line.find(' ') {
        Some(idx) => (&line[..idx], line[idx + 1..].trim_start()),
        None => (line, ""),
    }
}

fn parse_list_entry(rest: &str) -> Option<HelperEvent> {
    let mut parts = rest.splitn(3, ' ');
    let mtime = parts.next()?.to_string();
    let size: u64 = parts.next()?.parse().ok()?;
    let name = parts.next()?.to_string();
    Some(HelperEvent::ListEntry { mtime, size, name })
}

fn parse_version_banner(line: &str) -> Option<HelperEvent> {
    let prefix = "fzSftp started, protocol_version=";
    let version_str = line.strip_prefix(prefix)?;
    version_str.trim().parse().ok().map(|protocol_version| HelperEvent::VersionBanner { protocol_version })
}

/// A command line sent to the helper: a verb and arguments, each
/// newline-free and with embedded double quotes doubled so the helper's
/// line-oriented parser can't be confused by the filename's own content.
pub fn render_command(verb: &str, args: &[&str]) -> String {
    let mut line = String::from(verb);
    for arg in args {
        line.push(' ');
        line.push('"');
        line.push_str(&arg.replace('"', "\"\""));
        line.push('"');
    }
    line
}

/// Escapes `[ ] * ? \` with a backslash so a literal filename can be
/// passed where the helper treats the argument as a glob pattern.
pub fn escape_wildcard(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '[' | ']' | '*' | '?' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Correlates `AskPassword` challenges within one connection attempt. A
/// preamble/instruction pair identifies a challenge; seeing the same
/// identifier twice means the server rejected the previous attempt and
/// is asking again, which this protocol treats as an auth failure.
#[derive(Default)]
pub struct PasswordChallengeTracker {
    seen: HashSet<String>,
}

impl PasswordChallengeTracker {
    pub fn new() -> Self {
        PasswordChallengeTracker::default()
    }

    /// Returns `true` if this is a genuinely new challenge, `false` if
    /// it repeats one already seen this connection (auth failure).
    pub fn observe(&mut self, preamble: &str, instruction: &str) -> bool {
        let id = format!("{preamble}\u{0}{instruction}");
        self.seen.insert(id)
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }
}

/// The quota response line sent back to the helper once the
/// rate-limiter has been consulted for a `RequestQuota` event.
/// `available` is the token grant and `limit` the bucket's configured
/// ceiling; `None` means unlimited (no tokens are withheld).
pub fn quota_response(recv: bool, available: Option<(u64, u64)>) -> String {
    let direction = if recv { "dir" } else { "diu" };
    match available {
        Some((bytes, limit)) => format!("-{direction}{bytes},{limit}"),
        None => format!("-{direction}-"),
    }
}
