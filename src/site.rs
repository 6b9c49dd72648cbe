// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! [`Site`] and its two equality relations (§3): *same-resource* ignores
//! encoding/timezone, *same-content* additionally compares them. Caches key
//! off same-content; the operation-lock manager and cross-engine
//! invalidation key off same-resource-or-stricter, per §4.4/§4.10.

use std::fmt;

/// Wire protocol spoken to a [`Site`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Ftp,
    FtpsImplicit,
    FtpsExplicit,
    Sftp,
    Http,
    Https,
    ObjectStorage,
}

/// How a server's PASV/active transfer mode is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PasvMode {
    Passive,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogonType {
    Normal,
    Anonymous,
    Ask,
    Interactive,
    Account,
}

/// A server login sequence entry (§4.6 LOGON / login-sequence template).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCommand {
    pub kind: LoginCommandKind,
    pub optional: bool,
    pub hide_arguments: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginCommandKind {
    User,
    Pass,
    Acct,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub logon_type: LogonType,
    pub user: String,
    pub timezone_offset_minutes: i32,
    pub pasv_mode: PasvMode,
    pub encoding: Option<String>,
    pub extra_parameters: Vec<(String, String)>,
    pub post_login_commands: Vec<String>,
    pub proxy_bypass: bool,
    /// Cosmetic display name. Excluded from both equality relations.
    pub label: Option<String>,
}

impl Site {
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Site {
            host: host.into(),
            port,
            protocol,
            logon_type: LogonType::Normal,
            user: String::new(),
            timezone_offset_minutes: 0,
            pasv_mode: PasvMode::Passive,
            encoding: None,
            extra_parameters: Vec::new(),
            post_login_commands: Vec::new(),
            proxy_bypass: false,
            label: None,
        }
    }

    /// Two sites name the same physical resource: same host/port/protocol,
    /// user, post-login commands and proxy-bypass flag, ignoring encoding
    /// and timezone.
    pub fn is_same_resource(&self, other: &Site) -> bool {
        self.host.eq_ignore_ascii_case(&other.host)
            && self.port == other.port
            && self.protocol == other.protocol
            && self.user == other.user
            && self.post_login_commands == other.post_login_commands
            && self.proxy_bypass == other.proxy_bypass
            && self.extra_parameters == other.extra_parameters
    }

    /// Additionally requires matching timezone offset and encoding — the
    /// relation the directory cache keys its per-server records on.
    pub fn is_same_content(&self, other: &Site) -> bool {
        self.is_same_resource(other)
            && self.timezone_offset_minutes == other.timezone_offset_minutes
            && self.encoding == other.encoding
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Site {
        Site::new("example.com", 21, Protocol::Ftp)
    }

    #[test]
    fn same_content_requires_matching_timezone() {
        let a = base();
        let mut b = base();
        b.timezone_offset_minutes = 60;
        assert!(a.is_same_resource(&b));
        assert!(!a.is_same_content(&b));
    }

    #[test]
    fn same_resource_ignores_encoding() {
        let a = base();
        let mut b = base();
        b.encoding = Some("latin1".into());
        assert!(a.is_same_resource(&b));
        assert!(!a.is_same_content(&b));
    }

    #[test]
    fn label_never_affects_equality() {
        let a = base();
        let mut b = base();
        b.label = Some("My Server".into());
        assert!(a.is_same_resource(&b));
        assert!(a.is_same_content(&b));
    }

    #[test]
    fn host_compare_is_case_insensitive() {
        let a = base();
        let mut b = base();
        b.host = "EXAMPLE.com".into();
        assert!(a.is_same_resource(&b));
    }
}
