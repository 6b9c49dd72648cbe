// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! RFC 7616 Digest authentication: `auth` qop only, MD5 or SHA-256,
//! including the `-sess` algorithm variants. The client nonce count
//! (`nc`) is tracked per challenge so a connection reusing the same
//! `WWW-Authenticate` nonce across several requests increments it
//! instead of restarting at 1.

use sha2::Digest as _;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl Algorithm {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "MD5" | "" => Some(Algorithm::Md5),
            "MD5-SESS" => Some(Algorithm::Md5Sess),
            "SHA-256" => Some(Algorithm::Sha256),
            "SHA-256-SESS" => Some(Algorithm::Sha256Sess),
            _ => None,
        }
    }

    fn is_sess(self) -> bool {
        matches!(self, Algorithm::Md5Sess | Algorithm::Sha256Sess)
    }

    fn hash_hex(self, input: &str) -> String {
        match self {
            Algorithm::Md5 | Algorithm::Md5Sess => format!("{:x}", md5::compute(input.as_bytes())),
            Algorithm::Sha256 | Algorithm::Sha256Sess => {
                let mut hasher = sha2::Sha256::new();
                hasher.update(input.as_bytes());
                let digest = hasher.finalize();
                let mut out = String::with_capacity(digest.len() * 2);
                for byte in digest {
                    let _ = write!(out, "{:02x}", byte);
                }
                out
            },
        }
    }
}

/// The server's `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Algorithm,
    pub qop_auth: bool,
}

/// Parses a `WWW-Authenticate` header value's comma-separated
/// `key=value` / `key="value"` pairs. Only the `Digest` scheme is
/// supported; `Basic` and others are left to the caller to reject.
pub fn parse_challenge(header_value: &str) -> Option<Challenge> {
    let rest = header_value.trim().strip_prefix("Digest")?.trim();
    let mut realm = None;
    let mut nonce = None;
    let mut opaque = None;
    let mut algorithm = Algorithm::Md5;
    let mut qop_auth = false;

    for pair in split_params(rest) {
        let (key, value) = pair.split_once('=')?;
        let key = key.trim();
        let value = value.trim().trim_matches('"');
        match key {
            "realm" => realm = Some(value.to_string()),
            "nonce" => nonce = Some(value.to_string()),
            "opaque" => opaque = Some(value.to_string()),
            "algorithm" => algorithm = Algorithm::parse(value)?,
            "qop" => qop_auth = value.split(',').any(|q| q.trim() == "auth"),
            _ => {},
        }
    }

    Some(Challenge { realm: realm?, nonce: nonce?, opaque, algorithm, qop_auth })
}

/// Splits on commas that aren't inside a quoted string.
fn split_params(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(s[start..i].trim());
                start = i + 1;
            },
            _ => {},
        }
    }
    parts.push(s[start..].trim());
    parts
}

/// Per-challenge nonce-count tracker (RFC 7616 §3.3): `nc` must
/// increment on every request reusing the same server nonce.
#[derive(Debug, Default)]
pub struct NonceCounter {
    count: u32,
}

impl NonceCounter {
    pub fn new() -> Self {
        NonceCounter::default()
    }

    pub fn next(&mut self) -> u32 {
        self.count += 1;
        self.count
    }
}

pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub method: &'a str,
    pub uri: &'a str,
}

/// Computes the `Authorization: Digest ...` header value for one
/// request against `challenge`, using `cnonce` as the client nonce and
/// `nc` as this request's nonce count (from [`NonceCounter::next`]).
pub fn authorization_header(challenge: &Challenge, creds: &Credentials<'_>, cnonce: &str, nc: u32) -> String {
    let algo = challenge.algorithm;
    let ha1_base = algo.hash_hex(&format!("{}:{}:{}", creds.username, challenge.realm, creds.password));
    let ha1 = if algo.is_sess() {
        algo.hash_hex(&format!("{}:{}:{}", ha1_base, challenge.nonce, cnonce))
    } else {
        ha1_base
    };
    let ha2 = algo.hash_hex(&format!("{}:{}", creds.method, creds.uri));

    let nc_str = format!("{:08x}", nc);
    let response = if challenge.qop_auth {
        algo.hash_hex(&format!("{}:{}:{}:{}:auth:{}", ha1, challenge.nonce, nc_str, cnonce, ha2))
    } else {
        algo.hash_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2))
    };

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
        creds.username, challenge.realm, challenge.nonce, creds.uri, response
    );
    if let Some(opaque) = &challenge.opaque {
        let _ = write!(header, ", opaque=\"{}\"", opaque);
    }
    let _ = write!(header, ", algorithm={}", algorithm_name(algo));
    if challenge.qop_auth {
        let _ = write!(header, ", qop=auth, nc={}, cnonce=\"{}\"", nc_str, cnonce);
    }
    header
}

fn algorithm_name(algo: Algorithm) -> &'static str {
    match algo {
        Algorithm::Md5 => "MD5",
        Algorithm::Md5Sess => "MD5-sess",
        Algorithm::Sha256 => "SHA-256",
        Algorithm::Sha256Sess => "SHA-256-sess",
    }
}
