// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Optional update checker (§4.14), gated behind the `update-checker`
//! feature per SPEC_FULL.md: parses a signed manifest, verifies its
//! Ed25519 signature, and verifies a downloaded file's size and
//! SHA-512 hash before it's renamed into place. Fetching the manifest
//! and the file itself goes through [`crate::protocols::http`]; this
//! module is the parsing/verification logic around that transport.

use ed25519_dalek::{PublicKey, Signature, Verifier};
use sha2::{Digest, Sha512};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha512,
}

impl HashAlgorithm {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "sha512" => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub channel: String,
    pub version: String,
    pub url: String,
    pub size: u64,
    pub algorithm: HashAlgorithm,
    pub hash_hex: String,
    pub signature_base64: String,
}

/// Parses one manifest line of shape
/// `<channel> <version-or-date> <url> <size> <algo> <hash> sig:<base64>`.
/// Returns `None` on a malformed line or an unsupported algorithm.
pub fn parse_manifest_line(line: &str) -> Option<ManifestEntry> {
    let mut parts = line.split_whitespace();
    let channel = parts.next()?.to_string();
    let version = parts.next()?.to_string();
    let url = parts.next()?.to_string();
    let size: u64 = parts.next()?.parse().ok()?;
    let algorithm = HashAlgorithm::parse(parts.next()?)?;
    let hash_hex = parts.next()?.to_string();
    let sig_field = parts.next()?;
    let signature_base64 = sig_field.strip_prefix("sig:")?.to_string();
    Some(ManifestEntry { channel, version, url, size, algorithm, hash_hex, signature_base64 })
}

pub fn parse_manifest<'a>(body: &'a str) -> impl Iterator<Item = ManifestEntry> + 'a {
    body.lines().filter(|l| !l.trim().is_empty()).filter_map(parse_manifest_line)
}

#[derive(Debug)]
pub enum VerifyError {
    BadSignatureEncoding,
    BadPublicKey,
    SignatureMismatch,
    BadHashEncoding,
}

/// Verifies the manifest entry's Ed25519 signature over
/// `hash || '\0' || version`, per §4.14.
pub fn verify_manifest_signature(entry: &ManifestEntry, public_key: &PublicKey) -> Result<(), VerifyError> {
    let sig_bytes = base64::decode(&entry.signature_base64).map_err(|_| VerifyError::BadSignatureEncoding)?;
    let signature = Signature::from_bytes(&sig_bytes).map_err(|_| VerifyError::BadSignatureEncoding)?;

    let mut message = hex::decode(&entry.hash_hex).map_err(|_| VerifyError::BadHashEncoding)?;
    message.push(0);
    message.extend_from_slice(entry.version.as_bytes());

    public_key.verify(&message, &signature).map_err(|_| VerifyError::SignatureMismatch)
}

/// The temporary download filename, derived from the manifest's hash so
/// concurrent checks for different versions never collide.
pub fn temp_download_path(download_dir: &Path, entry: &ManifestEntry) -> PathBuf {
    download_dir.join(format!("{}.part", entry.hash_hex))
}

#[derive(Debug, PartialEq, Eq)]
pub enum DownloadVerifyError {
    SizeMismatch { expected: u64, actual: u64 },
    HashMismatch,
}

/// Verifies a completed download against the manifest entry's declared
/// size and SHA-512 hash before the caller renames it into place.
pub fn verify_downloaded_bytes(entry: &ManifestEntry, data: &[u8]) -> Result<(), DownloadVerifyError> {
    if data.len() as u64 != entry.size {
        return Err(DownloadVerifyError::SizeMismatch { expected: entry.size, actual: data.len() as u64 });
    }
    let HashAlgorithm::Sha512 = entry.algorithm;
    let mut hasher = Sha512::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let actual_hex = hex::encode(digest);
    if !actual_hex.eq_ignore_ascii_case(&entry.hash_hex) {
        return Err(DownloadVerifyError::HashMismatch);
    }
    Ok(())
}

/// `FZUPDATETEST=1` switches the update checker to a test channel
/// (§4.14's "Environment variables").
pub fn active_channel() -> &'static str {
    if std::env::var("FZUPDATETEST").as_deref() == Ok("1") {
        "test"
    } else {
        "release"
    }
}

/// The default download directory on Unix honors `XDG_CONFIG_HOME`
/// when set, falling back to `~/.config`.
pub fn default_download_dir(home: &Path) -> PathBuf {
    match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join("updates"),
        _ => home.join(".config").join("updates"),
    }
}
