// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Object-storage control socket (§4.9): a helper protocol similar to
//! [`crate::protocols::sftp`]'s, but operations address buckets and
//! object ids rather than paths, so every operation below the bucket
//! starts by resolving path segments to ids through directory-cache
//! listings.

/// Commands sent to the storage helper over its line protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum HelperCommand {
    Proxy(String),
    Host(String),
    User(String),
    Pass(String),
    Key(String),
    ListBuckets,
    List { bucket: String, path: String },
    MakeBucket { name: String },
    Put,
    Get,
    Remove { bucket: String, id: String },
    RemoveBucket { id: String },
    Move { bucket: String, from: String, to: String },
}

impl HelperCommand {
    pub fn render(&self) -> String {
        match self {
            HelperCommand::Proxy(uri) => format!("proxy {uri}"),
            HelperCommand::Host(server) => format!("host {server}"),
            HelperCommand::User(name) => format!("user {name}"),
            HelperCommand::Pass(pass) => format!("pass {pass}"),
            HelperCommand::Key(key) => format!("key {key}"),
            HelperCommand::ListBuckets => "list-buckets".to_string(),
            HelperCommand::List { bucket, path } => format!("list {bucket} {path}"),
            HelperCommand::MakeBucket { name } => format!("mkbucket {name}"),
            HelperCommand::Put => "put".to_string(),
            HelperCommand::Get => "get".to_string(),
            HelperCommand::Remove { bucket, id } => format!("rm {bucket} {id}"),
            HelperCommand::RemoveBucket { id } => format!("rmbucket {id}"),
            HelperCommand::Move { bucket, from, to } => format!("mv {bucket} {from} {to}"),
        }
    }
}

/// The prefix stored in the directory cache's owner/group field once a
/// path segment resolves to a bucket or object id (§4.9).
const ID_PREFIX: &str = "id:";

pub fn encode_resolved_id(id: &str) -> String {
    format!("{ID_PREFIX}{id}")
}

/// Extracts a previously-resolved id from a directory entry's
/// owner/group field, if it was written by [`encode_resolved_id`].
pub fn decode_resolved_id(owner_group: &str) -> Option<&str> {
    owner_group.strip_prefix(ID_PREFIX)
}

/// What the next resolution step needs to look up, based on how many
/// path segments remain unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStep {
    /// Resolve the first segment against a listing of the synthetic
    /// root to find the bucket id.
    Bucket,
    /// Resolve the final segment against a listing of its parent
    /// directory to find the file id.
    File,
}

/// Splits a server path into the steps needed to resolve it to ids,
/// in order. A bare `/bucket` path needs only [`ResolutionStep::Bucket`];
/// anything nested needs both.
pub fn resolution_steps(segment_count: usize) -> Vec<ResolutionStep> {
    match segment_count {
        0 => Vec::new(),
        1 => vec![ResolutionStep::Bucket],
        _ => vec![ResolutionStep::Bucket, ResolutionStep::File],
    }
}

/// Mkdir has two distinct wire commands depending on depth (§4.9): a
/// depth-1 path creates a bucket, anything deeper is an object-put of
/// an empty body under the resolved parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MkdirKind {
    Bucket,
    ObjectPut,
}

pub fn classify_mkdir(segment_count: usize) -> MkdirKind {
    if segment_count <= 1 {
        MkdirKind::Bucket
    } else {
        MkdirKind::ObjectPut
    }
}

/// Delete and rmdir both require the target to already be resolved to
/// an id before the raw `rm`/`rmbucket` command can be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteKind {
    Object,
    Bucket,
}

pub fn delete_command(kind: DeleteKind, bucket: &str, resolved_id: &str) -> HelperCommand {
    match kind {
        DeleteKind::Object => HelperCommand::Remove { bucket: bucket.to_string(), id: resolved_id.to_string() },
        DeleteKind::Bucket => HelperCommand::RemoveBucket { id: resolved_id.to_string() },
    }
}
