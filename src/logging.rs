// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Logging (§4.13): notifications are queued by type; debug/listing
//! entries may be suppressed until an error occurs, at which point the
//! whole queue flushes ahead of the error so the host sees full context.
//! File rotation is delegated to `flexi_logger`'s size-based `Criterion`;
//! the cross-process coordination it doesn't provide is layered on with
//! an `fs2` advisory lock around the rotation check.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

pub const MAX_ROTATION_SIZE: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Debug,
    Listing,
    Status,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogMessage {
    pub kind: MessageKind,
    pub text: String,
}

/// Buffers `Debug`/`Listing` entries until an `Error` arrives, at which
/// point the whole buffer (plus the error) is released for delivery.
#[derive(Default)]
pub struct LogQueue {
    suppressed: bool,
    buffered: Vec<LogMessage>,
}

impl LogQueue {
    pub fn new(suppress_debug_and_listing: bool) -> Self {
        LogQueue { suppressed: suppress_debug_and_listing, buffered: Vec::new() }
    }

    /// Returns the messages that should be delivered now (empty unless
    /// this message is undeferred, or an error just flushed the queue).
    pub fn push(&mut self, message: LogMessage) -> Vec<LogMessage> {
        match message.kind {
            MessageKind::Debug | MessageKind::Listing if self.suppressed => {
                self.buffered.push(message);
                Vec::new()
            },
            MessageKind::Error => {
                let mut flushed = std::mem::take(&mut self.buffered);
                flushed.push(message);
                flushed
            },
            _ => vec![message],
        }
    }
}

/// Cross-process rotation coordination: an advisory exclusive lock on a
/// sentinel file beside the log, held only long enough to check and, if
/// needed, perform the rotation — at most one process rotates per cycle.
pub struct RotationGuard {
    lock_path: PathBuf,
}

impl RotationGuard {
    pub fn new(log_path: &Path) -> Self {
        RotationGuard { lock_path: log_path.with_extension("rotate.lock") }
    }

    pub fn with_lock<R>(&self, f: impl FnOnce() -> R) -> io::Result<R> {
        let file = OpenOptions::new().create(true).write(true).open(&self.lock_path)?;
        file.lock_exclusive()?;
        let result = f();
        file.unlock()?;
        Ok(result)
    }
}

/// Clamps a configured rotation size to `[1 byte, 2 GiB]` per the spec.
pub fn clamp_rotation_size(requested: u64) -> u64 {
    requested.clamp(1, MAX_ROTATION_SIZE)
}

pub fn init(log_dir: &Path, rotation_size: u64) -> Result<LoggerHandle, flexi_logger::FlexiLoggerError> {
    let size = clamp_rotation_size(rotation_size);
    Logger::try_with_str("info")?
        .log_to_file(FileSpec::default().directory(log_dir))
        .rotate(Criterion::Size(size), Naming::Numbers, Cleanup::KeepLogFiles(10))
        .start()
}
