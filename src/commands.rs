// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Host-facing command/notification vocabulary (§6, §4.10). Plain enums
//! sent through an internal `crossbeam_channel` from foreign threads into
//! the event loop — the façade accepts one command at a time.

use crate::entry::DirectoryListing;
use crate::error::{Fail, ReplyCode};
use crate::path::ServerPath;
use crate::site::Site;
use crate::transfer_status::TransferSnapshot;

#[derive(Debug, Clone)]
pub enum FileExistsAction {
    Overwrite,
    OverwriteNewer,
    OverwriteSize,
    OverwriteSizeOrNewer,
    Resume,
    Rename(String),
    Skip,
}

#[derive(Debug, Clone)]
pub enum Command {
    Connect { site: Site },
    Disconnect,
    List { path: ServerPath },
    Transfer { local_path: String, remote_path: ServerPath, upload: bool, resume: bool },
    RawCommand { line: String },
    Delete { path: ServerPath, name: String },
    RemoveDir { path: ServerPath, name: String },
    Mkdir { path: ServerPath },
    Rename { from_path: ServerPath, from_name: String, to_path: ServerPath, to_name: String },
    Chmod { path: ServerPath, name: String, permissions: String },
    HttpRequest { url: String },
    Cancel,
    AnswerFileExists { action: FileExistsAction },
    AnswerPassword { password: String },
}

#[derive(Debug, Clone)]
pub enum Notification {
    Connected,
    Disconnected { reason: ReplyCode },
    ListingComplete { listing: DirectoryListing },
    TransferStatus { snapshot: TransferSnapshot },
    OperationComplete { code: ReplyCode },
    LogMessage { text: String },
    AskPassword { challenge_id: u64 },
    AskFileExists { local_size: Option<u64>, remote_size: Option<u64> },
    Reconnecting { delay: std::time::Duration },
    Canceled,
}

/// The façade's precondition check (§4.10): returns the rejection reply
/// if `command` can't be accepted in `connected` state right now, or
/// `None` if it may proceed.
pub fn precondition_failure(command: &Command, connected: bool) -> Option<Fail> {
    match command {
        Command::Connect { .. } if connected => Some(Fail::AlreadyConnected),
        Command::Connect { .. } | Command::Cancel => None,
        _ if !connected => Some(Fail::NotConnected),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::Protocol;

    #[test]
    fn connect_while_connected_is_rejected() {
        let cmd = Command::Connect { site: Site::new("h", 21, Protocol::Ftp) };
        assert!(matches!(precondition_failure(&cmd, true), Some(Fail::AlreadyConnected)));
    }

    #[test]
    fn non_connect_command_requires_connection() {
        let cmd = Command::Disconnect;
        assert!(matches!(precondition_failure(&cmd, false), Some(Fail::NotConnected)));
        assert!(precondition_failure(&cmd, true).is_none());
    }

    #[test]
    fn cancel_is_always_accepted() {
        assert!(precondition_failure(&Command::Cancel, false).is_none());
        assert!(precondition_failure(&Command::Cancel, true).is_none());
    }
}
