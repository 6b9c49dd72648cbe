// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Two separate error vocabularies, deliberately kept apart:
//!
//! - [`Fail`] is the "why": a human-readable cause used for logging and
//!   for unit tests that want to match on a specific failure mode.
//! - [`ReplyCode`] is the "what the caller sees": the bitmask described in
//!   the external-interfaces section, which the host application branches
//!   on. Several bits may be set at once (e.g. `Error | CriticalError`).
//!
//! An operation's `send`/`parse_response` returns a [`Fail`] internally;
//! [`Fail::to_reply_code`] is called exactly once, at the point the error
//! crosses from the operation into `reset_operation`.

use bitflags::bitflags;
use custom_error::custom_error;

custom_error! {
    /// Internal failure cause. Never exposed to the host directly.
    #[derive(PartialEq, Clone)]
    pub Fail
    Io{details: String} = "I/O error: {details}",
    Protocol{details: String} = "protocol violation: {details}",
    Malformed{details: String} = "malformed request: {details}",
    BadFileDescriptor{details: String} = "invalid handle: {details}",
    NotConnected = "not connected",
    AlreadyConnected = "already connected",
    Busy = "engine busy",
    NotSupported{details: String} = "not supported: {details}",
    Timeout = "operation timed out",
    Disconnected{details: String} = "connection lost: {details}",
    PasswordFailed = "authentication failed",
    NotFound{details: String} = "not found: {details}",
    WriteFailed{details: String} = "local write failed: {details}",
    Canceled = "canceled by caller",
    Internal{details: String} = "internal error: {details}",
}

impl Fail {
    /// Maps an internal cause onto the externally-visible reply bitmask.
    /// Grounded in §7's "propagation" table: each local failure mode maps
    /// to exactly one canonical combination of bits.
    pub fn to_reply_code(&self) -> ReplyCode {
        match self {
            Fail::Io { .. } => ReplyCode::ERROR | ReplyCode::DISCONNECTED,
            Fail::Protocol { .. } => ReplyCode::ERROR | ReplyCode::SYNTAX_ERROR,
            Fail::Malformed { .. } => ReplyCode::ERROR | ReplyCode::SYNTAX_ERROR,
            Fail::BadFileDescriptor { .. } => ReplyCode::ERROR | ReplyCode::INTERNAL_ERROR,
            Fail::NotConnected => ReplyCode::ERROR | ReplyCode::NOT_CONNECTED,
            Fail::AlreadyConnected => ReplyCode::ERROR | ReplyCode::ALREADY_CONNECTED,
            Fail::Busy => ReplyCode::ERROR | ReplyCode::BUSY,
            Fail::NotSupported { .. } => ReplyCode::ERROR | ReplyCode::NOT_SUPPORTED,
            Fail::Timeout => ReplyCode::ERROR | ReplyCode::DISCONNECTED | ReplyCode::TIMEOUT,
            Fail::Disconnected { .. } => ReplyCode::ERROR | ReplyCode::DISCONNECTED,
            Fail::PasswordFailed => {
                ReplyCode::ERROR | ReplyCode::CRITICAL_ERROR | ReplyCode::PASSWORD_FAILED
            },
            Fail::NotFound { .. } => ReplyCode::ERROR | ReplyCode::NOT_FOUND,
            Fail::WriteFailed { .. } => {
                ReplyCode::ERROR | ReplyCode::CRITICAL_ERROR | ReplyCode::WRITE_FAILED
            },
            Fail::Canceled => ReplyCode::ERROR | ReplyCode::CANCELED | ReplyCode::DISCONNECTED,
            Fail::Internal { .. } => ReplyCode::ERROR | ReplyCode::INTERNAL_ERROR,
        }
    }
}

bitflags! {
    /// Reply codes, as described in §6: combinable bit flags reported to
    /// the host as the outcome of an operation.
    #[derive(Default)]
    pub struct ReplyCode: u32 {
        const OK                 = 0x0000;
        const WOULD_BLOCK        = 0x0001;
        const ERROR              = 0x0002;
        const CRITICAL_ERROR     = 0x0004;
        const CANCELED           = 0x0008;
        const DISCONNECTED       = 0x0010;
        const NOT_SUPPORTED      = 0x0020;
        const TIMEOUT            = 0x0040;
        const NOT_CONNECTED      = 0x0080;
        const ALREADY_CONNECTED  = 0x0100;
        const PASSWORD_FAILED    = 0x0200;
        const NOT_FOUND          = 0x0400;
        const WRITE_FAILED       = 0x0800;
        const INTERNAL_ERROR     = 0x1000;
        const SYNTAX_ERROR       = 0x2000;
        const BUSY               = 0x4000;
    }
}

impl ReplyCode {
    /// Codes after which `reset_operation` invokes the parent's
    /// `subcommand_result` directly rather than continuing to unwind
    /// (§4.5's "clean" codes).
    pub fn is_clean(self) -> bool {
        self == ReplyCode::OK
            || self.contains(ReplyCode::ERROR)
            || self.contains(ReplyCode::NOT_FOUND)
    }
}

pub type FailResult<T> = Result<T, Fail>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_failure_is_critical_and_combinable() {
        let code = Fail::PasswordFailed.to_reply_code();
        assert!(code.contains(ReplyCode::ERROR));
        assert!(code.contains(ReplyCode::CRITICAL_ERROR));
        assert!(code.contains(ReplyCode::PASSWORD_FAILED));
    }

    #[test]
    fn clean_codes_cover_ok_error_and_not_found() {
        assert!(ReplyCode::OK.is_clean());
        assert!(ReplyCode::ERROR.is_clean());
        assert!((ReplyCode::ERROR | ReplyCode::CRITICAL_ERROR).is_clean());
        assert!(ReplyCode::NOT_FOUND.is_clean());
        assert!(!ReplyCode::WOULD_BLOCK.is_clean());
    }
}
