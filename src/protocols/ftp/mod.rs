// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! FTP control socket (§4.6): line-based command/reply parsing, the
//! LOGON state machine, the RAWTRANSFER data-channel sub-operation, and
//! the listing/file-transfer operations built on top of the base
//! [`crate::control_socket::ControlSocket`].

pub mod listing;
pub mod login;
pub mod transfer;

use crate::operation::{OpStatus, Operation};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Maximum line length (§4.6): a server that exceeds this closes the
/// connection.
pub const MAX_LINE_LENGTH: usize = 65_536;

/// One parsed FTP reply. Multi-line responses (`NNN-...` ... `NNN ...`)
/// are collected into a single `FtpReply` whose `lines` holds every
/// continuation line and whose `text` holds only the final line's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpReply {
    pub code: u16,
    pub text: String,
    pub lines: Vec<String>,
}

impl FtpReply {
    pub fn is_preliminary(&self) -> bool {
        self.code / 100 == 1
    }

    pub fn is_success(&self) -> bool {
        matches!(self.code / 100, 2 | 3)
    }
}

/// Accumulates raw bytes off the wire into logical lines (split on CR,
/// LF, or NUL) and assembles multi-line replies. A line longer than
/// [`MAX_LINE_LENGTH`] is reported as a fatal framing error — the caller
/// closes the connection.
#[derive(Default)]
pub struct ReplyParser {
    buffer: Vec<u8>,
    pending_multiline: Option<(u16, Vec<String>)>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum FeedError {
    LineTooLong,
}

impl ReplyParser {
    pub fn new() -> Self {
        ReplyParser::default()
    }

    /// Appends newly-read bytes and extracts as many complete replies as
    /// are now available.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<FtpReply>, FeedError> {
        self.buffer.extend_from_slice(data);
        let mut replies = Vec::new();
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\r' || b == b'\n' || b == 0) else {
                if self.buffer.len() > MAX_LINE_LENGTH {
                    return Err(FeedError::LineTooLong);
                }
                break;
            };
            let line_bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            // Drop a trailing LF that follows a CR we already consumed.
            if self.buffer.first() == Some(&b'\n') && line_bytes.last() == Some(&b'\r') {
                self.buffer.remove(0);
            }
            let line_len = line_bytes.len().saturating_sub(1);
            if line_len > MAX_LINE_LENGTH {
                return Err(FeedError::LineTooLong);
            }
            let line = String::from_utf8_lossy(&line_bytes[..line_len]).to_string();
            if line.is_empty() {
                continue;
            }
            if let Some(reply) = self.consume_line(line) {
                replies.push(reply);
            }
        }
        Ok(replies)
    }

    fn consume_line(&mut self, line: String) -> Option<FtpReply> {
        if let Some((code, lines)) = &mut self.pending_multiline {
            let code_str = code.to_string();
            if line.starts_with(&code_str) && line.as_bytes().get(3) == Some(&b' ') {
                lines.push(line[4..].to_string());
                let code = *code;
                let lines = std::mem::take(lines);
                self.pending_multiline = None;
                let text = lines.last().cloned().unwrap_or_default();
                return Some(FtpReply { code, text, lines });
            }
            lines.push(line);
            return None;
        }

        if line.len() >= 4 {
            if let Ok(code) = line[..3].parse::<u16>() {
                match line.as_bytes()[3] {
                    b' ' => {
                        let text = line[4..].to_string();
                        return Some(FtpReply { code, lines: vec![text.clone()], text });
                    },
                    b'-' => {
                        self.pending_multiline = Some((code, vec![line[4..].to_string()]));
                        return None;
                    },
                    _ => {},
                }
            }
        }
        // Tolerate a line that doesn't parse as a reply code by ignoring
        // it (informational banner noise, stray CRLF) rather than
        // treating every byte as a protocol violation.
        None
    }
}

/// Tracks commands sent versus final (non-1xx) replies received (§4.6).
/// `replies_to_skip` absorbs stale replies after a cancellation so the
/// next operation doesn't misread them as its own.
#[derive(Default)]
pub struct PendingReplies {
    pending: u32,
    replies_to_skip: u32,
}

impl PendingReplies {
    pub fn command_sent(&mut self) {
        self.pending += 1;
    }

    /// Feeds one reply; returns `true` if it should be routed to the
    /// current operation, `false` if it was consumed as a stale skip or
    /// a preliminary `1xx`.
    pub fn reply_received(&mut self, reply: &FtpReply) -> bool {
        if reply.is_preliminary() {
            return self.replies_to_skip == 0;
        }
        if self.replies_to_skip > 0 {
            self.replies_to_skip -= 1;
            self.pending = self.pending.saturating_sub(1);
            return false;
        }
        self.pending = self.pending.saturating_sub(1);
        true
    }

    /// Called on cancellation/reset: remaining in-flight replies become
    /// skippable noise.
    pub fn reset(&mut self) {
        self.replies_to_skip = self.pending;
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }
}

/// Per-server capability flags discovered over the connection's lifetime
/// (FEAT output, resume probing, timezone discovery). Not persisted
/// across processes — matches §6's "directory and path caches are
/// in-memory only" note extended to connection capabilities.
#[derive(Debug, Clone, Default)]
pub struct ServerCapabilities {
    pub supports_epsv: bool,
    pub supports_mlsd: bool,
    pub supports_mfmt: bool,
    pub supports_utf8: bool,
    pub supports_clnt: bool,
    pub supports_size: bool,
    pub supports_mdtm: bool,
    /// Set once a `RESUMETEST` at an offset over 2 GiB has been run,
    /// whatever the outcome — the test is performed at most once.
    pub resume_2gb_tested: bool,
    pub resume_2gb_ok: bool,
    pub resume_4gb_tested: bool,
    pub resume_4gb_bug: bool,
    pub timezone_offset_minutes: Option<i32>,
}

impl ServerCapabilities {
    pub fn apply_feat_line(&mut self, line: &str) {
        let feature = line.trim().to_ascii_uppercase();
        match feature.split_whitespace().next().unwrap_or("") {
            "EPSV" => self.supports_epsv = true,
            "MLST" | "MLSD" => self.supports_mlsd = true,
            "MFMT" => self.supports_mfmt = true,
            "UTF8" => self.supports_utf8 = true,
            "CLNT" => self.supports_clnt = true,
            "SIZE" => self.supports_size = true,
            "MDTM" => self.supports_mdtm = true,
            _ => {},
        }
    }
}

/// The randomised keep-alive command choice (§4.6): sent every 30s of
/// idle time up to a 30-minute ceiling, as long as no reply is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveCommand {
    Noop,
    TypeAscii,
    TypeBinary,
    Pwd,
}

impl KeepAliveCommand {
    pub fn as_wire(self) -> &'static str {
        match self {
            KeepAliveCommand::Noop => "NOOP",
            KeepAliveCommand::TypeAscii => "TYPE A",
            KeepAliveCommand::TypeBinary => "TYPE I",
            KeepAliveCommand::Pwd => "PWD",
        }
    }

    /// Picks a command using `choice` (caller supplies randomness, e.g.
    /// `rand::random::<u8>() % 3`), so the selection itself stays
    /// deterministic and testable.
    pub fn pick(choice: u8) -> Self {
        match choice % 3 {
            0 => KeepAliveCommand::Noop,
            1 => KeepAliveCommand::TypeBinary,
            _ => KeepAliveCommand::Pwd,
        }
    }
}

/// Decides whether a keep-alive should fire: only when idle and no reply
/// is currently outstanding (stray replies would otherwise be misrouted).
pub fn should_send_keepalive(idle: std::time::Duration, pending_replies: u32) -> bool {
    pending_replies == 0 && idle >= std::time::Duration::from_secs(30)
}

/// A queue of outbound command lines awaiting flush to the transport —
/// buffered while the socket isn't writable, per §4.6's "writes are
/// buffered when the socket is not writable".
#[derive(Default)]
pub struct WriteQueue {
    lines: VecDeque<Vec<u8>>,
}

impl WriteQueue {
    pub fn push(&mut self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.extend_from_slice(b"\r\n");
        self.lines.push_back(bytes);
    }

    pub fn pop_front(&mut self) -> Option<Vec<u8>> {
        self.lines.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Shared mailbox between an engine and whichever FTP operation is on
/// top of its stack (§4.5, §4.6): `send()` enqueues an outbound line
/// here, and the engine deposits the next parsed reply before handing
/// control back to [`crate::operation::OperationStack::dispatch_reply`].
#[derive(Default)]
pub struct FtpChannel {
    pub outbox: WriteQueue,
    pub pending_reply: Option<FtpReply>,
}

/// A top-level operation that sends one command line and completes on
/// the first reply (§4.6): grounded in the original's `CFileTransferDelete`/
/// `CFileTransferRmdir`/`CFileTransferMkdir` commands, none of which need
/// more than a single `DELE`/`RMD`/`MKD` round trip.
pub struct SingleReplyOperation {
    channel: Rc<RefCell<FtpChannel>>,
    line: Option<String>,
    waiting: bool,
}

impl SingleReplyOperation {
    pub fn new(channel: Rc<RefCell<FtpChannel>>, line: String) -> Self {
        SingleReplyOperation { channel, line: Some(line), waiting: false }
    }
}

impl Operation for SingleReplyOperation {
    fn send(&mut self) -> OpStatus {
        if let Some(line) = self.line.take() {
            self.channel.borrow_mut().outbox.push(&line);
            self.waiting = true;
            return OpStatus::WouldBlock;
        }
        match self.channel.borrow_mut().pending_reply.take() {
            Some(reply) if reply.is_success() => OpStatus::Ok,
            Some(_) => OpStatus::Error,
            None => OpStatus::WouldBlock,
        }
    }

    fn parse_response(&mut self) -> OpStatus {
        self.waiting = false;
        OpStatus::Continue
    }

    fn waiting_for_async_reply(&self) -> bool {
        self.waiting
    }

    fn is_top_level(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenamePhase {
    From,
    To,
}

/// The `RNFR`/`RNTO` two-step rename (§4.6): `RNTO` is withheld until
/// `RNFR` is acknowledged, matching the original's `CFtpRenameOpData`.
pub struct RenameOperation {
    channel: Rc<RefCell<FtpChannel>>,
    from_line: String,
    to_line: String,
    phase: RenamePhase,
    sent_current: bool,
    waiting: bool,
}

impl RenameOperation {
    pub fn new(channel: Rc<RefCell<FtpChannel>>, from_line: String, to_line: String) -> Self {
        RenameOperation { channel, from_line, to_line, phase: RenamePhase::From, sent_current: false, waiting: false }
    }
}

impl Operation for RenameOperation {
    fn send(&mut self) -> OpStatus {
        if !self.sent_current {
            let line = match self.phase {
                RenamePhase::From => self.from_line.clone(),
                RenamePhase::To => self.to_line.clone(),
            };
            self.channel.borrow_mut().outbox.push(&line);
            self.sent_current = true;
            self.waiting = true;
            return OpStatus::WouldBlock;
        }
        match self.channel.borrow_mut().pending_reply.take() {
            Some(reply) if reply.is_success() => match self.phase {
                RenamePhase::From => {
                    self.phase = RenamePhase::To;
                    self.sent_current = false;
                    OpStatus::Continue
                },
                RenamePhase::To => OpStatus::Ok,
            },
            Some(_) => OpStatus::Error,
            None => OpStatus::WouldBlock,
        }
    }

    fn parse_response(&mut self) -> OpStatus {
        self.waiting = false;
        OpStatus::Continue
    }

    fn waiting_for_async_reply(&self) -> bool {
        self.waiting
    }

    fn is_top_level(&self) -> bool {
        true
    }
}
