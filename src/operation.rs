// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The operation stack (§4.5): a LIFO of polymorphic operations owned by
//! a control socket. `SendNextCommand`/`ResetOperation` are the two
//! algorithms that drive it; everything protocol-specific lives behind
//! the [`Operation`] trait so FTP/HTTP/SFTP/object-storage plug in
//! without this module knowing about wire formats.

use crate::oplock::LockToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Continue,
    Ok,
    WouldBlock,
    Error,
    CriticalError,
    NotFound,
    Disconnected,
}

impl OpStatus {
    fn is_terminal_for_reset(self) -> bool {
        matches!(
            self,
            OpStatus::Ok | OpStatus::Error | OpStatus::CriticalError | OpStatus::NotFound
        )
    }

    fn disconnects(self) -> bool {
        matches!(self, OpStatus::Disconnected | OpStatus::CriticalError)
    }
}

/// A single stack entry's capability set. Parent references are by stack
/// index, not a pointer back into the `Vec` — the stack can reallocate
/// freely and there is never a cycle.
pub trait Operation {
    fn send(&mut self) -> OpStatus;
    fn parse_response(&mut self) -> OpStatus;

    /// Called on the parent when a nested operation finishes. Default
    /// just forwards the child's result.
    fn subcommand_result(&mut self, prev_result: OpStatus, _finished: usize) -> OpStatus {
        prev_result
    }

    /// Called just before an operation is popped; may adjust the result
    /// it reports upward (e.g. to translate a child's `NotFound` into
    /// `Ok` for an operation that tolerates a missing file).
    fn reset(&mut self, result: OpStatus) -> OpStatus {
        result
    }

    fn is_top_level(&self) -> bool {
        false
    }

    fn waiting_for_async_reply(&self) -> bool {
        false
    }

    fn set_waiting_for_async_reply(&mut self, _waiting: bool) {}

    fn held_lock(&self) -> Option<LockToken> {
        None
    }

    /// Whether the protocol layer can send right now (false while a prior
    /// command is still in flight on the wire).
    fn can_send_now(&self) -> bool {
        true
    }
}

/// Outcome of driving the stack to completion or a blocking point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// The stack is empty; the engine should produce a final reply.
    Finished(OpStatus),
    /// Blocked waiting for I/O; caller should arm the timeout timer.
    WouldBlock,
    /// The connection must be torn down.
    Disconnect,
}

pub struct OperationStack {
    stack: Vec<Box<dyn Operation>>,
}

impl OperationStack {
    pub fn new() -> Self {
        OperationStack { stack: Vec::new() }
    }

    pub fn push(&mut self, op: Box<dyn Operation>) {
        self.stack.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn top_waiting(&self) -> bool {
        self.stack.last().map_or(false, |op| op.waiting_for_async_reply())
    }

    /// Loops while the stack is non-empty and the top isn't waiting on an
    /// async reply: if the protocol can't send yet, returns `WouldBlock`
    /// (caller arms the timeout); otherwise calls `top.send()` and
    /// interprets the result.
    pub fn send_next_command(&mut self) -> DriveOutcome {
        loop {
            let Some(top) = self.stack.last_mut() else {
                return DriveOutcome::Finished(OpStatus::Ok);
            };
            if top.waiting_for_async_reply() {
                return DriveOutcome::WouldBlock;
            }
            if !top.can_send_now() {
                return DriveOutcome::WouldBlock;
            }
            match top.send() {
                OpStatus::Continue => continue,
                OpStatus::WouldBlock => return DriveOutcome::WouldBlock,
                OpStatus::Ok => match self.reset_operation(OpStatus::Ok) {
                    DriveOutcome::Finished(OpStatus::Continue) => continue,
                    other => return other,
                },
                status @ (OpStatus::Error | OpStatus::Disconnected | OpStatus::CriticalError) => {
                    if status.disconnects() {
                        return DriveOutcome::Disconnect;
                    }
                    match self.reset_operation(status) {
                        DriveOutcome::Finished(OpStatus::Continue) => continue,
                        other => return other,
                    }
                },
                OpStatus::NotFound => match self.reset_operation(OpStatus::NotFound) {
                    DriveOutcome::Finished(OpStatus::Continue) => continue,
                    other => return other,
                },
            }
        }
    }

    /// Feeds a parsed reply to the operation currently on top.
    pub fn dispatch_reply(&mut self) -> DriveOutcome {
        let Some(top) = self.stack.last_mut() else {
            return DriveOutcome::Finished(OpStatus::Ok);
        };
        match top.parse_response() {
            OpStatus::Continue => self.send_next_command(),
            OpStatus::WouldBlock => DriveOutcome::WouldBlock,
            OpStatus::Ok => self.reset_operation(OpStatus::Ok),
            status @ (OpStatus::Error | OpStatus::Disconnected | OpStatus::CriticalError) => {
                if status.disconnects() {
                    DriveOutcome::Disconnect
                } else {
                    self.reset_operation(status)
                }
            },
            OpStatus::NotFound => self.reset_operation(OpStatus::NotFound),
        }
    }

    /// Pops the top, invokes its `reset`, and propagates the (possibly
    /// adjusted) result to the new top's `subcommand_result`, recursing
    /// until the stack empties or a result needs to bubble no further.
    pub fn reset_operation(&mut self, code: OpStatus) -> DriveOutcome {
        let Some(mut popped) = self.stack.pop() else {
            return DriveOutcome::Finished(code);
        };
        let adjusted = popped.reset(code);
        drop(popped);

        match self.stack.last_mut() {
            None => DriveOutcome::Finished(adjusted),
            Some(parent) => {
                if adjusted.is_terminal_for_reset() {
                    let finished_index = self.stack.len();
                    let result = parent.subcommand_result(adjusted, finished_index);
                    if matches!(result, OpStatus::Continue) {
                        DriveOutcome::Finished(OpStatus::Continue)
                    } else {
                        self.reset_operation(result)
                    }
                } else {
                    // e.g. WouldBlock: propagate unchanged rather than
                    // invoking subcommand_result.
                    self.reset_operation(adjusted)
                }
            },
        }
    }
}

impl Default for OperationStack {
    fn default() -> Self {
        Self::new()
    }
}
