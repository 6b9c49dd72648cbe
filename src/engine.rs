// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The engine façade (§4.10): the single entry point a host application
//! calls into. Accepts one command at a time, enforces connect/transfer
//! preconditions, arms the reconnect backoff timer on a non-critical
//! connect failure, and broadcasts path invalidation to every other live
//! engine in the process.

use crate::commands::{precondition_failure, Command, Notification};
use crate::config::EngineOptions;
use crate::control_socket::ControlSocket;
use crate::error::{Fail, ReplyCode};
use crate::globals;
use crate::operation::{DriveOutcome, OpStatus};
use crate::path::ServerPath;
use crate::protocols::ftp::{FtpChannel, RenameOperation, ReplyParser, SingleReplyOperation};
use crate::site::Site;
use crossbeam_channel::Sender;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(u64);

/// Process-global directory of live engines (§5, §4.10): lets a
/// mutation on one engine notify every other engine's control socket to
/// invalidate its current working directory, without any engine holding
/// a reference to another.
pub struct EngineRegistry {
    next_id: u64,
    senders: HashMap<EngineId, Sender<Notification>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        EngineRegistry { next_id: 1, senders: HashMap::new() }
    }

    pub fn register(&mut self, sender: Sender<Notification>) -> EngineId {
        let id = EngineId(self.next_id);
        self.next_id += 1;
        self.senders.insert(id, sender);
        id
    }

    pub fn unregister(&mut self, id: EngineId) {
        self.senders.remove(&id);
    }

    /// Notifies every engine except `origin` that `path` on `site` was
    /// mutated. A dead receiver (the engine already shut down) is
    /// dropped silently rather than treated as an error.
    pub fn broadcast_invalidate(&mut self, origin: EngineId, site: Site, path: ServerPath) {
        let mut dead = Vec::new();
        for (&id, sender) in self.senders.iter() {
            if id == origin {
                continue;
            }
            if sender.send(Notification::LogMessage { text: format!("invalidate {}:{}", site, path) }).is_err() {
                dead.push(id);
            }
        }
        for id in dead {
            self.senders.remove(&id);
        }
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconnectState {
    Idle,
    Armed { retry_count: u32 },
}

/// Reconnect backoff bookkeeping (§4.10): on a non-critical connect
/// failure where the site's retry policy allows it, arm a timer for
/// `max(1s, configured_delay - time_since_last_failure)` and bump the
/// retry count; a critical failure (e.g. bad password) or exceeding the
/// retry cap stops retrying outright.
pub struct ReconnectTimer {
    state: ReconnectState,
    max_retries: u32,
    delay: Duration,
}

impl ReconnectTimer {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        ReconnectTimer { state: ReconnectState::Idle, max_retries, delay }
    }

    /// Returns the delay to arm the retry timer for, or `None` if the
    /// engine should give up and report the failure outright.
    pub fn on_connect_failure(&mut self, critical: bool, time_since_last_failure: Duration) -> Option<Duration> {
        if critical {
            self.state = ReconnectState::Idle;
            return None;
        }
        let retry_count = match self.state {
            ReconnectState::Idle => 0,
            ReconnectState::Armed { retry_count } => retry_count,
        };
        if retry_count >= self.max_retries {
            self.state = ReconnectState::Idle;
            return None;
        }
        self.state = ReconnectState::Armed { retry_count: retry_count + 1 };
        let wait = self.delay.saturating_sub(time_since_last_failure).max(Duration::from_secs(1));
        Some(wait)
    }

    pub fn cancel(&mut self) {
        self.state = ReconnectState::Idle;
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, ReconnectState::Armed { .. })
    }
}

impl Default for ReconnectTimer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY)
    }
}

/// The façade itself. `submit` is the only entry point a host thread
/// calls; everything else happens on the loop thread that owns `self`
/// and is driven by [`crate::eventloop`].
pub struct Engine {
    id: EngineId,
    control: ControlSocket,
    connected: bool,
    notifications: Sender<Notification>,
    reconnect: ReconnectTimer,
    pending_site: Option<Site>,
    /// Outbound/inbound mailbox shared with whatever FTP operation is
    /// currently on `control.stack` — created lazily on first use.
    channel: Option<Rc<RefCell<FtpChannel>>>,
    parser: ReplyParser,
    /// Paths to invalidate on every other engine once the in-flight
    /// mutating command completes successfully (§4.10, P8).
    pending_mutation: Vec<ServerPath>,
}

impl Engine {
    pub fn new(id: EngineId, notifications: Sender<Notification>) -> Self {
        Self::with_options(id, notifications, EngineOptions::default())
    }

    /// Builds an engine with explicit reconnect/logging/rate-limit
    /// knobs (§1 Expansion's `EngineOptions`) instead of the defaults.
    pub fn with_options(id: EngineId, notifications: Sender<Notification>, options: EngineOptions) -> Self {
        Engine {
            id,
            control: ControlSocket::new(),
            connected: false,
            notifications,
            reconnect: ReconnectTimer::new(options.max_reconnect_retries, options.reconnect_delay),
            pending_site: None,
            channel: None,
            parser: ReplyParser::new(),
            pending_mutation: Vec::new(),
        }
    }

    pub fn id(&self) -> EngineId {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn channel(&mut self) -> Rc<RefCell<FtpChannel>> {
        self.channel.get_or_insert_with(|| Rc::new(RefCell::new(FtpChannel::default()))).clone()
    }

    /// Checks preconditions and, if satisfied, accepts `command` for
    /// dispatch. `Connect` only records the pending site (the actual
    /// connect/login handshake is driven by the transport layer once the
    /// socket is open); a mutating command pushes a real FTP operation
    /// onto `control.stack` and drives it immediately via
    /// [`ControlSocket::send_next_command`] — further progress then comes
    /// from [`Engine::feed_bytes`] as replies arrive on the wire.
    pub fn submit(&mut self, command: Command) -> Result<(), Fail> {
        if let Some(fail) = precondition_failure(&command, self.connected) {
            return Err(fail);
        }
        match command {
            Command::Connect { site } => {
                self.pending_site = Some(site);
            },
            Command::Delete { path, name } => {
                let line = format!("DELE {}", path.format_filename(&name, false));
                let channel = self.channel();
                self.control.stack.push(Box::new(SingleReplyOperation::new(channel, line)));
                self.pending_mutation = vec![path];
                let outcome = self.control.send_next_command();
                self.handle_drive_outcome(outcome);
            },
            Command::RemoveDir { path, name } => {
                let line = format!("RMD {}", path.format_filename(&name, false));
                let channel = self.channel();
                self.control.stack.push(Box::new(SingleReplyOperation::new(channel, line)));
                self.pending_mutation = vec![path];
                let outcome = self.control.send_next_command();
                self.handle_drive_outcome(outcome);
            },
            Command::Mkdir { path } => {
                let line = format!("MKD {}", path);
                let channel = self.channel();
                self.control.stack.push(Box::new(SingleReplyOperation::new(channel, line)));
                let parent = path.parent().unwrap_or(path);
                self.pending_mutation = vec![parent];
                let outcome = self.control.send_next_command();
                self.handle_drive_outcome(outcome);
            },
            Command::Rename { from_path, from_name, to_path, to_name } => {
                let from_line = format!("RNFR {}", from_path.format_filename(&from_name, false));
                let to_line = format!("RNTO {}", to_path.format_filename(&to_name, false));
                let channel = self.channel();
                self.control.stack.push(Box::new(RenameOperation::new(channel, from_line, to_line)));
                self.pending_mutation = vec![from_path, to_path];
                let outcome = self.control.send_next_command();
                self.handle_drive_outcome(outcome);
            },
            _ => {},
        }
        Ok(())
    }

    /// Feeds newly-read bytes off the FTP control connection: parses
    /// every complete reply and drives the operation stack with it in
    /// turn, returning the reply code of each top-level operation that
    /// finished as a result (§4.5, §4.6).
    pub fn feed_bytes(&mut self, data: &[u8]) -> Result<Vec<ReplyCode>, Fail> {
        let replies = self.parser.feed(data).map_err(|_| Fail::Protocol { details: "reply line too long".into() })?;
        let mut finished = Vec::new();
        for reply in replies {
            if let Some(channel) = &self.channel {
                channel.borrow_mut().pending_reply = Some(reply);
            }
            let outcome = self.control.dispatch_reply();
            if let Some(code) = self.handle_drive_outcome(outcome) {
                finished.push(code);
            }
        }
        Ok(finished)
    }

    /// Bytes the top FTP operation queued for the wire; the host drains
    /// this after every `submit`/`feed_bytes` call and writes it to the
    /// actual transport.
    pub fn poll_output(&mut self) -> Option<Vec<u8>> {
        self.channel.as_ref().and_then(|c| c.borrow_mut().outbox.pop_front())
    }

    /// Common tail of `submit`/`feed_bytes`: reports a finished operation
    /// to the host and, on success, broadcasts its queued mutation paths;
    /// tears the connection down on `Disconnect`.
    fn handle_drive_outcome(&mut self, outcome: DriveOutcome) -> Option<ReplyCode> {
        match outcome {
            DriveOutcome::Finished(status) => Some(self.conclude_operation(status)),
            DriveOutcome::Disconnect => {
                self.mark_disconnected(ReplyCode::DISCONNECTED);
                None
            },
            DriveOutcome::WouldBlock => None,
        }
    }

    fn conclude_operation(&mut self, status: OpStatus) -> ReplyCode {
        let code = match status {
            OpStatus::Ok => ReplyCode::OK,
            OpStatus::NotFound => ReplyCode::ERROR | ReplyCode::NOT_FOUND,
            _ => ReplyCode::ERROR,
        };
        let _ = self.notifications.send(Notification::OperationComplete { code });
        let paths = std::mem::take(&mut self.pending_mutation);
        if status == OpStatus::Ok && !paths.is_empty() {
            let mut registry = globals::ENGINE_REGISTRY.lock().unwrap();
            for path in paths {
                self.broadcast_mutation(&mut registry, path);
            }
        }
        code
    }

    pub fn mark_connected(&mut self) {
        self.connected = true;
        self.control.site = self.pending_site.take();
        self.reconnect.cancel();
        log::info!("engine {:?} connected", self.id);
        let _ = self.notifications.send(Notification::Connected);
    }

    pub fn mark_disconnected(&mut self, reason: ReplyCode) {
        self.connected = false;
        log::warn!("engine {:?} disconnected: {:?}", self.id, reason);
        let _ = self.notifications.send(Notification::Disconnected { reason });
    }

    /// Handles a connect failure: records it, and if the retry policy
    /// allows, arms the reconnect timer and emits a `Reconnecting`
    /// notification with the computed delay.
    pub fn on_connect_failure(&mut self, critical: bool, now: Instant, time_since_last_failure: Duration) {
        if let Some(site) = self.pending_site.clone() {
            globals::FAILED_LOGINS.lock().unwrap().record(site, now, critical);
        }
        match self.reconnect.on_connect_failure(critical, time_since_last_failure) {
            Some(delay) => {
                log::debug!("engine {:?} will retry in {:?}", self.id, delay);
                let _ = self.notifications.send(Notification::Reconnecting { delay });
            },
            None => {
                log::error!("engine {:?} giving up on connect (critical={})", self.id, critical);
                self.pending_site = None;
            },
        }
    }

    /// Cancels any in-flight connect/reconnect attempt.
    pub fn cancel(&mut self) {
        self.reconnect.cancel();
        self.pending_site = None;
        log::debug!("engine {:?} canceled pending connect", self.id);
        let _ = self.notifications.send(Notification::Canceled);
    }

    /// Called after a mutating command (rename/delete/mkdir/...)
    /// completes, to propagate `invalidate_cwd` to every other engine.
    pub fn broadcast_mutation(&self, registry: &mut EngineRegistry, path: ServerPath) {
        if let Some(site) = &self.control.site {
            registry.broadcast_invalidate(self.id, site.clone(), path);
        }
    }

    /// Applies an incoming invalidation from another engine: if the
    /// path covers our current working directory, clear it; if we are
    /// mid-operation, defer until `reset_operation` by flagging it
    /// instead (§4.10).
    pub fn receive_invalidation(&mut self, site: &Site, path: &ServerPath) {
        let matches = match (&self.control.site, &self.control.working_directory) {
            (Some(s), Some(wd)) => s.is_same_resource(site) && path.is_parent_of(wd, true, true),
            _ => false,
        };
        if !matches {
            return;
        }
        if self.control.stack.is_empty() {
            self.control.working_directory = None;
        } else {
            self.control.invalidate_current_path = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathFormat;
    use crate::site::Protocol;
    use crossbeam_channel::unbounded;

    fn site() -> Site {
        Site::new("host", 21, Protocol::Ftp)
    }

    #[test]
    fn connect_while_connected_is_rejected_by_submit() {
        let (tx, _rx) = unbounded();
        let mut engine = Engine::new(EngineId(1), tx);
        engine.mark_connected();
        let result = engine.submit(Command::Connect { site: site() });
        assert!(matches!(result, Err(Fail::AlreadyConnected)));
    }

    #[test]
    fn non_connect_command_rejected_when_not_connected() {
        let (tx, _rx) = unbounded();
        let mut engine = Engine::new(EngineId(1), tx);
        let result = engine.submit(Command::Disconnect);
        assert!(matches!(result, Err(Fail::NotConnected)));
    }

    #[test]
    fn reconnect_timer_arms_with_floor_of_one_second() {
        let mut timer = ReconnectTimer::new(3, Duration::from_secs(5));
        let delay = timer.on_connect_failure(false, Duration::from_secs(10)).unwrap();
        assert_eq!(delay, Duration::from_secs(1));
        assert!(timer.is_armed());
    }

    #[test]
    fn reconnect_timer_stops_after_max_retries() {
        let mut timer = ReconnectTimer::new(1, Duration::from_secs(5));
        assert!(timer.on_connect_failure(false, Duration::from_secs(0)).is_some());
        assert!(timer.on_connect_failure(false, Duration::from_secs(0)).is_none());
    }

    #[test]
    fn critical_failure_never_arms_retry() {
        let mut timer = ReconnectTimer::new(3, Duration::from_secs(5));
        assert!(timer.on_connect_failure(true, Duration::from_secs(0)).is_none());
        assert!(!timer.is_armed());
    }

    #[test]
    fn cancel_clears_armed_timer() {
        let mut timer = ReconnectTimer::new(3, Duration::from_secs(5));
        timer.on_connect_failure(false, Duration::from_secs(0));
        timer.cancel();
        assert!(!timer.is_armed());
    }

    /// §4.10 / P8: a mutation on one engine invalidates another engine's
    /// matching working directory.
    #[test]
    fn registry_broadcasts_to_other_engines_only() {
        let (tx_a, rx_a) = unbounded();
        let (tx_b, rx_b) = unbounded();
        let mut registry = EngineRegistry::new();
        let id_a = registry.register(tx_a);
        let _id_b = registry.register(tx_b);

        registry.broadcast_invalidate(id_a, site(), ServerPath::root(PathFormat::Unix));

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn invalidation_clears_working_directory_when_idle() {
        let (tx, _rx) = unbounded();
        let mut engine = Engine::new(EngineId(1), tx);
        engine.control.site = Some(site());
        let path = ServerPath::root(PathFormat::Unix).change_path("/a/b");
        engine.control.working_directory = Some(path.clone());

        engine.receive_invalidation(&site(), &path);
        assert!(engine.control.working_directory.is_none());
    }

    #[test]
    fn invalidation_is_deferred_while_an_operation_is_in_flight() {
        let (tx, _rx) = unbounded();
        let mut engine = Engine::new(EngineId(1), tx);
        engine.control.site = Some(site());
        let path = ServerPath::root(PathFormat::Unix).change_path("/a/b");
        engine.control.working_directory = Some(path.clone());
        struct Noop;
        impl crate::operation::Operation for Noop {
            fn send(&mut self) -> crate::operation::OpStatus {
                crate::operation::OpStatus::WouldBlock
            }
            fn parse_response(&mut self) -> crate::operation::OpStatus {
                crate::operation::OpStatus::Ok
            }
        }
        engine.control.stack.push(Box::new(Noop));

        engine.receive_invalidation(&site(), &path);
        assert!(engine.control.working_directory.is_some());
        assert!(engine.control.invalidate_current_path);
    }
}
