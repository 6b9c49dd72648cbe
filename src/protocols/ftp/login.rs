// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The LOGON state machine (§4.6): `CONNECT → WELCOME → AUTH_TLS →
//! AUTH_SSL → AUTH_WAIT → SECURITY → LOGON → SYST → FEAT → CLNT →
//! OPTSUTF8 → PBSZ → PROT → OPTSMLST → CUSTOMCOMMANDS → DONE`, with
//! states skipped based on protocol and server capability. `LOGON`
//! itself runs a login sequence built from the configured FTP proxy
//! type.

use super::{FtpReply, ServerCapabilities};
use crate::site::{LoginCommand, LoginCommandKind, Site};

/// FTP proxy type (§4.6): the template used to build the login sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyType {
    None,
    /// `USER user@host` / `PASS ...`
    UserAtHost,
    /// `SITE host` before `USER`.
    SiteHost,
    /// `OPEN host` before `USER`.
    OpenHost,
    /// Arbitrary user-supplied sequence, `%h %u %p %s %w %a` substituted.
    Custom(Vec<String>),
}

/// Substitutes `%h` (host), `%u` (user), `%p` (password), `%s` (host:port),
/// `%w` (account/window field), `%a` (anonymous-login email address) into
/// a custom login-sequence template line. Grounded in the original
/// `logon.cpp`'s `PrepareLoginSequence` substitution table; implemented
/// as a single linear scan rather than a regex since the substitution set
/// is fixed and small.
pub fn substitute_template(template: &str, site: &Site, password: &str, account: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('h') => out.push_str(&site.host),
            Some('u') => out.push_str(&site.user),
            Some('p') => out.push_str(password),
            Some('s') => out.push_str(&format!("{}:{}", site.host, site.port)),
            Some('w') => out.push_str(account),
            Some('a') => out.push_str("anonymous@example.com"),
            Some(other) => {
                out.push('%');
                out.push(other);
            },
            None => out.push('%'),
        }
    }
    out
}

/// Builds the ordered login sequence for `proxy` (§4.6). Proxy types 2/3
/// prepend a `SITE`/`OPEN` command ahead of the normal `USER`/`PASS`
/// pair; type 1 folds the target host into the `USER` argument; type 4
/// replaces the whole sequence with a user-supplied template.
pub fn build_login_sequence(proxy: &ProxyType, site: &Site) -> Vec<LoginCommand> {
    let user_cmd = |optional: bool| LoginCommand {
        kind: LoginCommandKind::User,
        optional,
        hide_arguments: false,
    };
    let pass_cmd = || LoginCommand { kind: LoginCommandKind::Pass, optional: false, hide_arguments: true };

    match proxy {
        ProxyType::None | ProxyType::UserAtHost => vec![user_cmd(false), pass_cmd()],
        ProxyType::SiteHost => vec![
            LoginCommand { kind: LoginCommandKind::Other(format!("SITE {}", site.host)), optional: false, hide_arguments: false },
            user_cmd(false),
            pass_cmd(),
        ],
        ProxyType::OpenHost => vec![
            LoginCommand { kind: LoginCommandKind::Other(format!("OPEN {}", site.host)), optional: false, hide_arguments: false },
            user_cmd(false),
            pass_cmd(),
        ],
        ProxyType::Custom(lines) => lines
            .iter()
            .map(|l| LoginCommand { kind: LoginCommandKind::Other(l.clone()), optional: false, hide_arguments: true })
            .collect(),
    }
}

/// Renders one login-sequence entry to the literal command line sent on
/// the wire. `UserAtHost` folds `user@host` into the `USER` argument;
/// everything else sends its argument unmodified.
fn render_command(entry: &LoginCommand, proxy: &ProxyType, site: &Site, password: &str) -> String {
    match &entry.kind {
        LoginCommandKind::User => {
            if matches!(proxy, ProxyType::UserAtHost) {
                format!("USER {}@{}", site.user, site.host)
            } else {
                format!("USER {}", site.user)
            }
        },
        LoginCommandKind::Pass => format!("PASS {}", password),
        LoginCommandKind::Acct => String::from("ACCT"),
        LoginCommandKind::Other(line) => substitute_template(line, site, password, ""),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogonState {
    Connect,
    Welcome,
    AuthTls,
    AuthSsl,
    AuthWait,
    Security,
    Logon,
    Syst,
    Feat,
    Clnt,
    OptsUtf8,
    Pbsz,
    Prot,
    OptsMlst,
    CustomCommands,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    None,
    Implicit,
    Explicit,
}

#[derive(Debug)]
pub enum LogonOutcome {
    /// Send this command line next, stay in the same logical step.
    SendAndWait(String),
    /// Logon proceeded without sending anything (e.g. a skipped state);
    /// the driver should immediately ask again.
    Advance,
    Success,
    /// Password-stage 5xx failure: critical, sets password-failed.
    PasswordFailed,
    Failure(String),
    /// Multi-line interactive challenge accumulated into one prompt.
    InteractivePrompt(String),
}

pub struct LogonMachine {
    pub state: LogonState,
    tls: TlsMode,
    proxy: ProxyType,
    post_login_commands: Vec<String>,
    sequence: Vec<LoginCommand>,
    seq_index: usize,
    custom_index: usize,
    password: String,
    utf8_requested: bool,
    utf8_retry_without: bool,
    interactive_accum: Vec<String>,
}

impl LogonMachine {
    pub fn new(site: &Site, password: String, tls: TlsMode, proxy: ProxyType) -> Self {
        let sequence = build_login_sequence(&proxy, site);
        LogonMachine {
            state: LogonState::Connect,
            tls,
            proxy,
            post_login_commands: site.post_login_commands.clone(),
            sequence,
            seq_index: 0,
            custom_index: 0,
            password,
            utf8_requested: true,
            utf8_retry_without: false,
            interactive_accum: Vec::new(),
        }
    }

    /// Whether the login has credentials that fall outside ASCII — if
    /// UTF-8 is still unconfirmed at the point of a `PASS` failure, the
    /// sequence is rebuilt once with UTF-8 disabled and retried.
    fn has_non_ascii_credentials(&self, site: &Site) -> bool {
        !site.user.is_ascii() || !self.password.is_ascii()
    }

    /// Advances the state machine. `reply` is `None` only for the very
    /// first call (post-connect, before any bytes have arrived).
    pub fn step(&mut self, site: &Site, caps: &mut ServerCapabilities, reply: Option<&FtpReply>) -> LogonOutcome {
        match self.state {
            LogonState::Connect => {
                self.state = LogonState::Welcome;
                LogonOutcome::Advance
            },
            LogonState::Welcome => {
                let Some(reply) = reply else { return LogonOutcome::Advance };
                if !reply.is_success() {
                    return LogonOutcome::Failure(format!("unexpected welcome reply {}", reply.code));
                }
                self.state = match self.tls {
                    TlsMode::Explicit => LogonState::AuthTls,
                    _ => LogonState::Security,
                };
                LogonOutcome::Advance
            },
            LogonState::AuthTls => {
                if reply.is_none() {
                    return LogonOutcome::SendAndWait("AUTH TLS".to_string());
                }
                let reply = reply.unwrap();
                if reply.is_success() {
                    self.state = LogonState::AuthWait;
                    LogonOutcome::Advance
                } else {
                    self.state = LogonState::AuthSsl;
                    LogonOutcome::Advance
                }
            },
            LogonState::AuthSsl => {
                if reply.is_none() {
                    return LogonOutcome::SendAndWait("AUTH SSL".to_string());
                }
                let reply = reply.unwrap();
                if reply.is_success() {
                    self.state = LogonState::AuthWait;
                    LogonOutcome::Advance
                } else {
                    LogonOutcome::Failure("server refused AUTH TLS and AUTH SSL".to_string())
                }
            },
            LogonState::AuthWait => {
                // The TLS layer upgrade itself is driven by the socket
                // layer stack, not this machine; once notified the
                // handshake completed we proceed to login.
                self.state = LogonState::Security;
                LogonOutcome::Advance
            },
            LogonState::Security => {
                self.state = LogonState::Logon;
                LogonOutcome::Advance
            },
            LogonState::Logon => self.step_login_sequence(site, caps, reply),
            LogonState::Syst => {
                if reply.is_none() {
                    return LogonOutcome::SendAndWait("SYST".to_string());
                }
                self.state = LogonState::Feat;
                LogonOutcome::Advance
            },
            LogonState::Feat => {
                if reply.is_none() {
                    return LogonOutcome::SendAndWait("FEAT".to_string());
                }
                let reply = reply.unwrap();
                for line in &reply.lines {
                    caps.apply_feat_line(line);
                }
                self.state = if caps.supports_clnt { LogonState::Clnt } else { LogonState::OptsUtf8 };
                LogonOutcome::Advance
            },
            LogonState::Clnt => {
                if reply.is_none() {
                    return LogonOutcome::SendAndWait("CLNT fz-transfer-engine".to_string());
                }
                self.state = LogonState::OptsUtf8;
                LogonOutcome::Advance
            },
            LogonState::OptsUtf8 => {
                if !caps.supports_utf8 || self.utf8_retry_without {
                    self.state = LogonState::Pbsz;
                    return LogonOutcome::Advance;
                }
                if reply.is_none() {
                    return LogonOutcome::SendAndWait("OPTS UTF8 ON".to_string());
                }
                self.state = LogonState::Pbsz;
                LogonOutcome::Advance
            },
            LogonState::Pbsz => {
                if !matches!(self.tls, TlsMode::Implicit | TlsMode::Explicit) {
                    self.state = LogonState::OptsMlst;
                    return LogonOutcome::Advance;
                }
                if reply.is_none() {
                    return LogonOutcome::SendAndWait("PBSZ 0".to_string());
                }
                self.state = LogonState::Prot;
                LogonOutcome::Advance
            },
            LogonState::Prot => {
                if reply.is_none() {
                    return LogonOutcome::SendAndWait("PROT P".to_string());
                }
                self.state = LogonState::OptsMlst;
                LogonOutcome::Advance
            },
            LogonState::OptsMlst => {
                if !caps.supports_mlsd {
                    self.state = LogonState::CustomCommands;
                    return LogonOutcome::Advance;
                }
                if reply.is_none() {
                    return LogonOutcome::SendAndWait("OPTS MLST type;size;modify;perm;unix.mode;".to_string());
                }
                self.state = LogonState::CustomCommands;
                LogonOutcome::Advance
            },
            LogonState::CustomCommands => {
                if self.custom_index >= self.post_login_commands.len() {
                    self.state = LogonState::Done;
                    return LogonOutcome::Advance;
                }
                if reply.is_none() {
                    let cmd = self.post_login_commands[self.custom_index].clone();
                    return LogonOutcome::SendAndWait(cmd);
                }
                self.custom_index += 1;
                LogonOutcome::Advance
            },
            LogonState::Done => LogonOutcome::Success,
        }
    }

    fn step_login_sequence(&mut self, site: &Site, _caps: &mut ServerCapabilities, reply: Option<&FtpReply>) -> LogonOutcome {
        if self.seq_index >= self.sequence.len() {
            self.state = LogonState::Syst;
            return LogonOutcome::Advance;
        }
        let entry = self.sequence[self.seq_index].clone();
        let Some(reply) = reply else {
            let line = render_command(&entry, &self.proxy, site, &self.password);
            return LogonOutcome::SendAndWait(line);
        };

        if reply.code / 100 == 3 && reply.lines.len() > 1 {
            // A multi-line 3yz during logon is an interactive challenge
            // (account/2FA code); accumulate and surface, don't advance.
            self.interactive_accum.extend(reply.lines.iter().cloned());
            return LogonOutcome::InteractivePrompt(self.interactive_accum.join("\n"));
        }

        if !reply.is_success() {
            if matches!(entry.kind, LoginCommandKind::Pass) && reply.code / 100 == 5 {
                if self.has_non_ascii_credentials(site) && !self.utf8_retry_without {
                    self.utf8_retry_without = true;
                    self.seq_index = 0;
                    return LogonOutcome::Advance;
                }
                return LogonOutcome::PasswordFailed;
            }
            if entry.optional {
                self.seq_index += 1;
                return LogonOutcome::Advance;
            }
            return LogonOutcome::Failure(format!("login command failed with {}", reply.code));
        }

        self.seq_index += 1;
        LogonOutcome::Advance
    }
}
