// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The RAWTRANSFER data-channel sub-operation, the listing operation,
//! and the file-transfer operation (§4.6). States: RAWTRANSFER's `INIT →
//! TYPE → PORT_PASV → REST → TRANSFER → WAITFINISH → WAITTRANSFERPRE →
//! WAITTRANSFER → WAITSOCKET`; file transfer's `INIT → WAIT_CWD →
//! WAIT_LIST → SIZE → MDTM → RESUMETEST → TRANSFER → WAIT_TRANSFER →
//! MFMT`.

use super::ServerCapabilities;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Ascii,
    Binary,
}

impl TransferType {
    pub fn command(self) -> &'static str {
        match self {
            TransferType::Ascii => "TYPE A",
            TransferType::Binary => "TYPE I",
        }
    }
}

/// Parses a `PASV` reply body, e.g. `Entering Passive Mode
/// (10,0,0,1,19,136)`.
pub fn parse_pasv(text: &str) -> Option<SocketAddr> {
    let start = text.find('(')?;
    let end = text[start..].find(')')? + start;
    let nums: Vec<u8> = text[start + 1..end]
        .split(',')
        .filter_map(|s| s.trim().parse::<u8>().ok())
        .collect();
    if nums.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]);
    let port = (nums[4] as u16) << 8 | nums[5] as u16;
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Parses an `EPSV` reply body, e.g. `Entering Extended Passive Mode
/// (|||31746|)`. The address family and host are implied (same peer as
/// the control connection); only the port is carried on the wire.
pub fn parse_epsv_port(text: &str) -> Option<u16> {
    let start = text.find('(')?;
    let end = text[start..].find(')')? + start;
    let body = &text[start + 1..end];
    let delim = body.chars().next()?;
    let fields: Vec<&str> = body.split(delim).collect();
    fields.get(3).and_then(|p| p.parse().ok())
}

/// Whether to prefer `EPSV` over `PASV` (§4.6): IPv6 peers always do;
/// IPv4 peers do only when proxied (so the dotted-quad in `PASV` would be
/// meaningless) and the server advertised `EPSV` support.
pub fn prefer_epsv(peer_is_ipv6: bool, is_proxied: bool, caps: &ServerCapabilities) -> bool {
    if peer_is_ipv6 {
        return true;
    }
    is_proxied && caps.supports_epsv
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelState {
    Init,
    Type,
    PortPasv,
    Rest,
    Transfer,
    WaitFinish,
    WaitTransferPre,
    WaitTransfer,
    WaitSocket,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Passive,
    Active,
}

/// Tracks the two independent completion signals a data transfer needs —
/// the control-channel final reply and the data socket's EOF — since
/// their arrival order isn't guaranteed (§4.6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionTracker {
    control_done: bool,
    data_done: bool,
}

impl CompletionTracker {
    pub fn control_reply_arrived(&mut self) {
        self.control_done = true;
    }

    pub fn data_socket_eof(&mut self) {
        self.data_done = true;
    }

    pub fn is_complete(&self) -> bool {
        self.control_done && self.data_done
    }
}

/// Drives `PORT_PASV`: decides passive-vs-active and, on a transfer-mode
/// fallback setting, whether to retry with the other mode after a
/// failure to establish the data connection.
pub struct DataChannelNegotiation {
    pub mode: TransferMode,
    pub allow_fallback: bool,
    fallback_used: bool,
}

impl DataChannelNegotiation {
    pub fn new(preferred: TransferMode, allow_fallback: bool) -> Self {
        DataChannelNegotiation { mode: preferred, allow_fallback, fallback_used: false }
    }

    /// Called when establishing the data connection in the current mode
    /// failed. Returns `true` if a fallback retry should be attempted
    /// (flips `mode` as a side effect), `false` if the failure is final.
    pub fn try_fallback(&mut self) -> bool {
        if !self.allow_fallback || self.fallback_used {
            return false;
        }
        self.fallback_used = true;
        self.mode = match self.mode {
            TransferMode::Passive => TransferMode::Active,
            TransferMode::Active => TransferMode::Passive,
        };
        true
    }
}

/// When an unroutable address comes back in a `PASV` reply but the
/// control peer's IP is routable, fall back to the control peer's IP
/// (§4.6), gated by a configurable policy flag.
pub fn resolve_pasv_address(reported: SocketAddr, control_peer_ip: IpAddr, policy_allows_fallback: bool) -> SocketAddr {
    let unroutable = match reported.ip() {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_unspecified(),
        IpAddr::V6(_) => false,
    };
    let peer_routable = match control_peer_ip {
        IpAddr::V4(v4) => !v4.is_private() && !v4.is_loopback() && !v4.is_unspecified(),
        IpAddr::V6(_) => true,
    };
    if unroutable && peer_routable && policy_allows_fallback {
        SocketAddr::new(control_peer_ip, reported.port())
    } else {
        reported
    }
}

/// Whether `REST` needs to be (re-)issued: either to set a genuine resume
/// offset, or to clear a previously-set one with `REST 0`.
pub fn rest_command(offset: u64, previously_set: bool) -> Option<String> {
    if offset > 0 {
        Some(format!("REST {}", offset))
    } else if previously_set {
        Some("REST 0".to_string())
    } else {
        None
    }
}

/// Property P6: the next chunk size for a multi-part or adaptively-sized
/// transfer.
///
/// - never exceeds `remaining`
/// - a multiple of `mul` unless it equals `remaining` exactly (`mul == 0`
///   disables rounding)
/// - respects `max_sz` when positive
/// - adapts toward keeping each chunk's duration near `part` by scaling
///   `last_sz` by `part / last_dur`, when a previous sample exists
pub fn next_chunk_size(
    remaining: u64,
    last_sz: u64,
    last_dur: std::time::Duration,
    min: u64,
    mul: u64,
    part: std::time::Duration,
    max_parts: u32,
    max_sz: u64,
) -> u64 {
    if remaining == 0 {
        return 0;
    }
    let mut size = if last_sz == 0 || last_dur.is_zero() {
        min.max(1)
    } else {
        let scale = part.as_secs_f64() / last_dur.as_secs_f64();
        ((last_sz as f64) * scale).round().max(min as f64) as u64
    };
    if max_sz > 0 {
        size = size.min(max_sz);
    }
    if max_parts > 0 {
        let min_size_for_budget = remaining / max_parts as u64 + 1;
        size = size.max(min_size_for_budget);
    }
    if size >= remaining {
        return remaining;
    }
    if mul > 0 && size % mul != 0 {
        if max_parts > 0 {
            // Round up: rounding down here could push `size` back under
            // the max_parts budget floor just applied above.
            size += mul - size % mul;
            if max_sz > 0 {
                size = size.min(max_sz);
            }
        } else {
            size -= size % mul;
            size = size.max(mul);
        }
    }
    size.min(remaining)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTransferState {
    Init,
    WaitCwd,
    WaitList,
    Size,
    Mdtm,
    ResumeTest,
    Transfer,
    WaitTransfer,
    Mfmt,
    Done,
}

/// Whether `SIZE`/`MDTM` should be skipped because the value is already
/// known (from a cache hit, or because timestamp preservation is off).
pub struct FileTransferPlan {
    pub need_size: bool,
    pub need_mdtm: bool,
    pub need_resume_test: bool,
}

impl FileTransferPlan {
    pub fn new(
        size_known: bool,
        preserve_timestamps: bool,
        server_supports_mdtm: bool,
        resume_offset: u64,
        caps: &ServerCapabilities,
    ) -> Self {
        let over_2gb = resume_offset >= 2u64.pow(31);
        let over_4gb = resume_offset >= 2u64.pow(32);
        let need_resume_test =
            resume_offset > 0 && ((over_2gb && !caps.resume_2gb_tested) || (over_4gb && !caps.resume_4gb_tested));
        FileTransferPlan {
            need_size: !size_known,
            need_mdtm: preserve_timestamps && server_supports_mdtm,
            need_resume_test,
        }
    }
}

/// Outcome of a resume-capability probe: attempting a 1-byte `RETR` at
/// the resume offset and observing whether the server honoured it.
pub fn record_resume_test(caps: &mut ServerCapabilities, offset: u64, server_truncated_offset: bool) {
    let over_2gb = offset >= 2u64.pow(31);
    let over_4gb = offset >= 2u64.pow(32);
    if over_4gb {
        caps.resume_4gb_tested = true;
        caps.resume_4gb_bug = server_truncated_offset;
    } else if over_2gb {
        caps.resume_2gb_tested = true;
        caps.resume_2gb_ok = !server_truncated_offset;
    }
}

/// `MFMT` timestamp, adjusted by the server's discovered timezone offset
/// (§4.6): local modification time plus the offset, in epoch seconds.
pub fn mfmt_timestamp(local_mtime_epoch_secs: i64, server_timezone_offset_minutes: i32) -> i64 {
    local_mtime_epoch_secs + server_timezone_offset_minutes as i64 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pasv_reply_from_scenario_1() {
        let addr = parse_pasv("Entering Passive Mode (10,0,0,1,19,136)").unwrap();
        assert_eq!(addr, SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 19 * 256 + 136));
    }

    #[test]
    fn parses_epsv_port() {
        let port = parse_epsv_port("Entering Extended Passive Mode (|||31746|)").unwrap();
        assert_eq!(port, 31746);
    }

    #[test]
    fn epsv_preferred_for_ipv6_regardless_of_proxy() {
        let caps = ServerCapabilities::default();
        assert!(prefer_epsv(true, false, &caps));
    }

    #[test]
    fn epsv_preferred_when_proxied_and_advertised() {
        let mut caps = ServerCapabilities::default();
        caps.supports_epsv = true;
        assert!(prefer_epsv(false, true, &caps));
        assert!(!prefer_epsv(false, false, &caps));
    }

    #[test]
    fn unroutable_pasv_address_falls_back_to_control_peer() {
        let reported = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5)), 4000);
        let peer = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9));
        let resolved = resolve_pasv_address(reported, peer, true);
        assert_eq!(resolved.ip(), peer);
        assert_eq!(resolved.port(), 4000);
    }

    #[test]
    fn routable_pasv_address_is_unchanged() {
        let reported = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5)), 4000);
        let peer = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9));
        assert_eq!(resolve_pasv_address(reported, peer, true), reported);
    }

    #[test]
    fn rest_zero_only_sent_when_previously_set() {
        assert_eq!(rest_command(0, false), None);
        assert_eq!(rest_command(0, true), Some("REST 0".to_string()));
        assert_eq!(rest_command(100, false), Some("REST 100".to_string()));
    }

    /// Property P6.
    #[test]
    fn chunk_size_never_exceeds_remaining() {
        let size = next_chunk_size(1000, 2000, std::time::Duration::from_secs(1), 64, 64, std::time::Duration::from_millis(500), 0, 0);
        assert!(size <= 1000);
    }

    #[test]
    fn chunk_size_is_a_multiple_of_mul_unless_it_equals_remaining() {
        let size = next_chunk_size(10_000, 1000, std::time::Duration::from_secs(1), 64, 128, std::time::Duration::from_millis(500), 0, 0);
        assert!(size == 10_000 || size % 128 == 0);
    }

    #[test]
    fn chunk_size_respects_max_parts_budget() {
        let remaining = 1_000_000u64;
        let size = next_chunk_size(remaining, 1, std::time::Duration::from_secs(1), 1, 0, std::time::Duration::from_millis(500), 4, 0);
        let parts = (remaining + size - 1) / size;
        assert!(parts <= 4);
    }

    /// Rounding to `mul` must not undercut the `max_parts` floor: a last_sz
    /// of 1 byte with a near-instant last_dur forces the budget floor to
    /// dominate the adaptive estimate, so `251` (remaining/max_parts + 1)
    /// must round up to `300`, not down to `200`.
    #[test]
    fn chunk_size_respects_both_mul_and_max_parts_budget() {
        let remaining = 1_000u64;
        let size = next_chunk_size(remaining, 1, std::time::Duration::from_secs(1), 1, 100, std::time::Duration::from_millis(500), 4, 0);
        assert_eq!(size % 100, 0);
        let parts = (remaining + size - 1) / size;
        assert!(parts <= 4, "size {} yields {} parts, exceeding max_parts=4", size, parts);
    }

    /// Scenario 2: a server that silently truncates an over-4GiB resume
    /// offset is recorded as having the 4GB resume bug.
    #[test]
    fn resume_over_4gb_truncation_sets_bug_flag() {
        let mut caps = ServerCapabilities::default();
        record_resume_test(&mut caps, 3_000_000_000, true);
        assert!(caps.resume_4gb_tested);
        assert!(caps.resume_4gb_bug);
    }

    #[test]
    fn resume_test_runs_at_most_once_per_server() {
        let mut caps = ServerCapabilities::default();
        let plan = FileTransferPlan::new(true, false, false, 3_000_000_000, &caps);
        assert!(plan.need_resume_test);
        record_resume_test(&mut caps, 3_000_000_000, false);
        let plan2 = FileTransferPlan::new(true, false, false, 3_000_000_000, &caps);
        assert!(!plan2.need_resume_test);
    }

    #[test]
    fn size_skipped_when_already_known() {
        let caps = ServerCapabilities::default();
        let plan = FileTransferPlan::new(true, false, false, 0, &caps);
        assert!(!plan.need_size);
    }

    #[test]
    fn completion_requires_both_control_and_data_signals() {
        let mut tracker = CompletionTracker::default();
        tracker.control_reply_arrived();
        assert!(!tracker.is_complete());
        tracker.data_socket_eof();
        assert!(tracker.is_complete());
    }

    #[test]
    fn data_channel_fallback_flips_mode_once() {
        let mut neg = DataChannelNegotiation::new(TransferMode::Passive, true);
        assert!(neg.try_fallback());
        assert_eq!(neg.mode, TransferMode::Active);
        assert!(!neg.try_fallback());
    }
}
