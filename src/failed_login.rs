// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Process-global failed-login list (§3, §4.10): throttles reconnection
//! after a credential failure. Entries matching host/port (or the exact
//! site, if the failure wasn't critical) within the reconnect-delay
//! window make the engine back off instead of retrying immediately.

use crate::site::Site;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct FailedLoginRecord {
    site: Site,
    time: Instant,
    critical: bool,
}

#[derive(Default)]
pub struct FailedLoginList {
    records: Vec<FailedLoginRecord>,
}

impl FailedLoginList {
    pub fn new() -> Self {
        FailedLoginList { records: Vec::new() }
    }

    pub fn record(&mut self, site: Site, time: Instant, critical: bool) {
        self.records.push(FailedLoginRecord { site, time, critical });
    }

    /// True if a matching record exists within `window` of `now`.
    /// Non-critical failures only throttle retries against the identical
    /// site; critical failures (e.g. password rejected) throttle any
    /// connection attempt to the same host/port, since a different user
    /// or encoding won't fix a locked-out account.
    pub fn should_throttle(&self, site: &Site, now: Instant, window: Duration) -> bool {
        self.records.iter().any(|r| {
            if now.saturating_duration_since(r.time) >= window {
                return false;
            }
            if r.critical {
                r.site.host.eq_ignore_ascii_case(&site.host) && r.site.port == site.port
            } else {
                r.site.is_same_resource(site)
            }
        })
    }

    /// Time remaining until the oldest throttling record for `site`
    /// expires, or `None` if nothing currently throttles it.
    pub fn remaining_delay(&self, site: &Site, now: Instant, window: Duration) -> Option<Duration> {
        self.records
            .iter()
            .filter(|r| {
                let matches = if r.critical {
                    r.site.host.eq_ignore_ascii_case(&site.host) && r.site.port == site.port
                } else {
                    r.site.is_same_resource(site)
                };
                matches && now.saturating_duration_since(r.time) < window
            })
            .map(|r| window.saturating_sub(now.saturating_duration_since(r.time)))
            .max()
    }

    pub fn prune(&mut self, now: Instant, window: Duration) {
        self.records.retain(|r| now.saturating_duration_since(r.time) < window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::Protocol;

    fn site() -> Site {
        Site::new("host", 21, Protocol::Ftp)
    }

    #[test]
    fn non_critical_failure_only_throttles_identical_site() {
        let mut list = FailedLoginList::new();
        let now = Instant::now();
        list.record(site(), now, false);

        let mut other_user = site();
        other_user.user = "bob".into();
        assert!(!list.should_throttle(&other_user, now, Duration::from_secs(10)));
        assert!(list.should_throttle(&site(), now, Duration::from_secs(10)));
    }

    #[test]
    fn critical_failure_throttles_any_user_on_same_host_port() {
        let mut list = FailedLoginList::new();
        let now = Instant::now();
        list.record(site(), now, true);

        let mut other_user = site();
        other_user.user = "bob".into();
        assert!(list.should_throttle(&other_user, now, Duration::from_secs(10)));
    }

    #[test]
    fn expired_records_do_not_throttle() {
        let mut list = FailedLoginList::new();
        let now = Instant::now();
        list.record(site(), now, true);
        assert!(!list.should_throttle(&site(), now + Duration::from_secs(11), Duration::from_secs(10)));
    }

    #[test]
    fn prune_drops_expired_records() {
        let mut list = FailedLoginList::new();
        let now = Instant::now();
        list.record(site(), now, false);
        list.prune(now + Duration::from_secs(11), Duration::from_secs(10));
        assert!(!list.should_throttle(&site(), now + Duration::from_secs(11), Duration::from_secs(10)));
    }
}
