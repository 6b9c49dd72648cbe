// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Process-wide configuration knobs (§1 Expansion): the in-scope analogue
//! of the out-of-scope "persistent settings storage" — the engine takes
//! these by value and never persists them itself; a host application
//! that wants persistence owns that concern.

use crate::ratelimiter::BurstTolerance;
use std::time::Duration;

/// Reconnect, logging and rate-limit knobs an `Engine` is configured
/// with at construction. Every field has a sensible default so a host
/// can override only what it cares about.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub max_reconnect_retries: u32,
    pub reconnect_delay: Duration,
    pub log_rotation_size: u64,
    pub inbound_burst_tolerance: BurstTolerance,
    pub outbound_burst_tolerance: BurstTolerance,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            max_reconnect_retries: 3,
            reconnect_delay: Duration::from_secs(5),
            log_rotation_size: crate::logging::MAX_ROTATION_SIZE,
            inbound_burst_tolerance: BurstTolerance::None,
            outbound_burst_tolerance: BurstTolerance::None,
        }
    }
}
