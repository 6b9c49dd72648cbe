// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Token-bucket rate limiter (§4.3). One process-global limiter holds two
//! independent buckets — inbound and outbound — shared by every socket of
//! every engine; registered objects split each tick's allotment evenly,
//! with unused tokens flowing to saturated objects up to a burst cap.

use slab::Slab;
use std::time::Duration;

pub const TICK: Duration = Duration::from_millis(250);

/// How many ticks' worth of tokens a bucket may accumulate before a stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstTolerance {
    None,
    Double,
    Quintuple,
}

impl BurstTolerance {
    fn multiplier(self) -> u64 {
        match self {
            BurstTolerance::None => 1,
            BurstTolerance::Double => 2,
            BurstTolerance::Quintuple => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A registered socket layer's standing with one bucket.
#[derive(Debug, Default)]
struct ObjectState {
    available: i64,
    wants_wakeup: bool,
}

struct Bucket {
    /// Bytes/sec, or `None` for unlimited.
    limit: Option<u64>,
    burst: BurstTolerance,
    objects: Slab<ObjectState>,
}

impl Bucket {
    fn new() -> Self {
        Bucket {
            limit: None,
            burst: BurstTolerance::None,
            objects: Slab::new(),
        }
    }

    fn cap_per_object(&self, share: u64) -> i64 {
        (share * self.burst.multiplier()) as i64
    }

    /// One tick: divide this period's allotment evenly among registered
    /// objects, then redistribute any share a saturated object could not
    /// absorb to the objects still below their burst cap.
    fn tick(&mut self) -> Vec<usize> {
        let count = self.objects.len();
        if count == 0 {
            return Vec::new();
        }
        let total_allowance = match self.limit {
            None => {
                for (_, obj) in self.objects.iter_mut() {
                    obj.available = i64::MAX;
                }
                return self.wake_candidates();
            },
            Some(limit) => limit * TICK.as_millis() as u64 / 1000,
        };
        let share = total_allowance / count as u64;
        let cap = self.cap_per_object(share);

        let mut leftover = 0i64;
        let mut needy: Vec<usize> = Vec::new();
        for (key, obj) in self.objects.iter_mut() {
            let proposed = obj.available + share as i64;
            if proposed > cap {
                leftover += proposed - cap;
                obj.available = cap;
            } else {
                obj.available = proposed;
                needy.push(key);
            }
        }
        if !needy.is_empty() && leftover > 0 {
            let per_needy = leftover / needy.len() as i64;
            for key in &needy {
                if let Some(obj) = self.objects.get_mut(*key) {
                    obj.available = (obj.available + per_needy).min(cap);
                }
            }
        }
        self.wake_candidates()
    }

    fn wake_candidates(&mut self) -> Vec<usize> {
        let mut woken = Vec::new();
        for (key, obj) in self.objects.iter_mut() {
            if obj.wants_wakeup && obj.available > 0 {
                obj.wants_wakeup = false;
                woken.push(key);
            }
        }
        woken
    }

    fn register(&mut self) -> usize {
        self.objects.insert(ObjectState::default())
    }

    /// Removing an object mid-tick drops its unused allotment so the next
    /// tick's per-object share isn't inflated by a slot that no longer
    /// exists.
    fn unregister(&mut self, key: usize) {
        self.objects.remove(key);
    }

    fn available(&self, key: usize) -> i64 {
        match self.limit {
            None => -1,
            Some(_) => self.objects.get(key).map_or(0, |o| o.available.max(0)),
        }
    }

    fn consume(&mut self, key: usize, bytes: u64) {
        if self.limit.is_none() {
            return;
        }
        if let Some(obj) = self.objects.get_mut(key) {
            obj.available -= bytes as i64;
        }
    }

    fn request_wakeup(&mut self, key: usize) {
        if let Some(obj) = self.objects.get_mut(key) {
            obj.wants_wakeup = true;
        }
    }
}

/// A single socket layer's registration with the limiter, one token per
/// direction.
#[derive(Debug, Clone, Copy)]
pub struct RateToken {
    inbound_key: usize,
    outbound_key: usize,
}

pub struct RateLimiter {
    inbound: Bucket,
    outbound: Bucket,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            inbound: Bucket::new(),
            outbound: Bucket::new(),
        }
    }

    pub fn set_limit(&mut self, direction: Direction, bytes_per_sec: Option<u64>) {
        self.bucket_mut(direction).limit = bytes_per_sec;
    }

    pub fn set_burst_tolerance(&mut self, direction: Direction, tolerance: BurstTolerance) {
        self.bucket_mut(direction).burst = tolerance;
    }

    fn bucket_mut(&mut self, direction: Direction) -> &mut Bucket {
        match direction {
            Direction::Inbound => &mut self.inbound,
            Direction::Outbound => &mut self.outbound,
        }
    }

    fn bucket(&self, direction: Direction) -> &Bucket {
        match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        }
    }

    pub fn register(&mut self) -> RateToken {
        RateToken {
            inbound_key: self.inbound.register(),
            outbound_key: self.outbound.register(),
        }
    }

    pub fn unregister(&mut self, token: RateToken) {
        self.inbound.unregister(token.inbound_key);
        self.outbound.unregister(token.outbound_key);
    }

    /// `-1` unlimited, `0` paused, otherwise the number of bytes the
    /// caller may transfer before checking again.
    pub fn available_bytes(&self, token: RateToken, direction: Direction) -> i64 {
        let key = match direction {
            Direction::Inbound => token.inbound_key,
            Direction::Outbound => token.outbound_key,
        };
        self.bucket(direction).available(key)
    }

    pub fn consume(&mut self, token: RateToken, direction: Direction, bytes: u64) {
        let key = match direction {
            Direction::Inbound => token.inbound_key,
            Direction::Outbound => token.outbound_key,
        };
        self.bucket_mut(direction).consume(key, bytes);
    }

    /// Registers interest in a "tokens available" wakeup, delivered the
    /// next time `tick` observes this object has a positive balance.
    pub fn request_wakeup(&mut self, token: RateToken, direction: Direction) {
        let key = match direction {
            Direction::Inbound => token.inbound_key,
            Direction::Outbound => token.outbound_key,
        };
        self.bucket_mut(direction).request_wakeup(key);
    }

    /// Advances both buckets by one tick; returns the set of registered
    /// slab keys (per direction) that asked for a wakeup and now have
    /// tokens.
    pub fn tick(&mut self) -> (Vec<usize>, Vec<usize>) {
        (self.inbound.tick(), self.outbound.tick())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
