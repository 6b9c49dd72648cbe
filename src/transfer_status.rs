// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Transfer progress snapshotting (§4.11). The transfer loop updates an
//! atomic byte delta without taking any lock; a mutex-guarded snapshot is
//! published lazily. A three-state send-gate ensures at most one "status
//! changed" notification is ever in flight toward the host.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Instant;

const GATE_IDLE: u8 = 0;
const GATE_SENT: u8 = 1;
const GATE_DIRTY: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferSnapshot {
    pub start_time: Instant,
    /// `None` when the total size is unknown (spec's `-1`).
    pub total_size: Option<u64>,
    pub start_offset: u64,
    pub current_offset: u64,
    pub list_mode: bool,
    pub made_progress: bool,
}

struct Inner {
    start_time: Instant,
    total_size: Option<u64>,
    start_offset: u64,
    current_offset: u64,
    list_mode: bool,
    made_progress: bool,
}

pub struct TransferStatus {
    delta: AtomicI64,
    gate: AtomicU8,
    inner: Mutex<Inner>,
}

impl TransferStatus {
    pub fn new(now: Instant, start_offset: u64, total_size: Option<u64>, list_mode: bool) -> Self {
        TransferStatus {
            delta: AtomicI64::new(0),
            gate: AtomicU8::new(GATE_IDLE),
            inner: Mutex::new(Inner {
                start_time: now,
                total_size,
                start_offset,
                current_offset: start_offset,
                list_mode,
                made_progress: false,
            }),
        }
    }

    /// Called from the transfer's hot path. Never blocks.
    pub fn update(&self, bytes: i64) -> bool {
        self.delta.fetch_add(bytes, Ordering::Relaxed);
        self.gate
            .compare_exchange(GATE_IDLE, GATE_DIRTY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn merge_delta(&self, inner: &mut Inner) {
        let delta = self.delta.swap(0, Ordering::AcqRel);
        if delta != 0 {
            inner.current_offset = (inner.current_offset as i64 + delta).max(0) as u64;
            inner.made_progress = true;
        }
    }

    /// Returns the merged snapshot plus whether anything changed since the
    /// previous call.
    pub fn get(&self) -> (TransferSnapshot, bool) {
        let mut inner = self.inner.lock().unwrap();
        self.merge_delta(&mut inner);

        let changed = match self.gate.load(Ordering::Acquire) {
            GATE_DIRTY => {
                self.gate.store(GATE_SENT, Ordering::Release);
                true
            },
            GATE_SENT => {
                self.gate.store(GATE_IDLE, Ordering::Release);
                false
            },
            _ => false,
        };

        let snapshot = TransferSnapshot {
            start_time: inner.start_time,
            total_size: inner.total_size,
            start_offset: inner.start_offset,
            current_offset: inner.current_offset,
            list_mode: inner.list_mode,
            made_progress: inner.made_progress,
        };
        (snapshot, changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_merges_into_snapshot_on_get() {
        let status = TransferStatus::new(Instant::now(), 0, Some(100), false);
        status.update(10);
        status.update(20);
        let (snap, changed) = status.get();
        assert_eq!(snap.current_offset, 30);
        assert!(snap.made_progress);
        assert!(changed);
    }

    /// Property P5: at most one pending notification in flight.
    #[test]
    fn gate_reports_change_exactly_once_per_update() {
        let status = TransferStatus::new(Instant::now(), 0, None, false);
        status.update(5);
        let (_, changed1) = status.get();
        let (_, changed2) = status.get();
        assert!(changed1);
        assert!(!changed2);
    }

    #[test]
    fn first_update_after_idle_signals_a_fresh_notification() {
        let status = TransferStatus::new(Instant::now(), 0, None, false);
        assert!(status.update(1));
        assert!(!status.update(1));
        let (_, changed) = status.get();
        assert!(changed);
    }

    #[test]
    fn negative_delta_cannot_underflow_offset() {
        let status = TransferStatus::new(Instant::now(), 5, None, false);
        status.update(-100);
        let (snap, _) = status.get();
        assert_eq!(snap.current_offset, 0);
    }

    #[test]
    fn total_size_none_means_unknown() {
        let status = TransferStatus::new(Instant::now(), 0, None, true);
        let (snap, _) = status.get();
        assert_eq!(snap.total_size, None);
        assert!(snap.list_mode);
    }
}
