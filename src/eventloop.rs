// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Single-threaded, cooperative event loop (§4.1). Handlers run to
//! completion without blocking; anything that would block returns to the
//! loop and resumes on a later wake event. Timers are a min-heap of
//! `(Instant, TimerId)`; the ID is a generation-checked slab index so a
//! stopped-then-reused slot can never fire the wrong timer — the same
//! handle-vs-slot split the teacher's scheduler makes.

use slab::Slab;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    index: usize,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Once,
    Every(std::time::Duration),
}

struct TimerSlot {
    generation: u64,
    repeat: Repeat,
    active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Due {
    at: Instant,
    index: usize,
    generation: u64,
}

impl Ord for Due {
    fn cmp(&self, other: &Due) -> Ordering {
        other.at.cmp(&self.at)
    }
}

impl PartialOrd for Due {
    fn partial_cmp(&self, other: &Due) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct Timers {
    slots: Slab<TimerSlot>,
    heap: BinaryHeap<Due>,
}

impl Timers {
    pub fn new() -> Self {
        Timers { slots: Slab::new(), heap: BinaryHeap::new() }
    }

    pub fn schedule(&mut self, now: Instant, delay: std::time::Duration, repeat: Repeat) -> TimerId {
        let generation = 0;
        let index = self.slots.insert(TimerSlot { generation, repeat, active: true });
        self.heap.push(Due { at: now + delay, index, generation });
        TimerId { index, generation }
    }

    /// Idempotent: stopping an already-stopped or expired timer is a no-op.
    pub fn stop(&mut self, id: TimerId) {
        if let Some(slot) = self.slots.get_mut(id.index) {
            if slot.generation == id.generation {
                slot.active = false;
            }
        }
    }

    /// Pops every timer due at or before `now`, re-arming repeating ones
    /// under a fresh generation so a handler holding a stale `TimerId`
    /// can't accidentally stop the re-armed instance.
    pub fn poll(&mut self, now: Instant) -> Vec<TimerId> {
        let mut fired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.at > now {
                break;
            }
            let due = self.heap.pop().unwrap();
            let Some(slot) = self.slots.get_mut(due.index) else { continue };
            if slot.generation != due.generation || !slot.active {
                continue;
            }
            fired.push(TimerId { index: due.index, generation: due.generation });
            match slot.repeat {
                Repeat::Once => {
                    self.slots.remove(due.index);
                },
                Repeat::Every(period) => {
                    slot.generation += 1;
                    let next_gen = slot.generation;
                    self.heap.push(Due { at: now + period, index: due.index, generation: next_gen });
                },
            }
        }
        fired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|d| d.at)
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.slots
            .get(id.index)
            .map_or(false, |s| s.generation == id.generation && s.active)
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

/// An opaque identifier for an event-handler registration, so events can
/// be discarded if their destination has already been removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub usize);

pub struct Event<T> {
    pub destination: HandlerId,
    pub payload: T,
}

/// FIFO event queue with destination filtering — used both for
/// foreign-thread calls (post-and-return) and subsystem teardown
/// (drop every pending event for a handler that's going away).
pub struct EventQueue<T> {
    pending: Vec<Event<T>>,
    live: std::collections::HashSet<HandlerId>,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        EventQueue { pending: Vec::new(), live: std::collections::HashSet::new() }
    }

    pub fn register(&mut self, id: HandlerId) {
        self.live.insert(id);
    }

    /// Removes the handler and drops every event already queued for it.
    pub fn unregister(&mut self, id: HandlerId) {
        self.live.remove(&id);
        self.pending.retain(|e| e.destination != id);
    }

    pub fn post(&mut self, destination: HandlerId, payload: T) {
        if self.live.contains(&destination) {
            self.pending.push(Event { destination, payload });
        }
    }

    /// Drains every event whose destination is still live, in FIFO order.
    pub fn drain(&mut self) -> Vec<Event<T>> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|e| self.live.contains(&e.destination))
            .collect()
    }

    /// Removes pending events for which `predicate` returns true, without
    /// touching handler registration — used when a subsystem wants to
    /// cancel its own in-flight events but stay registered.
    pub fn filter_out<F: Fn(&T) -> bool>(&mut self, predicate: F) {
        self.pending.retain(|e| !predicate(&e.payload));
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn one_shot_timer_fires_once() {
        let now = Instant::now();
        let mut timers = Timers::new();
        let id = timers.schedule(now, Duration::from_secs(1), Repeat::Once);
        assert!(timers.poll(now).is_empty());
        let fired = timers.poll(now + Duration::from_secs(1));
        assert_eq!(fired, vec![id]);
        assert!(timers.poll(now + Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn repeating_timer_rearms_under_new_generation() {
        let now = Instant::now();
        let mut timers = Timers::new();
        let id = timers.schedule(now, Duration::from_secs(1), Repeat::Every(Duration::from_secs(1)));
        let first = timers.poll(now + Duration::from_secs(1));
        assert_eq!(first, vec![id]);
        assert!(!timers.is_active(id));
        let second = timers.poll(now + Duration::from_secs(2));
        assert_eq!(second.len(), 1);
        assert_ne!(second[0], id);
    }

    #[test]
    fn stopping_a_timer_is_idempotent() {
        let now = Instant::now();
        let mut timers = Timers::new();
        let id = timers.schedule(now, Duration::from_secs(1), Repeat::Once);
        timers.stop(id);
        timers.stop(id);
        assert!(timers.poll(now + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn unregistering_a_handler_drops_its_pending_events() {
        let mut queue: EventQueue<u32> = EventQueue::new();
        let h = HandlerId(1);
        queue.register(h);
        queue.post(h, 42);
        queue.unregister(h);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn posting_to_unregistered_destination_is_dropped() {
        let mut queue: EventQueue<u32> = EventQueue::new();
        queue.post(HandlerId(1), 1);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn filter_out_removes_matching_pending_events() {
        let mut queue: EventQueue<u32> = EventQueue::new();
        let h = HandlerId(1);
        queue.register(h);
        queue.post(h, 1);
        queue.post(h, 2);
        queue.filter_out(|v| *v == 1);
        let remaining: Vec<_> = queue.drain().into_iter().map(|e| e.payload).collect();
        assert_eq!(remaining, vec![2]);
    }
}
