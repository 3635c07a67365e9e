//! Single-slot rendezvous between the monitor and an external reader.
//!
//! A reader that wants the monitor's current state enqueues a read request
//! and calls [`CheckPoint::join`]. When the monitor dequeues the request it
//! calls [`CheckPoint::join_with_state`]. Whichever side arrives first
//! parks in the slot; the second completes the rendezvous and wakes it. The
//! reader always returns the state published by the monitor side of the
//! same rendezvous.
//!
//! Once the monitor stops it [`close`](CheckPoint::close)s the checkpoint:
//! parked readers wake with `None` and later joins return at once.
//!
//! ```text
//!   reader                 slot                 monitor
//!   join() ───park──→ [reader, gen g]
//!                          ←──join_with_state("B")
//!                     gen g+1, handoff[g] = "B"
//!   ←── "B"
//! ```

use log::warn;
use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Monitor,
    Reader,
}

#[derive(Debug, Default)]
struct Slot {
    /// Party parked in the slot, if any.
    waiting: Option<Side>,
    /// Bumped on every completed rendezvous.
    generation: u64,
    /// State published by the monitor side, keyed by the generation of the
    /// rendezvous a parked reader is waiting on.
    handoff: HashMap<u64, String>,
    /// State published by a parked monitor.
    published: Option<String>,
    closed: bool,
}

/// Rendezvous point shared (via `Arc`) by the monitor and its readers.
#[derive(Debug, Default)]
pub struct CheckPoint {
    slot: Mutex<Slot>,
    cond: Condvar,
}

impl CheckPoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monitor side: publish `state` and rendezvous with a reader. Returns
    /// at once when the checkpoint is closed.
    pub fn join_with_state(&self, state: &str) {
        let mut slot = self.park_behind(Side::Monitor);
        if slot.closed {
            return;
        }
        if slot.waiting == Some(Side::Reader) {
            let generation = slot.generation;
            slot.handoff.insert(generation, state.to_string());
            self.complete(&mut slot);
            return;
        }
        slot.published = Some(state.to_string());
        drop(self.park(slot, Side::Monitor));
    }

    /// Reader side: rendezvous with the monitor and return the state it
    /// published, or `None` once the checkpoint is closed.
    pub fn join(&self) -> Option<String> {
        let mut slot = self.park_behind(Side::Reader);
        if slot.closed {
            return None;
        }
        if slot.waiting == Some(Side::Monitor) {
            let state = slot.published.take();
            self.complete(&mut slot);
            return state;
        }
        let generation = slot.generation;
        let mut slot = self.park(slot, Side::Reader);
        slot.handoff.remove(&generation)
    }

    /// Refuse further rendezvous and wake every parked party.
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        slot.waiting = None;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether a party is parked in the slot.
    pub fn is_waiting(&self) -> bool {
        self.lock().waiting.is_some()
    }

    /// Lock the slot, waiting while another party of the same side holds it.
    fn park_behind(&self, side: Side) -> MutexGuard<'_, Slot> {
        let mut slot = self.lock();
        while slot.waiting == Some(side) && !slot.closed {
            slot = self.wait(slot);
        }
        slot
    }

    /// Park `side` until the current rendezvous completes or the slot
    /// closes.
    fn park<'a>(&'a self, mut slot: MutexGuard<'a, Slot>, side: Side) -> MutexGuard<'a, Slot> {
        slot.waiting = Some(side);
        let generation = slot.generation;
        while slot.generation == generation && !slot.closed {
            slot = self.wait(slot);
        }
        slot
    }

    fn complete(&self, slot: &mut Slot) {
        slot.waiting = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.cond.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| {
            warn!("CheckPoint lock poisoned; recovering");
            PoisonError::into_inner(e)
        })
    }

    fn wait<'a>(&'a self, slot: MutexGuard<'a, Slot>) -> MutexGuard<'a, Slot> {
        self.cond.wait(slot).unwrap_or_else(|e| {
            warn!("CheckPoint wait interrupted by a poisoned lock; recovering");
            PoisonError::into_inner(e)
        })
    }
}
