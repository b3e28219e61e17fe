//! Single-assignment rendezvous between a probe and whoever resolves it.

use super::ProbeError;
use parking_lot::{Condvar, Mutex};
use std::mem;
use std::time::Instant;

/// What a waiter is filled with. The listener only knows the reply TTL; the
/// probe derives the round trip time from its own send timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Reply { ttl: Option<u8> },
    Failed(ProbeError),
}

#[derive(Debug)]
enum Slot {
    Empty,
    Filled(Resolution),
    Cancelled,
    Taken,
}

/// Created empty, filled at most once, read at most once.
///
/// Filling a slot that was already filled, cancelled or read is a no-op.
#[derive(Debug)]
pub struct Waiter {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Waiter {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
            ready: Condvar::new(),
        }
    }

    /// Returns whether this call filled the slot.
    pub fn resolve(&self, resolution: Resolution) -> bool {
        let mut slot = self.slot.lock();
        if let Slot::Empty = *slot {
            *slot = Slot::Filled(resolution);
            self.ready.notify_all();
            true
        } else {
            false
        }
    }

    /// Closes an empty slot so that later `resolve` calls are ignored.
    pub fn cancel(&self) -> bool {
        let mut slot = self.slot.lock();
        if let Slot::Empty = *slot {
            *slot = Slot::Cancelled;
            self.ready.notify_all();
            true
        } else {
            false
        }
    }

    /// Takes the resolution if one is already there.
    pub fn take(&self) -> Option<Resolution> {
        take_filled(&mut self.slot.lock())
    }

    /// Blocks until the slot is filled or `deadline` passes, then takes the
    /// resolution. `None` on timeout, or if the slot was cancelled or read.
    pub fn wait_until(&self, deadline: Instant) -> Option<Resolution> {
        let mut slot = self.slot.lock();
        loop {
            match *slot {
                Slot::Filled(_) => return take_filled(&mut slot),
                Slot::Cancelled | Slot::Taken => return None,
                Slot::Empty => {
                    if self.ready.wait_until(&mut slot, deadline).timed_out() {
                        return take_filled(&mut slot);
                    }
                }
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Filled(_) | Slot::Taken)
    }
}

fn take_filled(slot: &mut Slot) -> Option<Resolution> {
    match mem::replace(slot, Slot::Taken) {
        Slot::Filled(resolution) => Some(resolution),
        other => {
            *slot = other;
            None
        }
    }
}
