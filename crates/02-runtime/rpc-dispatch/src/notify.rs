use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// One-shot rendezvous between a completion callback and a blocked caller.
///
/// The first [`Notification::notify`] stores the value; later ones are ignored.
pub struct Notification<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

enum Slot<T> {
    Empty,
    Ready(T),
    Taken,
}

impl<T> Default for Notification<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Notification<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
            cond: Condvar::new(),
        }
    }

    /// Stores `value` and wakes the waiter. Returns false if already notified.
    pub fn notify(&self, value: T) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Empty) {
            return false;
        }
        *slot = Slot::Ready(value);
        self.cond.notify_all();
        true
    }

    pub fn has_been_notified(&self) -> bool {
        !matches!(*self.slot.lock(), Slot::Empty)
    }

    /// Blocks until notified and takes the value. Returns `None` if another
    /// waiter already took it.
    pub fn wait(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Empty) {
            self.cond.wait(&mut slot);
        }
        take(&mut slot)
    }

    /// Like [`Notification::wait`] but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Empty) {
            if self.cond.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        take(&mut slot)
    }
}

fn take<T>(slot: &mut Slot<T>) -> Option<T> {
    match std::mem::replace(slot, Slot::Taken) {
        Slot::Ready(value) => Some(value),
        Slot::Empty => {
            *slot = Slot::Empty;
            None
        }
        Slot::Taken => None,
    }
}
