
use heapless::Vec;

use crate::Ts;

use super::queue::TX_QUEUE_SLOTS;

/// Slots held back from network frames for duty cycle and carrier sense events
pub const RESERVED_SLOTS: usize = 8;

/// Maximum number of outstanding local events.
///
/// Each accepted network frame holds up to two events (queue push and
/// transmit attempt) until its random offset expires.
pub const SCHEDULER_SLOTS: usize = 2 * (TX_QUEUE_SLOTS + RESERVED_SLOTS);

/// Handle to a scheduled event, used for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle(u64);

#[derive(Debug)]
struct Entry<T> {
    at: Ts,
    seq: u64,
    event: T,
}

/// Time ordered event queue.
///
/// Events due at the same time are delivered in the order they were scheduled.
#[derive(Debug)]
pub struct Scheduler<T> {
    seq: u64,
    entries: Vec<Entry<T>, SCHEDULER_SLOTS>,
}

impl <T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            seq: 0,
            entries: Vec::new(),
        }
    }

    /// Schedule an event at absolute time `at`, returning the event if full
    pub fn schedule(&mut self, at: Ts, event: T) -> Result<Handle, T> {
        let seq = self.seq;

        self.entries.push(Entry{ at, seq, event }).map_err(|e| e.event)?;
        self.seq += 1;

        Ok(Handle(seq))
    }

    /// Cancel a scheduled event, returning it if it had not yet fired
    pub fn cancel(&mut self, handle: Handle) -> Option<T> {
        let i = self.entries.iter().position(|e| e.seq == handle.0)?;
        Some(self.entries.swap_remove(i).event)
    }

    pub fn is_pending(&self, handle: Handle) -> bool {
        self.entries.iter().any(|e| e.seq == handle.0)
    }

    /// Time a pending event is due
    pub fn deadline(&self, handle: Handle) -> Option<Ts> {
        self.entries.iter().find(|e| e.seq == handle.0).map(|e| e.at)
    }

    /// Time of the earliest pending event
    pub fn next_deadline(&self) -> Option<Ts> {
        self.entries.iter().map(|e| e.at).min()
    }

    /// Remove the earliest event due at or before `now`
    pub fn pop_due(&mut self, now: Ts) -> Option<(Handle, Ts, T)> {
        let i = self.entries.iter()
            .enumerate()
            .filter(|(_, e)| e.at <= now)
            .min_by_key(|(_, e)| (e.at, e.seq))
            .map(|(i, _)| i)?;

        let e = self.entries.swap_remove(i);
        Some((Handle(e.seq), e.at, e.event))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of events that may still be scheduled
    pub fn available(&self) -> usize {
        SCHEDULER_SLOTS - self.entries.len()
    }

    /// Drop all pending events
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Duty cycle and carrier sense timers, at most one of each kind is outstanding
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerKind {
    Sleep,
    Wakeup,
    CarrierSenseExit,
}

/// Handles for the outstanding timer of each kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimerSlots {
    sleep: Option<Handle>,
    wakeup: Option<Handle>,
    cs_exit: Option<Handle>,
}

impl TimerSlots {
    pub fn get(&self, kind: TimerKind) -> Option<Handle> {
        match kind {
            TimerKind::Sleep => self.sleep,
            TimerKind::Wakeup => self.wakeup,
            TimerKind::CarrierSenseExit => self.cs_exit,
        }
    }

    /// Replace the handle for a timer kind, returning the previous handle
    pub fn replace(&mut self, kind: TimerKind, handle: Option<Handle>) -> Option<Handle> {
        let slot = match kind {
            TimerKind::Sleep => &mut self.sleep,
            TimerKind::Wakeup => &mut self.wakeup,
            TimerKind::CarrierSenseExit => &mut self.cs_exit,
        };
        core::mem::replace(slot, handle)
    }

    /// Clear the slot for `kind` if it holds `handle`
    pub fn release(&mut self, kind: TimerKind, handle: Handle) {
        if self.get(kind) == Some(handle) {
            self.replace(kind, None);
        }
    }
}
