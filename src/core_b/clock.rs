//! Cooperative script coroutines (spec.md §3 "Coroutine-clock", §4.5
//! "Cooperative clock"). This module only tracks *when* a suspended
//! coroutine becomes ready to resume; the VM in [`crate::core_b::vm`] owns
//! *what* runs when it does. That split mirrors spec.md §9's guidance to
//! replace stackful coroutines with "a hand-rolled PC-per-task table":
//! each live coroutine is one slot here, carrying nothing but its resume
//! condition, with no heap allocation and no pointer back into VM state.

use crate::config::MAX_CLOCKS;
use heapless::Vec;

pub type CoroutineId = u16;

#[derive(Clone, Copy, PartialEq)]
pub enum ResumeCondition {
    /// `clock.sleep(s)`: resume once the sample counter reaches this value.
    Deadline(u64),
    /// `clock.sync(beats)`: resume at the next transport edge aligned to
    /// `beats`, expressed as the next sample at which that aligned edge is
    /// expected.
    SyncEdge(u64),
    /// Resume on the next explicit signal (`metro`, `start`, `stop`,
    /// `bpm_change`, or an external pulse edge) matching `tag`.
    Signal(u32),
    /// Resume on the very next control-loop pass ("asap").
    Asap,
}

struct Slot {
    id: CoroutineId,
    condition: ResumeCondition,
    live: bool,
}

/// Exactly one scheduled resume per coroutine at any time (spec.md §3
/// invariant): registering a new condition for an id that already has one
/// replaces it rather than adding a second entry.
pub struct ClockScheduler {
    slots: Vec<Slot, MAX_CLOCKS>,
    next_id: CoroutineId,
}

impl ClockScheduler {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_id: 0,
        }
    }

    /// Allocate a new coroutine slot (a script `clock.run(fn)`).
    pub fn spawn(&mut self, condition: ResumeCondition) -> Option<CoroutineId> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.slots
            .push(Slot { id, condition, live: true })
            .ok()?;
        Some(id)
    }

    /// Replace a coroutine's resume condition (called when it yields again
    /// via `sleep`/`sync`).
    pub fn reschedule(&mut self, id: CoroutineId, condition: ResumeCondition) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.id == id && s.live) {
            slot.condition = condition;
        }
    }

    /// A coroutine that exits without re-yielding is freed (spec.md §4.5).
    pub fn free(&mut self, id: CoroutineId) {
        if let Some(pos) = self.slots.iter().position(|s| s.id == id) {
            self.slots.swap_remove(pos);
        }
    }

    /// `crow.reset()` frees every coroutine and drops their pending resumes
    /// (spec.md §5 "Cancellation/timeouts").
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn signal(&mut self, tag: u32, now_sample: u64) {
        for slot in self.slots.iter_mut() {
            if slot.condition == ResumeCondition::Signal(tag) {
                slot.condition = ResumeCondition::Deadline(now_sample);
            }
        }
    }

    /// Collect every coroutine whose deadline has elapsed, in FIFO
    /// (registration) order, and mark them not-live so a caller resuming
    /// them can re-register a fresh condition before the next poll (spec.md
    /// §4.5: "ready coroutines are resumed in FIFO order").
    pub fn ready(&mut self, now_sample: u64) -> Vec<CoroutineId, MAX_CLOCKS> {
        let mut out = Vec::new();
        for slot in self.slots.iter() {
            let due = match slot.condition {
                ResumeCondition::Deadline(t) | ResumeCondition::SyncEdge(t) => now_sample >= t,
                ResumeCondition::Asap => true,
                ResumeCondition::Signal(_) => false,
            };
            if due {
                let _ = out.push(slot.id);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for ClockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_returns_deadlines_in_fifo_order() {
        let mut s = ClockScheduler::new();
        let a = s.spawn(ResumeCondition::Deadline(100)).unwrap();
        let b = s.spawn(ResumeCondition::Deadline(50)).unwrap();
        let ready = s.ready(100);
        assert_eq!(ready.as_slice(), &[a, b]);
    }

    #[test]
    fn reset_drops_all_pending_resumes() {
        let mut s = ClockScheduler::new();
        s.spawn(ResumeCondition::Deadline(100)).unwrap();
        s.spawn(ResumeCondition::Asap).unwrap();
        s.clear();
        assert!(s.is_empty());
        assert!(s.ready(1_000_000).is_empty());
    }

    #[test]
    fn signal_wakes_matching_waiters_only() {
        let mut s = ClockScheduler::new();
        let a = s.spawn(ResumeCondition::Signal(1)).unwrap();
        let _b = s.spawn(ResumeCondition::Signal(2)).unwrap();
        s.signal(1, 42);
        let ready = s.ready(42);
        assert_eq!(ready.as_slice(), &[a]);
    }
}
