//! Lock-free SPSC event rings connecting Core A (producer) to Core B
//! (consumer), built on `heapless::spsc::Queue` the same way the teacher's
//! `net::data_stream` module streams `AdcDacData` blocks off the DSP ISR: a
//! `cortex_m::singleton!`-backed static queue split once into a `Producer`
//! and a `Consumer` at boot (spec.md §3 "Event rings", §9 "Global mutable
//! state").
//!
//! `heapless::spsc::Queue` already gives us the head/tail memory-barrier
//! discipline spec.md demands (it is implemented with `AtomicUsize` on
//! targets that have them, and critical sections elsewhere); this module
//! only adds the "never blocks the producer, count what's dropped" policy
//! spec.md's ring invariant requires, since the teacher's queue itself just
//! returns `Err` on a full push and leaves counting to the caller.

use crate::config::RING_CAPACITY;
use core::sync::atomic::{AtomicU32, Ordering};
use heapless::spsc::{Consumer, Producer, Queue};

/// A timestamp in audio samples since boot (spec.md's `timestamp` fields).
pub type SampleTime = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetroTick {
    pub metro_id: u8,
    pub stage: i32,
    pub timestamp: SampleTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionKind {
    Stream,
    ChangeRise,
    ChangeFall,
    Window(i8),
    Scale,
    Volume,
    Peak,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEvent {
    pub channel: u8,
    pub value_q16: i32,
    pub kind: DetectionKind,
    pub timestamp: SampleTime,
    /// Secondary payload: scale index/octave packed for `Scale`, otherwise 0.
    pub extra: i32,
}

/// Posted by an external clock-source edge (spec.md §4.4 `clock.sync`'s
/// "resume at the next clock-source edge"). This crate's own `clock.sync`
/// resolves synchronously against the sample counter (DESIGN.md "Open
/// Question decisions"), so nothing in-tree produces on this ring yet; it's
/// the hook a pulse-input tempo source or external MIDI/DIN-sync driver
/// would post into without changing `ControlLoop::poll`'s consumer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockResume {
    pub coroutine_id: u16,
    pub timestamp: SampleTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AslDone {
    pub channel: u8,
    pub timestamp: SampleTime,
}

/// A single event ring: a producer half used from the ISR, a consumer half
/// drained from the control loop, and an atomic drop counter visible to
/// both (spec.md: "queue-full drops the event and increments a drop counter
/// (never blocks the producer)").
pub struct RingProducer<'a, T> {
    inner: Producer<'a, T, RING_CAPACITY>,
    drops: &'a AtomicU32,
}

impl<'a, T> RingProducer<'a, T> {
    /// Best-effort enqueue. Never blocks; a full ring silently drops the
    /// newest event and bumps the counter.
    #[inline]
    pub fn post(&mut self, item: T) {
        if self.inner.enqueue(item).is_err() {
            self.drops.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub struct RingConsumer<'a, T> {
    inner: Consumer<'a, T, RING_CAPACITY>,
    drops: &'a AtomicU32,
}

impl<'a, T> RingConsumer<'a, T> {
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.inner.dequeue()
    }

    pub fn drop_count(&self) -> u32 {
        self.drops.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

/// Owns the static queue storage and drop counter for one event class, and
/// hands out the producer/consumer halves exactly once — the single-owner
/// pattern spec.md §9 asks for ("proven single-owner at boot").
pub struct Ring<T: 'static> {
    queue: Queue<T, RING_CAPACITY>,
    drops: AtomicU32,
}

impl<T: 'static> Ring<T> {
    pub const fn new() -> Self {
        Self {
            queue: Queue::new(),
            drops: AtomicU32::new(0),
        }
    }

    /// Split into producer/consumer halves. Must only be called once per
    /// ring; callers pass a `&'static mut Ring<T>` obtained at boot (e.g.
    /// via `cortex_m::singleton!`).
    pub fn split(&'static mut self) -> (RingProducer<'static, T>, RingConsumer<'static, T>) {
        let drops = &self.drops;
        let (p, c) = self.queue.split();
        (
            RingProducer { inner: p, drops },
            RingConsumer { inner: c, drops },
        )
    }
}

impl<T: 'static> Default for Ring<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The four event rings from spec.md §3, bundled for boot-time construction.
#[derive(Default)]
pub struct EventRings {
    pub metro: Ring<MetroTick>,
    pub input: Ring<InputEvent>,
    pub clock: Ring<ClockResume>,
    pub asl_done: Ring<AslDone>,
}

pub struct EventProducers<'a> {
    pub metro: RingProducer<'a, MetroTick>,
    pub input: RingProducer<'a, InputEvent>,
    pub clock: RingProducer<'a, ClockResume>,
    pub asl_done: RingProducer<'a, AslDone>,
}

pub struct EventConsumers<'a> {
    pub metro: RingConsumer<'a, MetroTick>,
    pub input: RingConsumer<'a, InputEvent>,
    pub clock: RingConsumer<'a, ClockResume>,
    pub asl_done: RingConsumer<'a, AslDone>,
}

impl EventRings {
    pub fn split(&'static mut self) -> (EventProducers<'static>, EventConsumers<'static>) {
        let (mp, mc) = self.metro.split();
        let (ip, ic) = self.input.split();
        let (cp, cc) = self.clock.split();
        let (ap, ac) = self.asl_done.split();
        (
            EventProducers {
                metro: mp,
                input: ip,
                clock: cp,
                asl_done: ap,
            },
            EventConsumers {
                metro: mc,
                input: ic,
                clock: cc,
                asl_done: ac,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leak<T: 'static + Default>(v: T) -> &'static mut T {
        Box::leak(Box::new(v))
    }

    #[test]
    fn post_and_pop_preserve_fifo_order_and_count() {
        let ring: &'static mut Ring<u32> = leak(Ring::new());
        let (mut p, mut c) = ring.split();
        for i in 0..10u32 {
            p.post(i);
        }
        assert_eq!(c.len(), 10);
        for i in 0..10u32 {
            assert_eq!(c.pop(), Some(i));
        }
        assert_eq!(c.pop(), None);
        assert_eq!(c.drop_count(), 0);
    }

    #[test]
    fn full_ring_drops_without_blocking() {
        let ring: &'static mut Ring<u32> = leak(Ring::new());
        let (mut p, mut c) = ring.split();
        // heapless spsc::Queue<T, N> holds N-1 items.
        for i in 0..(RING_CAPACITY as u32 - 1) {
            p.post(i);
        }
        p.post(999);
        assert_eq!(c.drop_count(), 1);
        assert_eq!(c.pop(), Some(0));
    }
}
