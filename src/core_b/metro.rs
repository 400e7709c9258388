//! Metro pool (spec.md §3 "Metro", §4.5 "Metro"): 8 fixed slots, each
//! firing at `period_seconds * audio_rate` samples with a fractional-sample
//! accumulator so long-term phase never drifts by more than one sample.

use crate::config::MAX_METROS;
use crate::rings::{MetroTick, RingProducer};

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum MetroStatus {
    Stopped,
    Running,
}

struct MetroSlot {
    status: MetroStatus,
    period_seconds: f32,
    count: i32,
    stage: i32,
    next_fire_sample: u64,
    /// Accumulated fractional sample carried between fires (Kahan-style
    /// compensation per spec.md §4.5).
    fractional_error: f32,
}

impl MetroSlot {
    const fn new() -> Self {
        Self {
            status: MetroStatus::Stopped,
            period_seconds: 1.0,
            count: -1,
            stage: 0,
            next_fire_sample: 0,
            fractional_error: 0.0,
        }
    }
}

pub struct MetroPool {
    slots: [MetroSlot; MAX_METROS],
    sample_rate_hz: u32,
}

impl MetroPool {
    pub fn new(sample_rate_hz: u32) -> Self {
        Self {
            slots: core::array::from_fn(|_| MetroSlot::new()),
            sample_rate_hz,
        }
    }

    /// `metro[id]:start(period, count?)` (spec.md §4.4).
    pub fn start(&mut self, id: usize, period_seconds: f32, count: i32, now_sample: u64) {
        let slot = &mut self.slots[id];
        slot.status = MetroStatus::Running;
        slot.period_seconds = period_seconds.max(1.0 / self.sample_rate_hz as f32);
        slot.count = count;
        slot.stage = 0;
        slot.fractional_error = 0.0;
        let period_samples = slot.period_seconds * self.sample_rate_hz as f32;
        slot.next_fire_sample = now_sample + libm::roundf(period_samples) as u64;
    }

    /// `metro[id]:stop()`. Immediate; ticks already posted to the ring are
    /// still delivered (spec.md §5 "Cancellation/timeouts").
    pub fn stop(&mut self, id: usize) {
        self.slots[id].status = MetroStatus::Stopped;
    }

    pub fn is_running(&self, id: usize) -> bool {
        self.slots[id].status == MetroStatus::Running
    }

    /// Advance every running metro against the current sample counter,
    /// posting a tick for each slot whose deadline has passed. Called once
    /// per control-loop pass from Core B (spec.md §4.5).
    pub fn poll(&mut self, now_sample: u64, ring: &mut RingProducer<'_, MetroTick>) {
        let period_samples_exact = |p: f32, sr: u32| p * sr as f32;
        for (id, slot) in self.slots.iter_mut().enumerate() {
            if slot.status != MetroStatus::Running {
                continue;
            }
            while now_sample >= slot.next_fire_sample {
                slot.stage += 1;
                ring.post(MetroTick {
                    metro_id: id as u8,
                    stage: slot.stage,
                    timestamp: slot.next_fire_sample,
                });

                let exact = period_samples_exact(slot.period_seconds, self.sample_rate_hz)
                    + slot.fractional_error;
                let whole = libm::floorf(exact);
                slot.fractional_error = exact - whole;
                slot.next_fire_sample += whole as u64;

                if slot.count > 0 && slot.stage >= slot.count {
                    slot.status = MetroStatus::Stopped;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rings::Ring;

    fn leak<T: 'static + Default>(v: T) -> &'static mut T {
        Box::leak(Box::new(v))
    }

    #[test]
    fn fires_at_expected_sample_cadence() {
        let ring: &'static mut Ring<MetroTick> = leak(Ring::new());
        let (mut p, mut c) = ring.split();
        let mut pool = MetroPool::new(48_000);
        pool.start(0, 0.1, -1, 0);

        // Step the control loop sample-by-sample over 1 second.
        for sample in 0..48_000u64 {
            pool.poll(sample, &mut p);
        }

        let mut ticks = heapless::Vec::<MetroTick, 16>::new();
        while let Some(t) = c.pop() {
            let _ = ticks.push(t);
        }
        assert_eq!(ticks.len(), 10);
        for (n, t) in ticks.iter().enumerate() {
            let expected = (n as u64 + 1) * 4800;
            assert!((t.timestamp as i64 - expected as i64).abs() <= 1);
            assert_eq!(t.stage, n as i32 + 1);
        }
    }

    #[test]
    fn stop_is_immediate_for_future_ticks() {
        let ring: &'static mut Ring<MetroTick> = leak(Ring::new());
        let (mut p, mut c) = ring.split();
        let mut pool = MetroPool::new(48_000);
        pool.start(0, 0.01, -1, 0);
        pool.poll(480, &mut p);
        pool.stop(0);
        pool.poll(10_000, &mut p);
        // Only the one tick delivered before stop().
        assert_eq!(c.pop().is_some(), true);
        assert_eq!(c.pop(), None);
    }
}
