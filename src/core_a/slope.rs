//! Per-sample envelope renderer (spec.md §4.1). Runs entirely in integer
//! fixed-point inside the audio ISR; the only place floating point appears
//! on this path is inside [`crate::shape::ShapeTables`] table generation,
//! which happens once at boot.

use crate::rings::{AslDone, RingProducer, SampleTime};
use crate::shape::{ShapeKind, ShapeTables};
use fixed::types::{I16F16, U16F16};

/// Block size selector (spec.md §4.1 "Priority mapping"). A change is
/// applied at the next block boundary rather than mid-block, so the ISR
/// never has to reconcile a resized batch partway through (spec.md: "A
/// change of block size is deferred until the end of the current block").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Accuracy,
    Balanced,
    Timing,
}

impl Priority {
    pub const fn block_size(self) -> usize {
        match self {
            Priority::Accuracy => 4,
            Priority::Balanced => 240,
            Priority::Timing => 480,
        }
    }
}

/// One channel's envelope segment (spec.md §3 "Slope").
pub struct Slope {
    here: U16F16,
    delta: U16F16,
    last_v: I16F16,
    scale_v: I16F16,
    countdown: i32,
    shape: ShapeKind,
    shaped: I16F16,
    has_done_cb: bool,
    /// Block size pending application at the next block boundary.
    pending_block_size: Option<usize>,
    block_size: usize,
}

impl Slope {
    pub fn new() -> Self {
        Self {
            here: U16F16::ZERO,
            delta: U16F16::ZERO,
            last_v: I16F16::ZERO,
            scale_v: I16F16::ZERO,
            countdown: 0,
            shape: ShapeKind::Linear,
            shaped: I16F16::ZERO,
            has_done_cb: false,
            pending_block_size: None,
            block_size: Priority::Balanced.block_size(),
        }
    }

    /// Currently held/rendered voltage (spec.md §4.1 "get(ch)"), safe to
    /// call from Core B without locking: it only reads the last value this
    /// struct itself computed.
    pub fn get(&self) -> I16F16 {
        self.shaped
    }

    /// `hold(ch, v)`: replace the segment with a constant output.
    pub fn hold(&mut self, v: I16F16) {
        self.last_v = v;
        self.scale_v = I16F16::ZERO;
        self.here = U16F16::ZERO;
        self.delta = U16F16::ZERO;
        self.countdown = 0;
        self.shaped = v;
        self.has_done_cb = false;
    }

    /// `toward(ch, dest, time_ms, shape)`. Returns `true` if the segment
    /// completed synchronously (the `time_ms == 0` instant-jump case),
    /// meaning the caller must post the completion event itself rather than
    /// waiting for the ISR to do it (spec.md §4.1: "Instant: ... post
    /// completion synchronously from the calling context").
    pub fn toward(
        &mut self,
        dest: I16F16,
        time_ms: u32,
        shape: ShapeKind,
        sample_rate_hz: u32,
        done_cb: bool,
    ) -> bool {
        let samples = (time_ms as u64 * sample_rate_hz as u64) / 1000;
        if samples == 0 {
            self.hold(dest);
            return true;
        }
        self.last_v = self.shaped;
        self.scale_v = dest - self.shaped;
        self.countdown = samples as i32;
        self.delta = U16F16::from_num(1.0) / U16F16::from_num(samples as u32);
        self.here = U16F16::ZERO;
        self.shape = shape;
        self.has_done_cb = done_cb;
        false
    }

    pub fn is_running(&self) -> bool {
        self.countdown > 0
    }

    pub fn set_block_size(&mut self, n: usize) {
        self.pending_block_size = Some(n);
    }

    /// Advance exactly one sample. Returns `true` the sample on which the
    /// segment completes (spec.md §4.1 algorithm, steps 1-3).
    fn step(&mut self, tables: &ShapeTables) -> bool {
        if self.countdown <= 0 {
            // Already resting on the final value; nothing to recompute.
            return false;
        }
        self.here = self.here.saturating_add(self.delta);
        self.countdown -= 1;
        let crossed = self.countdown <= 0;
        if crossed {
            self.here = U16F16::from_num(1.0);
        }
        let shaped_unit = tables.lookup(self.shape, self.here);
        self.shaped = self.last_v + self.scale_v * I16F16::from_num(shaped_unit);
        crossed
    }

    /// Render one sample, writing the resulting voltage into `out` and
    /// posting `SlopeDone` if this is the completing sample. `channel` and
    /// `now` are only used to tag the completion event.
    pub fn render_sample(
        &mut self,
        tables: &ShapeTables,
        channel: u8,
        now: SampleTime,
        asl_done: &mut RingProducer<'_, AslDone>,
    ) -> I16F16 {
        let completed = self.step(tables);
        if completed && self.has_done_cb {
            asl_done.post(AslDone {
                channel,
                timestamp: now,
            });
            self.has_done_cb = false;
        }
        self.shaped
    }

    /// Render a whole block, applying any deferred block-size change only
    /// once the block boundary is reached (spec.md §4.1 "Block variant").
    /// `start_time` is the sample time of the block's first sample.
    pub fn render_block(
        &mut self,
        tables: &ShapeTables,
        channel: u8,
        start_time: SampleTime,
        out: &mut [I16F16],
        asl_done: &mut RingProducer<'_, AslDone>,
    ) {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.render_sample(tables, channel, start_time + i as SampleTime, asl_done);
        }
        if let Some(n) = self.pending_block_size.take() {
            self.block_size = n;
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Default for Slope {
    fn default() -> Self {
        Self::new()
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
    fn instant_jump_is_synchronous() {
        let mut s = Slope::new();
        let completed = s.toward(I16F16::from_num(3.0), 0, ShapeKind::Linear, 48_000, true);
        assert!(completed);
        assert_eq!(s.get(), I16F16::from_num(3.0));
        assert!(!s.is_running());
    }

    #[test]
    fn linear_ramp_reaches_midpoint_and_destination() {
        let tables = ShapeTables::new();
        let ring: &'static mut Ring<AslDone> = leak(Ring::new());
        let (mut p, mut c) = ring.split();

        let mut s = Slope::new();
        s.toward(I16F16::from_num(5.0), 10, ShapeKind::Linear, 48_000, true);
        // 10ms @ 48kHz = 480 samples.
        let mut last = I16F16::ZERO;
        for i in 0..480 {
            last = s.render_sample(&tables, 1, i, &mut p);
        }
        assert!((last.to_num::<f32>() - 5.0).abs() < 0.01);
        assert_eq!(c.pop().map(|e| e.channel), Some(1));
        assert_eq!(c.pop(), None);

        // Check midpoint value by re-running from scratch.
        let mut s2 = Slope::new();
        s2.toward(I16F16::from_num(5.0), 10, ShapeKind::Linear, 48_000, false);
        let mut mid = I16F16::ZERO;
        for i in 0..240 {
            mid = s2.render_sample(&tables, 1, i, &mut p);
        }
        assert!((mid.to_num::<f32>() - 2.5).abs() < 0.05);
    }

    #[test]
    fn toward_supersedes_inflight_slope_without_firing_old_done() {
        let tables = ShapeTables::new();
        let ring: &'static mut Ring<AslDone> = leak(Ring::new());
        let (mut p, mut c) = ring.split();

        let mut s = Slope::new();
        s.toward(I16F16::from_num(5.0), 100, ShapeKind::Linear, 48_000, true);
        for i in 0..10 {
            s.render_sample(&tables, 2, i, &mut p);
        }
        // Superseding cancels the old done callback.
        s.toward(I16F16::from_num(0.0), 1, ShapeKind::Linear, 48_000, true);
        for i in 0..48 {
            s.render_sample(&tables, 2, 10 + i, &mut p);
        }
        // Exactly one completion event, for the new slope.
        assert!(c.pop().is_some());
        assert_eq!(c.pop(), None);
    }

    #[test]
    fn hold_outputs_constant_voltage() {
        let mut s = Slope::new();
        s.hold(I16F16::from_num(-2.5));
        assert_eq!(s.get(), I16F16::from_num(-2.5));
        assert!(!s.is_running());
    }
}
