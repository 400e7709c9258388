//! One voltage output channel (spec.md §3 "Channel"): a slope, a
//! quantizer, and an optional gate clock, rendered in that priority order
//! every sample. The ISR reads a channel's state exactly once per sample;
//! all of Core B's writes land through these same methods, so there is no
//! way to observe a half-updated channel.

use crate::core_a::gate_clock::GateClock;
use crate::core_a::quantizer::QuantizerConfig;
use crate::core_a::slope::Slope;
use crate::rings::{AslDone, RingProducer, SampleTime};
use crate::shape::ShapeTables;
use fixed::types::I16F16;

pub struct Channel {
    pub slope: Slope,
    pub quantizer: QuantizerConfig,
    pub gate: GateClock,
    /// Quantizer state saved while a gate clock is active on channels 3-4
    /// (spec.md §3 "GateClock": "Activating a GateClock ... must save and
    /// later restore the prior quantizer state").
    saved_quantizer: Option<QuantizerConfig>,
}

impl Channel {
    pub fn new() -> Self {
        Self {
            slope: Slope::new(),
            quantizer: QuantizerConfig::disabled(),
            gate: GateClock::inactive(),
            saved_quantizer: None,
        }
    }

    pub fn activate_gate(&mut self, period_s: f32, width_s: f32, sample_rate_hz: u32) {
        if !self.gate.is_active() {
            self.saved_quantizer = Some(self.quantizer.clone());
        }
        self.gate.set_gate(period_s, width_s, sample_rate_hz);
    }

    pub fn deactivate_gate(&mut self) {
        self.gate.clear_gate();
        if let Some(q) = self.saved_quantizer.take() {
            self.quantizer = q;
        }
    }

    /// Render one sample: gate clock overrides the slope/quantizer chain
    /// entirely while active (spec.md §4.3 "Interaction with
    /// slopes/quantizer"); otherwise the slope output passes through the
    /// quantizer (spec.md §4.2).
    pub fn render_sample(
        &mut self,
        tables: &ShapeTables,
        channel: u8,
        now: SampleTime,
        asl_done: &mut RingProducer<'_, AslDone>,
    ) -> I16F16 {
        if self.gate.is_active() {
            return self.gate.step();
        }
        let v = self.slope.render_sample(tables, channel, now, asl_done);
        self.quantizer.apply(v)
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}
