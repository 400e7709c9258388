//! Input detectors (spec.md §4.6, §3 "Detector"): one per input channel,
//! running every ISR sample and posting discrete events to Core B. Mode
//! reconfiguration follows the `mode_switching` handshake spec.md
//! prescribes: Core B sets the flag, writes the new descriptor, clears
//! internal state, issues a barrier, then clears the flag; the ISR skips a
//! detector entirely for any sample where the flag is set.

use crate::config::{
    DETECTOR_BLOCK_SAMPLES, MIN_CHANGE_HYSTERESIS_COUNTS, PEAK_ENVELOPE_S, VOLUME_ATTACK_S,
    VOLUME_RELEASE_S,
};
use crate::rings::{DetectionKind, InputEvent, RingProducer, SampleTime};
use core::sync::atomic::{AtomicBool, Ordering};
use heapless::Vec;

const MAX_WINDOW_THRESHOLDS: usize = 16;
const MAX_SCALE_NOTES: usize = 24;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rising,
    Falling,
    Both,
}

#[derive(Clone)]
pub enum DetectorMode {
    None,
    Stream { interval_s: f32 },
    Change { threshold_v: f32, hysteresis_v: f32, direction: Direction },
    Window { thresholds: Vec<f32, MAX_WINDOW_THRESHOLDS>, hysteresis_v: f32 },
    Scale { scale: Vec<f32, MAX_SCALE_NOTES>, divs: u32, v_per_oct: f32 },
    Volume { interval_s: f32 },
    Peak { threshold_v: f32, hysteresis_v: f32 },
}

impl Default for DetectorMode {
    fn default() -> Self {
        DetectorMode::None
    }
}

fn volts_to_counts(v: f32) -> i32 {
    crate::config::volts_to_counts(v)
}

/// Minimum clamp applied to `Change`'s hysteresis (spec.md §9 open
/// question): documented as a detector parameter rather than a hard-coded
/// millivolt figure, chosen from the ADC's own noise floor.
fn clamp_hysteresis_counts(hyst_v: f32) -> i32 {
    volts_to_counts(hyst_v).abs().max(MIN_CHANGE_HYSTERESIS_COUNTS)
}

struct EnvelopeFollower {
    level: f32,
    attack: f32,
    release: f32,
}

impl EnvelopeFollower {
    fn new(attack_s: f32, release_s: f32, sample_rate_hz: u32) -> Self {
        // One-pole time-constant-to-coefficient conversion; attack/release
        // expressed directly in coefficients avoids repeating `expf` every
        // sample on the ISR path.
        let sr = sample_rate_hz as f32;
        Self {
            level: 0.0,
            attack: 1.0 - libm::expf(-1.0 / (attack_s * sr)),
            release: 1.0 - libm::expf(-1.0 / (release_s * sr)),
        }
    }

    fn step(&mut self, input_abs: f32) -> f32 {
        let coeff = if input_abs > self.level { self.attack } else { self.release };
        self.level += coeff * (input_abs - self.level);
        self.level
    }
}

/// Per-channel detector state (spec.md §3 "Detector").
pub struct Detector {
    mode: DetectorMode,
    mode_switching: AtomicBool,
    last_counts: i32,
    state_high: bool,
    block_countdown: u32,
    upper_bound: i32,
    lower_bound: i32,
    scale_index: usize,
    envelope: Option<EnvelopeFollower>,
    sample_rate_hz: u32,
}

impl Detector {
    pub fn new(sample_rate_hz: u32) -> Self {
        Self {
            mode: DetectorMode::None,
            mode_switching: AtomicBool::new(false),
            last_counts: 0,
            state_high: false,
            block_countdown: 0,
            upper_bound: 0,
            lower_bound: 0,
            scale_index: 0,
            envelope: None,
            sample_rate_hz,
        }
    }

    /// Core B reconfiguration entry point: set flag -> write -> clear state
    /// -> barrier -> clear flag (spec.md §4.6 "Common invariants").
    pub fn set_mode(&mut self, mode: DetectorMode) {
        self.mode_switching.store(true, Ordering::Relaxed);
        self.mode = mode;
        self.last_counts = 0;
        self.state_high = false;
        self.block_countdown = 0;
        self.scale_index = 0;
        self.envelope = match &self.mode {
            DetectorMode::Volume { .. } => {
                Some(EnvelopeFollower::new(VOLUME_ATTACK_S, VOLUME_RELEASE_S, self.sample_rate_hz))
            }
            DetectorMode::Peak { .. } => {
                Some(EnvelopeFollower::new(PEAK_ENVELOPE_S, PEAK_ENVELOPE_S, self.sample_rate_hz))
            }
            _ => None,
        };
        if let DetectorMode::Scale { scale, v_per_oct, .. } = &self.mode {
            let scale = scale.clone();
            let v_per_oct = *v_per_oct;
            self.recompute_scale_bounds(&scale, v_per_oct);
        }
        core::sync::atomic::fence(Ordering::SeqCst);
        self.mode_switching.store(false, Ordering::Relaxed);
    }

    fn recompute_scale_bounds(&mut self, scale: &[f32], v_per_oct: f32) {
        if scale.is_empty() {
            return;
        }
        let note_v = scale[self.scale_index.min(scale.len() - 1)] * v_per_oct;
        let half_step_v = v_per_oct / (2.0 * scale.len() as f32);
        self.upper_bound = volts_to_counts(note_v + half_step_v);
        self.lower_bound = volts_to_counts(note_v - half_step_v);
    }

    /// Run one ISR sample through the active detector. Returns an event to
    /// post, if any. Does nothing while `mode_switching` is set.
    pub fn process_sample(&mut self, counts: i32, channel: u8, now: SampleTime) -> Option<InputEvent> {
        if self.mode_switching.load(Ordering::Relaxed) {
            return None;
        }
        let result = match &self.mode {
            DetectorMode::None => None,
            DetectorMode::Stream { interval_s } => {
                self.step_stream(*interval_s, counts)
            }
            DetectorMode::Change { threshold_v, hysteresis_v, direction } => {
                self.step_change(*threshold_v, *hysteresis_v, *direction, counts)
            }
            DetectorMode::Window { thresholds, hysteresis_v } => {
                let thresholds = thresholds.clone();
                let hysteresis_v = *hysteresis_v;
                self.step_window(&thresholds, hysteresis_v, counts)
            }
            DetectorMode::Scale { scale, divs, v_per_oct } => {
                let scale = scale.clone();
                let (divs, v_per_oct) = (*divs, *v_per_oct);
                self.step_scale(&scale, divs, v_per_oct, counts)
            }
            DetectorMode::Volume { interval_s } => self.step_volume(*interval_s, counts),
            DetectorMode::Peak { threshold_v, hysteresis_v } => {
                self.step_peak(*threshold_v, *hysteresis_v, counts)
            }
        };
        self.last_counts = counts;
        result.map(|(kind, value_q16, extra)| InputEvent {
            channel,
            value_q16,
            kind,
            timestamp: now,
            extra,
        })
    }

    fn block_tick(&mut self, interval_s: f32) -> bool {
        if self.block_countdown == 0 {
            let interval_blocks =
                ((interval_s * self.sample_rate_hz as f32) / DETECTOR_BLOCK_SAMPLES as f32).max(1.0);
            self.block_countdown = interval_blocks as u32 * DETECTOR_BLOCK_SAMPLES;
        }
        self.block_countdown = self.block_countdown.saturating_sub(1);
        self.block_countdown == 0
    }

    fn step_stream(&mut self, interval_s: f32, counts: i32) -> Option<(DetectionKind, i32, i32)> {
        if self.block_tick(interval_s) {
            Some((DetectionKind::Stream, counts, 0))
        } else {
            None
        }
    }

    fn step_change(
        &mut self,
        threshold_v: f32,
        hysteresis_v: f32,
        direction: Direction,
        counts: i32,
    ) -> Option<(DetectionKind, i32, i32)> {
        let threshold = volts_to_counts(threshold_v);
        let hyst = clamp_hysteresis_counts(hysteresis_v);
        if !self.state_high && counts > threshold + hyst {
            if matches!(direction, Direction::Rising | Direction::Both) {
                self.state_high = true;
                return Some((DetectionKind::ChangeRise, counts, 1));
            }
            self.state_high = true;
        } else if self.state_high && counts < threshold - hyst {
            if matches!(direction, Direction::Falling | Direction::Both) {
                self.state_high = false;
                return Some((DetectionKind::ChangeFall, counts, 0));
            }
            self.state_high = false;
        }
        None
    }

    fn step_window(
        &mut self,
        thresholds: &[f32],
        hysteresis_v: f32,
        counts: i32,
    ) -> Option<(DetectionKind, i32, i32)> {
        let hyst = clamp_hysteresis_counts(hysteresis_v);
        let mut bin = 0i8;
        for (i, &t) in thresholds.iter().enumerate() {
            if counts > volts_to_counts(t) {
                bin = (i + 1) as i8;
            }
        }
        let prev_bin = self.scale_index as i8;
        if bin != prev_bin {
            // Hysteresis: require the crossing to clear the band by `hyst`
            // before re-latching, otherwise stay on the previous bin.
            let boundary_v = thresholds.get((bin.max(prev_bin) as usize).saturating_sub(1)).copied().unwrap_or(0.0);
            let boundary = volts_to_counts(boundary_v);
            if (counts - boundary).abs() < hyst {
                return None;
            }
            self.scale_index = bin as usize;
            let direction = if bin > prev_bin { bin } else { -bin };
            return Some((DetectionKind::Window(direction), counts, bin as i32));
        }
        None
    }

    fn step_scale(
        &mut self,
        scale: &[f32],
        divs: u32,
        v_per_oct: f32,
        counts: i32,
    ) -> Option<(DetectionKind, i32, i32)> {
        if scale.is_empty() {
            return None;
        }
        if counts >= self.lower_bound && counts <= self.upper_bound {
            return None;
        }
        // Out of the current note's hysteresis band: find the nearest note
        // in volts, then mirror the new band back into ADC counts so
        // subsequent samples compare with plain integers (spec.md §4.6
        // "Scale detection").
        let v = crate::config::counts_to_volts(counts);
        let mut best_idx = 0usize;
        let mut best_oct = 0i32;
        let mut best_dist = f32::MAX;
        for oct in -4..=4 {
            for (i, &degree) in scale.iter().enumerate() {
                let note_v = (oct as f32 + degree / divs as f32) * v_per_oct;
                let dist = (note_v - v).abs();
                if dist < best_dist {
                    best_dist = dist;
                    best_idx = i;
                    best_oct = oct;
                }
            }
        }
        self.scale_index = best_idx;
        self.recompute_scale_bounds(scale, v_per_oct);
        let note_v = (best_oct as f32 + scale[best_idx] / divs as f32) * v_per_oct;
        Some((
            DetectionKind::Scale,
            volts_to_counts(note_v),
            (best_oct << 8) | best_idx as i32,
        ))
    }

    fn step_volume(&mut self, interval_s: f32, counts: i32) -> Option<(DetectionKind, i32, i32)> {
        let v = crate::config::counts_to_volts(counts).abs();
        let level = self.envelope.as_mut().map(|e| e.step(v)).unwrap_or(0.0);
        if self.block_tick(interval_s) {
            Some((DetectionKind::Volume, volts_to_counts(level), 0))
        } else {
            None
        }
    }

    fn step_peak(
        &mut self,
        threshold_v: f32,
        hysteresis_v: f32,
        counts: i32,
    ) -> Option<(DetectionKind, i32, i32)> {
        let v = crate::config::counts_to_volts(counts).abs();
        let level = self.envelope.as_mut().map(|e| e.step(v)).unwrap_or(0.0);
        let threshold = threshold_v;
        let hyst = hysteresis_v.max(0.001);
        if !self.state_high && level > threshold + hyst {
            self.state_high = true;
            return Some((DetectionKind::Peak, volts_to_counts(level), 0));
        }
        if self.state_high && level < threshold - hyst {
            self.state_high = false;
        }
        None
    }
}
