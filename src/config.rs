//! Board and engine constants, gathered in one module the way the teacher
//! firmware collects its `hardware::design_parameters` in one place.

/// Nominal DAC/ADC sample rate. The real board selects 8/32/48 kHz depending
/// on `priority`; the constant here is the default used when no block-size
/// override has been applied (see [`crate::core_a::slope::Priority`]).
pub const AUDIO_RATE_HZ: u32 = 48_000;

/// Number of bipolar 12-bit audio/CV channels on the Computer hardware.
pub const CHANNEL_COUNT: usize = 4;

/// Full ADC/DAC code range: `n in [-2048, 2047]` represents `v = n * 6.0/2048`.
pub const DAC_FULL_SCALE_COUNTS: i32 = 2048;
pub const DAC_FULL_SCALE_VOLTS: f32 = 6.0;

/// Number of entries in each shape lookup table.
pub const SHAPE_TABLE_LEN: usize = 256;

/// Fixed metro pool size (spec.md §3 "Metro").
pub const MAX_METROS: usize = 8;

/// Maximum number of cooperative script coroutines live at once.
pub const MAX_CLOCKS: usize = 16;

/// Maximum degrees per quantizer scale.
pub const MAX_SCALE_DEGREES: usize = 24;

/// CASL per-channel pool sizes (spec.md §3 "ASL/CASL Sequence").
pub const MAX_TOS: usize = 16;
pub const MAX_SEQUENCES: usize = 8;
pub const MAX_SEQUENCE_LEN: usize = 8;
pub const MAX_DYNAMICS: usize = 40;

/// Capacity of every SPSC event ring; must be a power of two (spec.md §3).
pub const RING_CAPACITY: usize = 64;

/// Minimum number of ADC counts between "no edge" and the nearest legal
/// hysteresis window for a `Change` detector. This is the parameter spec.md
/// §9's open question asks us to document rather than hard-code: it is
/// derived from the ADC's own noise floor (~0.5 LSB RMS) rounded up to a
/// whole count, not copied from the original board's tuned millivolt value.
pub const MIN_CHANGE_HYSTERESIS_COUNTS: i32 = 1;

/// Interval unit for `Stream`/`Volume` detectors: both are measured in
/// 32-sample blocks, a holdover from the crow hardware's detector cadence
/// (spec.md §4.6 "Stream/Volume timing").
pub const DETECTOR_BLOCK_SAMPLES: u32 = 32;

/// `Volume` envelope follower attack/release time constants in seconds.
pub const VOLUME_ATTACK_S: f32 = 0.018;
pub const VOLUME_RELEASE_S: f32 = 0.100;

/// `Peak` envelope follower time constant in seconds.
pub const PEAK_ENVELOPE_S: f32 = 0.180;

/// Flash script sector size and layout (spec.md §6 "Flash layout").
pub const FLASH_SECTOR_LEN: usize = 16 * 1024;
pub const FLASH_NAME_LEN: usize = 32;
pub const FLASH_SCRIPT_MAX_LEN: usize = FLASH_SECTOR_LEN - 4 - FLASH_NAME_LEN;

/// Number of LEDs and the index of the first user-assignable LED.
pub const LED_COUNT: usize = 6;
pub const USER_LED_START: usize = 4;

/// Two pulse inputs, two pulse outputs (spec.md §6 "Pulse I/O").
pub const PULSE_IN_COUNT: usize = 2;
pub const PULSE_OUT_COUNT: usize = 2;

/// Volts-to-DAC-counts and back, shared by the quantizer's ISR fast path and
/// any non-ISR float caller (spec.md §4.2).
#[inline]
pub fn volts_to_counts(v: f32) -> i32 {
    let n = v * (DAC_FULL_SCALE_COUNTS as f32 / DAC_FULL_SCALE_VOLTS);
    libm::roundf(n) as i32
}

#[inline]
pub fn counts_to_volts(n: i32) -> f32 {
    n as f32 * (DAC_FULL_SCALE_VOLTS / DAC_FULL_SCALE_COUNTS as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volts_roundtrip_near_full_scale() {
        let n = volts_to_counts(3.0);
        assert!((n - 1024).abs() <= 1);
        assert!((counts_to_volts(n) - 3.0).abs() < 0.01);
    }

    #[test]
    fn ring_capacity_is_power_of_two() {
        assert_eq!(RING_CAPACITY & (RING_CAPACITY - 1), 0);
    }
}
