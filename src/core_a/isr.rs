//! The audio ISR (spec.md §4, §5 "Core A"): one call per sample (or one
//! call per block in the `priority`-selected block size). Ties together
//! the four channels, the two input detectors, the global sample counter,
//! and the event ring producers. Never blocks, never allocates.

use crate::config::CHANNEL_COUNT;
use crate::core_a::channel::Channel;
use crate::core_a::detector::Detector;
use crate::hardware::{Adc, Dac};
use crate::rings::{EventProducers, InputEvent};
use crate::shape::ShapeTables;
use core::sync::atomic::{AtomicU64, Ordering};
use fixed::types::I16F16;

/// Global sample counter, advanced once per rendered sample. Core B reads
/// it (via [`SAMPLE_COUNTER`]) to drive the metro scheduler without the ISR
/// ever needing to know that metros exist (spec.md §4.5 "a tick advances a
/// global sample counter").
pub static SAMPLE_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn sample_counter() -> u64 {
    SAMPLE_COUNTER.load(Ordering::Relaxed)
}

/// Detector input-overrun / ISR-overrun counter (spec.md §7 "ISR overrun").
static OVERRUN_COUNT: AtomicU64 = AtomicU64::new(0);

pub fn overrun_count() -> u64 {
    OVERRUN_COUNT.load(Ordering::Relaxed)
}

pub struct AudioIsr {
    pub channels: [Channel; CHANNEL_COUNT],
    pub detectors: [Detector; 2],
    tables: ShapeTables,
    sample_rate_hz: u32,
}

impl AudioIsr {
    pub fn new(sample_rate_hz: u32) -> Self {
        Self {
            channels: [
                Channel::new(),
                Channel::new(),
                Channel::new(),
                Channel::new(),
            ],
            detectors: [Detector::new(sample_rate_hz), Detector::new(sample_rate_hz)],
            tables: ShapeTables::new(),
            sample_rate_hz,
        }
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn shape_tables(&self) -> &ShapeTables {
        &self.tables
    }

    /// One full ISR tick: sample inputs, run detectors, advance all four
    /// channels, write outputs, enqueue events (spec.md §5 "Core A").
    pub fn tick<H: Adc + Dac>(&mut self, hw: &mut H, producers: &mut EventProducers<'_>) {
        let now = SAMPLE_COUNTER.fetch_add(1, Ordering::Relaxed);

        for (i, detector) in self.detectors.iter_mut().enumerate() {
            let counts = hw.read(i);
            if let Some(event) = detector.process_sample(counts, i as u8, now) {
                post_input_event(producers, event);
            }
        }

        for (i, channel) in self.channels.iter_mut().enumerate() {
            let v = channel.render_sample(&self.tables, i as u8, now, &mut producers.asl_done);
            hw.write(i, crate::config::volts_to_counts(v.to_num::<f32>()));
        }
    }
}

fn post_input_event(producers: &mut EventProducers<'_>, event: InputEvent) {
    producers.input.post(event);
}

#[allow(dead_code)]
fn note_overrun() {
    OVERRUN_COUNT.fetch_add(1, Ordering::Relaxed);
}
