//! Control-voltage scripting engine for the Blackbird Eurorack Computer
//! card: the audio-rate slope/quantizer/detector renderer (Core A) and the
//! control-rate scripting VM, metro pool, coroutine scheduler and REPL
//! (Core B), connected by lock-free SPSC event rings. Hardware access (DAC,
//! ADC, pulse I/O, LEDs, USB transport, flash programming) is exposed only
//! as traits; a firmware binary wires those traits to real silicon. See
//! `SPEC_FULL.md`/`DESIGN.md` for the engine's full contract and the
//! grounding for each module's design.
#![cfg_attr(not(test), no_std)]

#[cfg(test)]
extern crate std;

pub mod config;
pub mod core_a;
pub mod core_b;
pub mod error;
pub mod flash;
pub mod hardware;
pub mod rings;
pub mod shape;

pub use core_a::AudioIsr;
pub use core_b::ControlLoop;

/// Ties one [`AudioIsr`] and one [`ControlLoop`] together with the event
/// rings connecting them, mirroring how the real firmware's two cores share
/// exactly this surface (spec.md §2 "Two cores, one engine"). Useful for
/// integration tests and as the shape a `main.rs`/RTIC app would wire up;
/// the library itself never spawns a second core.
pub struct Engine {
    pub isr: AudioIsr,
    pub control: ControlLoop,
}

impl Engine {
    pub fn new(sample_rate_hz: u32, rng_seed: u64) -> Self {
        Self {
            isr: AudioIsr::new(sample_rate_hz),
            control: ControlLoop::new(sample_rate_hz, rng_seed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_b::repl::{Framed, LineAssembler};
    use crate::hardware::MockHardware;
    use crate::rings::EventRings;

    fn leak<T: 'static + Default>(v: T) -> &'static mut T {
        std::boxed::Box::leak(std::boxed::Box::new(v))
    }

    /// End-to-end seed scenario 3 (spec.md §8): a REPL line starts a metro,
    /// the control loop fires it ten times over one second, and each tick
    /// is delivered to the registered handler as `^^metro(1,1)`..`(1,10)`.
    #[test]
    fn metro_script_runs_through_the_whole_stack() {
        let rings: &'static mut EventRings = leak(EventRings::default());
        let (mut producers, mut consumers) = rings.split();
        let mut engine = Engine::new(48_000, 7);
        let mut hw = MockHardware::default();

        let mut event = heapless::String::new();
        event.push_str("metro").unwrap();
        let mut args = heapless::Vec::new();
        args.push(core_b::vm::ArgSource::EventField(0)).unwrap();
        args.push(core_b::vm::ArgSource::EventField(1)).unwrap();
        engine
            .control
            .handlers_mut()
            .set_metro(1, core_b::vm::TellTemplate { event, args });

        engine.control.apply_line("metro[1]:start(0.1)", &mut engine.isr, 0).unwrap();

        let mut lines: std::vec::Vec<heapless::String<128>> = std::vec::Vec::new();
        for sample in 0..48_000u64 {
            engine.isr.tick(&mut hw, &mut producers);
            if sample % 64 == 0 {
                let out = engine.control.poll(&mut engine.isr, &mut consumers, sample);
                lines.extend(out.into_iter());
            }
        }

        assert_eq!(lines.len(), 10);
        for (n, l) in lines.iter().enumerate() {
            let mut expected = heapless::String::<16>::new();
            use core::fmt::Write;
            let _ = write!(expected, "^^metro(1,{})", n + 1);
            assert_eq!(l.as_str(), expected.as_str());
        }
    }

    /// A USB byte stream assembles into lines that the control loop
    /// compiles and applies, end to end.
    #[test]
    fn usb_bytes_assemble_into_an_applied_line() {
        let rings: &'static mut EventRings = leak(EventRings::default());
        let (_producers, mut consumers) = rings.split();
        let mut engine = Engine::new(48_000, 1);

        let mut assembler = LineAssembler::new();
        let mut applied = false;
        for b in b"output[0].volts = 2.5\n".iter().copied() {
            if let Some(Framed::Line(line)) = assembler.feed(b).unwrap() {
                engine.control.apply_line(line.as_str(), &mut engine.isr, 0).unwrap();
                applied = true;
            }
        }
        assert!(applied);
        assert_eq!(engine.isr.channels[0].slope.get(), fixed::types::I16F16::from_num(2.5));

        let out = engine.control.poll(&mut engine.isr, &mut consumers, 0);
        assert!(out.is_empty());
    }

    /// Seed scenario 6 (spec.md §8): a looping `to(5,...)/to(0,...)` ASL
    /// sequence, once started with `action(1)`, keeps re-triggering itself
    /// off the ASL-done ring with no further script intervention — the
    /// channel traces a symmetric triangle wave, so its average over one
    /// second should land on the triangle's midpoint voltage.
    #[test]
    fn asl_loop_runs_through_the_whole_stack() {
        let rings: &'static mut EventRings = leak(EventRings::default());
        let (mut producers, mut consumers) = rings.split();
        let mut engine = Engine::new(48_000, 3);
        let mut hw = MockHardware::default();

        engine
            .control
            .apply_line(
                "output[2].describe(loop{to(5,0.001,'linear'), to(0,0.001,'linear')})",
                &mut engine.isr,
                0,
            )
            .unwrap();
        engine.control.apply_line("output[2]:action(1)", &mut engine.isr, 0).unwrap();

        let mut sum_counts: i64 = 0;
        let mut max_counts = i32::MIN;
        let mut min_counts = i32::MAX;
        for sample in 0..48_000u64 {
            engine.isr.tick(&mut hw, &mut producers);
            sum_counts += hw.dac_counts[2] as i64;
            max_counts = max_counts.max(hw.dac_counts[2]);
            min_counts = min_counts.min(hw.dac_counts[2]);
            if sample % 64 == 0 {
                let _ = engine.control.poll(&mut engine.isr, &mut consumers, sample);
            }
        }

        let avg_v = config::counts_to_volts((sum_counts / 48_000) as i32);
        assert!((avg_v - 2.5).abs() < 0.05, "average voltage was {avg_v}");
        // The sequence actually keeps running (not stuck at its initial
        // value): it reaches close to both rails.
        assert!(config::counts_to_volts(max_counts) > 4.5);
        assert!(config::counts_to_volts(min_counts) < 0.5);
    }
}
