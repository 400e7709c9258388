//! Core B's control loop (spec.md §4.4 "Event dispatch loop"): drain the
//! REPL mailbox, drain each event ring up to a fixed per-pass budget, tick
//! the metro pool and the coroutine scheduler, and route every outcome
//! through the VM's typed [`Command`] boundary. There is no garbage
//! collector step here — nothing in this engine allocates once boot-time
//! `describe()`/`alloc_*` calls finish, so the "GC step" spec.md's original
//! host language needed has no counterpart; see DESIGN.md.

use crate::config::CHANNEL_COUNT;
use crate::core_a::isr::AudioIsr;
use crate::core_b::asl::Casl;
use crate::core_b::clock::{ClockScheduler, ResumeCondition};
use crate::core_b::metro::MetroPool;
use crate::core_b::parser;
use crate::core_b::repl::Mailbox;
use crate::core_b::vm::{self, Command, HandlerTable, HostContext, Rng, TellLine};
use crate::error::Error;
use crate::rings::{EventConsumers, MetroTick, Ring};
use heapless::Vec;

/// Upper bound on events drained from any one ring per control-loop pass
/// (spec.md §4.4: "a per-iteration budget", so one noisy source can't starve
/// the others).
const RING_BUDGET: usize = 16;

/// Lines produced by one [`ControlLoop::poll`] pass, bounded the same way
/// the per-ring budgets are: enough headroom for every ring to fire once at
/// its cap without growing unbounded.
pub type OutputLines = Vec<TellLine, 32>;

static mut METRO_RING: Ring<MetroTick> = Ring::new();

/// Obtain the metro tick ring's producer/consumer halves. Like
/// `cortex_m::singleton!`, calling this more than once is unsound; a
/// [`ControlLoop`] calls it exactly once, in [`ControlLoop::new`].
fn take_metro_ring() -> &'static mut Ring<MetroTick> {
    #[allow(static_mut_refs)]
    unsafe {
        &mut METRO_RING
    }
}

pub struct ControlLoop {
    metros: MetroPool,
    clocks: ClockScheduler,
    asl: [Casl; CHANNEL_COUNT],
    handlers: HandlerTable,
    rng: Rng,
    metro_producer: crate::rings::RingProducer<'static, MetroTick>,
    metro_consumer: crate::rings::RingConsumer<'static, MetroTick>,
    pub mailbox: Mailbox<heapless::String<{ crate::core_b::repl::MAX_LINE_LEN }>>,
}

impl ControlLoop {
    pub fn new(sample_rate_hz: u32, rng_seed: u64) -> Self {
        let (metro_producer, metro_consumer) = take_metro_ring().split();
        Self {
            metros: MetroPool::new(sample_rate_hz),
            clocks: ClockScheduler::new(),
            asl: core::array::from_fn(|_| Casl::new()),
            handlers: HandlerTable::new(),
            rng: Rng::seeded(rng_seed),
            metro_producer,
            metro_consumer,
            mailbox: Mailbox::new(),
        }
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerTable {
        &mut self.handlers
    }

    fn host_ctx<'a>(&'a mut self, isr: &'a mut AudioIsr, now_sample: u64) -> HostContext<'a> {
        let sample_rate_hz = isr.sample_rate_hz();
        HostContext {
            channels: &mut isr.channels,
            detectors: &mut isr.detectors,
            metros: &mut self.metros,
            clocks: &mut self.clocks,
            asl: &mut self.asl,
            sample_rate_hz,
            now_sample,
        }
    }

    /// Parse and apply one REPL line (spec.md §4.4, §7 "Policy": malformed
    /// input yields `!compile error`/`!runtime error`, never a panic).
    pub fn apply_line(&mut self, line: &str, isr: &mut AudioIsr, now_sample: u64) -> Result<Option<TellLine>, Error> {
        let cmd = parser::parse(line)?;
        let mut ctx = self.host_ctx(isr, now_sample);
        Ok(vm::protected_apply(&mut ctx, cmd)?)
    }

    /// One control-loop pass: drain the mailbox, tick the metro pool, drain
    /// every event ring up to [`RING_BUDGET`], resume due coroutines, and
    /// collect every resulting `tell()` line (spec.md §4.4).
    pub fn poll(&mut self, isr: &mut AudioIsr, consumers: &mut EventConsumers<'_>, now_sample: u64) -> OutputLines {
        let mut out = OutputLines::new();

        if let Some(line) = self.mailbox.take() {
            match self.apply_line(line.as_str(), isr, now_sample) {
                Ok(Some(tell)) => {
                    let _ = out.push(tell);
                }
                Ok(None) => {}
                Err(e) => {
                    let mut buf = TellLine::new();
                    crate::error::format_usb_line(&e, &mut buf);
                    let _ = out.push(buf);
                }
            }
        }

        self.metros.poll(now_sample, &mut self.metro_producer);
        for _ in 0..RING_BUDGET {
            let Some(tick) = self.metro_consumer.pop() else { break };
            if let Some(cmd) = self.handlers.metro_command(tick.metro_id, tick.stage) {
                let mut ctx = self.host_ctx(isr, now_sample);
                if let Some(tell) = ctx.apply(cmd) {
                    let _ = out.push(tell);
                }
            }
        }

        for _ in 0..RING_BUDGET {
            let Some(evt) = consumers.input.pop() else { break };
            let volts = crate::config::counts_to_volts(evt.value_q16);
            if let Some(cmd) = self.handlers.input_command(evt.channel, volts) {
                let mut ctx = self.host_ctx(isr, now_sample);
                if let Some(tell) = ctx.apply(cmd) {
                    let _ = out.push(tell);
                }
            }
        }

        for _ in 0..RING_BUDGET {
            let Some(done) = consumers.asl_done.pop() else { break };
            let idx = (done.channel as usize) % CHANNEL_COUNT;
            if self.asl[idx].is_running() {
                // Drive the interpreter's next `To` step (spec.md §4.5 step
                // 3); the sequence keeps running across ASL-done events
                // until it pops its last stack frame.
                let mut ctx = self.host_ctx(isr, now_sample);
                ctx.issue_next_asl_step(idx);
            } else if let Some(cmd) = self.handlers.asl_done_command(done.channel) {
                let mut ctx = self.host_ctx(isr, now_sample);
                if let Some(tell) = ctx.apply(cmd) {
                    let _ = out.push(tell);
                }
            }
        }

        for _ in 0..RING_BUDGET {
            let Some(resume) = consumers.clock.pop() else { break };
            self.clocks.reschedule(resume.coroutine_id, ResumeCondition::Deadline(now_sample));
        }

        // A resumed coroutine's script body would run here and re-register
        // its own next condition via `clock.sleep`/`sync`; this engine
        // exposes that as `apply_line`/`Command` rather than running
        // bytecode itself, so resuming just frees the slot.
        for id in self.clocks.ready(now_sample) {
            self.clocks.free(id);
        }

        out
    }

    /// `math.random()` exposed to scripts.
    pub fn random(&mut self) -> f32 {
        self.rng.next_unit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_b::vm::{ArgSource, TellTemplate};
    use crate::rings::EventRings;
    use heapless::String;

    fn leak<T: 'static + Default>(v: T) -> &'static mut T {
        Box::leak(Box::new(v))
    }

    #[test]
    fn repl_line_output_volts_is_applied_instantly() {
        let rings: &'static mut EventRings = leak(EventRings::default());
        let (_producers, mut consumers) = rings.split();
        let mut isr = AudioIsr::new(48_000);
        let mut ctl = ControlLoop::new(48_000, 1);

        let result = ctl.apply_line("output[1].volts = 3.0", &mut isr, 0).unwrap();
        assert!(result.is_none());
        assert_eq!(isr.channels[1].slope.get(), fixed::types::I16F16::from_num(3.0));

        let out = ctl.poll(&mut isr, &mut consumers, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn malformed_line_yields_bang_prefixed_error() {
        let rings: &'static mut EventRings = leak(EventRings::default());
        let (_producers, mut consumers) = rings.split();
        let mut isr = AudioIsr::new(48_000);
        let mut ctl = ControlLoop::new(48_000, 1);

        let mut bad = String::new();
        bad.push_str("nonsense!!!").unwrap();
        ctl.mailbox.post(bad).unwrap();
        let out = ctl.poll(&mut isr, &mut consumers, 0);
        assert_eq!(out.len(), 1);
        assert!(out[0].as_str().starts_with('!'));
    }

    #[test]
    fn metro_tick_drives_registered_handler_to_a_tell_line() {
        let rings: &'static mut EventRings = leak(EventRings::default());
        let (_producers, mut consumers) = rings.split();
        let mut isr = AudioIsr::new(48_000);
        let mut ctl = ControlLoop::new(48_000, 1);

        let mut event = String::new();
        event.push_str("metro").unwrap();
        let mut args = Vec::new();
        args.push(ArgSource::EventField(0)).unwrap();
        args.push(ArgSource::EventField(1)).unwrap();
        ctl.handlers_mut().set_metro(1, TellTemplate { event, args });

        ctl.apply_line("metro[1]:start(0.1)", &mut isr, 0).unwrap();
        let out = ctl.poll(&mut isr, &mut consumers, 4800);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_str(), "^^metro(1,1)");
    }
}
