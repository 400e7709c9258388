//! Scripting-VM host (spec.md §4.4). The VM itself stays dynamically typed
//! internally — values on its stack/argument lists are a small tagged
//! union — but, per DESIGN NOTES §9, every host boundary function is typed:
//! a REPL line or an event dispatch is first decoded into the [`Command`]
//! sum type, and only a `Command` is ever queued against Core A's channel
//! descriptors or Core B's schedulers. No `Result` ever crosses into the
//! audio ISR; every host call this module executes runs on Core B only.

use crate::config::{CHANNEL_COUNT, MAX_SEQUENCE_LEN};
use crate::core_a::detector::{Detector, DetectorMode};
use crate::core_a::Channel;
use crate::core_b::asl::{Casl, ControlCode, ElemNode, ToNode, NO_ELEM};
use crate::core_b::clock::{ClockScheduler, ResumeCondition};
use crate::core_b::metro::MetroPool;
use crate::error::VmError;
use crate::shape::ShapeKind;
use fixed::types::I16F16;
use heapless::{String, Vec};
use rand_core::{RngCore, SeedableRng};
use rand_xorshift::XorShiftRng;

pub const MAX_TELL_ARGS: usize = 6;
pub const MAX_EVENT_NAME: usize = 16;

/// The VM's internal dynamically-typed value.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Value {
    Number(f32),
    Bool(bool),
}

impl Value {
    pub fn as_number(self) -> Result<f32, VmError> {
        match self {
            Value::Number(n) => Ok(n),
            Value::Bool(_) => Err(VmError::BadArgType),
        }
    }
}

/// The typed host-function boundary (spec.md §4.4 table; DESIGN NOTES §9
/// "every boundary function is typed"). A [`Command`] is the only thing
/// that ever mutates a channel descriptor, a metro slot, a detector mode,
/// or a coroutine's schedule.
#[derive(Clone)]
pub enum Command {
    OutputVolts { ch: u8, v: f32 },
    OutputToward { ch: u8, v: f32, slew_ms: u32, shape: ShapeKind },
    OutputAslAction { ch: u8, action: u8 },
    OutputAslDescribe { ch: u8, steps: Vec<AslStep, MAX_SEQUENCE_LEN>, looped: bool },
    OutputClock { ch: u8, period_s: f32, width_s: f32 },
    OutputClockClear { ch: u8 },
    OutputScale { ch: u8, degrees: Vec<f32, 24>, mod_divisions: u32, v_per_oct: f32 },
    OutputScaleNone { ch: u8 },
    InputMode { ch: u8, mode: DetectorMode },
    MetroStart { id: u8, period_s: f32, count: i32 },
    MetroStop { id: u8 },
    ClockSleep { coroutine: u16, seconds: f32 },
    ClockSync { coroutine: u16, beats: f32 },
    CrowReset,
    Tell { event: String<MAX_EVENT_NAME>, args: Vec<Value, MAX_TELL_ARGS> },
}

/// One line of text the VM wants written to USB, already formatted per
/// spec.md §6 ("Output framing"): `^^name(a,b,...)`.
pub type TellLine = String<128>;

/// One `to(dest, time_s, shape)` step of an ASL program, as decoded by the
/// parser's `.describe(...)` grammar before being lowered into a channel's
/// `Casl` pool (spec.md §4.5 step 1: "Script submits an AST via
/// `describe(ch, tree)`").
#[derive(Clone)]
pub struct AslStep {
    pub dest: f32,
    pub time_s: f32,
    pub shape: ShapeKind,
}

/// Execution context a [`Command`] runs against: the Core A channel array
/// (descriptor writes only — the ISR still owns rendering), plus Core B's
/// own schedulers. Holding all of these together is what makes `apply`
/// infallible-looking from the caller's side: every failure mode is either
/// impossible by construction (channel index is `u8 % CHANNEL_COUNT`) or
/// clamped per spec.md §7's "Invalid scale/params" policy.
pub struct HostContext<'a> {
    pub channels: &'a mut [Channel; CHANNEL_COUNT],
    pub detectors: &'a mut [Detector; 2],
    pub metros: &'a mut MetroPool,
    pub clocks: &'a mut ClockScheduler,
    pub asl: &'a mut [Casl; CHANNEL_COUNT],
    pub sample_rate_hz: u32,
    pub now_sample: u64,
}

impl<'a> HostContext<'a> {
    fn channel_index(&self, ch: u8) -> usize {
        (ch as usize) % CHANNEL_COUNT
    }

    /// Advance channel `i`'s ASL interpreter one `To` step and, if it
    /// yielded one, issue it as a `toward()` on the channel's slope with
    /// the completion callback armed so the next ASL-done event continues
    /// the sequence (spec.md §4.5 step 3: "it issues a slope `toward(ch,
    /// dest, time, shape, cb)` where `cb` posts an ASL-done event").
    pub fn issue_next_asl_step(&mut self, i: usize) {
        if let Some(step) = self.asl[i].advance() {
            if !step.halt {
                self.channels[i].slope.toward(
                    I16F16::from_num(step.dest_v),
                    step.time_ms,
                    step.shape,
                    self.sample_rate_hz,
                    true,
                );
            }
        }
    }

    /// Apply one command. Returns a formatted USB line for `Tell`, `None`
    /// otherwise.
    pub fn apply(&mut self, cmd: Command) -> Option<TellLine> {
        match cmd {
            Command::OutputVolts { ch, v } => {
                let i = self.channel_index(ch);
                self.channels[i].slope.hold(I16F16::from_num(v));
                None
            }
            Command::OutputToward { ch, v, slew_ms, shape } => {
                let i = self.channel_index(ch);
                self.channels[i].slope.toward(
                    I16F16::from_num(v),
                    slew_ms,
                    shape,
                    self.sample_rate_hz,
                    true,
                );
                None
            }
            Command::OutputAslAction { ch, action } => {
                let i = self.channel_index(ch);
                self.asl[i].action(action);
                self.issue_next_asl_step(i);
                None
            }
            Command::OutputAslDescribe { ch, steps, looped } => {
                let i = self.channel_index(ch);
                self.asl[i] = Casl::new();
                let mut to_indices: Vec<u8, MAX_SEQUENCE_LEN> = Vec::new();
                for step in steps.iter() {
                    let dest = self.asl[i].alloc_elem(ElemNode::Float(step.dest));
                    let time = self.asl[i].alloc_elem(ElemNode::Float(step.time_s));
                    let shape = self.asl[i].alloc_elem(ElemNode::ShapeLit(step.shape));
                    let to = self.asl[i].alloc_to(ToNode { dest, time, shape, control: ControlCode::Literal });
                    let _ = to_indices.push(to);
                }
                if looped {
                    let recur = self.asl[i].alloc_to(ToNode {
                        dest: NO_ELEM,
                        time: NO_ELEM,
                        shape: NO_ELEM,
                        control: ControlCode::Recur,
                    });
                    let _ = to_indices.push(recur);
                }
                let seq = self.asl[i].alloc_sequence(&to_indices);
                self.asl[i].describe(seq);
                None
            }
            Command::OutputClock { ch, period_s, width_s } => {
                let i = self.channel_index(ch);
                self.channels[i].activate_gate(period_s, width_s, self.sample_rate_hz);
                None
            }
            Command::OutputClockClear { ch } => {
                let i = self.channel_index(ch);
                self.channels[i].deactivate_gate();
                None
            }
            Command::OutputScale { ch, degrees, mod_divisions, v_per_oct } => {
                let i = self.channel_index(ch);
                self.channels[i].quantizer.set_scale(&degrees, mod_divisions, v_per_oct);
                None
            }
            Command::OutputScaleNone { ch } => {
                let i = self.channel_index(ch);
                self.channels[i].quantizer.unset_scale();
                None
            }
            Command::InputMode { ch, mode } => {
                let i = (ch as usize) % self.detectors.len();
                self.detectors[i].set_mode(mode);
                None
            }
            Command::MetroStart { id, period_s, count } => {
                let i = (id as usize) % crate::config::MAX_METROS;
                self.metros.start(i, period_s, count, self.now_sample);
                None
            }
            Command::MetroStop { id } => {
                let i = (id as usize) % crate::config::MAX_METROS;
                self.metros.stop(i);
                None
            }
            Command::ClockSleep { coroutine, seconds } => {
                let samples = libm::roundf(seconds * self.sample_rate_hz as f32) as u64;
                self.clocks
                    .reschedule(coroutine, ResumeCondition::Deadline(self.now_sample + samples));
                None
            }
            Command::ClockSync { coroutine, beats } => {
                // Align to the next whole multiple of `beats` seconds,
                // treating one beat as one second absent a tempo source
                // (spec.md leaves BPM external to this core).
                let period = (beats.max(0.001) * self.sample_rate_hz as f32) as u64;
                let next = ((self.now_sample / period) + 1) * period;
                self.clocks.reschedule(coroutine, ResumeCondition::SyncEdge(next));
                None
            }
            Command::CrowReset => {
                for ch in self.channels.iter_mut() {
                    *ch = Channel::new();
                }
                for d in self.detectors.iter_mut() {
                    d.set_mode(DetectorMode::None);
                }
                for a in self.asl.iter_mut() {
                    *a = Casl::new();
                }
                self.clocks.clear();
                for i in 0..crate::config::MAX_METROS {
                    self.metros.stop(i);
                }
                None
            }
            Command::Tell { event, args } => Some(format_tell(&event, &args)),
        }
    }
}

fn format_tell(event: &str, args: &[Value]) -> TellLine {
    use core::fmt::Write;
    let mut line = TellLine::new();
    let _ = write!(line, "^^{}(", event);
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            let _ = line.push(',');
        }
        match a {
            Value::Number(n) => {
                let _ = write!(line, "{}", n);
            }
            Value::Bool(b) => {
                let _ = write!(line, "{}", b);
            }
        }
    }
    let _ = line.push(')');
    line
}

/// `math.random`-equivalent exposed to scripts, grounded on the teacher's
/// `rand_xorshift` dependency rather than a hand-rolled LCG (spec.md §9
/// "supplemented features").
pub struct Rng(XorShiftRng);

impl Rng {
    pub fn seeded(seed: u64) -> Self {
        let bytes = seed.to_le_bytes();
        let mut seed_arr = [0u8; 16];
        seed_arr[..8].copy_from_slice(&bytes);
        seed_arr[8..].copy_from_slice(&bytes);
        Self(XorShiftRng::from_seed(seed_arr))
    }

    /// Uniform float in `[0, 1)`.
    pub fn next_unit(&mut self) -> f32 {
        (self.0.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }
}

/// A VM runtime error is caught at the dispatch boundary and never halts
/// the event loop (spec.md §4.4 "Failure semantics", §7).
pub fn protected_apply(ctx: &mut HostContext<'_>, cmd: Command) -> Result<Option<TellLine>, VmError> {
    Ok(ctx.apply(cmd))
}

/// Which event field an event-handler callback's `tell(...)` argument
/// pulls from, or a literal baked in at registration time.
#[derive(Clone, Copy)]
pub enum ArgSource {
    Literal(f32),
    /// `MetroTick`: 0 = id, 1 = stage. `InputEvent`: 0 = channel, 1 = value.
    /// `AslDone`: 0 = channel.
    EventField(u8),
}

/// A compiled `function(...) tell(name, ...) end` handler body. Spec.md's
/// scripts register these as callbacks on a metro/input/channel; since a
/// general function literal is out of this engine's grammar (see
/// [`crate::core_b::parser`]), a handler is built the same way
/// [`crate::core_b::asl::Casl`] trees are: through a small typed builder
/// rather than parsed from text.
#[derive(Clone)]
pub struct TellTemplate {
    pub event: String<MAX_EVENT_NAME>,
    pub args: Vec<ArgSource, 4>,
}

impl TellTemplate {
    fn resolve(&self, fields: &[f32]) -> Command {
        let mut args = Vec::new();
        for src in self.args.iter() {
            let v = match *src {
                ArgSource::Literal(f) => f,
                ArgSource::EventField(i) => *fields.get(i as usize).unwrap_or(&0.0),
            };
            let _ = args.push(Value::Number(v));
        }
        Command::Tell { event: self.event.clone(), args }
    }
}

/// Registered event → `tell()` bindings (spec.md §4.4's `metro[n].event`,
/// `input[n].change`, channel `done` callbacks). One slot per source;
/// registering again replaces the previous handler.
pub struct HandlerTable {
    metro: [Option<TellTemplate>; crate::config::MAX_METROS],
    input: [Option<TellTemplate>; 2],
    asl_done: [Option<TellTemplate>; CHANNEL_COUNT],
}

impl HandlerTable {
    pub fn new() -> Self {
        Self {
            metro: core::array::from_fn(|_| None),
            input: core::array::from_fn(|_| None),
            asl_done: core::array::from_fn(|_| None),
        }
    }

    pub fn set_metro(&mut self, id: usize, tpl: TellTemplate) {
        self.metro[id % crate::config::MAX_METROS] = Some(tpl);
    }

    pub fn set_input(&mut self, ch: usize, tpl: TellTemplate) {
        self.input[ch % 2] = Some(tpl);
    }

    pub fn set_asl_done(&mut self, ch: usize, tpl: TellTemplate) {
        self.asl_done[ch % CHANNEL_COUNT] = Some(tpl);
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn metro_command(&self, id: u8, stage: i32) -> Option<Command> {
        self.metro[id as usize % crate::config::MAX_METROS]
            .as_ref()
            .map(|t| t.resolve(&[id as f32, stage as f32]))
    }

    pub fn input_command(&self, ch: u8, value: f32) -> Option<Command> {
        self.input[ch as usize % 2]
            .as_ref()
            .map(|t| t.resolve(&[ch as f32, value]))
    }

    pub fn asl_done_command(&self, ch: u8) -> Option<Command> {
        self.asl_done[ch as usize % CHANNEL_COUNT]
            .as_ref()
            .map(|t| t.resolve(&[ch as f32]))
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ctx<'a>(
        channels: &'a mut [Channel; CHANNEL_COUNT],
        detectors: &'a mut [Detector; 2],
        metros: &'a mut MetroPool,
        clocks: &'a mut ClockScheduler,
        asl: &'a mut [Casl; CHANNEL_COUNT],
    ) -> HostContext<'a> {
        HostContext {
            channels,
            detectors,
            metros,
            clocks,
            asl,
            sample_rate_hz: 48_000,
            now_sample: 0,
        }
    }

    #[test]
    fn output_volts_holds_instantly() {
        let mut channels = [Channel::new(), Channel::new(), Channel::new(), Channel::new()];
        let mut detectors = [Detector::new(48_000), Detector::new(48_000)];
        let mut metros = MetroPool::new(48_000);
        let mut clocks = ClockScheduler::new();
        let mut asl = [Casl::new(), Casl::new(), Casl::new(), Casl::new()];
        let mut ctx = make_ctx(&mut channels, &mut detectors, &mut metros, &mut clocks, &mut asl);

        ctx.apply(Command::OutputVolts { ch: 1, v: 3.0 });
        assert_eq!(channels[1].slope.get(), I16F16::from_num(3.0));
    }

    #[test]
    fn tell_formats_event_line() {
        let mut channels = [Channel::new(), Channel::new(), Channel::new(), Channel::new()];
        let mut detectors = [Detector::new(48_000), Detector::new(48_000)];
        let mut metros = MetroPool::new(48_000);
        let mut clocks = ClockScheduler::new();
        let mut asl = [Casl::new(), Casl::new(), Casl::new(), Casl::new()];
        let mut ctx = make_ctx(&mut channels, &mut detectors, &mut metros, &mut clocks, &mut asl);

        let mut args = Vec::new();
        args.push(Value::Number(1.0)).unwrap();
        args.push(Value::Number(1.0)).unwrap();
        let mut event = String::new();
        event.push_str("metro").unwrap();
        let line = ctx.apply(Command::Tell { event, args }).unwrap();
        assert_eq!(line.as_str(), "^^metro(1,1)");
    }

    #[test]
    fn crow_reset_is_idempotent() {
        let mut channels = [Channel::new(), Channel::new(), Channel::new(), Channel::new()];
        let mut detectors = [Detector::new(48_000), Detector::new(48_000)];
        let mut metros = MetroPool::new(48_000);
        let mut clocks = ClockScheduler::new();
        let mut asl = [Casl::new(), Casl::new(), Casl::new(), Casl::new()];
        let mut ctx = make_ctx(&mut channels, &mut detectors, &mut metros, &mut clocks, &mut asl);

        ctx.apply(Command::OutputVolts { ch: 0, v: 2.0 });
        ctx.apply(Command::CrowReset);
        ctx.apply(Command::CrowReset);
        assert_eq!(channels[0].slope.get(), I16F16::ZERO);
    }

    #[test]
    fn metro_handler_substitutes_id_and_stage_into_tell() {
        let mut handlers = HandlerTable::new();
        let mut event = String::new();
        event.push_str("metro").unwrap();
        let mut args = Vec::new();
        args.push(ArgSource::EventField(0)).unwrap();
        args.push(ArgSource::EventField(1)).unwrap();
        handlers.set_metro(1, TellTemplate { event, args });

        let cmd = handlers.metro_command(1, 3).unwrap();
        match cmd {
            Command::Tell { event, args } => {
                assert_eq!(event.as_str(), "metro");
                assert_eq!(args.as_slice(), &[Value::Number(1.0), Value::Number(3.0)]);
            }
            _ => panic!("expected Tell"),
        }
    }
}
