//! ASL/CASL: "A Slope Language", crow's DSL for shaped-envelope sequences
//! (spec.md §3 "ASL/CASL Sequence", §4.5 "ASL/CASL execution"). `Casl` is
//! the compiled/interpreted form resident in fixed per-channel pools; no
//! allocation happens once [`Casl::describe`] has run.
//!
//! Per DESIGN NOTES §9, the cyclic "parent" pointers of a sequence stack
//! become plain integer indices into a fixed pool — an arena-index
//! pattern, not an actual pointer graph — and every `Elem` that could
//! otherwise need a boxed child instead references its operands by index
//! into the channel's flat [`ElemNode`] arena.

use crate::config::{MAX_DYNAMICS, MAX_SEQUENCES, MAX_SEQUENCE_LEN, MAX_TOS};
use crate::shape::ShapeKind;

pub type ElemRef = u8;
pub const NO_ELEM: ElemRef = u8::MAX;

#[derive(Clone, Copy)]
pub enum ElemNode {
    Float(f32),
    ShapeLit(ShapeKind),
    Dynamic(u8),
    /// A write-once-per-resolution target; see `resolving_mutable` below.
    Mutable(u8),
    Negate(ElemRef),
    Add(ElemRef, ElemRef),
    Sub(ElemRef, ElemRef),
    Mul(ElemRef, ElemRef),
    Div(ElemRef, ElemRef),
    Mod(ElemRef, ElemRef),
    /// Single-shot write of the resolved rhs into a `Mutable` dynamic slot,
    /// evaluated for its side effect; resolves to the written value.
    Mutate(ElemRef, ElemRef),
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    Literal,
    Recur,
    If(ElemRef),
    Enter(u8),
    Held,
    Unheld,
    Wait,
    Lock,
    Open,
}

#[derive(Clone, Copy)]
pub struct ToNode {
    pub dest: ElemRef,
    pub time: ElemRef,
    pub shape: ElemRef,
    pub control: ControlCode,
}

impl ToNode {
    pub const fn empty() -> Self {
        Self {
            dest: NO_ELEM,
            time: NO_ELEM,
            shape: NO_ELEM,
            control: ControlCode::Literal,
        }
    }
}

#[derive(Clone, Copy)]
pub struct Sequence {
    pub tos: [u8; MAX_SEQUENCE_LEN],
    pub len: u8,
}

impl Sequence {
    pub const fn empty() -> Self {
        Self {
            tos: [0; MAX_SEQUENCE_LEN],
            len: 0,
        }
    }
}

#[derive(Clone, Copy)]
struct StackFrame {
    seq: u8,
    pc: u8,
}

/// One decoded `To` step, ready for the caller (the dispatch loop in
/// [`crate::core_b`]) to issue as a `toward()` command on the owning
/// channel.
pub struct ResolvedStep {
    pub dest_v: f32,
    pub time_ms: u32,
    pub shape: ShapeKind,
    pub halt: bool,
}

pub struct Casl {
    elems: [ElemNode; MAX_TOS * 4],
    elems_used: u8,
    tos: [ToNode; MAX_TOS],
    tos_used: u8,
    sequences: [Sequence; MAX_SEQUENCES],
    sequences_used: u8,
    dynamics: [f32; MAX_DYNAMICS],
    resolving_mutable: Option<u8>,
    stack: heapless::Vec<StackFrame, 8>,
    pub holding: bool,
    pub locked: bool,
    root_sequence: Option<u8>,
}

impl Casl {
    pub fn new() -> Self {
        Self {
            elems: [ElemNode::Float(0.0); MAX_TOS * 4],
            elems_used: 0,
            tos: [ToNode::empty(); MAX_TOS],
            tos_used: 0,
            sequences: [Sequence::empty(); MAX_SEQUENCES],
            sequences_used: 0,
            dynamics: [0.0; MAX_DYNAMICS],
            resolving_mutable: None,
            stack: heapless::Vec::new(),
            holding: false,
            locked: false,
            root_sequence: None,
        }
    }

    pub fn alloc_elem(&mut self, node: ElemNode) -> ElemRef {
        let idx = self.elems_used;
        self.elems[idx as usize] = node;
        self.elems_used += 1;
        idx
    }

    pub fn alloc_to(&mut self, to: ToNode) -> u8 {
        let idx = self.tos_used;
        self.tos[idx as usize] = to;
        self.tos_used += 1;
        idx
    }

    pub fn alloc_sequence(&mut self, to_indices: &[u8]) -> u8 {
        let idx = self.sequences_used;
        let mut seq = Sequence::empty();
        for (i, &t) in to_indices.iter().take(MAX_SEQUENCE_LEN).enumerate() {
            seq.tos[i] = t;
        }
        seq.len = to_indices.len().min(MAX_SEQUENCE_LEN) as u8;
        self.sequences[idx as usize] = seq;
        self.sequences_used += 1;
        idx
    }

    /// `describe(channel, tree)`: record the compiled tree's entry point.
    /// No allocation happens after this call (spec.md §3 invariant).
    pub fn describe(&mut self, root_sequence: u8) {
        self.root_sequence = Some(root_sequence);
    }

    fn resolve(&mut self, e: ElemRef) -> f32 {
        if e == NO_ELEM {
            return 0.0;
        }
        match self.elems[e as usize] {
            ElemNode::Float(f) => f,
            ElemNode::ShapeLit(_) => 0.0,
            ElemNode::Dynamic(i) => self.dynamics[i as usize],
            ElemNode::Mutable(i) => self.dynamics[i as usize],
            ElemNode::Negate(a) => -self.resolve(a),
            ElemNode::Add(a, b) => self.resolve(a) + self.resolve(b),
            ElemNode::Sub(a, b) => self.resolve(a) - self.resolve(b),
            ElemNode::Mul(a, b) => self.resolve(a) * self.resolve(b),
            ElemNode::Div(a, b) => {
                let d = self.resolve(b);
                if d == 0.0 {
                    0.0
                } else {
                    self.resolve(a) / d
                }
            }
            ElemNode::Mod(a, b) => {
                let av = self.resolve(a);
                let bv = self.resolve(b);
                if bv == 0.0 {
                    0.0
                } else {
                    libm::fmodf(av, bv)
                }
            }
            ElemNode::Mutate(target, rhs) => {
                let value = self.resolve(rhs);
                if let ElemNode::Mutable(i) = self.elems[target as usize] {
                    self.resolving_mutable = Some(i);
                    self.dynamics[i as usize] = value;
                    self.resolving_mutable = None;
                }
                value
            }
        }
    }

    fn resolve_shape(&self, e: ElemRef) -> ShapeKind {
        if e == NO_ELEM {
            return ShapeKind::Linear;
        }
        match self.elems[e as usize] {
            ElemNode::ShapeLit(s) => s,
            _ => ShapeKind::Linear,
        }
    }

    /// `action(ch, n)` (spec.md §4.5 step 2): `n=1` restart, `n=0`
    /// go-to-release if holding, `n=2` unlock.
    pub fn action(&mut self, n: u8) {
        match n {
            1 => {
                self.stack.clear();
                if let Some(root) = self.root_sequence {
                    let _ = self.stack.push(StackFrame { seq: root, pc: 0 });
                }
                self.holding = false;
            }
            0 => {
                if self.holding {
                    // Release sequence is sequence index 1 by convention,
                    // if the script declared one.
                    if self.sequences_used > 1 {
                        self.stack.clear();
                        let _ = self.stack.push(StackFrame { seq: 1, pc: 0 });
                        self.holding = false;
                    }
                }
            }
            2 => self.locked = false,
            _ => {}
        }
    }

    pub fn is_running(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Advance the interpreter by one `To` step (spec.md §4.5 steps 3-5),
    /// returning the slope command to issue, or `None` if the sequence has
    /// finished (or is paused on `Wait`/locked).
    pub fn advance(&mut self) -> Option<ResolvedStep> {
        if self.locked {
            return None;
        }
        loop {
            let Some(frame) = self.stack.last().copied() else {
                return None;
            };
            let seq = self.sequences[frame.seq as usize];
            if frame.pc as usize >= seq.len as usize {
                // End of sequence: pop to parent, or stop if this was the
                // outermost frame (spec.md: "end-of-sequence pops").
                self.stack.pop();
                if self.stack.is_empty() {
                    self.holding = true;
                    return None;
                }
                continue;
            }
            let to_idx = seq.tos[frame.pc as usize];
            let to = self.tos[to_idx as usize];
            match to.control {
                ControlCode::Recur => {
                    self.stack.last_mut().unwrap().pc = 0;
                    continue;
                }
                ControlCode::If(pred) => {
                    if self.resolve(pred) == 0.0 {
                        self.stack.pop();
                        continue;
                    }
                    self.stack.last_mut().unwrap().pc += 1;
                    continue;
                }
                ControlCode::Enter(child_seq) => {
                    self.stack.last_mut().unwrap().pc += 1;
                    if self.stack.push(StackFrame { seq: child_seq, pc: 0 }).is_err() {
                        return None;
                    }
                    continue;
                }
                ControlCode::Held => {
                    self.holding = true;
                    self.stack.last_mut().unwrap().pc += 1;
                    continue;
                }
                ControlCode::Unheld => {
                    self.holding = false;
                    self.stack.last_mut().unwrap().pc += 1;
                    continue;
                }
                ControlCode::Wait => return None,
                ControlCode::Lock => {
                    self.locked = true;
                    self.stack.last_mut().unwrap().pc += 1;
                    continue;
                }
                ControlCode::Open => {
                    self.locked = false;
                    self.stack.last_mut().unwrap().pc += 1;
                    continue;
                }
                ControlCode::Literal => {
                    let dest_v = self.resolve(to.dest);
                    let time_s = self.resolve(to.time);
                    let shape = self.resolve_shape(to.shape);
                    self.stack.last_mut().unwrap().pc += 1;
                    return Some(ResolvedStep {
                        dest_v,
                        time_ms: (time_s * 1000.0).max(0.0) as u32,
                        shape,
                        halt: false,
                    });
                }
            }
        }
    }
}

impl Default for Casl {
    fn default() -> Self {
        Self::new()
    }
}
