//! Envelope shapes: nine curves mapping a slope's normalised position
//! (0..1) to a normalised output (0..1), realised as 256-entry Q15 lookup
//! tables with linear interpolation, generated once at boot from the exact
//! per-shape formulas in
//! `examples/original_source/releases/40_corvus/crow_slopes.cpp`
//! (`crow_shape_sine/exp/log/over/under/rebound`; spec.md §3 "ShapeKind").
//!
//! Table values live in `fixed::types::I1F15`: one sign bit, fifteen
//! fractional bits, matching spec.md's "int16 Q15" wording and the `fixed`
//! crate already used for Q16.16 slope math (see [`crate::core_a::slope`]).

use crate::config::SHAPE_TABLE_LEN;
use fixed::types::I1F15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum ShapeKind {
    Linear = 0,
    Sine = 1,
    Log = 2,
    Expo = 3,
    Now = 4,
    Wait = 5,
    Over = 6,
    Under = 7,
    Rebound = 8,
}

impl Default for ShapeKind {
    fn default() -> Self {
        ShapeKind::Linear
    }
}

/// One shape's lookup table.
pub type ShapeTable = [I1F15; SHAPE_TABLE_LEN];

/// All nine shape tables, built once and shared read-only by every channel's
/// renderer. No table is ever mutated after [`ShapeTables::new`] returns, so
/// sharing a `&'static ShapeTables` across Core A and Core B needs no
/// synchronisation at all.
pub struct ShapeTables {
    tables: [ShapeTable; 9],
}

fn unit(x: f32) -> I1F15 {
    I1F15::from_num(x.clamp(-1.0, 0.999_97))
}

/// Ease-out-back overshoot (`examples/original_source/releases/40_corvus/
/// crow_slopes.cpp::crow_shape_over`).
fn over(t: f32) -> f32 {
    let in_1 = t - 1.0;
    in_1 * in_1 * (2.701_58 * in_1 + 1.701_58) + 1.0
}

/// Ease-in-back undershoot (`crow_shape_under`, same file).
fn under(t: f32) -> f32 {
    t * t * (2.701_58 * t - 1.701_58)
}

/// Four-piece bounce (`crow_shape_rebound`, same file).
fn rebound(t: f32) -> f32 {
    if t < 1.0 / 2.75 {
        7.5625 * t * t
    } else if t < 2.0 / 2.75 {
        let c = t - 1.5 / 2.75;
        7.5625 * c * c + 0.75
    } else if t < 2.5 / 2.75 {
        let c = t - 2.25 / 2.75;
        7.5625 * c * c + 0.9375
    } else {
        let c = t - 2.625 / 2.75;
        7.5625 * c * c + 0.984_375
    }
}

impl ShapeTables {
    pub fn new() -> Self {
        let mut tables = [[I1F15::ZERO; SHAPE_TABLE_LEN]; 9];
        for i in 0..SHAPE_TABLE_LEN {
            let t = i as f32 / (SHAPE_TABLE_LEN - 1) as f32;
            tables[ShapeKind::Linear as usize][i] = unit(t);
            // Raised quarter-cosine: smooth 0->1 with zero slope at both ends.
            tables[ShapeKind::Sine as usize][i] =
                unit(0.5 - 0.5 * libm::cosf(core::f32::consts::PI * t));
            // crow_shape_exp/crow_shape_log: `2^(10(t-1))` / `1 - 2^(-10t)`.
            tables[ShapeKind::Expo as usize][i] = unit(libm::powf(2.0, 10.0 * (t - 1.0)));
            tables[ShapeKind::Log as usize][i] = unit(1.0 - libm::powf(2.0, -10.0 * t));
            tables[ShapeKind::Now as usize][i] = unit(1.0);
            tables[ShapeKind::Wait as usize][i] = unit(0.0);
            // Cubic ease-back overshoot/undershoot and a four-piece bounce.
            tables[ShapeKind::Over as usize][i] = unit(over(t));
            tables[ShapeKind::Under as usize][i] = unit(under(t));
            tables[ShapeKind::Rebound as usize][i] = unit(rebound(t));
        }
        // Now jumps to 1 immediately and Wait stays at 0 until the final
        // sample; the renderer special-cases both rather than relying on
        // interpolation, but we still fill sane tables for introspection.
        tables[ShapeKind::Now as usize][0] = unit(1.0);
        tables[ShapeKind::Wait as usize][SHAPE_TABLE_LEN - 1] = unit(1.0);
        Self { tables }
    }

    /// Look up `shape(here)` with linear interpolation between adjacent
    /// table entries, `here` given in Q16.16 (0.0..=1.0).
    pub fn lookup(&self, shape: ShapeKind, here_q16: fixed::types::U16F16) -> I1F15 {
        match shape {
            ShapeKind::Now => return I1F15::from_num(1.0),
            ShapeKind::Wait => {
                if here_q16 >= fixed::types::U16F16::from_num(1.0) {
                    return I1F15::from_num(0.999_97);
                }
                return I1F15::ZERO;
            }
            _ => {}
        }
        let table = &self.tables[shape as usize];
        let scaled = here_q16.saturating_mul(fixed::types::U16F16::from_num(
            (SHAPE_TABLE_LEN - 1) as u32,
        ));
        let idx = scaled.to_num::<u32>().min(SHAPE_TABLE_LEN as u32 - 2) as usize;
        let frac = (scaled - fixed::types::U16F16::from_num(idx as u32))
            .to_num::<f32>()
            .clamp(0.0, 1.0);
        let a = table[idx].to_num::<f32>();
        let b = table[idx + 1].to_num::<f32>();
        unit(a + (b - a) * frac)
    }
}

impl Default for ShapeTables {
    fn default() -> Self {
        Self::new()
    }
}
