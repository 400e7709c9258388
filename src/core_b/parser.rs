//! A small statement parser for the REPL's single-line commands (spec.md
//! §4.4 host function table). The USB line-framing protocol itself (`^^s`,
//! backtick fences, escape/backspace handling) is an external collaborator
//! per spec.md §1 ("the text REPL protocol parser... are external
//! collaborators"); this module only decodes one already-framed line of
//! text into a typed [`crate::core_b::vm::Command`].
//!
//! Handler bodies (`metro_handler = fn(id,stage) -> tell(...)`,
//! `input[1].change = fn(s) -> ...`) are not parsed from text at all: they
//! are registered through [`crate::core_b::vm::HandlerTable`]'s builder
//! API, since compiling an arbitrary function literal is a full language
//! front-end and out of this engine's scope (see DESIGN.md). ASL sequences
//! (spec.md §3 "ASL/CASL Sequence", §4.5) are a narrower, fully fixed
//! grammar — `loop{to(dest,time,shape), ...}` or `{to(...), ...}` — so
//! `output[n].describe(...)` *is* parsed here, straight into
//! [`crate::core_b::vm::Command::OutputAslDescribe`], which lowers it into
//! the channel's [`crate::core_b::asl::Casl`] arena the same way
//! `Casl`'s own builder methods would.
//! The grammar accepted here is a fixed, typed subset sufficient to drive
//! every host function in spec.md §4.4 and the §8 seed scenarios.

use crate::config::MAX_SEQUENCE_LEN;
use crate::core_a::detector::{Direction, DetectorMode};
use crate::core_b::vm::{AslStep, Command, Value};
use crate::error::VmError;
use crate::shape::ShapeKind;
use heapless::{String, Vec};

fn trim(s: &str) -> &str {
    s.trim()
}

/// `parts.join(";")`, but for a `heapless::Vec`/slice of `&str` (no `alloc`
/// in this `no_std` crate, so `[T]::join` isn't available).
fn join_semicolon(parts: &[&str]) -> String<{ crate::core_b::repl::MAX_LINE_LEN }> {
    let mut out: String<{ crate::core_b::repl::MAX_LINE_LEN }> = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            let _ = out.push(';');
        }
        let _ = out.push_str(part);
    }
    out
}

fn parse_f32(s: &str) -> Result<f32, VmError> {
    trim(s).parse::<f32>().map_err(|_| VmError::BadArgType)
}

fn parse_u8(s: &str) -> Result<u8, VmError> {
    trim(s).parse::<u8>().map_err(|_| VmError::BadArgType)
}

fn parse_shape(s: &str) -> ShapeKind {
    match trim(s).trim_matches('\'').trim_matches('"') {
        "sine" => ShapeKind::Sine,
        "log" => ShapeKind::Log,
        "expo" | "exponential" => ShapeKind::Expo,
        "now" => ShapeKind::Now,
        "wait" => ShapeKind::Wait,
        "over" => ShapeKind::Over,
        "under" => ShapeKind::Under,
        "rebound" => ShapeKind::Rebound,
        _ => ShapeKind::Linear,
    }
}

/// Split `"ch]...rest"`-style `target[N]` prefixes, returning `(N, rest)`.
fn split_index(line: &str, name: &str) -> Option<(u8, String<96>)> {
    let body = line.strip_prefix(name)?.trim_start();
    let body = body.strip_prefix('[')?;
    let close = body.find(']')?;
    let idx: u8 = body[..close].trim().parse().ok()?;
    let mut rest = String::new();
    rest.push_str(body[close + 1..].trim_start()).ok()?;
    Some((idx, rest))
}

fn split_call<'a>(s: &'a str, sep: char) -> Option<(&'a str, &'a str)> {
    let pos = s.find(sep)?;
    let open = s[pos + 1..].find('(')?;
    let name_end = pos + 1 + open;
    let name = s[pos + 1..name_end].trim();
    let close = s.rfind(')')?;
    Some((name, &s[name_end + 1..close]))
}

fn csv(args: &str) -> Vec<&str, 8> {
    let mut out = Vec::new();
    if !args.trim().is_empty() {
        for part in args.split(',') {
            let _ = out.push(part.trim());
        }
    }
    out
}

/// Split on `sep` only at paren/brace nesting depth 0, so a `to(a,b,c)`
/// step's own commas don't get mistaken for step separators.
fn split_top_level(s: &str, sep: char) -> Vec<&str, 8> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' | '{' => depth += 1,
            ')' | '}' => depth -= 1,
            _ if c == sep && depth == 0 => {
                let _ = out.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if start <= s.len() {
        let _ = out.push(s[start..].trim());
    }
    out
}

/// Parse one already-framed REPL line into a [`Command`]. Returns
/// `Err(VmError::Compile)` for anything outside the supported grammar.
pub fn parse(line: &str) -> Result<Command, VmError> {
    let line = trim(line);

    if line == "crow.reset()" {
        return Ok(Command::CrowReset);
    }

    if let Some(rest) = line.strip_prefix("tell(") {
        let inner = rest.strip_suffix(')').ok_or(VmError::Compile)?;
        let parts = csv(inner);
        let mut parts_iter = parts.iter();
        let name = parts_iter.next().ok_or(VmError::Compile)?.trim_matches('\'').trim_matches('"');
        let mut event = String::new();
        event.push_str(name).map_err(|_| VmError::Compile)?;
        let mut args = Vec::new();
        for p in parts_iter {
            let _ = args.push(Value::Number(parse_f32(p)?));
        }
        return Ok(Command::Tell { event, args });
    }

    if let Some((ch, rest)) = split_index(line, "output") {
        let rest = rest.as_str();
        if let Some(assign) = rest.strip_prefix(".volts") {
            let assign = trim(assign).strip_prefix('=').ok_or(VmError::Compile)?;
            let parts = csv(assign);
            let v = parse_f32(parts.first().ok_or(VmError::Compile)?)?;
            return if parts.len() > 1 {
                let slew_ms = (parse_f32(parts[1])? * 1000.0) as u32;
                let shape = parts.get(2).map(|s| parse_shape(s)).unwrap_or(ShapeKind::Linear);
                Ok(Command::OutputToward { ch, v, slew_ms, shape })
            } else {
                Ok(Command::OutputVolts { ch, v })
            };
        }
        if let Some(call) = rest.strip_prefix(".describe(") {
            let call = call.strip_suffix(')').ok_or(VmError::Compile)?;
            let call = trim(call);
            let (looped, body) = match call.strip_prefix("loop") {
                Some(b) => (true, trim(b)),
                None => (false, call),
            };
            let body = body.strip_prefix('{').ok_or(VmError::Compile)?;
            let body = body.strip_suffix('}').ok_or(VmError::Compile)?;
            let mut steps: Vec<AslStep, MAX_SEQUENCE_LEN> = Vec::new();
            for step_src in split_top_level(body, ',') {
                let step_src = trim(step_src);
                let inner = step_src.strip_prefix("to(").ok_or(VmError::Compile)?;
                let inner = inner.strip_suffix(')').ok_or(VmError::Compile)?;
                let parts = csv(inner);
                let dest = parse_f32(parts.first().ok_or(VmError::Compile)?)?;
                let time_s = parse_f32(parts.get(1).ok_or(VmError::Compile)?)?;
                let shape = parts.get(2).map(|s| parse_shape(s)).unwrap_or(ShapeKind::Linear);
                steps.push(AslStep { dest, time_s, shape }).map_err(|_| VmError::Compile)?;
            }
            return Ok(Command::OutputAslDescribe { ch, steps, looped });
        }
        if let Some((name, args)) = split_call(rest, ':') {
            let parts = csv(args);
            return match name {
                "clock" => {
                    if parts.first() == Some(&"none") {
                        return Ok(Command::OutputClockClear { ch });
                    }
                    let period_s = parse_f32(parts.first().ok_or(VmError::Compile)?)?;
                    let width_s = parts.get(1).map(|s| parse_f32(s)).transpose()?.unwrap_or(period_s * 0.5);
                    Ok(Command::OutputClock { ch, period_s, width_s })
                }
                "scale" => {
                    if parts.first() == Some(&"none") {
                        return Ok(Command::OutputScaleNone { ch });
                    }
                    // `degree1;degree2;...;mod;v_per_oct`
                    let joined = join_semicolon(&parts);
                    let fields: Vec<&str, 32> = joined.split(';').collect();
                    let (degree_fields, tail) = fields.split_at(fields.len().saturating_sub(2));
                    if tail.len() != 2 {
                        return Err(VmError::Compile);
                    }
                    let mut degrees = Vec::new();
                    for d in degree_fields {
                        let _ = degrees.push(parse_f32(d)?);
                    }
                    let mod_divisions = trim(tail[0]).parse::<u32>().map_err(|_| VmError::BadArgType)?;
                    let v_per_oct = parse_f32(tail[1])?;
                    Ok(Command::OutputScale { ch, degrees, mod_divisions, v_per_oct })
                }
                "action" => {
                    let action = parse_u8(parts.first().ok_or(VmError::Compile)?)?;
                    Ok(Command::OutputAslAction { ch, action })
                }
                _ => Err(VmError::UnknownHost),
            };
        }
        return Err(VmError::Compile);
    }

    if let Some((ch, rest)) = split_index(line, "input") {
        let rest = rest.as_str();
        if let Some((name, args)) = split_call(rest, '.') {
            if name != "mode" {
                return Err(VmError::UnknownHost);
            }
            let parts = csv(args);
            let kind = parts.first().copied().unwrap_or("none").trim_matches('\'').trim_matches('"');
            let mode = match kind {
                "none" => DetectorMode::None,
                "stream" => DetectorMode::Stream {
                    interval_s: parse_f32(parts.get(1).ok_or(VmError::Compile)?)?,
                },
                "change" => DetectorMode::Change {
                    threshold_v: parse_f32(parts.get(1).ok_or(VmError::Compile)?)?,
                    hysteresis_v: parts.get(2).map(|s| parse_f32(s)).transpose()?.unwrap_or(0.0),
                    direction: match parts.get(3).copied() {
                        Some("rising") => Direction::Rising,
                        Some("falling") => Direction::Falling,
                        _ => Direction::Both,
                    },
                },
                "volume" => DetectorMode::Volume {
                    interval_s: parse_f32(parts.get(1).ok_or(VmError::Compile)?)?,
                },
                "peak" => DetectorMode::Peak {
                    threshold_v: parse_f32(parts.get(1).ok_or(VmError::Compile)?)?,
                    hysteresis_v: parts.get(2).map(|s| parse_f32(s)).transpose()?.unwrap_or(0.0),
                },
                "window" => {
                    let joined = join_semicolon(&parts[1..]);
                    let fields: Vec<&str, 32> = joined.split(';').collect();
                    let (th_fields, hyst_field) = fields.split_at(fields.len().saturating_sub(1));
                    let mut thresholds = Vec::new();
                    for t in th_fields {
                        let _ = thresholds.push(parse_f32(t)?);
                    }
                    let hysteresis_v = hyst_field.first().map(|s| parse_f32(s)).transpose()?.unwrap_or(0.0);
                    DetectorMode::Window { thresholds, hysteresis_v }
                }
                "scale" => {
                    let joined = join_semicolon(&parts[1..]);
                    let fields: Vec<&str, 32> = joined.split(';').collect();
                    let (degree_fields, tail) = fields.split_at(fields.len().saturating_sub(2));
                    if tail.len() != 2 {
                        return Err(VmError::Compile);
                    }
                    let mut scale = Vec::new();
                    for d in degree_fields {
                        let _ = scale.push(parse_f32(d)?);
                    }
                    let divs = trim(tail[0]).parse::<u32>().map_err(|_| VmError::BadArgType)?;
                    let v_per_oct = parse_f32(tail[1])?;
                    DetectorMode::Scale { scale, divs, v_per_oct }
                }
                _ => return Err(VmError::UnknownHost),
            };
            return Ok(Command::InputMode { ch, mode });
        }
        return Err(VmError::Compile);
    }

    if let Some((id, rest)) = split_index(line, "metro") {
        let rest = rest.as_str();
        if let Some((name, args)) = split_call(rest, ':') {
            let parts = csv(args);
            return match name {
                "start" => {
                    let period_s = parse_f32(parts.first().ok_or(VmError::Compile)?)?;
                    let count = parts
                        .get(1)
                        .map(|s| trim(s).parse::<i32>())
                        .transpose()
                        .map_err(|_| VmError::BadArgType)?
                        .unwrap_or(-1);
                    Ok(Command::MetroStart { id, period_s, count })
                }
                "stop" => Ok(Command::MetroStop { id }),
                _ => Err(VmError::UnknownHost),
            };
        }
        return Err(VmError::Compile);
    }

    Err(VmError::Compile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_instant_volts_assignment() {
        match parse("output[1].volts = 3.0").unwrap() {
            Command::OutputVolts { ch, v } => {
                assert_eq!(ch, 1);
                assert_eq!(v, 3.0);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn parses_metro_start_with_default_infinite_count() {
        match parse("metro[1]:start(0.1)").unwrap() {
            Command::MetroStart { id, period_s, count } => {
                assert_eq!(id, 1);
                assert_eq!(period_s, 0.1);
                assert_eq!(count, -1);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn parses_scale_assignment() {
        match parse("output[3]:scale(0,2,4,5,7,9,11;12;1.0)").unwrap() {
            Command::OutputScale { ch, degrees, mod_divisions, v_per_oct } => {
                assert_eq!(ch, 3);
                assert_eq!(degrees.len(), 7);
                assert_eq!(mod_divisions, 12);
                assert_eq!(v_per_oct, 1.0);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn parses_crow_reset() {
        assert!(matches!(parse("crow.reset()"), Ok(Command::CrowReset)));
    }

    #[test]
    fn rejects_unknown_grammar() {
        assert!(parse("this is not a command").is_err());
    }

    #[test]
    fn parses_looping_asl_describe() {
        match parse("output[2].describe(loop{to(5,0.001,'linear'), to(0,0.001,'linear')})").unwrap() {
            Command::OutputAslDescribe { ch, steps, looped } => {
                assert_eq!(ch, 2);
                assert!(looped);
                assert_eq!(steps.len(), 2);
                assert_eq!(steps[0].dest, 5.0);
                assert_eq!(steps[1].dest, 0.0);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn parses_non_looping_asl_describe() {
        match parse("output[0].describe({to(3.0,0.01,'sine')})").unwrap() {
            Command::OutputAslDescribe { ch, steps, looped } => {
                assert_eq!(ch, 0);
                assert!(!looped);
                assert_eq!(steps.len(), 1);
            }
            _ => panic!("wrong command"),
        }
    }
}
