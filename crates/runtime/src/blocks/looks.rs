//! Looks blocks
//!
//! Speech bubbles, costumes, backdrops, size, graphic effects and the
//! layer order. Backdrop switches feed back into the scheduler:
//! `when backdrop switches to` hats fire from here.

use crate::scheduler::Runtime;
use sb3_core::{cast, BubbleKind, TargetId, Value};

/// Format a say/think message: floats round to two decimals, except
/// when rounding would display `0` for a non-zero value — then the
/// full value is shown.
pub fn format_message(v: &Value) -> String {
    if let Value::Number(n) = v {
        if n.is_finite() && n.fract() != 0.0 {
            let rounded = (n * 100.0).round() / 100.0;
            if rounded == 0.0 && *n != 0.0 {
                return cast::number_to_string(*n);
            }
            return cast::number_to_string(rounded);
        }
    }
    cast::to_string(v)
}

pub fn say(rt: &mut Runtime, target: TargetId, message: &Value, kind: BubbleKind) {
    let text = format_message(message);
    let t = rt.project.target_mut(target);
    if text.is_empty() {
        t.bubble = None;
    } else {
        t.bubble = Some((kind, text));
    }
    rt.redraw_requested = true;
}

pub fn clear_bubble(rt: &mut Runtime, target: TargetId) {
    rt.project.target_mut(target).bubble = None;
    rt.redraw_requested = true;
}

pub fn show(rt: &mut Runtime, target: TargetId, visible: bool) {
    rt.project.target_mut(target).visible = visible;
    rt.redraw_requested = true;
}

/// Resolve a costume input: names match first, then numeric values
/// pick by 1-based index; "next costume" / "previous costume" step.
pub fn switch_costume(rt: &mut Runtime, target: TargetId, value: &Value) {
    let t = rt.project.target_mut(target);
    if t.costumes.is_empty() {
        return;
    }
    if let Value::Str(s) = value {
        if let Some(i) = t.costumes.iter().position(|c| c.name == s.as_ref()) {
            t.current_costume = i;
            rt.redraw_requested = true;
            return;
        }
        match s.as_ref() {
            "next costume" => {
                let next = t.current_costume as f64 + 1.0;
                t.set_costume(next);
                rt.redraw_requested = true;
                return;
            }
            "previous costume" => {
                let prev = t.current_costume as f64 - 1.0;
                t.set_costume(prev);
                rt.redraw_requested = true;
                return;
            }
            _ => {}
        }
        // numeric strings fall through to the index path; anything
        // else is ignored, like Scratch
        if cast::to_number_or_nan(value).is_nan() {
            return;
        }
    }
    let index = cast::to_number(value) - 1.0;
    t.set_costume(index.floor());
    rt.redraw_requested = true;
}

pub fn next_costume(rt: &mut Runtime, target: TargetId) {
    let t = rt.project.target_mut(target);
    let next = t.current_costume as f64 + 1.0;
    t.set_costume(next);
    rt.redraw_requested = true;
}

/// Switch the stage backdrop and fire matching backdrop hats.
/// Returns the ids of threads it started.
pub fn switch_backdrop(rt: &mut Runtime, value: &Value) -> Vec<u64> {
    let Some(stage) = rt.project.stage_id() else {
        return Vec::new();
    };
    switch_costume(rt, stage, value);
    let name = rt.project.target(stage).costume_name().to_string();
    rt.backdrop_switched(&name)
}

pub fn next_backdrop(rt: &mut Runtime) -> Vec<u64> {
    let Some(stage) = rt.project.stage_id() else {
        return Vec::new();
    };
    next_costume(rt, stage);
    let name = rt.project.target(stage).costume_name().to_string();
    rt.backdrop_switched(&name)
}

pub fn change_size(rt: &mut Runtime, target: TargetId, delta: f64) {
    let current = rt.project.target(target).size;
    set_size(rt, target, current + delta);
}

pub fn set_size(rt: &mut Runtime, target: TargetId, size: f64) {
    // Scratch clamps against costume and stage dimensions; without a
    // renderer the nominal clamp keeps values sane
    rt.project.target_mut(target).size = size.clamp(5.0, 535.0);
    rt.redraw_requested = true;
}

pub fn change_effect(rt: &mut Runtime, target: TargetId, effect: &str, delta: f64) {
    let t = rt.project.target_mut(target);
    let current = t.effects.get(effect);
    t.effects.set(effect, current + delta);
    rt.redraw_requested = true;
}

pub fn set_effect(rt: &mut Runtime, target: TargetId, effect: &str, value: f64) {
    rt.project.target_mut(target).effects.set(effect, value);
    rt.redraw_requested = true;
}

pub fn clear_effects(rt: &mut Runtime, target: TargetId) {
    rt.project.target_mut(target).effects = Default::default();
    rt.redraw_requested = true;
}

/// Move a sprite to the front or back of the draw order.
pub fn go_to_layer_extreme(rt: &mut Runtime, target: TargetId, front: bool) {
    if rt.project.target(target).is_stage {
        return;
    }
    let extreme = if front {
        rt.project
            .targets
            .iter()
            .filter(|t| t.alive && !t.is_stage)
            .map(|t| t.layer_order)
            .max()
            .unwrap_or(0)
            + 1
    } else {
        1
    };
    if !front {
        for t in rt.project.targets.iter_mut() {
            if t.alive && !t.is_stage {
                t.layer_order += 1;
            }
        }
    }
    rt.project.target_mut(target).layer_order = if front { extreme } else { 1 };
    rt.redraw_requested = true;
}

pub fn go_layers(rt: &mut Runtime, target: TargetId, delta: i64) {
    if rt.project.target(target).is_stage {
        return;
    }
    let current = rt.project.target(target).layer_order as i64;
    let next = (current + delta).max(1) as usize;
    rt.project.target_mut(target).layer_order = next;
    rt.redraw_requested = true;
}

pub fn costume_number(rt: &Runtime, target: TargetId) -> f64 {
    rt.project.target(target).current_costume as f64 + 1.0
}

pub fn costume_name(rt: &Runtime, target: TargetId) -> String {
    rt.project.target(target).costume_name().to_string()
}

pub fn backdrop_number(rt: &Runtime) -> f64 {
    rt.project
        .stage_id()
        .map(|s| rt.project.target(s).current_costume as f64 + 1.0)
        .unwrap_or(1.0)
}

pub fn backdrop_name(rt: &Runtime) -> String {
    rt.project
        .stage_id()
        .map(|s| rt.project.target(s).costume_name().to_string())
        .unwrap_or_default()
}
