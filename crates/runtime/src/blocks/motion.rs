//! Motion blocks
//!
//! All position writes go through [`set_position`], which snaps
//! near-integer coordinates the way Scratch does and records pen
//! movement when the pen is down. The stage has no position: every
//! motion helper is a no-op on it.
//!
//! Direction is Scratch-style: 90 is right, 0 is up, wrapped to
//! (-180, 180].

use crate::scheduler::Runtime;
use sb3_core::{cast, RotationStyle, TargetId};
use tracing::trace;

pub const STAGE_HALF_WIDTH: f64 = 240.0;
pub const STAGE_HALF_HEIGHT: f64 = 180.0;

/// Wrap a direction into Scratch's (-180, 180] interval.
pub fn wrap_direction(dir: f64) -> f64 {
    if !dir.is_finite() {
        return 90.0;
    }
    let mut d = dir % 360.0;
    if d > 180.0 {
        d -= 360.0;
    } else if d <= -180.0 {
        d += 360.0;
    }
    d
}

/// Move to an absolute position. Snaps, draws pen trails, requests a
/// redraw. No-op on the stage.
pub fn set_position(rt: &mut Runtime, target: TargetId, x: f64, y: f64) {
    let t = rt.project.target_mut(target);
    if t.is_stage {
        return;
    }
    let (old_x, old_y) = (t.x, t.y);
    t.x = cast::to_scratch_coordinate(x);
    t.y = cast::to_scratch_coordinate(y);
    if t.pen.down && (t.x != old_x || t.y != old_y) {
        trace!(
            sprite = %t.name,
            from = ?(old_x, old_y),
            to = ?(t.x, t.y),
            "pen line"
        );
    }
    rt.redraw_requested = true;
}

pub fn move_steps(rt: &mut Runtime, target: TargetId, steps: f64) {
    let t = rt.project.target(target);
    if t.is_stage {
        return;
    }
    let radians = t.direction.to_radians();
    let dx = steps * radians.sin();
    let dy = steps * radians.cos();
    let (x, y) = (t.x + dx, t.y + dy);
    set_position(rt, target, x, y);
}

/// Resolve a goto/glide destination: `_mouse_`, `_random_`, or a
/// sprite name. None when unresolvable (or for the stage itself).
pub fn resolve_destination(rt: &mut Runtime, name: &str) -> Option<(f64, f64)> {
    match name {
        "_mouse_" => Some((rt.input.mouse_x, rt.input.mouse_y)),
        "_random_" => {
            use rand::Rng;
            let x = rt.rng.gen_range(-STAGE_HALF_WIDTH..=STAGE_HALF_WIDTH);
            let y = rt.rng.gen_range(-STAGE_HALF_HEIGHT..=STAGE_HALF_HEIGHT);
            Some((x.round(), y.round()))
        }
        other => {
            let id = rt.project.find_target_by_name(other)?;
            let t = rt.project.target(id);
            if t.is_stage {
                None
            } else {
                Some((t.x, t.y))
            }
        }
    }
}

pub fn goto_target(rt: &mut Runtime, target: TargetId, name: &str) {
    if rt.project.target(target).is_stage {
        return;
    }
    if let Some((x, y)) = resolve_destination(rt, name) {
        set_position(rt, target, x, y);
    }
}

pub fn change_x(rt: &mut Runtime, target: TargetId, dx: f64) {
    let t = rt.project.target(target);
    let (x, y) = (t.x + dx, t.y);
    set_position(rt, target, x, y);
}

pub fn change_y(rt: &mut Runtime, target: TargetId, dy: f64) {
    let t = rt.project.target(target);
    let (x, y) = (t.x, t.y + dy);
    set_position(rt, target, x, y);
}

pub fn set_direction(rt: &mut Runtime, target: TargetId, dir: f64) {
    let t = rt.project.target_mut(target);
    if t.is_stage {
        return;
    }
    t.direction = wrap_direction(dir);
    rt.redraw_requested = true;
}

pub fn turn(rt: &mut Runtime, target: TargetId, degrees: f64) {
    let current = rt.project.target(target).direction;
    set_direction(rt, target, current + degrees);
}

pub fn point_towards(rt: &mut Runtime, target: TargetId, name: &str) {
    let t = rt.project.target(target);
    if t.is_stage {
        return;
    }
    let (tx, ty) = (t.x, t.y);
    if name == "_random_" {
        use rand::Rng;
        let random_dir = rt.rng.gen_range(0.0..360.0);
        set_direction(rt, target, random_dir);
        return;
    }
    let Some((px, py)) = crate::blocks::sensing::point_of(rt, name) else {
        return;
    };
    let dir = (px - tx).atan2(py - ty).to_degrees();
    set_direction(rt, target, dir);
}

pub fn set_rotation_style(rt: &mut Runtime, target: TargetId, style: RotationStyle) {
    rt.project.target_mut(target).rotation_style = style;
    rt.redraw_requested = true;
}

/// Clamp back onto the stage and mirror direction on the crossed axis.
pub fn if_on_edge_bounce(rt: &mut Runtime, target: TargetId) {
    let t = rt.project.target(target);
    if t.is_stage {
        return;
    }
    let (mut x, mut y) = (t.x, t.y);
    let mut dir = t.direction;
    let mut bounced = false;
    if x.abs() > STAGE_HALF_WIDTH {
        // mirror the horizontal component
        dir = wrap_direction(-dir);
        x = x.clamp(-STAGE_HALF_WIDTH, STAGE_HALF_WIDTH);
        bounced = true;
    }
    if y.abs() > STAGE_HALF_HEIGHT {
        // mirror the vertical component
        dir = wrap_direction(180.0 - dir);
        y = y.clamp(-STAGE_HALF_HEIGHT, STAGE_HALF_HEIGHT);
        bounced = true;
    }
    if bounced {
        set_direction(rt, target, dir);
        set_position(rt, target, x, y);
    }
}
