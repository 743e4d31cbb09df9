//! Pen blocks
//!
//! The pen renderer is a collaborator; the runtime owns the state it
//! would draw with (down flag, size, packed color) and emits trace
//! events for the drawing commands. Color inputs arrive through the
//! color cast as packed RGB numbers.

use crate::scheduler::Runtime;
use sb3_core::TargetId;
use tracing::trace;

pub fn clear(rt: &mut Runtime) {
    trace!("pen clear");
    rt.redraw_requested = true;
}

pub fn stamp(rt: &mut Runtime, target: TargetId) {
    let t = rt.project.target(target);
    trace!(sprite = %t.name, x = t.x, y = t.y, "pen stamp");
    rt.redraw_requested = true;
}

pub fn pen_down(rt: &mut Runtime, target: TargetId, down: bool) {
    let t = rt.project.target_mut(target);
    t.pen.down = down;
    if down {
        trace!(sprite = %t.name, x = t.x, y = t.y, "pen down");
    }
}

pub fn set_color(rt: &mut Runtime, target: TargetId, color: u32) {
    rt.project.target_mut(target).pen.color = color & 0x00FF_FFFF;
}

pub fn change_size(rt: &mut Runtime, target: TargetId, delta: f64) {
    let t = rt.project.target_mut(target);
    t.pen.size = (t.pen.size + delta).clamp(1.0, 1200.0);
}

pub fn set_size(rt: &mut Runtime, target: TargetId, size: f64) {
    rt.project.target_mut(target).pen.size = size.clamp(1.0, 1200.0);
}

/// HSV-ish parameter access on the packed color. Hue/saturation/
/// brightness are in 0..100 per Scratch's pen extension.
pub fn set_param(rt: &mut Runtime, target: TargetId, param: &str, value: f64) {
    let color = rt.project.target(target).pen.color;
    let (mut h, mut s, mut v) = rgb_to_hsv(color);
    match param {
        "color" => h = (value.rem_euclid(100.0)) / 100.0,
        "saturation" => s = (value.clamp(0.0, 100.0)) / 100.0,
        "brightness" => v = (value.clamp(0.0, 100.0)) / 100.0,
        // transparency is a renderer concern; state tracking only
        "transparency" => return,
        _ => return,
    }
    rt.project.target_mut(target).pen.color = hsv_to_rgb(h, s, v);
}

pub fn change_param(rt: &mut Runtime, target: TargetId, param: &str, delta: f64) {
    let color = rt.project.target(target).pen.color;
    let (h, s, v) = rgb_to_hsv(color);
    let current = match param {
        "color" => h * 100.0,
        "saturation" => s * 100.0,
        "brightness" => v * 100.0,
        _ => return,
    };
    set_param(rt, target, param, current + delta);
}

fn rgb_to_hsv(rgb: u32) -> (f64, f64, f64) {
    let r = ((rgb >> 16) & 0xFF) as f64 / 255.0;
    let g = ((rgb >> 8) & 0xFF) as f64 / 255.0;
    let b = (rgb & 0xFF) as f64 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        (((g - b) / delta).rem_euclid(6.0)) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> u32 {
    let h6 = (h.rem_euclid(1.0)) * 6.0;
    let c = v * s;
    let x = c * (1.0 - ((h6 % 2.0) - 1.0).abs());
    let (r, g, b) = match h6 as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    let to8 = |f: f64| ((f + m) * 255.0).round() as u32;
    (to8(r) << 16) | (to8(g) << 8) | to8(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::test_support::runtime_with_sprite;

    #[test]
    fn test_pen_state_lifecycle() {
        let (mut rt, sprite) = runtime_with_sprite();
        assert!(!rt.project.target(sprite).pen.down);
        pen_down(&mut rt, sprite, true);
        assert!(rt.project.target(sprite).pen.down);
        set_color(&mut rt, sprite, 0xFF_FF0000);
        assert_eq!(rt.project.target(sprite).pen.color, 0xFF0000);
        set_size(&mut rt, sprite, 0.1);
        assert_eq!(rt.project.target(sprite).pen.size, 1.0);
    }

    #[test]
    fn test_hsv_round_trip_primaries() {
        for &rgb in &[0xFF0000u32, 0x00FF00, 0x0000FF, 0xFFFFFF, 0x000000] {
            let (h, s, v) = rgb_to_hsv(rgb);
            assert_eq!(hsv_to_rgb(h, s, v), rgb);
        }
    }

    #[test]
    fn test_set_param_brightness_darkens() {
        let (mut rt, sprite) = runtime_with_sprite();
        set_color(&mut rt, sprite, 0xFF0000);
        set_param(&mut rt, sprite, "brightness", 50.0);
        let c = rt.project.target(sprite).pen.color;
        assert_eq!(c, 0x800000);
    }
}
