//! Block helpers: the side-effecting primitives compiled scripts call
//!
//! One module per family, in the shape of the block palette. The
//! interpreter funnels every `Effect` instruction through [`dispatch`]
//! and every pure `Query` through [`query`].
//!
//! Timed helpers (glide, say-for-seconds, play-until-done, ask,
//! backdrop-and-wait) never block: they park their progress on the
//! thread ([`ResumeState`] or the join list) and tell the interpreter
//! to re-enter the same instruction next step until the deadline or
//! join condition is met.

pub mod data;
pub mod looks;
pub mod motion;
pub mod pen;
pub mod sensing;
pub mod sound;

use crate::scheduler::Runtime;
use crate::thread::{ResumeState, Thread, ThreadStatus};
use sb3_compiler::ir::{EffectOp, QueryOp};
use sb3_core::{cast, BubbleKind, TargetId, Value};
use tracing::trace;

/// What an effect did with its step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectFlow {
    /// Completed; advance past the instruction
    Done,
    /// Not finished; yield with this status and re-enter the same
    /// instruction next step
    Reenter(ThreadStatus),
}

fn pop_args(thread: &mut Thread, argc: usize) -> Vec<Value> {
    let at = thread.stack.len().saturating_sub(argc);
    thread.stack.split_off(at)
}

fn num(args: &[Value], i: usize) -> f64 {
    args.get(i).map(cast::to_number).unwrap_or(0.0)
}

fn text(args: &[Value], i: usize) -> String {
    args.get(i).map(cast::to_string).unwrap_or_default()
}

fn raw(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_else(Value::empty)
}

/// Evaluate a pure runtime reporter.
pub fn query(rt: &Runtime, target: TargetId, op: QueryOp, args: &[Value]) -> Value {
    let t = rt.project.target(target);
    match op {
        QueryOp::XPosition => Value::Number(t.x),
        QueryOp::YPosition => Value::Number(t.y),
        QueryOp::Direction => Value::Number(t.direction),
        QueryOp::Size => Value::Number(t.size),
        QueryOp::CostumeNumber => Value::Number(looks::costume_number(rt, target)),
        QueryOp::CostumeName => Value::from(looks::costume_name(rt, target)),
        QueryOp::BackdropNumber => Value::Number(looks::backdrop_number(rt)),
        QueryOp::BackdropName => Value::from(looks::backdrop_name(rt)),
        QueryOp::Volume => Value::Number(t.volume),
        QueryOp::Timer => Value::Number(sensing::timer(rt)),
        QueryOp::Loudness => Value::Number(sensing::loudness(rt)),
        QueryOp::Answer => sensing::answer(rt),
        QueryOp::Username => sensing::username(rt),
        QueryOp::MouseX => Value::Number(rt.input.mouse_x),
        QueryOp::MouseY => Value::Number(rt.input.mouse_y),
        QueryOp::MouseDown => Value::Bool(rt.input.mouse_down),
        QueryOp::DaysSince2000 => Value::Number(sensing::days_since_2000()),
        QueryOp::Current(unit) => Value::Number(sensing::current(unit)),
        QueryOp::KeyPressed => Value::Bool(rt.input.key_pressed(&text(args, 0))),
        QueryOp::TouchingObject => Value::Bool(sensing::touching_object(rt, target, &text(args, 0))),
        QueryOp::DistanceTo => Value::Number(sensing::distance_to(rt, target, &text(args, 0))),
    }
}

/// Execute a side-effecting block. Pops its own arguments (first entry
/// only — re-entries keep state on the thread instead).
pub fn dispatch(rt: &mut Runtime, thread: &mut Thread, op: &EffectOp, argc: usize) -> EffectFlow {
    let target = thread.target;
    match op {
        // ---- motion ----
        EffectOp::MoveSteps => {
            let args = pop_args(thread, argc);
            motion::move_steps(rt, target, num(&args, 0));
            EffectFlow::Done
        }
        EffectOp::GotoXY => {
            let args = pop_args(thread, argc);
            motion::set_position(rt, target, num(&args, 0), num(&args, 1));
            EffectFlow::Done
        }
        EffectOp::GotoTarget => {
            let args = pop_args(thread, argc);
            motion::goto_target(rt, target, &text(&args, 0));
            EffectFlow::Done
        }
        EffectOp::GlideToXY => glide(rt, thread, argc),
        EffectOp::GlideToTarget => {
            if thread.resume.is_none() {
                let args = pop_args(thread, argc);
                let secs = num(&args, 0);
                let dest = motion::resolve_destination(rt, &text(&args, 1));
                let Some(dest) = dest else {
                    return EffectFlow::Done;
                };
                start_glide(rt, thread, secs, dest)
            } else {
                glide(rt, thread, 0)
            }
        }
        EffectOp::ChangeX => {
            let args = pop_args(thread, argc);
            motion::change_x(rt, target, num(&args, 0));
            EffectFlow::Done
        }
        EffectOp::SetX => {
            let args = pop_args(thread, argc);
            let y = rt.project.target(target).y;
            motion::set_position(rt, target, num(&args, 0), y);
            EffectFlow::Done
        }
        EffectOp::ChangeY => {
            let args = pop_args(thread, argc);
            motion::change_y(rt, target, num(&args, 0));
            EffectFlow::Done
        }
        EffectOp::SetY => {
            let args = pop_args(thread, argc);
            let x = rt.project.target(target).x;
            motion::set_position(rt, target, x, num(&args, 0));
            EffectFlow::Done
        }
        EffectOp::TurnRight => {
            let args = pop_args(thread, argc);
            motion::turn(rt, target, num(&args, 0));
            EffectFlow::Done
        }
        EffectOp::TurnLeft => {
            let args = pop_args(thread, argc);
            motion::turn(rt, target, -num(&args, 0));
            EffectFlow::Done
        }
        EffectOp::PointInDirection => {
            let args = pop_args(thread, argc);
            motion::set_direction(rt, target, num(&args, 0));
            EffectFlow::Done
        }
        EffectOp::PointTowards => {
            let args = pop_args(thread, argc);
            motion::point_towards(rt, target, &text(&args, 0));
            EffectFlow::Done
        }
        EffectOp::IfOnEdgeBounce => {
            motion::if_on_edge_bounce(rt, target);
            EffectFlow::Done
        }
        EffectOp::SetRotationStyle(style) => {
            motion::set_rotation_style(rt, target, *style);
            EffectFlow::Done
        }
        // ---- looks ----
        EffectOp::Say => {
            let args = pop_args(thread, argc);
            looks::say(rt, target, &raw(&args, 0), BubbleKind::Say);
            EffectFlow::Done
        }
        EffectOp::Think => {
            let args = pop_args(thread, argc);
            looks::say(rt, target, &raw(&args, 0), BubbleKind::Think);
            EffectFlow::Done
        }
        EffectOp::SayForSecs => say_for_secs(rt, thread, argc, BubbleKind::Say),
        EffectOp::ThinkForSecs => say_for_secs(rt, thread, argc, BubbleKind::Think),
        EffectOp::Show => {
            looks::show(rt, target, true);
            EffectFlow::Done
        }
        EffectOp::Hide => {
            looks::show(rt, target, false);
            EffectFlow::Done
        }
        EffectOp::SwitchCostume => {
            let args = pop_args(thread, argc);
            looks::switch_costume(rt, target, &raw(&args, 0));
            EffectFlow::Done
        }
        EffectOp::NextCostume => {
            looks::next_costume(rt, target);
            EffectFlow::Done
        }
        EffectOp::SwitchBackdrop => {
            let args = pop_args(thread, argc);
            looks::switch_backdrop(rt, &raw(&args, 0));
            EffectFlow::Done
        }
        EffectOp::SwitchBackdropAndWait => {
            if let Some(ids) = thread.join.clone() {
                if rt.all_retired(&ids) {
                    thread.join = None;
                    EffectFlow::Done
                } else {
                    EffectFlow::Reenter(ThreadStatus::BroadcastWait)
                }
            } else {
                let args = pop_args(thread, argc);
                let ids = looks::switch_backdrop(rt, &raw(&args, 0));
                if ids.is_empty() {
                    EffectFlow::Done
                } else {
                    thread.join = Some(ids);
                    EffectFlow::Reenter(ThreadStatus::BroadcastWait)
                }
            }
        }
        EffectOp::NextBackdrop => {
            looks::next_backdrop(rt);
            EffectFlow::Done
        }
        EffectOp::ChangeSize => {
            let args = pop_args(thread, argc);
            looks::change_size(rt, target, num(&args, 0));
            EffectFlow::Done
        }
        EffectOp::SetSize => {
            let args = pop_args(thread, argc);
            looks::set_size(rt, target, num(&args, 0));
            EffectFlow::Done
        }
        EffectOp::ChangeEffect(name) => {
            let args = pop_args(thread, argc);
            looks::change_effect(rt, target, name, num(&args, 0));
            EffectFlow::Done
        }
        EffectOp::SetEffect(name) => {
            let args = pop_args(thread, argc);
            looks::set_effect(rt, target, name, num(&args, 0));
            EffectFlow::Done
        }
        EffectOp::ClearEffects => {
            looks::clear_effects(rt, target);
            EffectFlow::Done
        }
        EffectOp::GoToFront => {
            looks::go_to_layer_extreme(rt, target, true);
            EffectFlow::Done
        }
        EffectOp::GoToBack => {
            looks::go_to_layer_extreme(rt, target, false);
            EffectFlow::Done
        }
        EffectOp::GoForwardLayers => {
            let args = pop_args(thread, argc);
            looks::go_layers(rt, target, num(&args, 0) as i64);
            EffectFlow::Done
        }
        EffectOp::GoBackwardLayers => {
            let args = pop_args(thread, argc);
            looks::go_layers(rt, target, -(num(&args, 0) as i64));
            EffectFlow::Done
        }
        // ---- sound ----
        EffectOp::PlaySound => {
            let args = pop_args(thread, argc);
            sound::play(rt, target, &text(&args, 0));
            EffectFlow::Done
        }
        EffectOp::PlaySoundUntilDone => {
            if let Some(ResumeState::Timed { deadline }) = thread.resume {
                if rt.clock.now() >= deadline {
                    thread.resume = None;
                    EffectFlow::Done
                } else {
                    EffectFlow::Reenter(ThreadStatus::Sleeping)
                }
            } else {
                let args = pop_args(thread, argc);
                let duration = sound::play(rt, target, &text(&args, 0));
                if duration <= 0.0 {
                    EffectFlow::Done
                } else {
                    thread.resume = Some(ResumeState::Timed {
                        deadline: rt.clock.now() + duration,
                    });
                    EffectFlow::Reenter(ThreadStatus::Sleeping)
                }
            }
        }
        EffectOp::StopAllSounds => {
            sound::stop_all(rt);
            EffectFlow::Done
        }
        EffectOp::ChangeVolume => {
            let args = pop_args(thread, argc);
            sound::change_volume(rt, target, num(&args, 0));
            EffectFlow::Done
        }
        EffectOp::SetVolume => {
            let args = pop_args(thread, argc);
            sound::set_volume(rt, target, num(&args, 0));
            EffectFlow::Done
        }
        // ---- sensing ----
        EffectOp::AskAndWait => {
            if matches!(thread.resume, Some(ResumeState::Asked)) {
                match rt.pending_answer.take() {
                    Some(answer) => {
                        rt.answer = answer;
                        thread.resume = None;
                        EffectFlow::Done
                    }
                    None => EffectFlow::Reenter(ThreadStatus::Yielded),
                }
            } else {
                let args = pop_args(thread, argc);
                trace!(question = %sensing::format_question(&raw(&args, 0)), "ask");
                if let Some(answer) = rt.pending_answer.take() {
                    rt.answer = answer;
                    return EffectFlow::Done;
                }
                if let Some(auto) = rt.config.auto_answer.clone() {
                    rt.answer = auto;
                    return EffectFlow::Done;
                }
                thread.resume = Some(ResumeState::Asked);
                EffectFlow::Reenter(ThreadStatus::Yielded)
            }
        }
        EffectOp::ResetTimer => {
            sensing::reset_timer(rt);
            EffectFlow::Done
        }
        EffectOp::SetDragMode(draggable) => {
            sensing::set_drag_mode(rt, target, *draggable);
            EffectFlow::Done
        }
        // ---- pen ----
        EffectOp::PenClear => {
            pen::clear(rt);
            EffectFlow::Done
        }
        EffectOp::PenStamp => {
            pen::stamp(rt, target);
            EffectFlow::Done
        }
        EffectOp::PenDown => {
            pen::pen_down(rt, target, true);
            EffectFlow::Done
        }
        EffectOp::PenUp => {
            pen::pen_down(rt, target, false);
            EffectFlow::Done
        }
        EffectOp::SetPenColor => {
            let args = pop_args(thread, argc);
            pen::set_color(rt, target, num(&args, 0) as i64 as u32);
            EffectFlow::Done
        }
        EffectOp::ChangePenSize => {
            let args = pop_args(thread, argc);
            pen::change_size(rt, target, num(&args, 0));
            EffectFlow::Done
        }
        EffectOp::SetPenSize => {
            let args = pop_args(thread, argc);
            pen::set_size(rt, target, num(&args, 0));
            EffectFlow::Done
        }
        EffectOp::ChangePenParam(param) => {
            let args = pop_args(thread, argc);
            pen::change_param(rt, target, param, num(&args, 0));
            EffectFlow::Done
        }
        EffectOp::SetPenParam(param) => {
            let args = pop_args(thread, argc);
            pen::set_param(rt, target, param, num(&args, 0));
            EffectFlow::Done
        }
    }
}

fn say_for_secs(
    rt: &mut Runtime,
    thread: &mut Thread,
    argc: usize,
    kind: BubbleKind,
) -> EffectFlow {
    let target = thread.target;
    if let Some(ResumeState::Timed { deadline }) = thread.resume {
        if rt.clock.now() >= deadline {
            looks::clear_bubble(rt, target);
            thread.resume = None;
            EffectFlow::Done
        } else {
            EffectFlow::Reenter(ThreadStatus::Sleeping)
        }
    } else {
        let args = pop_args(thread, argc);
        looks::say(rt, target, &raw(&args, 0), kind);
        let secs = num(&args, 1).max(0.0);
        thread.resume = Some(ResumeState::Timed {
            deadline: rt.clock.now() + secs,
        });
        EffectFlow::Reenter(ThreadStatus::Sleeping)
    }
}

fn start_glide(
    rt: &mut Runtime,
    thread: &mut Thread,
    secs: f64,
    to: (f64, f64),
) -> EffectFlow {
    let target = thread.target;
    if secs <= 0.0 {
        motion::set_position(rt, target, to.0, to.1);
        return EffectFlow::Done;
    }
    let t = rt.project.target(target);
    thread.resume = Some(ResumeState::Glide {
        start: rt.clock.now(),
        duration: secs,
        from: (t.x, t.y),
        to,
    });
    EffectFlow::Reenter(ThreadStatus::Sleeping)
}

/// Glide step: first entry pops `[secs, x, y]` (XY form); re-entries
/// interpolate from the stored state.
fn glide(rt: &mut Runtime, thread: &mut Thread, argc: usize) -> EffectFlow {
    let target = thread.target;
    if let Some(ResumeState::Glide {
        start,
        duration,
        from,
        to,
    }) = thread.resume
    {
        let t = ((rt.clock.now() - start) / duration).clamp(0.0, 1.0);
        let x = from.0 + (to.0 - from.0) * t;
        let y = from.1 + (to.1 - from.1) * t;
        motion::set_position(rt, target, x, y);
        if t >= 1.0 {
            thread.resume = None;
            EffectFlow::Done
        } else {
            EffectFlow::Reenter(ThreadStatus::Sleeping)
        }
    } else {
        let args = pop_args(thread, argc);
        let secs = num(&args, 0);
        let to = (num(&args, 1), num(&args, 2));
        start_glide(rt, thread, secs, to)
    }
}
