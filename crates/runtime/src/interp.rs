//! Bytecode interpreter
//!
//! [`step`] runs one thread until it yields, retires or finishes.
//! Execution is a plain dispatch loop over the current frame's chunk;
//! every instruction returns a [`Flow`] telling the loop how to move
//! the program counter. The thread's whole state (frames, operand
//! stack, resume markers) lives on the [`Thread`] record, so returning
//! to the scheduler and resuming later is free.
//!
//! Pure operators delegate to the shared evaluation functions of the
//! compiler crate — the folded and unfolded forms of an expression run
//! the exact same code.

use crate::blocks::{self, EffectFlow};
use crate::scheduler::Runtime;
use crate::thread::{Frame, Thread, ThreadStatus};
use sb3_compiler::codegen::{CompiledProgram, Instr};
use sb3_compiler::ir::BinaryOp;
use sb3_compiler::irgen::{eval_binary, round_half_up};
use sb3_core::{cast, Value};
use std::sync::Arc;

/// How the program counter moves after one instruction.
enum Flow {
    /// Advance to the next instruction
    Next,
    /// Jump within the current chunk
    Jump(usize),
    /// The instruction managed frames/pc itself (call, return)
    Stay,
    /// Suspend; `advance` moves past the instruction first
    Suspend { status: ThreadStatus, advance: bool },
    /// The thread restarted itself (a broadcast matched its own hat)
    Restarted,
    /// Terminal
    Retire,
}

/// Step a thread: run instructions until it suspends or retires.
pub fn step(rt: &mut Runtime, thread: &mut Thread) {
    if !thread.status.is_live() {
        return;
    }
    thread.status = ThreadStatus::Active;
    thread.step_start = rt.clock.now();
    let program = rt.program.clone();
    loop {
        let Some(frame) = thread.frames.last() else {
            thread.retire();
            return;
        };
        let chunk = &program.chunks[frame.chunk];
        let Some(instr) = chunk.instrs.get(frame.pc) else {
            thread.retire();
            return;
        };
        match exec(rt, thread, &program, instr) {
            Flow::Next => {
                if let Some(f) = thread.frames.last_mut() {
                    f.pc += 1;
                }
            }
            Flow::Jump(target) => {
                if let Some(f) = thread.frames.last_mut() {
                    f.pc = target;
                }
            }
            Flow::Stay => {}
            Flow::Suspend { status, advance } => {
                if advance {
                    if let Some(f) = thread.frames.last_mut() {
                        f.pc += 1;
                    }
                }
                thread.status = status;
                return;
            }
            Flow::Restarted => {
                thread.status = ThreadStatus::Yielded;
                return;
            }
            Flow::Retire => {
                thread.retire();
                return;
            }
        }
    }
}

fn pop(thread: &mut Thread) -> Value {
    thread.stack.pop().unwrap_or_else(Value::empty)
}

fn binary(thread: &mut Thread, op: BinaryOp) -> Flow {
    let b = pop(thread);
    let a = pop(thread);
    thread.stack.push(eval_binary(op, &a, &b));
    Flow::Next
}

/// Status for a plain yield: a thread with an armed wait deadline is
/// sleeping, everything else just yielded.
fn yield_status(thread: &Thread) -> ThreadStatus {
    if thread.wait_deadline.is_some() {
        ThreadStatus::Sleeping
    } else {
        ThreadStatus::Yielded
    }
}

fn exec(
    rt: &mut Runtime,
    thread: &mut Thread,
    program: &Arc<CompiledProgram>,
    instr: &Instr,
) -> Flow {
    match instr {
        Instr::Push(v) => {
            thread.stack.push(v.clone());
            Flow::Next
        }
        Instr::Pop => {
            pop(thread);
            Flow::Next
        }
        Instr::ReadVar(slot) => {
            let v = rt.read_var(*slot, thread.target);
            thread.stack.push(v);
            Flow::Next
        }
        Instr::WriteVar(slot) => {
            let v = pop(thread);
            rt.write_var(*slot, thread.target, v);
            Flow::Next
        }
        Instr::ReadArg(i) => {
            let v = thread
                .frames
                .last()
                .and_then(|f| f.args.get(*i))
                .cloned()
                .unwrap_or_else(Value::empty);
            thread.stack.push(v);
            Flow::Next
        }

        // ---- pure operators ----
        Instr::Add => binary(thread, BinaryOp::Add),
        Instr::Sub => binary(thread, BinaryOp::Subtract),
        Instr::Mul => binary(thread, BinaryOp::Multiply),
        Instr::Div => binary(thread, BinaryOp::Divide),
        Instr::Mod => binary(thread, BinaryOp::Mod),
        Instr::Less => binary(thread, BinaryOp::Less),
        Instr::Greater => binary(thread, BinaryOp::Greater),
        Instr::Equals => binary(thread, BinaryOp::Equals),
        Instr::And => binary(thread, BinaryOp::And),
        Instr::Or => binary(thread, BinaryOp::Or),
        Instr::Not => {
            let v = pop(thread);
            thread.stack.push(Value::Bool(!cast::to_boolean(&v)));
            Flow::Next
        }
        Instr::Round => {
            let v = pop(thread);
            thread
                .stack
                .push(Value::Number(round_half_up(cast::to_number(&v))));
            Flow::Next
        }
        Instr::MathOp(func) => {
            let v = pop(thread);
            thread
                .stack
                .push(Value::Number(func.apply(cast::to_number(&v))));
            Flow::Next
        }
        Instr::Random => {
            let to = pop(thread);
            let from = pop(thread);
            let n = cast::random(&mut rt.rng, &from, &to);
            thread.stack.push(Value::Number(n));
            Flow::Next
        }
        Instr::Join => {
            let b = pop(thread);
            let a = pop(thread);
            let mut s = cast::to_string(&a);
            s.push_str(&cast::to_string(&b));
            thread.stack.push(Value::from(s));
            Flow::Next
        }
        Instr::LetterOf => {
            let s = pop(thread);
            let index = pop(thread);
            let s = cast::to_string(&s);
            thread
                .stack
                .push(Value::from(cast::letter_of(&index, &s)));
            Flow::Next
        }
        Instr::StrLength => {
            let s = pop(thread);
            let n = cast::to_string(&s).chars().count() as f64;
            thread.stack.push(Value::Number(n));
            Flow::Next
        }
        Instr::StrContains => {
            let needle = pop(thread);
            let haystack = pop(thread);
            thread.stack.push(Value::Bool(cast::contains(
                &cast::to_string(&haystack),
                &cast::to_string(&needle),
            )));
            Flow::Next
        }

        // ---- casts ----
        Instr::CastNumber => {
            let v = pop(thread);
            thread.stack.push(Value::Number(cast::to_number(&v)));
            Flow::Next
        }
        Instr::CastNumberOrNan => {
            let v = pop(thread);
            thread.stack.push(Value::Number(cast::to_number_or_nan(&v)));
            Flow::Next
        }
        Instr::CastBoolean => {
            let v = pop(thread);
            thread.stack.push(Value::Bool(cast::to_boolean(&v)));
            Flow::Next
        }
        Instr::CastString => {
            let v = pop(thread);
            thread.stack.push(Value::from(cast::to_string(&v)));
            Flow::Next
        }
        Instr::CastColor => {
            let v = pop(thread);
            thread
                .stack
                .push(Value::Number(cast::to_color(&v) as f64));
            Flow::Next
        }
        Instr::CastIndex => {
            let v = pop(thread);
            thread
                .stack
                .push(Value::Number(cast::to_number(&v).floor()));
            Flow::Next
        }

        // ---- lists ----
        Instr::ListAdd(slot) => {
            let item = pop(thread);
            blocks::data::add(rt, thread.target, *slot, item);
            Flow::Next
        }
        Instr::ListDelete(slot) => {
            let index = pop(thread);
            blocks::data::delete(rt, thread.target, *slot, &index);
            Flow::Next
        }
        Instr::ListDeleteAll(slot) => {
            blocks::data::delete_all(rt, thread.target, *slot);
            Flow::Next
        }
        Instr::ListInsert(slot) => {
            let item = pop(thread);
            let index = pop(thread);
            blocks::data::insert(rt, thread.target, *slot, &index, item);
            Flow::Next
        }
        Instr::ListReplace(slot) => {
            let item = pop(thread);
            let index = pop(thread);
            blocks::data::replace(rt, thread.target, *slot, &index, item);
            Flow::Next
        }
        Instr::ListItem(slot) => {
            let index = pop(thread);
            let v = blocks::data::item(rt, thread.target, *slot, &index);
            thread.stack.push(v);
            Flow::Next
        }
        Instr::ListIndexOf(slot) => {
            let value = pop(thread);
            let n = blocks::data::index_of(rt, thread.target, *slot, &value);
            thread.stack.push(Value::Number(n));
            Flow::Next
        }
        Instr::ListLength(slot) => {
            let n = blocks::data::length(rt, thread.target, *slot);
            thread.stack.push(Value::Number(n));
            Flow::Next
        }
        Instr::ListContains(slot) => {
            let value = pop(thread);
            let b = blocks::data::contains(rt, thread.target, *slot, &value);
            thread.stack.push(Value::Bool(b));
            Flow::Next
        }
        Instr::ListContents(slot) => {
            let v = blocks::data::contents(rt, thread.target, *slot);
            thread.stack.push(v);
            Flow::Next
        }
        Instr::ShowVar(slot, show) => {
            let (target, index) = rt.var_location(*slot, thread.target);
            rt.monitors.set_visible(
                crate::monitor::MonitorKind::Variable {
                    target,
                    slot: index,
                },
                *show,
            );
            Flow::Next
        }
        Instr::ShowList(slot, show) => {
            let (target, index) = rt.list_location(*slot, thread.target);
            rt.monitors.set_visible(
                crate::monitor::MonitorKind::List {
                    target,
                    slot: index,
                },
                *show,
            );
            Flow::Next
        }

        // ---- control flow ----
        Instr::Jump(t) => Flow::Jump(*t),
        Instr::JumpIfFalse(t) => {
            let v = pop(thread);
            if cast::to_boolean(&v) {
                Flow::Next
            } else {
                Flow::Jump(*t)
            }
        }
        Instr::JumpIfTrue(t) => {
            let v = pop(thread);
            if cast::to_boolean(&v) {
                Flow::Jump(*t)
            } else {
                Flow::Next
            }
        }
        Instr::RepeatSetup => {
            let v = pop(thread);
            let iters = (cast::to_number(&v) + 0.5).floor().max(0.0);
            thread.stack.push(Value::Number(iters));
            Flow::Next
        }
        Instr::RepeatNext(end) => {
            let remaining = match thread.stack.last() {
                Some(v) => cast::to_number(v),
                None => 0.0,
            };
            if remaining < 1.0 {
                pop(thread);
                Flow::Jump(*end)
            } else {
                if let Some(top) = thread.stack.last_mut() {
                    *top = Value::Number(remaining - 1.0);
                }
                Flow::Next
            }
        }
        Instr::ForEachNext { var, end } => {
            let len = thread.stack.len();
            if len < 2 {
                return Flow::Jump(*end);
            }
            let i = cast::to_number(&thread.stack[len - 1]) + 1.0;
            let count = cast::to_number(&thread.stack[len - 2]);
            if i > count {
                pop(thread);
                pop(thread);
                Flow::Jump(*end)
            } else {
                thread.stack[len - 1] = Value::Number(i);
                rt.write_var(*var, thread.target, Value::Number(i));
                Flow::Next
            }
        }

        // ---- scheduling ----
        Instr::Yield => Flow::Suspend {
            status: yield_status(thread),
            advance: true,
        },
        Instr::LoopYield => {
            if thread.warp == 0 {
                Flow::Suspend {
                    status: yield_status(thread),
                    advance: true,
                }
            } else if rt.clock.now() - thread.step_start > rt.config.stuck_budget_secs() {
                // forced yield breaks stuck warp loops
                Flow::Suspend {
                    status: ThreadStatus::StuckWait,
                    advance: true,
                }
            } else {
                Flow::Next
            }
        }
        Instr::WarpEnter => {
            thread.warp += 1;
            Flow::Next
        }
        Instr::WarpExit => {
            thread.warp = thread.warp.saturating_sub(1);
            Flow::Next
        }
        Instr::WaitStart => {
            let v = pop(thread);
            let secs = cast::to_number(&v).max(0.0);
            thread.wait_deadline = Some(rt.clock.now() + secs);
            rt.redraw_requested = true;
            Flow::Next
        }
        Instr::WaitDone => {
            let done = match thread.wait_deadline {
                Some(deadline) => rt.clock.now() >= deadline,
                None => true,
            };
            if done {
                thread.wait_deadline = None;
            }
            thread.stack.push(Value::Bool(done));
            Flow::Next
        }
        Instr::Retire => Flow::Retire,
        Instr::StopAll => {
            rt.stop_all();
            Flow::Retire
        }
        Instr::StopOtherScripts => {
            rt.stop_other_scripts(thread.target, thread.id);
            Flow::Next
        }
        Instr::Broadcast { wait } => {
            if let Some(ids) = thread.join.clone() {
                if rt.all_retired(&ids) {
                    thread.join = None;
                    Flow::Next
                } else {
                    Flow::Suspend {
                        status: ThreadStatus::BroadcastWait,
                        advance: false,
                    }
                }
            } else {
                let v = pop(thread);
                let name = cast::to_string(&v);
                let (ids, self_restart) =
                    rt.broadcast_from(&name, Some((thread.script, thread.target, thread.id)));
                if self_restart {
                    thread.restart();
                    return Flow::Restarted;
                }
                if *wait && !ids.is_empty() {
                    thread.join = Some(ids);
                    Flow::Suspend {
                        status: ThreadStatus::BroadcastWait,
                        advance: false,
                    }
                } else {
                    Flow::Next
                }
            }
        }
        Instr::CreateClone => {
            let v = pop(thread);
            let name = cast::to_string(&v);
            rt.create_clone_from(thread.target, &name);
            Flow::Next
        }
        Instr::DeleteThisClone => {
            if rt.project.target(thread.target).is_clone {
                rt.delete_clone_target(thread.target);
                Flow::Retire
            } else {
                Flow::Next
            }
        }

        // ---- procedures ----
        Instr::Call(p) => {
            let proc = &program.procedures[*p];
            let at = thread.stack.len().saturating_sub(proc.arg_count);
            let args = thread.stack.split_off(at);
            if let Some(f) = thread.frames.last_mut() {
                f.pc += 1;
            }
            if proc.warp {
                thread.warp += 1;
            }
            thread.frames.push(Frame {
                chunk: proc.chunk,
                pc: 0,
                args,
                stack_base: thread.stack.len(),
                warp_entered: proc.warp,
            });
            Flow::Stay
        }
        Instr::Return => {
            let value = pop(thread);
            let Some(frame) = thread.frames.pop() else {
                return Flow::Retire;
            };
            thread.stack.truncate(frame.stack_base);
            if frame.warp_entered {
                thread.warp = thread.warp.saturating_sub(1);
            }
            if thread.frames.is_empty() {
                return Flow::Retire;
            }
            thread.stack.push(value);
            Flow::Stay
        }

        // ---- runtime reads and side effects ----
        Instr::Query(op, argc) => {
            let at = thread.stack.len().saturating_sub(*argc);
            let args = thread.stack.split_off(at);
            let v = blocks::query(rt, thread.target, *op, &args);
            thread.stack.push(v);
            Flow::Next
        }
        Instr::Effect(op, argc) => match blocks::dispatch(rt, thread, op, *argc) {
            EffectFlow::Done => Flow::Next,
            EffectFlow::Reenter(status) => Flow::Suspend {
                status,
                advance: false,
            },
        },
    }
}
