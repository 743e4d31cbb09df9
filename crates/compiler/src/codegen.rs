//! Code generator
//!
//! Walks optimized IR and emits flat bytecode chunks over an operand
//! stack. Control flow is jumps; suspension is explicit yield
//! instructions. A thread resumes from a saved instruction index, so
//! every yield point is simply a place where the interpreter returns
//! to the scheduler with the program counter parked on the next
//! instruction.
//!
//! Yield discipline, as the scheduler expects it:
//!
//! - loops yield at the bottom of the body via [`Instr::LoopYield`],
//!   which is a no-op under warp except for the stuck-detect trip;
//! - `wait` yields once unconditionally, then spins on the clock with
//!   loop yields;
//! - non-warp self-recursive procedure calls get a [`Instr::LoopYield`]
//!   immediately before the call;
//! - warp regions are bracketed by [`Instr::WarpEnter`] /
//!   [`Instr::WarpExit`].
//!
//! Procedures compile with a return slot: every procedure chunk ends by
//! pushing a value and returning, and statement-form callers drop it.

use crate::error::CompileError;
use crate::ir::{
    EffectOp, Expr, HatKind, IrProcedure, IrProject, IrScript, ListSlot, MathFunction, QueryOp,
    Stmt, StmtKind, StopMode, VarSlot,
};
use sb3_core::{Project, Value};

/// One bytecode instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Push(Value),
    Pop,
    ReadVar(VarSlot),
    WriteVar(VarSlot),
    /// Procedure argument by position in the current frame
    ReadArg(usize),

    // arithmetic / logic / strings (operands on the stack)
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Round,
    MathOp(MathFunction),
    Random,
    Less,
    Greater,
    Equals,
    And,
    Or,
    Not,
    Join,
    LetterOf,
    StrLength,
    StrContains,

    // casts
    CastNumber,
    CastNumberOrNan,
    CastBoolean,
    CastString,
    CastColor,
    CastIndex,

    // lists
    ListAdd(ListSlot),
    ListDelete(ListSlot),
    ListDeleteAll(ListSlot),
    ListInsert(ListSlot),
    ListReplace(ListSlot),
    ListItem(ListSlot),
    ListIndexOf(ListSlot),
    ListLength(ListSlot),
    ListContains(ListSlot),
    ListContents(ListSlot),
    ShowVar(VarSlot, bool),
    ShowList(ListSlot, bool),

    // control flow
    Jump(usize),
    JumpIfFalse(usize),
    JumpIfTrue(usize),
    /// Pop the repeat count, push `max(0, floor(count + 0.5))`
    RepeatSetup,
    /// Loop header: if the counter on top is exhausted, pop it and
    /// jump; otherwise decrement in place
    RepeatNext(usize),
    /// For-each header over `[count, i]` on the stack: advance `i`,
    /// store it into the variable, jump out when past `count`
    ForEachNext {
        var: VarSlot,
        end: usize,
    },

    // scheduling
    /// Unconditional yield
    Yield,
    /// Yield unless warped; under warp, only the stuck-detect trips
    LoopYield,
    WarpEnter,
    WarpExit,
    /// Pop seconds, arm the thread's wait deadline, request a redraw
    WaitStart,
    /// Push whether the wait deadline has passed (clearing it if so)
    WaitDone,
    Retire,
    StopAll,
    StopOtherScripts,
    /// Pop the broadcast name; spawn matching threads. With `wait`,
    /// park until they all retire.
    Broadcast {
        wait: bool,
    },
    CreateClone,
    DeleteThisClone,

    // procedures
    Call(usize),
    Return,

    // runtime reads and side effects
    Query(QueryOp, usize),
    Effect(EffectOp, usize),
}

/// A compiled unit: one script body or one procedure body.
#[derive(Debug, Clone)]
pub struct CodeChunk {
    /// Debug name ("Stage:flag", "Sprite1:proc jump %n")
    pub name: String,
    pub instrs: Vec<Instr>,
}

/// A compiled script: entry point + chunk.
#[derive(Debug, Clone)]
pub struct CompiledScript {
    pub target: usize,
    pub hat: HatKind,
    pub chunk: usize,
    /// Project order, for stable scheduling
    pub order: usize,
}

/// A compiled procedure.
#[derive(Debug, Clone)]
pub struct CompiledProcedure {
    pub target: usize,
    pub proccode: String,
    pub warp: bool,
    pub chunk: usize,
    pub arg_count: usize,
}

/// Everything executable produced from one project.
#[derive(Debug, Clone, Default)]
pub struct CompiledProgram {
    pub chunks: Vec<CodeChunk>,
    pub scripts: Vec<CompiledScript>,
    pub procedures: Vec<CompiledProcedure>,
}

/// Compiled code plus the initial project state it runs against.
#[derive(Debug, Clone)]
pub struct CompiledProject {
    pub program: CompiledProgram,
    pub project: Project,
}

struct ChunkBuilder {
    instrs: Vec<Instr>,
}

impl ChunkBuilder {
    fn new() -> Self {
        ChunkBuilder { instrs: Vec::new() }
    }

    fn emit(&mut self, i: Instr) -> usize {
        self.instrs.push(i);
        self.instrs.len() - 1
    }

    fn here(&self) -> usize {
        self.instrs.len()
    }

    /// Emit a jump with a placeholder target, for later patching.
    fn emit_jump(&mut self, make: fn(usize) -> Instr) -> usize {
        self.emit(make(usize::MAX))
    }

    fn patch(&mut self, at: usize, target: usize) {
        match &mut self.instrs[at] {
            Instr::Jump(t)
            | Instr::JumpIfFalse(t)
            | Instr::JumpIfTrue(t)
            | Instr::RepeatNext(t)
            | Instr::ForEachNext { end: t, .. } => *t = target,
            other => unreachable!("patching non-jump instruction {:?}", other),
        }
    }
}

/// Generate code for the whole project.
pub fn generate(ir: &IrProject, project: &Project) -> Result<CompiledProgram, CompileError> {
    let mut program = CompiledProgram::default();

    // procedure table first, so calls can index it
    for proc in &ir.procedures {
        program.procedures.push(CompiledProcedure {
            target: proc.target,
            proccode: proc.proccode.clone(),
            warp: proc.warp,
            chunk: usize::MAX,
            arg_count: proc.arg_names.len(),
        });
    }

    for (i, proc) in ir.procedures.iter().enumerate() {
        let chunk = gen_procedure(proc, project)?;
        program.procedures[i].chunk = program.chunks.len();
        program.chunks.push(chunk);
    }

    for script in &ir.scripts {
        let chunk = gen_script(script, project)?;
        program.scripts.push(CompiledScript {
            target: script.target,
            hat: script.hat.clone(),
            chunk: program.chunks.len(),
            order: script.order,
        });
        program.chunks.push(chunk);
    }

    Ok(program)
}

fn target_name(project: &Project, index: usize) -> String {
    project
        .targets
        .get(index)
        .map(|t| t.name.clone())
        .unwrap_or_else(|| format!("target{}", index))
}

fn gen_script(script: &IrScript, project: &Project) -> Result<CodeChunk, CompileError> {
    let mut b = ChunkBuilder::new();
    gen_substack(&mut b, &script.body)?;
    b.emit(Instr::Retire);
    Ok(CodeChunk {
        name: format!("{}:{:?}", target_name(project, script.target), script.hat),
        instrs: b.instrs,
    })
}

fn gen_procedure(proc: &IrProcedure, project: &Project) -> Result<CodeChunk, CompileError> {
    let mut b = ChunkBuilder::new();
    gen_substack(&mut b, &proc.body)?;
    // implicit return slot for callers that read a value
    b.emit(Instr::Push(Value::empty()));
    b.emit(Instr::Return);
    Ok(CodeChunk {
        name: format!("{}:{}", target_name(project, proc.target), proc.proccode),
        instrs: b.instrs,
    })
}

fn gen_substack(b: &mut ChunkBuilder, stmts: &[Stmt]) -> Result<(), CompileError> {
    for stmt in stmts {
        gen_stmt(b, stmt)?;
    }
    Ok(())
}

fn gen_stmt(b: &mut ChunkBuilder, stmt: &Stmt) -> Result<(), CompileError> {
    match &stmt.kind {
        StmtKind::SetVariable { var, value } => {
            gen_expr(b, value)?;
            b.emit(Instr::WriteVar(*var));
        }
        StmtKind::ShowVariable { var, show } => {
            b.emit(Instr::ShowVar(*var, *show));
        }
        StmtKind::If { condition, body } => {
            gen_expr(b, condition)?;
            let jf = b.emit_jump(Instr::JumpIfFalse);
            gen_substack(b, body)?;
            let end = b.here();
            b.patch(jf, end);
        }
        StmtKind::IfElse {
            condition,
            body,
            else_body,
        } => {
            gen_expr(b, condition)?;
            let jf = b.emit_jump(Instr::JumpIfFalse);
            gen_substack(b, body)?;
            if else_body.is_empty() {
                // omitted else branch is elided
                let end = b.here();
                b.patch(jf, end);
            } else {
                let jend = b.emit_jump(Instr::Jump);
                let else_at = b.here();
                b.patch(jf, else_at);
                gen_substack(b, else_body)?;
                let end = b.here();
                b.patch(jend, end);
            }
        }
        StmtKind::Repeat { times, body } => {
            gen_expr(b, times)?;
            b.emit(Instr::RepeatSetup);
            let head = b.here();
            let next = b.emit_jump(Instr::RepeatNext);
            gen_substack(b, body)?;
            b.emit(Instr::LoopYield);
            b.emit(Instr::Jump(head));
            let end = b.here();
            b.patch(next, end);
        }
        StmtKind::Forever { body } => {
            let head = b.here();
            gen_substack(b, body)?;
            b.emit(Instr::LoopYield);
            b.emit(Instr::Jump(head));
        }
        StmtKind::While { condition, body } => {
            let head = b.here();
            gen_expr(b, condition)?;
            let jf = b.emit_jump(Instr::JumpIfFalse);
            gen_substack(b, body)?;
            b.emit(Instr::LoopYield);
            b.emit(Instr::Jump(head));
            let end = b.here();
            b.patch(jf, end);
        }
        StmtKind::ForEach { var, count, body } => {
            gen_expr(b, count)?;
            b.emit(Instr::Push(Value::Number(0.0)));
            let head = b.here();
            let next = b.emit(Instr::ForEachNext {
                var: *var,
                end: usize::MAX,
            });
            gen_substack(b, body)?;
            b.emit(Instr::LoopYield);
            b.emit(Instr::Jump(head));
            let end = b.here();
            b.patch(next, end);
        }
        StmtKind::Wait { seconds } => {
            gen_expr(b, seconds)?;
            b.emit(Instr::WaitStart);
            b.emit(Instr::Yield);
            let head = b.here();
            b.emit(Instr::WaitDone);
            let jt = b.emit_jump(Instr::JumpIfTrue);
            b.emit(Instr::LoopYield);
            b.emit(Instr::Jump(head));
            let end = b.here();
            b.patch(jt, end);
        }
        StmtKind::WaitUntil { condition } => {
            let head = b.here();
            gen_expr(b, condition)?;
            let jt = b.emit_jump(Instr::JumpIfTrue);
            b.emit(Instr::LoopYield);
            b.emit(Instr::Jump(head));
            let end = b.here();
            b.patch(jt, end);
        }
        StmtKind::Stop { mode } => {
            match mode {
                StopMode::All => b.emit(Instr::StopAll),
                StopMode::ThisScript => b.emit(Instr::Retire),
                StopMode::OtherScripts => b.emit(Instr::StopOtherScripts),
            };
        }
        StmtKind::CreateClone { target } => {
            gen_expr(b, target)?;
            b.emit(Instr::CreateClone);
        }
        StmtKind::DeleteThisClone => {
            b.emit(Instr::DeleteThisClone);
        }
        StmtKind::Warp { body } => {
            b.emit(Instr::WarpEnter);
            gen_substack(b, body)?;
            b.emit(Instr::WarpExit);
        }
        StmtKind::Broadcast { name, wait } => {
            gen_expr(b, name)?;
            b.emit(Instr::Broadcast { wait: *wait });
        }
        StmtKind::ListAdd { list, item } => {
            gen_expr(b, item)?;
            b.emit(Instr::ListAdd(*list));
        }
        StmtKind::ListDelete { list, index } => {
            gen_expr(b, index)?;
            b.emit(Instr::ListDelete(*list));
        }
        StmtKind::ListDeleteAll { list } => {
            b.emit(Instr::ListDeleteAll(*list));
        }
        StmtKind::ListInsert { list, index, item } => {
            gen_expr(b, index)?;
            gen_expr(b, item)?;
            b.emit(Instr::ListInsert(*list));
        }
        StmtKind::ListReplace { list, index, item } => {
            gen_expr(b, index)?;
            gen_expr(b, item)?;
            b.emit(Instr::ListReplace(*list));
        }
        StmtKind::ShowList { list, show } => {
            b.emit(Instr::ShowList(*list, *show));
        }
        StmtKind::ProcedureCall {
            proc,
            args,
            recursive,
        } => {
            for a in args {
                gen_expr(b, a)?;
            }
            if *recursive {
                // keep tight non-warp recursion off the host stack
                b.emit(Instr::LoopYield);
            }
            b.emit(Instr::Call(*proc));
            b.emit(Instr::Pop);
        }
        StmtKind::ProcedureReturn { value } => {
            gen_expr(b, value)?;
            b.emit(Instr::Return);
        }
        StmtKind::Effect { op, args } => {
            for a in args {
                gen_expr(b, a)?;
            }
            b.emit(Instr::Effect(op.clone(), args.len()));
        }
    }
    Ok(())
}

fn gen_expr(b: &mut ChunkBuilder, e: &Expr) -> Result<(), CompileError> {
    match e {
        Expr::Constant { value, .. } => {
            b.emit(Instr::Push(value.clone()));
        }
        Expr::Cast { cast, value } => {
            gen_expr(b, value)?;
            use crate::ir::CastKind::*;
            b.emit(match cast {
                Number => Instr::CastNumber,
                NumberOrNan => Instr::CastNumberOrNan,
                Boolean => Instr::CastBoolean,
                String => Instr::CastString,
                Color => Instr::CastColor,
                Index => Instr::CastIndex,
            });
        }
        Expr::Binary {
            op, left, right, ..
        } => {
            gen_expr(b, left)?;
            gen_expr(b, right)?;
            use crate::ir::BinaryOp::*;
            b.emit(match op {
                Add => Instr::Add,
                Subtract => Instr::Sub,
                Multiply => Instr::Mul,
                Divide => Instr::Div,
                Mod => Instr::Mod,
                Less => Instr::Less,
                Greater => Instr::Greater,
                Equals => Instr::Equals,
                And => Instr::And,
                Or => Instr::Or,
            });
        }
        Expr::Not { value } => {
            gen_expr(b, value)?;
            b.emit(Instr::Not);
        }
        Expr::MathOp { func, value } => {
            gen_expr(b, value)?;
            b.emit(Instr::MathOp(*func));
        }
        Expr::Round { value } => {
            gen_expr(b, value)?;
            b.emit(Instr::Round);
        }
        Expr::Random { from, to, .. } => {
            gen_expr(b, from)?;
            gen_expr(b, to)?;
            b.emit(Instr::Random);
        }
        Expr::Join { left, right } => {
            gen_expr(b, left)?;
            gen_expr(b, right)?;
            b.emit(Instr::Join);
        }
        Expr::LetterOf { index, string } => {
            gen_expr(b, index)?;
            gen_expr(b, string)?;
            b.emit(Instr::LetterOf);
        }
        Expr::StringLength { value } => {
            gen_expr(b, value)?;
            b.emit(Instr::StrLength);
        }
        Expr::StringContains { haystack, needle } => {
            gen_expr(b, haystack)?;
            gen_expr(b, needle)?;
            b.emit(Instr::StrContains);
        }
        Expr::VariableGet { var, .. } => {
            b.emit(Instr::ReadVar(*var));
        }
        Expr::Argument { index, .. } => {
            b.emit(Instr::ReadArg(*index));
        }
        Expr::ListItem { list, index } => {
            gen_expr(b, index)?;
            b.emit(Instr::ListItem(*list));
        }
        Expr::ListLength { list } => {
            b.emit(Instr::ListLength(*list));
        }
        Expr::ListContains { list, value } => {
            gen_expr(b, value)?;
            b.emit(Instr::ListContains(*list));
        }
        Expr::ListIndexOf { list, value } => {
            gen_expr(b, value)?;
            b.emit(Instr::ListIndexOf(*list));
        }
        Expr::ListContents { list } => {
            b.emit(Instr::ListContents(*list));
        }
        Expr::ProcedureCall { proc, args } => {
            for a in args {
                gen_expr(b, a)?;
            }
            b.emit(Instr::Call(*proc));
        }
        Expr::Query { query, args } => {
            for a in args {
                gen_expr(b, a)?;
            }
            b.emit(Instr::Query(*query, args.len()));
        }
    }
    Ok(())
}
