//! IR generator
//!
//! Lowers each hat-rooted block stack into IR: a recursive descent over
//! the raw block arena, keyed by id (`next` chains for substacks, input
//! references for expressions). The string opcode is decoded exactly
//! once, here. Casts are inserted at every consumer that needs a
//! specific kind, and constant folding happens during generation so the
//! optimizer only ever removes casts and tightens types.
//!
//! Malformed structure is tolerated block-by-block: a dangling id or a
//! cycle in the `next` chain ends the substack with a warning, and an
//! unknown extension opcode skips just that block. Unknown opcodes in
//! core families abort the compile.

use crate::error::CompileError;
use crate::frontend::{RawBlock, RawInput, RawProject, RawTarget};
use crate::ir::{
    classify_value, BinaryOp, CastKind, DateUnit, EffectOp, Expr, GreaterThanKind, HatKind,
    IrProcedure, IrProject, IrScript, ListSlot, MathFunction, QueryOp, StmtKind, StopMode,
    ValueType, VarScope, VarSlot, Stmt,
};
use sb3_core::{cast, Project, RotationStyle, Value};
use std::collections::HashSet;
use tracing::warn;

/// Opcode prefixes of core families: an unknown opcode under one of
/// these is a compile error. Anything else (pen, music, extensions)
/// soft-skips.
const CORE_FAMILIES: [&str; 9] = [
    "motion_",
    "looks_",
    "sound_",
    "event_",
    "control_",
    "sensing_",
    "operator_",
    "data_",
    "procedures_",
];

fn is_core_family(opcode: &str) -> bool {
    CORE_FAMILIES.iter().any(|p| opcode.starts_with(p))
}

struct Ctx {
    target: usize,
    /// Index of the procedure whose body is being generated, if any
    proc: Option<usize>,
    arg_names: Vec<String>,
}

pub struct IrGen<'a> {
    raw: &'a RawProject,
    project: &'a Project,
    procedures: Vec<IrProcedure>,
    /// (target index, proccode) → procedure index
    proc_index: Vec<(usize, String)>,
    /// Cycle guard for the current script
    visiting: HashSet<String>,
}

/// Lower the whole project.
pub fn generate(raw: &RawProject, project: &Project) -> Result<IrProject, CompileError> {
    let mut lowerer = IrGen {
        raw,
        project,
        procedures: Vec::new(),
        proc_index: Vec::new(),
        visiting: HashSet::new(),
    };
    lowerer.collect_procedures();
    lowerer.generate_procedure_bodies()?;
    let scripts = lowerer.generate_scripts()?;
    Ok(IrProject {
        scripts,
        procedures: lowerer.procedures,
    })
}

/// Split a proccode like `jump %s high %b` into argument kinds;
/// `true` marks a boolean (`%b`) slot.
fn proccode_arg_bools(proccode: &str) -> Vec<bool> {
    let mut out = Vec::new();
    let bytes = proccode.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'%' {
            match bytes[i + 1] {
                b'b' => out.push(true),
                b's' | b'n' => out.push(false),
                _ => {}
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    out
}

impl<'a> IrGen<'a> {
    // ------------------------------------------------------------------
    // Procedures
    // ------------------------------------------------------------------

    /// Pass 1: register every `procedures_definition` so calls resolve
    /// before any body is generated.
    fn collect_procedures(&mut self) {
        let raw = self.raw;
        for (ti, target) in raw.targets.iter().enumerate() {
            for (_, block) in target.blocks.top_level() {
                if block.opcode != "procedures_definition" {
                    continue;
                }
                let Some(proto) = self.definition_prototype(target, block) else {
                    warn!(target = %target.name, "procedure definition without prototype");
                    continue;
                };
                let Some(mutation) = proto.mutation.clone() else {
                    warn!(target = %target.name, "procedure prototype without mutation");
                    continue;
                };
                self.proc_index.push((ti, mutation.proccode.clone()));
                self.procedures.push(IrProcedure {
                    target: ti,
                    proccode: mutation.proccode,
                    warp: mutation.warp,
                    arg_names: mutation.argument_names,
                    arg_defaults: mutation.argument_defaults,
                    body: Vec::new(),
                });
            }
        }
    }

    fn definition_prototype<'b>(
        &self,
        target: &'b RawTarget,
        definition: &RawBlock,
    ) -> Option<&'b RawBlock> {
        match definition.inputs.get("custom_block") {
            Some(RawInput::Block(id)) => target.blocks.get(id),
            _ => None,
        }
    }

    fn find_procedure(&self, target: usize, proccode: &str) -> Option<usize> {
        self.proc_index
            .iter()
            .position(|(t, code)| *t == target && code == proccode)
    }

    /// Pass 2: generate every procedure body.
    fn generate_procedure_bodies(&mut self) -> Result<(), CompileError> {
        let raw = self.raw;
        for pi in 0..self.procedures.len() {
            let ti = self.procedures[pi].target;
            let proccode = self.procedures[pi].proccode.clone();
            let target = &raw.targets[ti];
            let def_id = target.blocks.top_level().find_map(|(id, b)| {
                if b.opcode != "procedures_definition" {
                    return None;
                }
                let proto = self.definition_prototype(target, b)?;
                let m = proto.mutation.as_ref()?;
                (m.proccode == proccode).then(|| id.to_string())
            });
            let Some(def_id) = def_id else { continue };
            let def = target.blocks.get(&def_id).expect("definition exists");
            let ctx = Ctx {
                target: ti,
                proc: Some(pi),
                arg_names: self.procedures[pi].arg_names.clone(),
            };
            self.visiting.clear();
            let body = match def.next.clone() {
                Some(first) => self.descend_chain(&ctx, &first)?,
                None => Vec::new(),
            };
            self.procedures[pi].body = body;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scripts
    // ------------------------------------------------------------------

    fn generate_scripts(&mut self) -> Result<Vec<IrScript>, CompileError> {
        let raw = self.raw;
        let mut scripts = Vec::new();
        for (ti, target) in raw.targets.iter().enumerate() {
            let tops: Vec<(String, String)> = target
                .blocks
                .top_level()
                .map(|(id, b)| (id.to_string(), b.opcode.clone()))
                .collect();
            for (id, _) in tops {
                let block = raw.targets[ti].blocks.get(&id).expect("listed block");
                let Some(hat) = self.build_hat(ti, block) else {
                    continue;
                };
                let ctx = Ctx {
                    target: ti,
                    proc: None,
                    arg_names: Vec::new(),
                };
                self.visiting.clear();
                let body = match block.next.clone() {
                    Some(first) => self.descend_chain(&ctx, &first)?,
                    None => Vec::new(),
                };
                scripts.push(IrScript {
                    target: ti,
                    hat,
                    body,
                    order: scripts.len(),
                });
            }
        }
        Ok(scripts)
    }

    /// Decode a hat opcode into an entry-point registration, or None
    /// for non-hat top-level blocks.
    fn build_hat(&mut self, target: usize, block: &RawBlock) -> Option<HatKind> {
        let field = |name: &str| -> String {
            block
                .fields
                .get(name)
                .map(|f| f.value.clone())
                .unwrap_or_default()
        };
        match block.opcode.as_str() {
            "event_whenflagclicked" => Some(HatKind::FlagClicked),
            "event_whenkeypressed" => Some(HatKind::KeyPressed {
                key: field("KEY_OPTION"),
            }),
            "event_whenbroadcastreceived" => Some(HatKind::BroadcastReceived {
                name: field("BROADCAST_OPTION").to_lowercase(),
            }),
            "event_whenthisspriteclicked" => Some(HatKind::SpriteClicked),
            "event_whenstageclicked" => Some(HatKind::StageClicked),
            "event_whenbackdropswitchesto" => Some(HatKind::BackdropSwitchesTo {
                backdrop: field("BACKDROP"),
            }),
            "event_whengreaterthan" => {
                let what = if field("WHENGREATERTHANMENU").eq_ignore_ascii_case("loudness") {
                    GreaterThanKind::Loudness
                } else {
                    GreaterThanKind::Timer
                };
                let ctx = Ctx {
                    target,
                    proc: None,
                    arg_names: Vec::new(),
                };
                let threshold = match self
                    .descend_input(&ctx, block, "VALUE")
                    .to_type(CastKind::Number)
                {
                    Expr::Constant {
                        value: Value::Number(n),
                        ..
                    } => n,
                    _ => {
                        warn!("non-constant when-greater-than threshold, defaulting to 10");
                        10.0
                    }
                };
                Some(HatKind::GreaterThan { what, threshold })
            }
            "control_start_as_clone" => Some(HatKind::StartAsClone),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Substack descent
    // ------------------------------------------------------------------

    /// Follow a `next` chain, guarding against dangling ids and cycles.
    fn descend_chain(&mut self, ctx: &Ctx, first: &str) -> Result<Vec<Stmt>, CompileError> {
        let raw = self.raw;
        let mut out = Vec::new();
        let mut cursor = Some(first.to_string());
        while let Some(id) = cursor {
            if !self.visiting.insert(id.clone()) {
                warn!(block = id, "cycle in block chain, truncating substack");
                break;
            }
            let Some(block) = raw.targets[ctx.target].blocks.get(&id) else {
                warn!(block = id, "dangling block reference, truncating substack");
                break;
            };
            cursor = block.next.clone();
            if let Some(kind) = self.descend_stack_block(ctx, &id, block)? {
                out.push(Stmt::with_id(kind, id));
            }
        }
        Ok(out)
    }

    /// Substack input: a named input holding the first block of a chain.
    fn descend_substack(
        &mut self,
        ctx: &Ctx,
        block: &RawBlock,
        name: &str,
    ) -> Result<Vec<Stmt>, CompileError> {
        match block.inputs.get(name) {
            Some(RawInput::Block(id)) => {
                let id = id.clone();
                self.descend_chain(ctx, &id)
            }
            _ => Ok(Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // Variable / field helpers
    // ------------------------------------------------------------------

    fn field_value(block: &RawBlock, name: &str) -> String {
        block
            .fields
            .get(name)
            .map(|f| f.value.clone())
            .unwrap_or_default()
    }

    /// Resolve a variable field to a slot: the field's id first, the
    /// name as a fallback; sprite scope before stage scope.
    fn descend_variable(&self, ctx: &Ctx, block: &RawBlock, field: &str) -> Option<VarSlot> {
        let f = block.fields.get(field)?;
        let target = &self.project.targets[ctx.target];
        let stage_idx = self.project.stage_id()?;
        let stage = &self.project.targets[stage_idx.0];
        let lookup = |t: &sb3_core::Target| -> Option<usize> {
            f.id.as_deref()
                .and_then(|id| t.find_variable(id))
                .or_else(|| t.find_variable_by_name(&f.value))
        };
        if !target.is_stage {
            if let Some(index) = lookup(target) {
                let cloud = target.variables[index].is_cloud;
                return Some(VarSlot {
                    scope: VarScope::Sprite,
                    index,
                    cloud,
                });
            }
        }
        lookup(stage).map(|index| VarSlot {
            scope: VarScope::Stage,
            index,
            cloud: stage.variables[index].is_cloud,
        })
    }

    fn descend_list(&self, ctx: &Ctx, block: &RawBlock, field: &str) -> Option<ListSlot> {
        let f = block.fields.get(field)?;
        let target = &self.project.targets[ctx.target];
        let stage_idx = self.project.stage_id()?;
        let stage = &self.project.targets[stage_idx.0];
        let lookup = |t: &sb3_core::Target| -> Option<usize> {
            f.id.as_deref()
                .and_then(|id| t.find_list(id))
                .or_else(|| t.find_list_by_name(&f.value))
        };
        if !target.is_stage {
            if let Some(index) = lookup(target) {
                return Some(ListSlot {
                    scope: VarScope::Sprite,
                    index,
                });
            }
        }
        lookup(stage).map(|index| ListSlot {
            scope: VarScope::Stage,
            index,
        })
    }

    fn variable_get(&self, ctx: &Ctx, name: &str, id: &str) -> Expr {
        let target = &self.project.targets[ctx.target];
        let stage_idx = self.project.stage_id().map(|s| s.0).unwrap_or(0);
        let stage = &self.project.targets[stage_idx];
        if !target.is_stage {
            if let Some(index) = target
                .find_variable(id)
                .or_else(|| target.find_variable_by_name(name))
            {
                return Expr::VariableGet {
                    var: VarSlot {
                        scope: VarScope::Sprite,
                        index,
                        cloud: target.variables[index].is_cloud,
                    },
                    ty: ValueType::ANY,
                };
            }
        }
        if let Some(index) = stage
            .find_variable(id)
            .or_else(|| stage.find_variable_by_name(name))
        {
            return Expr::VariableGet {
                var: VarSlot {
                    scope: VarScope::Stage,
                    index,
                    cloud: stage.variables[index].is_cloud,
                },
                ty: ValueType::ANY,
            };
        }
        warn!(variable = name, "unresolved variable, reading as 0");
        Expr::constant(0.0)
    }

    // ------------------------------------------------------------------
    // Input descent
    // ------------------------------------------------------------------

    /// Descend a named input into an (uncast) expression. A missing or
    /// empty slot reads as the empty string.
    fn descend_input(&mut self, ctx: &Ctx, block: &RawBlock, name: &str) -> Expr {
        match block.inputs.get(name).cloned() {
            Some(RawInput::Block(id)) => self.descend_reporter(ctx, &id),
            Some(RawInput::Literal(v)) => Expr::constant(v),
            Some(RawInput::Color(s)) => Expr::Constant {
                value: Value::from(s.as_str()),
                ty: ValueType::COLOR,
            },
            Some(RawInput::Broadcast { name, .. }) => Expr::constant(name.as_str()),
            Some(RawInput::Variable { name, id }) => self.variable_get(ctx, &name, &id),
            Some(RawInput::List { name, id }) => {
                let target = &self.project.targets[ctx.target];
                let stage_idx = self.project.stage_id().map(|s| s.0).unwrap_or(0);
                let stage = &self.project.targets[stage_idx];
                let local = (!target.is_stage)
                    .then(|| {
                        target
                            .find_list(&id)
                            .or_else(|| target.find_list_by_name(&name))
                    })
                    .flatten()
                    .map(|index| ListSlot {
                        scope: VarScope::Sprite,
                        index,
                    });
                let slot = local.or_else(|| {
                    stage
                        .find_list(&id)
                        .or_else(|| stage.find_list_by_name(&name))
                        .map(|index| ListSlot {
                            scope: VarScope::Stage,
                            index,
                        })
                });
                match slot {
                    Some(list) => Expr::ListContents { list },
                    None => {
                        warn!(list = %name, "unresolved list, reading as empty");
                        Expr::constant("")
                    }
                }
            }
            Some(RawInput::Empty) | None => Expr::constant(""),
        }
    }

    /// Boolean input slot: an empty slot is false, everything else is
    /// cast to boolean.
    fn descend_condition(&mut self, ctx: &Ctx, block: &RawBlock, name: &str) -> Expr {
        match block.inputs.get(name) {
            Some(RawInput::Block(_)) => self
                .descend_input(ctx, block, name)
                .to_type(CastKind::Boolean),
            _ => Expr::constant(false),
        }
    }

    fn number_input(&mut self, ctx: &Ctx, block: &RawBlock, name: &str) -> Expr {
        self.descend_input(ctx, block, name).to_type(CastKind::Number)
    }

    fn string_input(&mut self, ctx: &Ctx, block: &RawBlock, name: &str) -> Expr {
        self.descend_input(ctx, block, name).to_type(CastKind::String)
    }

    // ------------------------------------------------------------------
    // Reporters
    // ------------------------------------------------------------------

    fn descend_reporter(&mut self, ctx: &Ctx, id: &str) -> Expr {
        if self.visiting.contains(id) {
            warn!(block = id, "cycle through reporter input, reading as empty");
            return Expr::constant("");
        }
        self.visiting.insert(id.to_string());
        let raw = self.raw;
        let Some(block) = raw.targets[ctx.target].blocks.get(id) else {
            warn!(block = id, "dangling reporter reference, reading as empty");
            return Expr::constant("");
        };
        let expr = self.reporter_expr(ctx, block);
        self.visiting.remove(id);
        expr
    }

    fn binary_numeric(&mut self, ctx: &Ctx, block: &RawBlock, op: BinaryOp) -> Expr {
        let left = self.number_input(ctx, block, "NUM1");
        let right = self.number_input(ctx, block, "NUM2");
        build_binary(op, left, right)
    }

    fn reporter_expr(&mut self, ctx: &Ctx, block: &RawBlock) -> Expr {
        match block.opcode.as_str() {
            "operator_add" => self.binary_numeric(ctx, block, BinaryOp::Add),
            "operator_subtract" => self.binary_numeric(ctx, block, BinaryOp::Subtract),
            "operator_multiply" => self.binary_numeric(ctx, block, BinaryOp::Multiply),
            "operator_divide" => self.binary_numeric(ctx, block, BinaryOp::Divide),
            "operator_mod" => self.binary_numeric(ctx, block, BinaryOp::Mod),
            "operator_round" => {
                let value = self.number_input(ctx, block, "NUM");
                if let Expr::Constant {
                    value: Value::Number(n),
                    ..
                } = value
                {
                    return Expr::constant(round_half_up(n));
                }
                Expr::Round {
                    value: Box::new(value),
                }
            }
            "operator_mathop" => {
                let func = MathFunction::from_menu(&Self::field_value(block, "OPERATOR"))
                    .unwrap_or(MathFunction::Abs);
                let value = self.number_input(ctx, block, "NUM");
                if let Expr::Constant {
                    value: Value::Number(n),
                    ..
                } = value
                {
                    return Expr::constant(func.apply(n));
                }
                Expr::MathOp {
                    func,
                    value: Box::new(value),
                }
            }
            "operator_random" => {
                let from = self.descend_input(ctx, block, "FROM");
                let to = self.descend_input(ctx, block, "TO");
                let int_result = always_int_like(&from) && always_int_like(&to);
                Expr::Random {
                    ty: if int_result {
                        ValueType::NUMBER_INT
                    } else {
                        ValueType::NUMBER
                    },
                    from: Box::new(from),
                    to: Box::new(to),
                }
            }
            "operator_lt" => self.comparison(ctx, block, BinaryOp::Less),
            "operator_gt" => self.comparison(ctx, block, BinaryOp::Greater),
            "operator_equals" => self.comparison(ctx, block, BinaryOp::Equals),
            "operator_and" => self.logic(ctx, block, BinaryOp::And),
            "operator_or" => self.logic(ctx, block, BinaryOp::Or),
            "operator_not" => {
                let value = self.descend_condition(ctx, block, "OPERAND");
                if let Expr::Constant {
                    value: Value::Bool(b),
                    ..
                } = value
                {
                    return Expr::constant(!b);
                }
                Expr::Not {
                    value: Box::new(value),
                }
            }
            "operator_join" => Expr::Join {
                left: Box::new(self.string_input(ctx, block, "STRING1")),
                right: Box::new(self.string_input(ctx, block, "STRING2")),
            },
            "operator_letter_of" => Expr::LetterOf {
                index: Box::new(
                    self.descend_input(ctx, block, "LETTER")
                        .to_type(CastKind::Index),
                ),
                string: Box::new(self.string_input(ctx, block, "STRING")),
            },
            "operator_length" => Expr::StringLength {
                value: Box::new(self.string_input(ctx, block, "STRING")),
            },
            "operator_contains" => Expr::StringContains {
                haystack: Box::new(self.string_input(ctx, block, "STRING1")),
                needle: Box::new(self.string_input(ctx, block, "STRING2")),
            },
            "data_variable" => {
                let name = Self::field_value(block, "VARIABLE");
                let id = block
                    .fields
                    .get("VARIABLE")
                    .and_then(|f| f.id.clone())
                    .unwrap_or_default();
                self.variable_get(ctx, &name, &id)
            }
            "data_listcontents" => match self.descend_list(ctx, block, "LIST") {
                Some(list) => Expr::ListContents { list },
                None => Expr::constant(""),
            },
            "data_itemoflist" => match self.descend_list(ctx, block, "LIST") {
                Some(list) => Expr::ListItem {
                    list,
                    index: Box::new(self.descend_input(ctx, block, "INDEX")),
                },
                None => Expr::constant(""),
            },
            "data_itemnumoflist" => match self.descend_list(ctx, block, "LIST") {
                Some(list) => Expr::ListIndexOf {
                    list,
                    value: Box::new(self.descend_input(ctx, block, "ITEM")),
                },
                None => Expr::constant(0.0),
            },
            "data_lengthoflist" => match self.descend_list(ctx, block, "LIST") {
                Some(list) => Expr::ListLength { list },
                None => Expr::constant(0.0),
            },
            "data_listcontainsitem" => match self.descend_list(ctx, block, "LIST") {
                Some(list) => Expr::ListContains {
                    list,
                    value: Box::new(self.descend_input(ctx, block, "ITEM")),
                },
                None => Expr::constant(false),
            },
            "argument_reporter_string_number" => {
                let name = Self::field_value(block, "VALUE");
                match ctx.arg_names.iter().position(|n| n == &name) {
                    Some(index) => Expr::Argument {
                        index,
                        boolean: false,
                    },
                    None => Expr::constant(0.0),
                }
            }
            "argument_reporter_boolean" => {
                let name = Self::field_value(block, "VALUE");
                match ctx.arg_names.iter().position(|n| n == &name) {
                    Some(index) => Expr::Argument {
                        index,
                        boolean: true,
                    },
                    None => Expr::constant(false),
                }
            }
            "procedures_call" => match self.procedure_call(ctx, block) {
                Some((proc, args, _)) => Expr::ProcedureCall { proc, args },
                None => Expr::constant(""),
            },
            // motion / looks / sound state reporters
            "motion_xposition" => Expr::Query {
                query: QueryOp::XPosition,
                args: vec![],
            },
            "motion_yposition" => Expr::Query {
                query: QueryOp::YPosition,
                args: vec![],
            },
            "motion_direction" => Expr::Query {
                query: QueryOp::Direction,
                args: vec![],
            },
            "looks_size" => Expr::Query {
                query: QueryOp::Size,
                args: vec![],
            },
            "looks_costumenumbername" => {
                let q = if Self::field_value(block, "NUMBER_NAME") == "name" {
                    QueryOp::CostumeName
                } else {
                    QueryOp::CostumeNumber
                };
                Expr::Query {
                    query: q,
                    args: vec![],
                }
            }
            "looks_backdropnumbername" => {
                let q = if Self::field_value(block, "NUMBER_NAME") == "name" {
                    QueryOp::BackdropName
                } else {
                    QueryOp::BackdropNumber
                };
                Expr::Query {
                    query: q,
                    args: vec![],
                }
            }
            "sound_volume" => Expr::Query {
                query: QueryOp::Volume,
                args: vec![],
            },
            // sensing
            "sensing_timer" => Expr::Query {
                query: QueryOp::Timer,
                args: vec![],
            },
            "sensing_loudness" => Expr::Query {
                query: QueryOp::Loudness,
                args: vec![],
            },
            "sensing_answer" => Expr::Query {
                query: QueryOp::Answer,
                args: vec![],
            },
            "sensing_username" => Expr::Query {
                query: QueryOp::Username,
                args: vec![],
            },
            "sensing_mousex" => Expr::Query {
                query: QueryOp::MouseX,
                args: vec![],
            },
            "sensing_mousey" => Expr::Query {
                query: QueryOp::MouseY,
                args: vec![],
            },
            "sensing_mousedown" => Expr::Query {
                query: QueryOp::MouseDown,
                args: vec![],
            },
            "sensing_dayssince2000" => Expr::Query {
                query: QueryOp::DaysSince2000,
                args: vec![],
            },
            "sensing_current" => {
                let unit = DateUnit::from_menu(&Self::field_value(block, "CURRENTMENU"))
                    .unwrap_or(DateUnit::Year);
                Expr::Query {
                    query: QueryOp::Current(unit),
                    args: vec![],
                }
            }
            "sensing_keypressed" => Expr::Query {
                query: QueryOp::KeyPressed,
                args: vec![self.string_input(ctx, block, "KEY_OPTION")],
            },
            "sensing_touchingobject" => Expr::Query {
                query: QueryOp::TouchingObject,
                args: vec![self.string_input(ctx, block, "TOUCHINGOBJECTMENU")],
            },
            "sensing_distanceto" => Expr::Query {
                query: QueryOp::DistanceTo,
                args: vec![self.string_input(ctx, block, "DISTANCETOMENU")],
            },
            opcode => {
                // menus: shadow blocks with a single field report their
                // field value as a constant
                if block.shadow && block.fields.len() == 1 {
                    let value = block.fields.values().next().expect("one field").value.clone();
                    return Expr::constant(value.as_str());
                }
                if is_core_family(opcode) {
                    warn!(opcode, "unknown reporter in core family, reading as empty");
                } else {
                    warn!(opcode, "extension reporter not supported, reading as empty");
                }
                Expr::constant("")
            }
        }
    }

    fn comparison(&mut self, ctx: &Ctx, block: &RawBlock, op: BinaryOp) -> Expr {
        let left = self.descend_input(ctx, block, "OPERAND1");
        let right = self.descend_input(ctx, block, "OPERAND2");
        build_binary(op, left, right)
    }

    fn logic(&mut self, ctx: &Ctx, block: &RawBlock, op: BinaryOp) -> Expr {
        let left = self.descend_condition(ctx, block, "OPERAND1");
        let right = self.descend_condition(ctx, block, "OPERAND2");
        build_binary(op, left, right)
    }

    // ------------------------------------------------------------------
    // Procedure calls
    // ------------------------------------------------------------------

    /// Resolve a `procedures_call`: the procedure index, the argument
    /// expressions in declaration order, and the recursion marker.
    fn procedure_call(&mut self, ctx: &Ctx, block: &RawBlock) -> Option<(usize, Vec<Expr>, bool)> {
        let mutation = block.mutation.as_ref()?.clone();
        let Some(proc) = self.find_procedure(ctx.target, &mutation.proccode) else {
            warn!(
                proccode = %mutation.proccode,
                "call to undefined procedure, skipping"
            );
            return None;
        };
        let bools = proccode_arg_bools(&mutation.proccode);
        let defaults = self.procedures[proc].arg_defaults.clone();
        let mut args = Vec::with_capacity(mutation.argument_ids.len());
        for (i, arg_id) in mutation.argument_ids.iter().enumerate() {
            let is_bool = bools.get(i).copied().unwrap_or(false);
            let expr = match block.inputs.get(arg_id.as_str()) {
                Some(_) if is_bool => self.descend_condition(ctx, block, arg_id),
                Some(_) => self.descend_input(ctx, block, arg_id),
                None => match defaults.get(i) {
                    // boolean slots keep their declared type even when
                    // the default fills in
                    Some(v) if is_bool => Expr::constant(v.clone()).to_type(CastKind::Boolean),
                    Some(v) => Expr::constant(v.clone()),
                    None => {
                        if is_bool {
                            Expr::constant(false)
                        } else {
                            Expr::constant("")
                        }
                    }
                },
            };
            args.push(expr);
        }
        let recursive = ctx.proc == Some(proc);
        Some((proc, args, recursive))
    }

    // ------------------------------------------------------------------
    // Stack blocks
    // ------------------------------------------------------------------

    /// Lower one stack block. `Ok(None)` means skip (soft error or
    /// non-executable block).
    fn descend_stack_block(
        &mut self,
        ctx: &Ctx,
        id: &str,
        block: &RawBlock,
    ) -> Result<Option<StmtKind>, CompileError> {
        let kind = match block.opcode.as_str() {
            // ---- control ----
            "control_repeat" => StmtKind::Repeat {
                times: self.number_input(ctx, block, "TIMES"),
                body: self.descend_substack(ctx, block, "SUBSTACK")?,
            },
            "control_forever" => StmtKind::Forever {
                body: self.descend_substack(ctx, block, "SUBSTACK")?,
            },
            "control_if" => StmtKind::If {
                condition: self.descend_condition(ctx, block, "CONDITION"),
                body: self.descend_substack(ctx, block, "SUBSTACK")?,
            },
            "control_if_else" => StmtKind::IfElse {
                condition: self.descend_condition(ctx, block, "CONDITION"),
                body: self.descend_substack(ctx, block, "SUBSTACK")?,
                else_body: self.descend_substack(ctx, block, "SUBSTACK2")?,
            },
            "control_repeat_until" => {
                // negate after the cast, not before
                let condition = self.descend_condition(ctx, block, "CONDITION");
                let condition = match condition {
                    Expr::Constant {
                        value: Value::Bool(b),
                        ..
                    } => Expr::constant(!b),
                    other => Expr::Not {
                        value: Box::new(other),
                    },
                };
                StmtKind::While {
                    condition,
                    body: self.descend_substack(ctx, block, "SUBSTACK")?,
                }
            }
            "control_while" => StmtKind::While {
                condition: self.descend_condition(ctx, block, "CONDITION"),
                body: self.descend_substack(ctx, block, "SUBSTACK")?,
            },
            "control_wait" => StmtKind::Wait {
                seconds: self.number_input(ctx, block, "DURATION"),
            },
            "control_wait_until" => StmtKind::WaitUntil {
                condition: self.descend_condition(ctx, block, "CONDITION"),
            },
            "control_stop" => {
                let mode = match Self::field_value(block, "STOP_OPTION").as_str() {
                    "all" => StopMode::All,
                    "this script" => StopMode::ThisScript,
                    // "other scripts in stage" deliberately included
                    _ => StopMode::OtherScripts,
                };
                StmtKind::Stop { mode }
            }
            "control_create_clone_of" => StmtKind::CreateClone {
                target: self.string_input(ctx, block, "CLONE_OPTION"),
            },
            "control_delete_this_clone" => StmtKind::DeleteThisClone,
            "control_all_at_once" => StmtKind::Warp {
                body: self.descend_substack(ctx, block, "SUBSTACK")?,
            },
            "control_for_each" => {
                let Some(var) = self.descend_variable(ctx, block, "VARIABLE") else {
                    warn!(block = id, "for-each over unresolved variable, skipping");
                    return Ok(None);
                };
                StmtKind::ForEach {
                    var,
                    count: self.number_input(ctx, block, "VALUE"),
                    body: self.descend_substack(ctx, block, "SUBSTACK")?,
                }
            }
            "control_start_as_clone" | "procedures_definition" | "procedures_prototype" => {
                return Ok(None)
            }
            // ---- events ----
            "event_broadcast" => StmtKind::Broadcast {
                name: self.string_input(ctx, block, "BROADCAST_INPUT"),
                wait: false,
            },
            "event_broadcastandwait" => StmtKind::Broadcast {
                name: self.string_input(ctx, block, "BROADCAST_INPUT"),
                wait: true,
            },
            op if op.starts_with("event_when") => return Ok(None),
            // ---- data ----
            "data_setvariableto" => {
                let Some(var) = self.descend_variable(ctx, block, "VARIABLE") else {
                    warn!(block = id, "set of unresolved variable, skipping");
                    return Ok(None);
                };
                StmtKind::SetVariable {
                    var,
                    value: self.descend_input(ctx, block, "VALUE"),
                }
            }
            "data_changevariableby" => {
                let Some(var) = self.descend_variable(ctx, block, "VARIABLE") else {
                    warn!(block = id, "change of unresolved variable, skipping");
                    return Ok(None);
                };
                // sugar to set(v, v + delta) so the add can specialize
                let read = Expr::VariableGet {
                    var,
                    ty: ValueType::ANY,
                }
                .to_type(CastKind::Number);
                let delta = self.number_input(ctx, block, "VALUE");
                StmtKind::SetVariable {
                    var,
                    value: build_binary(BinaryOp::Add, read, delta),
                }
            }
            "data_showvariable" | "data_hidevariable" => {
                let Some(var) = self.descend_variable(ctx, block, "VARIABLE") else {
                    return Ok(None);
                };
                StmtKind::ShowVariable {
                    var,
                    show: block.opcode == "data_showvariable",
                }
            }
            "data_addtolist" => {
                let Some(list) = self.descend_list(ctx, block, "LIST") else {
                    return Ok(None);
                };
                StmtKind::ListAdd {
                    list,
                    item: self.descend_input(ctx, block, "ITEM"),
                }
            }
            "data_deleteoflist" => {
                let Some(list) = self.descend_list(ctx, block, "LIST") else {
                    return Ok(None);
                };
                StmtKind::ListDelete {
                    list,
                    index: self.descend_input(ctx, block, "INDEX"),
                }
            }
            "data_deletealloflist" => {
                let Some(list) = self.descend_list(ctx, block, "LIST") else {
                    return Ok(None);
                };
                StmtKind::ListDeleteAll { list }
            }
            "data_insertatlist" => {
                let Some(list) = self.descend_list(ctx, block, "LIST") else {
                    return Ok(None);
                };
                StmtKind::ListInsert {
                    list,
                    index: self.descend_input(ctx, block, "INDEX"),
                    item: self.descend_input(ctx, block, "ITEM"),
                }
            }
            "data_replaceitemoflist" => {
                let Some(list) = self.descend_list(ctx, block, "LIST") else {
                    return Ok(None);
                };
                StmtKind::ListReplace {
                    list,
                    index: self.descend_input(ctx, block, "INDEX"),
                    item: self.descend_input(ctx, block, "ITEM"),
                }
            }
            "data_showlist" | "data_hidelist" => {
                let Some(list) = self.descend_list(ctx, block, "LIST") else {
                    return Ok(None);
                };
                StmtKind::ShowList {
                    list,
                    show: block.opcode == "data_showlist",
                }
            }
            // ---- procedures ----
            "procedures_call" => match self.procedure_call(ctx, block) {
                Some((proc, args, recursive)) => StmtKind::ProcedureCall {
                    proc,
                    args,
                    recursive,
                },
                None => return Ok(None),
            },
            "procedures_return" => StmtKind::ProcedureReturn {
                value: self.descend_input(ctx, block, "VALUE"),
            },
            // ---- motion ----
            "motion_movesteps" => self.effect(ctx, block, EffectOp::MoveSteps, &[("STEPS", Slot::Num)]),
            "motion_turnright" => self.effect(ctx, block, EffectOp::TurnRight, &[("DEGREES", Slot::Num)]),
            "motion_turnleft" => self.effect(ctx, block, EffectOp::TurnLeft, &[("DEGREES", Slot::Num)]),
            "motion_goto" => self.effect(ctx, block, EffectOp::GotoTarget, &[("TO", Slot::Str)]),
            "motion_gotoxy" => self.effect(
                ctx,
                block,
                EffectOp::GotoXY,
                &[("X", Slot::Num), ("Y", Slot::Num)],
            ),
            "motion_glideto" => self.effect(
                ctx,
                block,
                EffectOp::GlideToTarget,
                &[("SECS", Slot::Num), ("TO", Slot::Str)],
            ),
            "motion_glidesecstoxy" => self.effect(
                ctx,
                block,
                EffectOp::GlideToXY,
                &[("SECS", Slot::Num), ("X", Slot::Num), ("Y", Slot::Num)],
            ),
            "motion_pointindirection" => self.effect(
                ctx,
                block,
                EffectOp::PointInDirection,
                &[("DIRECTION", Slot::Num)],
            ),
            "motion_pointtowards" => self.effect(
                ctx,
                block,
                EffectOp::PointTowards,
                &[("TOWARDS", Slot::Str)],
            ),
            "motion_changexby" => self.effect(ctx, block, EffectOp::ChangeX, &[("DX", Slot::Num)]),
            "motion_setx" => self.effect(ctx, block, EffectOp::SetX, &[("X", Slot::Num)]),
            "motion_changeyby" => self.effect(ctx, block, EffectOp::ChangeY, &[("DY", Slot::Num)]),
            "motion_sety" => self.effect(ctx, block, EffectOp::SetY, &[("Y", Slot::Num)]),
            "motion_ifonedgebounce" => self.effect(ctx, block, EffectOp::IfOnEdgeBounce, &[]),
            "motion_setrotationstyle" => {
                let style = RotationStyle::from_project_str(&Self::field_value(block, "STYLE"));
                self.effect(ctx, block, EffectOp::SetRotationStyle(style), &[])
            }
            // ---- looks ----
            "looks_say" => self.effect(ctx, block, EffectOp::Say, &[("MESSAGE", Slot::Raw)]),
            "looks_sayforsecs" => self.effect(
                ctx,
                block,
                EffectOp::SayForSecs,
                &[("MESSAGE", Slot::Raw), ("SECS", Slot::Num)],
            ),
            "looks_think" => self.effect(ctx, block, EffectOp::Think, &[("MESSAGE", Slot::Raw)]),
            "looks_thinkforsecs" => self.effect(
                ctx,
                block,
                EffectOp::ThinkForSecs,
                &[("MESSAGE", Slot::Raw), ("SECS", Slot::Num)],
            ),
            "looks_show" => self.effect(ctx, block, EffectOp::Show, &[]),
            "looks_hide" => self.effect(ctx, block, EffectOp::Hide, &[]),
            "looks_switchcostumeto" => {
                self.effect(ctx, block, EffectOp::SwitchCostume, &[("COSTUME", Slot::Raw)])
            }
            "looks_nextcostume" => self.effect(ctx, block, EffectOp::NextCostume, &[]),
            "looks_switchbackdropto" => {
                self.effect(ctx, block, EffectOp::SwitchBackdrop, &[("BACKDROP", Slot::Raw)])
            }
            "looks_switchbackdroptoandwait" => self.effect(
                ctx,
                block,
                EffectOp::SwitchBackdropAndWait,
                &[("BACKDROP", Slot::Raw)],
            ),
            "looks_nextbackdrop" => self.effect(ctx, block, EffectOp::NextBackdrop, &[]),
            "looks_changesizeby" => {
                self.effect(ctx, block, EffectOp::ChangeSize, &[("CHANGE", Slot::Num)])
            }
            "looks_setsizeto" => self.effect(ctx, block, EffectOp::SetSize, &[("SIZE", Slot::Num)]),
            "looks_changeeffectby" => {
                let effect = Self::field_value(block, "EFFECT").to_lowercase();
                self.effect(
                    ctx,
                    block,
                    EffectOp::ChangeEffect(effect),
                    &[("CHANGE", Slot::Num)],
                )
            }
            "looks_seteffectto" => {
                let effect = Self::field_value(block, "EFFECT").to_lowercase();
                self.effect(ctx, block, EffectOp::SetEffect(effect), &[("VALUE", Slot::Num)])
            }
            "looks_cleargraphiceffects" => self.effect(ctx, block, EffectOp::ClearEffects, &[]),
            "looks_gotofrontback" => {
                let op = if Self::field_value(block, "FRONT_BACK") == "back" {
                    EffectOp::GoToBack
                } else {
                    EffectOp::GoToFront
                };
                self.effect(ctx, block, op, &[])
            }
            "looks_goforwardbackwardlayers" => {
                let op = if Self::field_value(block, "FORWARD_BACKWARD") == "backward" {
                    EffectOp::GoBackwardLayers
                } else {
                    EffectOp::GoForwardLayers
                };
                self.effect(ctx, block, op, &[("NUM", Slot::Num)])
            }
            // ---- sound ----
            "sound_play" => self.effect(ctx, block, EffectOp::PlaySound, &[("SOUND_MENU", Slot::Str)]),
            "sound_playuntildone" => self.effect(
                ctx,
                block,
                EffectOp::PlaySoundUntilDone,
                &[("SOUND_MENU", Slot::Str)],
            ),
            "sound_stopallsounds" => self.effect(ctx, block, EffectOp::StopAllSounds, &[]),
            "sound_changevolumeby" => {
                self.effect(ctx, block, EffectOp::ChangeVolume, &[("VOLUME", Slot::Num)])
            }
            "sound_setvolumeto" => {
                self.effect(ctx, block, EffectOp::SetVolume, &[("VOLUME", Slot::Num)])
            }
            // ---- sensing ----
            "sensing_askandwait" => {
                self.effect(ctx, block, EffectOp::AskAndWait, &[("QUESTION", Slot::Raw)])
            }
            "sensing_resettimer" => self.effect(ctx, block, EffectOp::ResetTimer, &[]),
            "sensing_setdragmode" => {
                let draggable = Self::field_value(block, "DRAG_MODE") == "draggable";
                self.effect(ctx, block, EffectOp::SetDragMode(draggable), &[])
            }
            // ---- pen (extension, fully supported) ----
            "pen_clear" => self.effect(ctx, block, EffectOp::PenClear, &[]),
            "pen_stamp" => self.effect(ctx, block, EffectOp::PenStamp, &[]),
            "pen_penDown" => self.effect(ctx, block, EffectOp::PenDown, &[]),
            "pen_penUp" => self.effect(ctx, block, EffectOp::PenUp, &[]),
            "pen_setPenColorToColor" => {
                self.effect(ctx, block, EffectOp::SetPenColor, &[("COLOR", Slot::Color)])
            }
            "pen_changePenSizeBy" => {
                self.effect(ctx, block, EffectOp::ChangePenSize, &[("SIZE", Slot::Num)])
            }
            "pen_setPenSizeTo" => {
                self.effect(ctx, block, EffectOp::SetPenSize, &[("SIZE", Slot::Num)])
            }
            "pen_changePenColorParamBy" => {
                let param = self.pen_param(ctx, block);
                self.effect(
                    ctx,
                    block,
                    EffectOp::ChangePenParam(param),
                    &[("VALUE", Slot::Num)],
                )
            }
            "pen_setPenColorParamTo" => {
                let param = self.pen_param(ctx, block);
                self.effect(
                    ctx,
                    block,
                    EffectOp::SetPenParam(param),
                    &[("VALUE", Slot::Num)],
                )
            }
            opcode => {
                if is_core_family(opcode) {
                    return Err(CompileError::UnknownOpcode {
                        opcode: opcode.to_string(),
                    });
                }
                warn!(opcode, block = id, "extension block not supported, skipping");
                return Ok(None);
            }
        };
        Ok(Some(kind))
    }

    fn pen_param(&mut self, ctx: &Ctx, block: &RawBlock) -> String {
        match self
            .descend_input(ctx, block, "COLOR_PARAM")
            .to_type(CastKind::String)
        {
            Expr::Constant { value, .. } => cast::to_string(&value),
            _ => "color".to_string(),
        }
    }

    fn effect(
        &mut self,
        ctx: &Ctx,
        block: &RawBlock,
        op: EffectOp,
        slots: &[(&str, Slot)],
    ) -> StmtKind {
        let mut args = Vec::with_capacity(slots.len());
        for (name, slot) in slots {
            let expr = self.descend_input(ctx, block, name);
            args.push(match slot {
                Slot::Num => expr.to_type(CastKind::Number),
                Slot::Str => expr.to_type(CastKind::String),
                Slot::Color => expr.to_type(CastKind::Color),
                Slot::Raw => expr,
            });
        }
        StmtKind::Effect { op, args }
    }
}

/// What cast an effect argument slot requires.
#[derive(Clone, Copy)]
enum Slot {
    Num,
    Str,
    Color,
    Raw,
}

/// Scratch's `round`: half-up, including for negative values
/// (-2.5 rounds to -2).
pub fn round_half_up(n: f64) -> f64 {
    if n.is_nan() {
        return 0.0;
    }
    (n + 0.5).floor()
}

fn always_int_like(e: &Expr) -> bool {
    match e {
        Expr::Constant { value, .. } => value.is_int_like(),
        _ => e.ty().is_always(ValueType::NUMBER_INT),
    }
}

/// Evaluate a binary operator on concrete values. Shared by constant
/// folding and the interpreter so the folded and unfolded forms cannot
/// diverge.
pub fn eval_binary(op: BinaryOp, a: &Value, b: &Value) -> Value {
    use std::cmp::Ordering;
    match op {
        BinaryOp::Add => Value::Number(cast::to_number(a) + cast::to_number(b)),
        BinaryOp::Subtract => Value::Number(cast::to_number(a) - cast::to_number(b)),
        BinaryOp::Multiply => Value::Number(cast::to_number(a) * cast::to_number(b)),
        BinaryOp::Divide => Value::Number(cast::to_number(a) / cast::to_number(b)),
        BinaryOp::Mod => Value::Number(cast::modulo(cast::to_number(a), cast::to_number(b))),
        BinaryOp::Less => Value::Bool(cast::compare(a, b) == Ordering::Less),
        BinaryOp::Greater => Value::Bool(cast::compare(a, b) == Ordering::Greater),
        BinaryOp::Equals => Value::Bool(cast::compare(a, b) == Ordering::Equal),
        BinaryOp::And => Value::Bool(cast::to_boolean(a) && cast::to_boolean(b)),
        BinaryOp::Or => Value::Bool(cast::to_boolean(a) || cast::to_boolean(b)),
    }
}

impl MathFunction {
    /// Evaluate on an already-coerced number. Trigonometry is in
    /// degrees, with the small rounding Scratch applies to cancel
    /// floating-point noise, and tan hits exact ±∞ at odd multiples
    /// of 90°.
    pub fn apply(self, x: f64) -> f64 {
        fn tenth_decimal(v: f64) -> f64 {
            (v * 1e10).round() / 1e10
        }
        match self {
            MathFunction::Abs => x.abs(),
            MathFunction::Floor => x.floor(),
            MathFunction::Ceiling => x.ceil(),
            MathFunction::Sqrt => x.sqrt(),
            MathFunction::Sin => tenth_decimal(x.to_radians().sin()),
            MathFunction::Cos => tenth_decimal(x.to_radians().cos()),
            MathFunction::Tan => {
                let angle = x % 360.0;
                if angle == -270.0 || angle == 90.0 {
                    f64::INFINITY
                } else if angle == 270.0 || angle == -90.0 {
                    f64::NEG_INFINITY
                } else {
                    tenth_decimal(angle.to_radians().tan())
                }
            }
            MathFunction::Asin => x.asin().to_degrees(),
            MathFunction::Acos => x.acos().to_degrees(),
            MathFunction::Atan => x.atan().to_degrees(),
            MathFunction::Ln => x.ln(),
            MathFunction::Log => x.log10(),
            MathFunction::Exp => x.exp(),
            MathFunction::Pow10 => 10f64.powf(x),
        }
    }
}

/// Build a binary node, folding constants per the generation-time
/// rules: arithmetic folds whenever both sides are (non-color)
/// constants, comparisons only over numeric literals, and logic
/// short-circuits.
pub fn build_binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let lc = matches!(&left, Expr::Constant { ty, .. } if !ty.is_sometimes(ValueType::COLOR));
    let rc = matches!(&right, Expr::Constant { ty, .. } if !ty.is_sometimes(ValueType::COLOR));

    if op.is_arithmetic() && lc && rc {
        if let (Expr::Constant { value: a, .. }, Expr::Constant { value: b, .. }) = (&left, &right)
        {
            let v = eval_binary(op, a, b);
            let ty = classify_value(&v);
            return Expr::Constant { value: v, ty };
        }
    }

    if op.is_comparison() && lc && rc {
        if let (
            Expr::Constant {
                value: a @ Value::Number(_),
                ..
            },
            Expr::Constant {
                value: b @ Value::Number(_),
                ..
            },
        ) = (&left, &right)
        {
            // numeric literals only: string comparison rules must run
            // at execution time
            let v = eval_binary(op, a, b);
            return Expr::Constant {
                value: v,
                ty: ValueType::BOOLEAN,
            };
        }
    }

    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let as_bool = |e: &Expr| -> Option<bool> {
            match e {
                Expr::Constant {
                    value: Value::Bool(b),
                    ..
                } => Some(*b),
                _ => None,
            }
        };
        match (op, as_bool(&left), as_bool(&right)) {
            (BinaryOp::And, Some(false), _) | (BinaryOp::And, _, Some(false)) => {
                return Expr::constant(false)
            }
            (BinaryOp::Or, Some(true), _) | (BinaryOp::Or, _, Some(true)) => {
                return Expr::constant(true)
            }
            (BinaryOp::And, Some(true), _) | (BinaryOp::Or, Some(false), _) => return right,
            (BinaryOp::And, _, Some(true)) | (BinaryOp::Or, _, Some(false)) => return left,
            _ => {}
        }
    }

    let ty = match op {
        _ if op.is_arithmetic() => ValueType::NUMBER_OR_NAN,
        _ => ValueType::BOOLEAN,
    };
    Expr::Binary {
        op,
        ty,
        left: Box::new(left),
        right: Box::new(right),
    }
}
