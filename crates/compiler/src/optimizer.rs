//! IR optimizer
//!
//! Two jobs only, per the compilation contract:
//!
//! 1. remove redundant cast nodes — `CAST_T(x)` collapses to `x` when
//!    `x`'s type proves the cast is the identity;
//! 2. tighten expression types with operation-specific inference, so
//!    that rule 1 fires more often downstream.
//!
//! Folding happened at generation time; nothing here changes values,
//! only types and cast structure. Every table is a sound
//! over-approximation: a node's inferred type is a superset of what it
//! can produce at runtime, and unknown opcodes keep their declared
//! type (never widening to ANY).
//!
//! A lightweight per-variable state specializes reads whose dominating
//! writes share a type; any yield point, procedure call or control
//! join conservatively clears or merges it.

use crate::ir::{
    negate_sign, BinaryOp, Expr, IrProject, Stmt, StmtKind, ValueType, VarSlot,
};
use std::collections::HashMap;

type VarState = HashMap<VarSlot, ValueType>;

/// Optimize the whole project in place.
pub fn optimize(ir: &mut IrProject) {
    for proc in &mut ir.procedures {
        let mut state = VarState::new();
        optimize_substack(&mut proc.body, &mut state);
    }
    for script in &mut ir.scripts {
        let mut state = VarState::new();
        optimize_substack(&mut script.body, &mut state);
    }
}

/// Keep only facts both branches agree on.
fn merge(a: &VarState, b: &VarState) -> VarState {
    let mut out = VarState::new();
    for (slot, ty_a) in a {
        if let Some(ty_b) = b.get(slot) {
            out.insert(*slot, ty_a.union(*ty_b));
        }
    }
    out
}

fn optimize_substack(stmts: &mut [Stmt], state: &mut VarState) {
    for stmt in stmts.iter_mut() {
        optimize_stmt(stmt, state);
    }
}

fn optimize_stmt(stmt: &mut Stmt, state: &mut VarState) {
    match &mut stmt.kind {
        StmtKind::SetVariable { var, value } => {
            optimize_expr(value, state);
            state.insert(*var, value.ty());
        }
        StmtKind::If { condition, body } => {
            optimize_expr(condition, state);
            let mut branch = state.clone();
            optimize_substack(body, &mut branch);
            *state = merge(state, &branch);
        }
        StmtKind::IfElse {
            condition,
            body,
            else_body,
        } => {
            optimize_expr(condition, state);
            let mut then_state = state.clone();
            let mut else_state = state.clone();
            optimize_substack(body, &mut then_state);
            optimize_substack(else_body, &mut else_state);
            *state = merge(&then_state, &else_state);
        }
        StmtKind::Repeat { times, body } => {
            // the count is evaluated once, before the first iteration
            optimize_expr(times, state);
            state.clear();
            optimize_substack(body, state);
            state.clear();
        }
        StmtKind::While { condition, body } => {
            state.clear();
            optimize_expr(condition, state);
            optimize_substack(body, state);
            state.clear();
        }
        StmtKind::Forever { body } => {
            state.clear();
            optimize_substack(body, state);
            state.clear();
        }
        StmtKind::ForEach { count, body, .. } => {
            optimize_expr(count, state);
            state.clear();
            optimize_substack(body, state);
            state.clear();
        }
        StmtKind::Warp { body } => {
            // not a loop: straight-line state flows through
            optimize_substack(body, state);
        }
        StmtKind::Wait { seconds } => {
            optimize_expr(seconds, state);
            // yield point: other threads may write shared variables
            state.clear();
        }
        StmtKind::WaitUntil { condition } => {
            state.clear();
            optimize_expr(condition, state);
        }
        StmtKind::Broadcast { name, wait } => {
            optimize_expr(name, state);
            if *wait {
                state.clear();
            }
        }
        StmtKind::ProcedureCall { args, .. } => {
            for a in args {
                optimize_expr(a, state);
            }
            state.clear();
        }
        StmtKind::ProcedureReturn { value } => optimize_expr(value, state),
        StmtKind::CreateClone { target } => optimize_expr(target, state),
        StmtKind::ListAdd { item, .. } => optimize_expr(item, state),
        StmtKind::ListDelete { index, .. } => optimize_expr(index, state),
        StmtKind::ListInsert { index, item, .. } => {
            optimize_expr(index, state);
            optimize_expr(item, state);
        }
        StmtKind::ListReplace { index, item, .. } => {
            optimize_expr(index, state);
            optimize_expr(item, state);
        }
        StmtKind::Effect { op, args } => {
            for a in args {
                optimize_expr(a, state);
            }
            if op.is_resumable() {
                state.clear();
            }
        }
        StmtKind::Stop { .. }
        | StmtKind::DeleteThisClone
        | StmtKind::ListDeleteAll { .. }
        | StmtKind::ShowVariable { .. }
        | StmtKind::ShowList { .. } => {}
    }
}

fn optimize_expr(e: &mut Expr, state: &VarState) {
    match e {
        Expr::Cast { cast, value } => {
            optimize_expr(value, state);
            if value.ty().is_always(cast.identity_mask()) {
                *e = (**value).clone();
            }
        }
        Expr::Binary {
            op,
            ty,
            left,
            right,
        } => {
            optimize_expr(left, state);
            optimize_expr(right, state);
            *ty = infer_binary(*op, left.ty(), right.ty());
        }
        Expr::VariableGet { var, ty } => {
            *ty = state.get(var).copied().unwrap_or(ValueType::ANY);
        }
        Expr::Random { ty, from, to } => {
            optimize_expr(from, state);
            optimize_expr(to, state);
            if from.ty().is_always(ValueType::NUMBER_INT)
                && to.ty().is_always(ValueType::NUMBER_INT)
            {
                *ty = ValueType::NUMBER_INT;
            }
        }
        Expr::Not { value } => optimize_expr(value, state),
        Expr::MathOp { value, .. } | Expr::Round { value } | Expr::StringLength { value } => {
            optimize_expr(value, state)
        }
        Expr::Join { left, right } => {
            optimize_expr(left, state);
            optimize_expr(right, state);
        }
        Expr::LetterOf { index, string } => {
            optimize_expr(index, state);
            optimize_expr(string, state);
        }
        Expr::StringContains { haystack, needle } => {
            optimize_expr(haystack, state);
            optimize_expr(needle, state);
        }
        Expr::ListItem { index, .. } => optimize_expr(index, state),
        Expr::ListContains { value, .. } | Expr::ListIndexOf { value, .. } => {
            optimize_expr(value, state)
        }
        Expr::ProcedureCall { args, .. } | Expr::Query { args, .. } => {
            for a in args {
                optimize_expr(a, state);
            }
        }
        Expr::Constant { .. }
        | Expr::Argument { .. }
        | Expr::ListLength { .. }
        | Expr::ListContents { .. } => {}
    }
}

/// Operand type as the arithmetic actually sees it: NaN coerces to 0,
/// and anything non-numeric (behind an unremoved cast this cannot
/// happen, but stay sound) widens to all numbers.
fn effective_number(t: ValueType) -> ValueType {
    if t.is_sometimes(ValueType::STRING | ValueType::BOOLEAN | ValueType::COLOR) {
        return ValueType::NUMBER;
    }
    let mut out = t & ValueType::NUMBER;
    if t.is_sometimes(ValueType::NUMBER_NAN) {
        out |= ValueType::NUMBER_ZERO;
    }
    out
}

fn infer_binary(op: BinaryOp, l: ValueType, r: ValueType) -> ValueType {
    match op {
        BinaryOp::Add => get_add_type(l, r),
        BinaryOp::Subtract => get_subtract_type(l, r),
        BinaryOp::Multiply => get_multiply_type(l, r),
        BinaryOp::Divide => get_divide_type(l, r),
        BinaryOp::Mod => get_mod_type(l, r),
        _ => ValueType::BOOLEAN,
    }
}

pub fn get_add_type(l: ValueType, r: ValueType) -> ValueType {
    let l = effective_number(l);
    let r = effective_number(r);
    if l.is_empty() || r.is_empty() {
        return ValueType::NUMBER_OR_NAN;
    }
    let mut t = ValueType::NONE;
    let (lp, ln) = (
        l.is_sometimes(ValueType::NUMBER_POS),
        l.is_sometimes(ValueType::NUMBER_NEG),
    );
    let (rp, rn) = (
        r.is_sometimes(ValueType::NUMBER_POS),
        r.is_sometimes(ValueType::NUMBER_NEG),
    );
    let (lz, lnz) = (
        l.is_sometimes(ValueType::NUMBER_ZERO),
        l.is_sometimes(ValueType::NUMBER_NEG_ZERO),
    );
    let (rz, rnz) = (
        r.is_sometimes(ValueType::NUMBER_ZERO),
        r.is_sometimes(ValueType::NUMBER_NEG_ZERO),
    );

    if lp && rp {
        t |= ValueType::NUMBER_POS_INT | ValueType::NUMBER_POS_FRACT;
        if l.is_sometimes(ValueType::NUMBER_POS_INF) || r.is_sometimes(ValueType::NUMBER_POS_INF) {
            t |= ValueType::NUMBER_POS_INF;
        }
    }
    if ln && rn {
        t |= ValueType::NUMBER_NEG_INT | ValueType::NUMBER_NEG_FRACT;
        if l.is_sometimes(ValueType::NUMBER_NEG_INF) || r.is_sometimes(ValueType::NUMBER_NEG_INF) {
            t |= ValueType::NUMBER_NEG_INF;
        }
    }
    if (lp && rn) || (ln && rp) {
        t |= ValueType::NUMBER_POS | ValueType::NUMBER_NEG | ValueType::NUMBER_ZERO;
    }
    // opposite infinities meet in NaN
    if (l.is_sometimes(ValueType::NUMBER_POS_INF) && r.is_sometimes(ValueType::NUMBER_NEG_INF))
        || (l.is_sometimes(ValueType::NUMBER_NEG_INF) && r.is_sometimes(ValueType::NUMBER_POS_INF))
    {
        t |= ValueType::NUMBER_NAN;
    }
    // zero identities: 0 + x = x (except 0 + -0 = 0), -0 + -0 = -0
    if lz {
        t |= r & !ValueType::NUMBER_NEG_ZERO;
        if rnz {
            t |= ValueType::NUMBER_ZERO;
        }
    }
    if rz {
        t |= l & !ValueType::NUMBER_NEG_ZERO;
        if lnz {
            t |= ValueType::NUMBER_ZERO;
        }
    }
    if lnz && rnz {
        t |= ValueType::NUMBER_NEG_ZERO;
    }
    if lnz {
        t |= r & !ValueType::NUMBER_ANY_ZERO;
    }
    if rnz {
        t |= l & !ValueType::NUMBER_ANY_ZERO;
    }
    // ints stay ints when no side can carry a fraction
    if !l.is_sometimes(ValueType::NUMBER_FRACT) && !r.is_sometimes(ValueType::NUMBER_FRACT) {
        t = t & !ValueType::NUMBER_FRACT;
    }
    if t.is_empty() {
        ValueType::NUMBER
    } else {
        t
    }
}

pub fn get_subtract_type(l: ValueType, r: ValueType) -> ValueType {
    get_add_type(l, negate_sign(effective_number(r)))
}

pub fn get_multiply_type(l: ValueType, r: ValueType) -> ValueType {
    let l = effective_number(l);
    let r = effective_number(r);
    if l.is_empty() || r.is_empty() {
        return ValueType::NUMBER_OR_NAN;
    }
    let mut t = ValueType::NONE;
    let (lp, ln) = (
        l.is_sometimes(ValueType::NUMBER_POS),
        l.is_sometimes(ValueType::NUMBER_NEG),
    );
    let (rp, rn) = (
        r.is_sometimes(ValueType::NUMBER_POS),
        r.is_sometimes(ValueType::NUMBER_NEG),
    );
    let l_zero = l.is_sometimes(ValueType::NUMBER_ANY_ZERO);
    let r_zero = r.is_sometimes(ValueType::NUMBER_ANY_ZERO);
    let l_inf = l.is_sometimes(ValueType::NUMBER_INF);
    let r_inf = r.is_sometimes(ValueType::NUMBER_INF);

    if (lp && rp) || (ln && rn) {
        t |= ValueType::NUMBER_POS_INT | ValueType::NUMBER_POS_FRACT;
        if l_inf || r_inf {
            t |= ValueType::NUMBER_POS_INF;
        }
    }
    if (lp && rn) || (ln && rp) {
        t |= ValueType::NUMBER_NEG_INT | ValueType::NUMBER_NEG_FRACT;
        if l_inf || r_inf {
            t |= ValueType::NUMBER_NEG_INF;
        }
    }
    if l_zero || r_zero {
        t |= ValueType::NUMBER_ANY_ZERO;
    }
    // 0 × ∞, in either order
    if (l_zero && r_inf) || (r_zero && l_inf) {
        t |= ValueType::NUMBER_NAN;
    }
    if !l.is_sometimes(ValueType::NUMBER_FRACT) && !r.is_sometimes(ValueType::NUMBER_FRACT) {
        t = t & !ValueType::NUMBER_FRACT;
    }
    if t.is_empty() {
        ValueType::NUMBER
    } else {
        t
    }
}

pub fn get_divide_type(l: ValueType, r: ValueType) -> ValueType {
    let l = effective_number(l);
    let r = effective_number(r);
    if l.is_empty() || r.is_empty() {
        return ValueType::NUMBER_OR_NAN;
    }
    let mut t = ValueType::NUMBER_INT
        | ValueType::NUMBER_FRACT
        | ValueType::NUMBER_ANY_ZERO
        | ValueType::NUMBER_NEG_INT
        | ValueType::NUMBER_NEG_FRACT;
    let l_zero = l.is_sometimes(ValueType::NUMBER_ANY_ZERO);
    let r_zero = r.is_sometimes(ValueType::NUMBER_ANY_ZERO);
    let l_inf = l.is_sometimes(ValueType::NUMBER_INF);
    let r_inf = r.is_sometimes(ValueType::NUMBER_INF);
    if (l_zero && r_zero) || (l_inf && r_inf) {
        t |= ValueType::NUMBER_NAN;
    }
    if r_zero && l.is_sometimes(!ValueType::NUMBER_ANY_ZERO) {
        t |= ValueType::NUMBER_INF;
    }
    t
}

pub fn get_mod_type(l: ValueType, r: ValueType) -> ValueType {
    let l = effective_number(l);
    let r = effective_number(r);
    if l.is_empty() || r.is_empty() {
        return ValueType::NUMBER_OR_NAN;
    }
    let mut t = ValueType::NUMBER_ANY_ZERO;
    if r.is_sometimes(ValueType::NUMBER_POS) {
        t |= ValueType::NUMBER_POS_INT | ValueType::NUMBER_POS_FRACT;
    }
    if r.is_sometimes(ValueType::NUMBER_NEG) {
        t |= ValueType::NUMBER_NEG_INT | ValueType::NUMBER_NEG_FRACT;
    }
    // zero divisor or an infinite dividend produce NaN
    if r.is_sometimes(ValueType::NUMBER_ANY_ZERO) || l.is_sometimes(ValueType::NUMBER_INF) {
        t |= ValueType::NUMBER_NAN;
    }
    if !l.is_sometimes(ValueType::NUMBER_FRACT) && !r.is_sometimes(ValueType::NUMBER_FRACT) {
        t = t & !ValueType::NUMBER_FRACT;
    }
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CastKind, VarScope};

    fn slot() -> VarSlot {
        VarSlot {
            scope: VarScope::Stage,
            index: 0,
            cloud: false,
        }
    }

    fn var_read() -> Expr {
        Expr::VariableGet {
            var: slot(),
            ty: ValueType::ANY,
        }
    }

    #[test]
    fn test_add_type_pos_pos() {
        let t = get_add_type(ValueType::NUMBER_POS_INT, ValueType::NUMBER_POS_INT);
        assert!(t.is_always(ValueType::NUMBER_POS_INT));
    }

    #[test]
    fn test_add_type_mixed_signs_include_zero() {
        let t = get_add_type(ValueType::NUMBER_POS_INT, ValueType::NUMBER_NEG_INT);
        assert!(t.is_sometimes(ValueType::NUMBER_ZERO));
        assert!(t.is_sometimes(ValueType::NUMBER_POS));
        assert!(t.is_sometimes(ValueType::NUMBER_NEG));
        assert!(!t.is_sometimes(ValueType::NUMBER_NAN));
    }

    #[test]
    fn test_add_type_opposite_infinities_nan() {
        let t = get_add_type(ValueType::NUMBER_POS_INF, ValueType::NUMBER_NEG_INF);
        assert!(t.is_sometimes(ValueType::NUMBER_NAN));
    }

    #[test]
    fn test_add_type_zero_identity() {
        let t = get_add_type(ValueType::NUMBER_ZERO, ValueType::NUMBER_POS_FRACT);
        assert_eq!(t, ValueType::NUMBER_POS_FRACT);
        let t = get_add_type(ValueType::NUMBER_NEG_ZERO, ValueType::NUMBER_NEG_ZERO);
        assert_eq!(t, ValueType::NUMBER_NEG_ZERO);
        let t = get_add_type(ValueType::NUMBER_NEG_ZERO, ValueType::NUMBER_ZERO);
        assert_eq!(t, ValueType::NUMBER_ZERO);
    }

    #[test]
    fn test_subtract_same_sign_infinities_nan() {
        let t = get_subtract_type(ValueType::NUMBER_POS_INF, ValueType::NUMBER_POS_INF);
        assert!(t.is_sometimes(ValueType::NUMBER_NAN));
    }

    #[test]
    fn test_multiply_int_int_is_int() {
        let t = get_multiply_type(ValueType::NUMBER_POS_INT, ValueType::NUMBER_NEG_INT);
        assert!(!t.is_sometimes(ValueType::NUMBER_FRACT));
        assert!(t.is_sometimes(ValueType::NUMBER_NEG_INT));
    }

    #[test]
    fn test_multiply_zero_times_inf_nan() {
        let t = get_multiply_type(ValueType::NUMBER_ZERO, ValueType::NUMBER_POS_INF);
        assert!(t.is_sometimes(ValueType::NUMBER_NAN));
        let t = get_multiply_type(ValueType::NUMBER_POS_INT, ValueType::NUMBER_POS_INT);
        assert!(!t.is_sometimes(ValueType::NUMBER_NAN));
    }

    #[test]
    fn test_divide_by_zero_types() {
        let t = get_divide_type(ValueType::NUMBER_POS_INT, ValueType::NUMBER_ZERO);
        assert!(t.is_sometimes(ValueType::NUMBER_INF));
        let t = get_divide_type(ValueType::NUMBER_ZERO, ValueType::NUMBER_ZERO);
        assert!(t.is_sometimes(ValueType::NUMBER_NAN));
    }

    #[test]
    fn test_mod_follows_divisor_sign() {
        let t = get_mod_type(ValueType::NUMBER_POS_INT, ValueType::NUMBER_NEG_INT);
        assert!(t.is_sometimes(ValueType::NUMBER_NEG_INT));
        assert!(!t.is_sometimes(ValueType::NUMBER_POS_INT));
        assert!(!t.is_sometimes(ValueType::NUMBER_NAN));
        let t = get_mod_type(ValueType::NUMBER_POS_INT, ValueType::NUMBER_ZERO);
        assert!(t.is_sometimes(ValueType::NUMBER_NAN));
    }

    #[test]
    fn test_redundant_cast_removed() {
        // round's output is always an int or ±∞, so a number cast on it
        // is the identity
        let inner = Expr::Round {
            value: Box::new(var_read().to_type(CastKind::Number)),
        };
        let mut e = Expr::Cast {
            cast: CastKind::Number,
            value: Box::new(inner.clone()),
        };
        optimize_expr(&mut e, &VarState::new());
        assert_eq!(e, inner);
    }

    #[test]
    fn test_necessary_cast_kept() {
        let mut e = var_read().to_type(CastKind::Number);
        optimize_expr(&mut e, &VarState::new());
        assert!(matches!(e, Expr::Cast { .. }));
    }

    #[test]
    fn test_variable_specialization_through_set() {
        // set v to 5; then a read of v followed by a number cast loses
        // the cast
        let mut stmts = vec![
            Stmt::new(StmtKind::SetVariable {
                var: slot(),
                value: Expr::constant(5.0),
            }),
            Stmt::new(StmtKind::SetVariable {
                var: slot(),
                value: var_read().to_type(CastKind::Number),
            }),
        ];
        let mut state = VarState::new();
        optimize_substack(&mut stmts, &mut state);
        match &stmts[1].kind {
            StmtKind::SetVariable { value, .. } => {
                assert!(
                    matches!(value, Expr::VariableGet { .. }),
                    "cast should be removed after specialization, got {:?}",
                    value
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_branch_merge_unions_types() {
        let mut stmts = vec![
            Stmt::new(StmtKind::SetVariable {
                var: slot(),
                value: Expr::constant(1.0),
            }),
            Stmt::new(StmtKind::IfElse {
                condition: Expr::constant(true),
                body: vec![Stmt::new(StmtKind::SetVariable {
                    var: slot(),
                    value: Expr::constant(0.5),
                })],
                else_body: vec![],
            }),
        ];
        let mut state = VarState::new();
        optimize_substack(&mut stmts, &mut state);
        let ty = state[&slot()];
        assert!(ty.is_sometimes(ValueType::NUMBER_POS_INT));
        assert!(ty.is_sometimes(ValueType::NUMBER_POS_FRACT));
        assert!(ty.is_always(ValueType::NUMBER));
    }

    #[test]
    fn test_loop_clears_state() {
        let mut stmts = vec![
            Stmt::new(StmtKind::SetVariable {
                var: slot(),
                value: Expr::constant(1.0),
            }),
            Stmt::new(StmtKind::Forever {
                body: vec![Stmt::new(StmtKind::SetVariable {
                    var: slot(),
                    value: var_read().to_type(CastKind::Number),
                })],
            }),
        ];
        let mut state = VarState::new();
        optimize_substack(&mut stmts, &mut state);
        match &stmts[1].kind {
            StmtKind::Forever { body } => match &body[0].kind {
                StmtKind::SetVariable { value, .. } => {
                    assert!(
                        matches!(value, Expr::Cast { .. }),
                        "loop body read must stay ANY and keep its cast"
                    );
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_binary_retype_enables_parent_cast_removal() {
        // (x + 1) with x set to a positive int: the add tightens to a
        // number, so an outer number cast disappears
        let mut stmts = vec![
            Stmt::new(StmtKind::SetVariable {
                var: slot(),
                value: Expr::constant(3.0),
            }),
            Stmt::new(StmtKind::SetVariable {
                var: slot(),
                value: Expr::Cast {
                    cast: CastKind::Number,
                    value: Box::new(Expr::Binary {
                        op: BinaryOp::Add,
                        ty: ValueType::NUMBER_OR_NAN,
                        left: Box::new(var_read().to_type(CastKind::Number)),
                        right: Box::new(Expr::constant(1.0)),
                    }),
                },
            }),
        ];
        let mut state = VarState::new();
        optimize_substack(&mut stmts, &mut state);
        match &stmts[1].kind {
            StmtKind::SetVariable { value, .. } => {
                assert!(matches!(value, Expr::Binary { .. }));
                assert!(value.ty().is_always(ValueType::NUMBER));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
