//! Intermediate representation
//!
//! Scripts lower into two kinds of nodes: statements ([`Stmt`], the
//! "stack blocks") and expressions ([`Expr`], the "input reporters").
//! Every expression knows its [`ValueType`]; casts are explicit nodes
//! inserted on demand by [`Expr::to_type`] and removed again by the
//! optimizer when the child's type proves them redundant.
//!
//! Opcodes are closed enums grouped by family — the string opcode from
//! the project file is decoded exactly once, in the IR generator.

pub mod value_type;

pub use value_type::{classify_number, classify_value, negate_sign, ValueType};

use sb3_core::cast;
use sb3_core::Value;

/// Where a resolved variable or list lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarScope {
    /// A stage (global) slot
    Stage,
    /// A slot on the executing sprite (resolved through the clone's
    /// originator at runtime)
    Sprite,
}

/// A compile-time resolved scalar variable reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarSlot {
    pub scope: VarScope,
    pub index: usize,
    /// Writes to cloud variables also notify the storage collaborator
    pub cloud: bool,
}

/// A compile-time resolved list reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListSlot {
    pub scope: VarScope,
    pub index: usize,
}

/// Coercion a cast node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Number,
    NumberOrNan,
    Boolean,
    String,
    Color,
    /// Number coerced and floored, for letter/index positions
    Index,
}

impl CastKind {
    /// The type mask under which this cast is the identity.
    pub fn identity_mask(self) -> ValueType {
        match self {
            CastKind::Number => ValueType::NUMBER,
            CastKind::NumberOrNan => ValueType::NUMBER_OR_NAN,
            CastKind::Boolean => ValueType::BOOLEAN,
            CastKind::String => ValueType::STRING,
            CastKind::Color => ValueType::COLOR,
            CastKind::Index => ValueType::NUMBER_INT | ValueType::NUMBER_INF,
        }
    }

    /// The type this cast's output is declared as.
    pub fn output_type(self) -> ValueType {
        match self {
            CastKind::Number => ValueType::NUMBER,
            CastKind::NumberOrNan => ValueType::NUMBER_OR_NAN,
            CastKind::Boolean => ValueType::BOOLEAN,
            CastKind::String => ValueType::STRING,
            CastKind::Color => ValueType::COLOR,
            CastKind::Index => ValueType::NUMBER_INT | ValueType::NUMBER_INF,
        }
    }
}

/// Binary operator reporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Less,
    Greater,
    Equals,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Mod
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, BinaryOp::Less | BinaryOp::Greater | BinaryOp::Equals)
    }
}

/// The `operator_mathop` function menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFunction {
    Abs,
    Floor,
    Ceiling,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Ln,
    Log,
    /// e^
    Exp,
    /// 10^
    Pow10,
}

impl MathFunction {
    pub fn from_menu(s: &str) -> Option<MathFunction> {
        Some(match s {
            "abs" => MathFunction::Abs,
            "floor" => MathFunction::Floor,
            "ceiling" => MathFunction::Ceiling,
            "sqrt" => MathFunction::Sqrt,
            "sin" => MathFunction::Sin,
            "cos" => MathFunction::Cos,
            "tan" => MathFunction::Tan,
            "asin" => MathFunction::Asin,
            "acos" => MathFunction::Acos,
            "atan" => MathFunction::Atan,
            "ln" => MathFunction::Ln,
            "log" => MathFunction::Log,
            "e ^" => MathFunction::Exp,
            "10 ^" => MathFunction::Pow10,
            _ => return None,
        })
    }

    /// Static output type. All functions take an already-cast number.
    pub fn output_type(self) -> ValueType {
        match self {
            MathFunction::Abs => {
                ValueType::NUMBER_POS | ValueType::NUMBER_ANY_ZERO | ValueType::NUMBER_POS_FRACT
            }
            MathFunction::Floor | MathFunction::Ceiling => {
                ValueType::NUMBER_INT | ValueType::NUMBER_INF
            }
            MathFunction::Sqrt => {
                ValueType::NUMBER_POS
                    | ValueType::NUMBER_ANY_ZERO
                    | ValueType::NUMBER_NAN
            }
            MathFunction::Sin | MathFunction::Cos | MathFunction::Atan => {
                ValueType::NUMBER | ValueType::NUMBER_NAN
            }
            MathFunction::Tan => ValueType::NUMBER_OR_NAN,
            MathFunction::Asin | MathFunction::Acos => ValueType::NUMBER_OR_NAN,
            MathFunction::Ln | MathFunction::Log => ValueType::NUMBER_OR_NAN,
            MathFunction::Exp | MathFunction::Pow10 => {
                ValueType::NUMBER_POS | ValueType::NUMBER_ANY_ZERO
            }
        }
    }
}

/// Calendar unit for `sensing_current`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateUnit {
    Year,
    Month,
    Date,
    DayOfWeek,
    Hour,
    Minute,
    Second,
}

impl DateUnit {
    pub fn from_menu(s: &str) -> Option<DateUnit> {
        Some(match s.to_ascii_lowercase().as_str() {
            "year" => DateUnit::Year,
            "month" => DateUnit::Month,
            "date" => DateUnit::Date,
            "dayofweek" => DateUnit::DayOfWeek,
            "hour" => DateUnit::Hour,
            "minute" => DateUnit::Minute,
            "second" => DateUnit::Second,
            _ => return None,
        })
    }
}

/// Pure runtime reads. These never suspend; they read target or
/// runtime state and push a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    // motion / looks / sound state
    XPosition,
    YPosition,
    Direction,
    Size,
    CostumeNumber,
    CostumeName,
    BackdropNumber,
    BackdropName,
    Volume,
    // sensing
    Timer,
    Loudness,
    Answer,
    Username,
    MouseX,
    MouseY,
    MouseDown,
    DaysSince2000,
    Current(DateUnit),
    /// One arg: key name
    KeyPressed,
    /// One arg: target name / "_mouse_" / "_edge_"
    TouchingObject,
    /// One arg: target name / "_mouse_"
    DistanceTo,
}

impl QueryOp {
    pub fn output_type(self) -> ValueType {
        match self {
            QueryOp::CostumeName | QueryOp::BackdropName | QueryOp::Answer | QueryOp::Username => {
                ValueType::STRING
            }
            QueryOp::MouseDown | QueryOp::KeyPressed | QueryOp::TouchingObject => {
                ValueType::BOOLEAN
            }
            _ => ValueType::NUMBER,
        }
    }
}

/// Side-effecting block helpers. The code generator emits these as
/// single instructions; the runtime dispatches them to the block
/// helper modules. Some are resumable (timed effects) — the
/// interpreter re-enters them until they report completion.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectOp {
    // motion
    MoveSteps,
    GotoXY,
    /// Arg: "_mouse_" / "_random_" / sprite name
    GotoTarget,
    GlideToXY,
    GlideToTarget,
    ChangeX,
    SetX,
    ChangeY,
    SetY,
    TurnRight,
    TurnLeft,
    PointInDirection,
    PointTowards,
    IfOnEdgeBounce,
    SetRotationStyle(sb3_core::RotationStyle),
    // looks
    Say,
    SayForSecs,
    Think,
    ThinkForSecs,
    Show,
    Hide,
    SwitchCostume,
    NextCostume,
    SwitchBackdrop,
    SwitchBackdropAndWait,
    NextBackdrop,
    ChangeSize,
    SetSize,
    ChangeEffect(String),
    SetEffect(String),
    ClearEffects,
    GoToFront,
    GoToBack,
    GoForwardLayers,
    GoBackwardLayers,
    // sound
    PlaySound,
    PlaySoundUntilDone,
    StopAllSounds,
    ChangeVolume,
    SetVolume,
    // sensing
    AskAndWait,
    ResetTimer,
    SetDragMode(bool),
    // pen
    PenClear,
    PenStamp,
    PenDown,
    PenUp,
    SetPenColor,
    ChangePenSize,
    SetPenSize,
    ChangePenParam(String),
    SetPenParam(String),
}

impl EffectOp {
    /// Whether the helper can span multiple scheduler steps.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            EffectOp::GlideToXY
                | EffectOp::GlideToTarget
                | EffectOp::SayForSecs
                | EffectOp::ThinkForSecs
                | EffectOp::SwitchBackdropAndWait
                | EffectOp::PlaySoundUntilDone
                | EffectOp::AskAndWait
        )
    }
}

/// An expression node. Every variant knows its value type; operands
/// arrive pre-cast by the IR generator.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant {
        value: Value,
        ty: ValueType,
    },
    Cast {
        cast: CastKind,
        value: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        ty: ValueType,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not {
        value: Box<Expr>,
    },
    MathOp {
        func: MathFunction,
        value: Box<Expr>,
    },
    Round {
        value: Box<Expr>,
    },
    Random {
        ty: ValueType,
        from: Box<Expr>,
        to: Box<Expr>,
    },
    Join {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    LetterOf {
        index: Box<Expr>,
        string: Box<Expr>,
    },
    StringLength {
        value: Box<Expr>,
    },
    StringContains {
        haystack: Box<Expr>,
        needle: Box<Expr>,
    },
    VariableGet {
        var: VarSlot,
        ty: ValueType,
    },
    /// Procedure argument, read by position from the current frame
    Argument {
        index: usize,
        boolean: bool,
    },
    ListItem {
        list: ListSlot,
        index: Box<Expr>,
    },
    ListLength {
        list: ListSlot,
    },
    ListContains {
        list: ListSlot,
        value: Box<Expr>,
    },
    ListIndexOf {
        list: ListSlot,
        value: Box<Expr>,
    },
    ListContents {
        list: ListSlot,
    },
    /// Expression-form call of a value-returning procedure
    ProcedureCall {
        proc: usize,
        args: Vec<Expr>,
    },
    Query {
        query: QueryOp,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn constant(value: impl Into<Value>) -> Expr {
        let value = value.into();
        let ty = classify_value(&value);
        Expr::Constant { value, ty }
    }

    /// The node's declared value type.
    pub fn ty(&self) -> ValueType {
        match self {
            Expr::Constant { ty, .. } => *ty,
            Expr::Cast { cast, .. } => cast.output_type(),
            Expr::Binary { ty, .. } => *ty,
            Expr::Not { .. } => ValueType::BOOLEAN,
            Expr::MathOp { func, .. } => func.output_type(),
            Expr::Round { .. } => ValueType::NUMBER_INT | ValueType::NUMBER_INF,
            Expr::Random { ty, .. } => *ty,
            Expr::Join { .. } | Expr::LetterOf { .. } => ValueType::STRING,
            Expr::StringLength { .. } => ValueType::NUMBER_POS_INT | ValueType::NUMBER_ZERO,
            Expr::StringContains { .. } => ValueType::BOOLEAN,
            Expr::VariableGet { ty, .. } => *ty,
            Expr::Argument { boolean, .. } => {
                if *boolean {
                    ValueType::BOOLEAN
                } else {
                    ValueType::ANY
                }
            }
            Expr::ListItem { .. } => ValueType::ANY,
            Expr::ListLength { .. } | Expr::ListIndexOf { .. } => {
                ValueType::NUMBER_POS_INT | ValueType::NUMBER_ZERO
            }
            Expr::ListContains { .. } => ValueType::BOOLEAN,
            Expr::ListContents { .. } => ValueType::STRING,
            Expr::ProcedureCall { .. } => ValueType::ANY,
            Expr::Query { query, .. } => query.output_type(),
        }
    }

    /// True iff this node is a constant equal to `v`.
    pub fn is_constant(&self, v: &Value) -> bool {
        matches!(self, Expr::Constant { value, .. } if value == v)
    }

    /// Coerce this expression to the kind a consumer requires.
    ///
    /// Returns the node unchanged when its type already satisfies the
    /// cast, folds constants through the coercion, and wraps in an
    /// explicit cast node otherwise. COLOR-typed constants are never
    /// folded (pen semantics keep them opaque).
    pub fn to_type(self, cast_kind: CastKind) -> Expr {
        let ty = self.ty();
        if ty.is_always(cast_kind.identity_mask()) {
            return self;
        }
        if let Expr::Constant { value, ty } = &self {
            if !ty.is_sometimes(ValueType::COLOR) {
                match cast_kind {
                    CastKind::Number => return Expr::constant(cast::to_number(value)),
                    CastKind::NumberOrNan => return Expr::constant(cast::to_number_or_nan(value)),
                    CastKind::Boolean => return Expr::constant(cast::to_boolean(value)),
                    CastKind::String => return Expr::constant(cast::to_string(value)),
                    CastKind::Index => return Expr::constant(cast::to_number(value).floor()),
                    CastKind::Color => {}
                }
            }
        }
        Expr::Cast {
            cast: cast_kind,
            value: Box::new(self),
        }
    }
}

/// How a `control_stop` behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    All,
    ThisScript,
    /// "other scripts in sprite" — the stage spelling behaves the same
    OtherScripts,
}

/// A statement with its originating block id (for diagnostics).
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub block_id: Option<String>,
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Stmt {
        Stmt {
            kind,
            block_id: None,
        }
    }

    pub fn with_id(kind: StmtKind, id: impl Into<String>) -> Stmt {
        Stmt {
            kind,
            block_id: Some(id.into()),
        }
    }
}

/// Statement ("stack block") variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Repeat {
        times: Expr,
        body: Vec<Stmt>,
    },
    Forever {
        body: Vec<Stmt>,
    },
    If {
        condition: Expr,
        body: Vec<Stmt>,
    },
    IfElse {
        condition: Expr,
        body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    /// `repeat_until` lowers to this with a negated condition
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    Wait {
        seconds: Expr,
    },
    WaitUntil {
        condition: Expr,
    },
    Stop {
        mode: StopMode,
    },
    CreateClone {
        target: Expr,
    },
    DeleteThisClone,
    /// `all_at_once`: the body runs without yields
    Warp {
        body: Vec<Stmt>,
    },
    ForEach {
        var: VarSlot,
        count: Expr,
        body: Vec<Stmt>,
    },
    Broadcast {
        name: Expr,
        wait: bool,
    },
    SetVariable {
        var: VarSlot,
        value: Expr,
    },
    ShowVariable {
        var: VarSlot,
        show: bool,
    },
    ListAdd {
        list: ListSlot,
        item: Expr,
    },
    ListDelete {
        list: ListSlot,
        index: Expr,
    },
    ListDeleteAll {
        list: ListSlot,
    },
    ListInsert {
        list: ListSlot,
        index: Expr,
        item: Expr,
    },
    ListReplace {
        list: ListSlot,
        index: Expr,
        item: Expr,
    },
    ShowList {
        list: ListSlot,
        show: bool,
    },
    /// Statement-form procedure call; the return slot is discarded
    ProcedureCall {
        proc: usize,
        args: Vec<Expr>,
        /// Call to the procedure that lexically contains it
        recursive: bool,
    },
    ProcedureReturn {
        value: Expr,
    },
    Effect {
        op: EffectOp,
        args: Vec<Expr>,
    },
}

impl StmtKind {
    /// Whether this statement may return control to the scheduler.
    pub fn yields(&self) -> bool {
        match self {
            StmtKind::Repeat { .. }
            | StmtKind::Forever { .. }
            | StmtKind::While { .. }
            | StmtKind::ForEach { .. }
            | StmtKind::Wait { .. }
            | StmtKind::WaitUntil { .. } => true,
            StmtKind::Broadcast { wait, .. } => *wait,
            StmtKind::ProcedureCall { recursive, .. } => *recursive,
            StmtKind::If { body, .. } => body.iter().any(|s| s.kind.yields()),
            StmtKind::IfElse {
                body, else_body, ..
            } => body.iter().chain(else_body).any(|s| s.kind.yields()),
            StmtKind::Warp { .. } => false,
            StmtKind::Effect { op, .. } => op.is_resumable(),
            _ => false,
        }
    }
}

/// Thread entry-point kinds, registered with the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum HatKind {
    FlagClicked,
    KeyPressed {
        key: String,
    },
    /// Name stored lower-cased; matching is case-insensitive
    BroadcastReceived {
        name: String,
    },
    SpriteClicked,
    StageClicked,
    BackdropSwitchesTo {
        backdrop: String,
    },
    GreaterThan {
        what: GreaterThanKind,
        threshold: f64,
    },
    StartAsClone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreaterThanKind {
    Loudness,
    Timer,
}

/// A compiled-from-IR script: one hat, one body, one owning target.
#[derive(Debug, Clone)]
pub struct IrScript {
    pub target: usize,
    pub hat: HatKind,
    pub body: Vec<Stmt>,
    /// Position in project order, for stable scheduling
    pub order: usize,
}

/// A custom-block definition lifted into an independent function.
#[derive(Debug, Clone)]
pub struct IrProcedure {
    pub target: usize,
    pub proccode: String,
    pub warp: bool,
    pub arg_names: Vec<String>,
    pub arg_defaults: Vec<Value>,
    pub body: Vec<Stmt>,
}

/// The whole project, lowered.
#[derive(Debug, Clone, Default)]
pub struct IrProject {
    pub scripts: Vec<IrScript>,
    pub procedures: Vec<IrProcedure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_type_identity_when_always() {
        let n = Expr::constant(5.0);
        assert_eq!(n.ty(), ValueType::NUMBER_POS_INT);
        let cast = n.clone().to_type(CastKind::Number);
        assert_eq!(cast, n);
    }

    #[test]
    fn test_to_type_folds_constants() {
        let s = Expr::constant("3.5");
        match s.to_type(CastKind::Number) {
            Expr::Constant { value, ty } => {
                assert_eq!(value, Value::Number(3.5));
                assert_eq!(ty, ValueType::NUMBER_POS_FRACT);
            }
            other => panic!("expected folded constant, got {:?}", other),
        }
    }

    #[test]
    fn test_to_type_wraps_dynamic_values() {
        let var = Expr::VariableGet {
            var: VarSlot {
                scope: VarScope::Stage,
                index: 0,
                cloud: false,
            },
            ty: ValueType::ANY,
        };
        match var.to_type(CastKind::Number) {
            Expr::Cast { cast, .. } => assert_eq!(cast, CastKind::Number),
            other => panic!("expected cast node, got {:?}", other),
        }
    }

    #[test]
    fn test_bool_cast_fold() {
        assert_eq!(
            Expr::constant("false").to_type(CastKind::Boolean),
            Expr::Constant {
                value: Value::Bool(false),
                ty: ValueType::BOOLEAN
            }
        );
    }

    #[test]
    fn test_is_constant() {
        let c = Expr::constant(3.0);
        assert!(c.is_constant(&Value::Number(3.0)));
        assert!(!c.is_constant(&Value::Number(4.0)));
    }

    #[test]
    fn test_yields_propagates_through_branches() {
        let wait = Stmt::new(StmtKind::Wait {
            seconds: Expr::constant(1.0),
        });
        let iff = StmtKind::If {
            condition: Expr::constant(true),
            body: vec![wait],
        };
        assert!(iff.yields());
        let say = StmtKind::Effect {
            op: EffectOp::Say,
            args: vec![Expr::constant("hi")],
        };
        assert!(!say.yields());
    }
}
