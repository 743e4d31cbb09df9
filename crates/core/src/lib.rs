//! sb3-core: the value model and project entities shared by the compiler
//! and the runtime.
//!
//! Everything in this crate is pure data and pure functions: Scratch's
//! number/string/boolean coercion rules live in [`cast`], the runtime
//! value type in [`value`], and the in-memory project entities (stage,
//! sprites, clones, variables, lists, broadcasts) in [`project`].
//!
//! Nothing here schedules or compiles anything; the compiler and runtime
//! crates both build on these types.

pub mod cast;
pub mod project;
pub mod value;

pub use project::{
    Broadcast, BubbleKind, Costume, GraphicEffects, List, PenState, Project, RotationStyle, Sound,
    Target, TargetId, Variable, VariableKind,
};
pub use value::Value;
