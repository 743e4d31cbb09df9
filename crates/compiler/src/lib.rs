//! sb3-compiler: from project.json to executable bytecode
//!
//! The pipeline is fixed:
//!
//! ```text
//! JSON tree → frontend (raw block arena + initial project state)
//!           → irgen    (typed IR, casts inserted, constants folded)
//!           → optimizer (cast elimination, type tightening)
//!           → codegen  (flat bytecode chunks with resume-index yields)
//! ```
//!
//! The result, [`CompiledProject`], pairs the immutable program with
//! the initial mutable project state; the runtime crate executes it.

pub mod codegen;
pub mod error;
pub mod frontend;
pub mod ir;
pub mod irgen;
pub mod optimizer;

pub use codegen::{
    CodeChunk, CompiledProcedure, CompiledProgram, CompiledProject, CompiledScript, Instr,
};
pub use error::CompileError;
pub use ir::{GreaterThanKind, HatKind, ListSlot, ValueType, VarScope, VarSlot};

use serde_json::Value as Json;

/// Compile a parsed project.json tree into an executable project.
pub fn compile(json: &Json) -> Result<CompiledProject, CompileError> {
    let raw = frontend::parse_project(json)?;
    let project = frontend::build_project(&raw);
    let mut ir = irgen::generate(&raw, &project)?;
    optimizer::optimize(&mut ir);
    let program = codegen::generate(&ir, &project)?;
    Ok(CompiledProject { program, project })
}

/// Compile a project.json source string.
pub fn compile_str(source: &str) -> Result<CompiledProject, CompileError> {
    let json: Json = serde_json::from_str(source)
        .map_err(|e| CompileError::ProjectShape(format!("invalid JSON: {}", e)))?;
    compile(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compile_minimal_project() {
        let j = json!({
            "targets": [{
                "isStage": true,
                "name": "Stage",
                "blocks": {
                    "hat": {"opcode": "event_whenflagclicked", "topLevel": true}
                }
            }]
        });
        let compiled = compile(&j).unwrap();
        assert_eq!(compiled.program.scripts.len(), 1);
        assert_eq!(compiled.project.targets.len(), 1);
    }

    #[test]
    fn test_compile_str_rejects_bad_json() {
        assert!(matches!(
            compile_str("{not json"),
            Err(CompileError::ProjectShape(_))
        ));
    }

    #[test]
    fn test_optimized_tree_has_no_redundant_casts() {
        // sum = 0; repeat 5 { sum = sum + 2 } — after folding and
        // optimization the write inside the loop is an add of a cast
        // variable read and a constant
        let j = json!({
            "targets": [{
                "isStage": true,
                "name": "Stage",
                "variables": {"v1": ["sum", 0]},
                "blocks": {
                    "hat": {"opcode": "event_whenflagclicked", "topLevel": true, "next": "init"},
                    "init": {"opcode": "data_setvariableto", "next": "loop",
                             "fields": {"VARIABLE": ["sum", "v1"]},
                             "inputs": {"VALUE": [1, [4, "0"]]}},
                    "loop": {"opcode": "control_repeat",
                             "inputs": {"TIMES": [1, [4, "5"]], "SUBSTACK": [2, "add"]}},
                    "add": {"opcode": "data_changevariableby",
                            "fields": {"VARIABLE": ["sum", "v1"]},
                            "inputs": {"VALUE": [1, [4, "2"]]}}
                }
            }]
        });
        let compiled = compile(&j).unwrap();
        let chunk = &compiled.program.chunks[compiled.program.scripts[0].chunk];
        assert!(chunk.instrs.contains(&Instr::RepeatSetup));
        assert!(chunk.instrs.iter().any(|i| matches!(i, Instr::Add)));
    }
}
