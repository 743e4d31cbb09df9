//! project.json frontend
//!
//! Turns the parsed JSON tree into a raw block arena the IR generator
//! can descend, plus the initial [`Project`] state. This is the only
//! place that touches the project-file shape; everything downstream
//! works with typed structures.
//!
//! Tolerance policy: a malformed block (missing opcode, dangling id,
//! unparseable mutation) is logged and skipped; the rest of the project
//! compiles. Only a structurally unusable file (no `targets` array, a
//! non-object block map) is a hard [`CompileError::ProjectShape`].
//!
//! Block inputs are accepted in both the `[shadow, data]` array form
//! and the compiled `{id, name}` object form; fields likewise.

use crate::error::CompileError;
use sb3_core::{Broadcast, Costume, List, Project, RotationStyle, Sound, Target, Variable};
use sb3_core::Value;
use serde_json::Value as Json;
use std::collections::HashMap;
use tracing::warn;

/// A reference stored in a block input slot.
#[derive(Debug, Clone, PartialEq)]
pub enum RawInput {
    /// Another block, by id
    Block(String),
    /// An inline literal (number or string primitive)
    Literal(Value),
    /// An inline color primitive (`#rrggbb`)
    Color(String),
    /// Broadcast primitive: name + id
    Broadcast { name: String, id: String },
    /// Variable primitive: name + id
    Variable { name: String, id: String },
    /// List primitive: name + id
    List { name: String, id: String },
    /// Nothing plugged in
    Empty,
}

/// A field slot: a value plus an optional id (variables, broadcasts).
#[derive(Debug, Clone, PartialEq)]
pub struct RawField {
    pub value: String,
    pub id: Option<String>,
}

/// Custom-block mutation payload.
#[derive(Debug, Clone, Default)]
pub struct RawMutation {
    pub proccode: String,
    pub argument_ids: Vec<String>,
    pub argument_names: Vec<String>,
    pub argument_defaults: Vec<Value>,
    pub warp: bool,
}

/// One block from the project file.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub opcode: String,
    pub next: Option<String>,
    pub parent: Option<String>,
    pub inputs: HashMap<String, RawInput>,
    pub fields: HashMap<String, RawField>,
    pub top_level: bool,
    pub shadow: bool,
    pub mutation: Option<RawMutation>,
}

/// The block arena of one target, preserving project order.
#[derive(Debug, Clone, Default)]
pub struct RawBlocks {
    /// Block ids in original key order
    pub order: Vec<String>,
    map: HashMap<String, RawBlock>,
}

impl RawBlocks {
    pub fn get(&self, id: &str) -> Option<&RawBlock> {
        self.map.get(id)
    }

    /// Top-level blocks in project order.
    pub fn top_level(&self) -> impl Iterator<Item = (&str, &RawBlock)> {
        self.order.iter().filter_map(|id| {
            let b = self.map.get(id)?;
            if b.top_level {
                Some((id.as_str(), b))
            } else {
                None
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct RawVariable {
    pub id: String,
    pub name: String,
    pub value: Value,
    pub is_cloud: bool,
}

#[derive(Debug, Clone)]
pub struct RawList {
    pub id: String,
    pub name: String,
    pub items: Vec<Value>,
}

/// One target, raw.
#[derive(Debug, Clone)]
pub struct RawTarget {
    pub name: String,
    pub is_stage: bool,
    pub variables: Vec<RawVariable>,
    pub lists: Vec<RawList>,
    pub broadcasts: Vec<(String, String)>,
    pub blocks: RawBlocks,
    pub costumes: Vec<Costume>,
    pub sounds: Vec<Sound>,
    pub current_costume: usize,
    pub x: f64,
    pub y: f64,
    pub direction: f64,
    pub size: f64,
    pub visible: bool,
    pub rotation_style: String,
    pub draggable: bool,
    pub layer_order: usize,
    pub volume: f64,
}

/// The whole project, raw. Targets keep file order (stage first by
/// Scratch convention, but the builder does not rely on it).
#[derive(Debug, Clone, Default)]
pub struct RawProject {
    pub targets: Vec<RawTarget>,
}

fn json_to_value(j: &Json) -> Value {
    match j {
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        Json::String(s) => Value::from(s.as_str()),
        Json::Bool(b) => Value::Bool(*b),
        _ => Value::empty(),
    }
}

fn str_field(obj: &Json, key: &str) -> Option<String> {
    obj.get(key).and_then(Json::as_str).map(str::to_string)
}

fn f64_field(obj: &Json, key: &str, default: f64) -> f64 {
    obj.get(key).and_then(Json::as_f64).unwrap_or(default)
}

fn bool_field(obj: &Json, key: &str, default: bool) -> bool {
    obj.get(key).and_then(Json::as_bool).unwrap_or(default)
}

/// Parse an input slot.
///
/// Array form: `[shadow_state, data, obscured_shadow?]` where data is a
/// block-id string, a primitive array, or null. Object form: `{block,
/// shadow}` or `{id, name}`.
fn parse_input(j: &Json) -> RawInput {
    match j {
        Json::Array(arr) => {
            // element 0 is the shadow state; the payload follows
            let data = arr.get(1).unwrap_or(&Json::Null);
            parse_input_data(data)
        }
        Json::Object(obj) => {
            if let Some(Json::String(id)) = obj.get("block") {
                return RawInput::Block(id.clone());
            }
            if let Some(Json::String(id)) = obj.get("id") {
                return RawInput::Block(id.clone());
            }
            RawInput::Empty
        }
        _ => RawInput::Empty,
    }
}

fn parse_input_data(data: &Json) -> RawInput {
    match data {
        Json::String(id) => RawInput::Block(id.clone()),
        Json::Array(prim) => {
            let kind = prim.first().and_then(Json::as_u64).unwrap_or(0);
            match kind {
                // 4..=8: number-family primitives (value kept verbatim)
                4..=8 => RawInput::Literal(json_to_value(prim.get(1).unwrap_or(&Json::Null))),
                9 => RawInput::Color(
                    prim.get(1)
                        .and_then(Json::as_str)
                        .unwrap_or("#000000")
                        .to_string(),
                ),
                10 => RawInput::Literal(json_to_value(prim.get(1).unwrap_or(&Json::Null))),
                11 => RawInput::Broadcast {
                    name: prim.get(1).and_then(Json::as_str).unwrap_or("").to_string(),
                    id: prim.get(2).and_then(Json::as_str).unwrap_or("").to_string(),
                },
                12 => RawInput::Variable {
                    name: prim.get(1).and_then(Json::as_str).unwrap_or("").to_string(),
                    id: prim.get(2).and_then(Json::as_str).unwrap_or("").to_string(),
                },
                13 => RawInput::List {
                    name: prim.get(1).and_then(Json::as_str).unwrap_or("").to_string(),
                    id: prim.get(2).and_then(Json::as_str).unwrap_or("").to_string(),
                },
                _ => RawInput::Empty,
            }
        }
        _ => RawInput::Empty,
    }
}

/// Parse a field slot: `[value, id?]` array or `{value/name, id}`
/// compiled form.
fn parse_field(j: &Json) -> RawField {
    match j {
        Json::Array(arr) => RawField {
            value: arr
                .first()
                .map(|v| match v {
                    Json::String(s) => s.clone(),
                    other => sb3_core::cast::to_string(&json_to_value(other)),
                })
                .unwrap_or_default(),
            id: arr.get(1).and_then(Json::as_str).map(str::to_string),
        },
        Json::Object(obj) => RawField {
            value: str_field(j, "value")
                .or_else(|| str_field(j, "name"))
                .unwrap_or_default(),
            id: obj.get("id").and_then(Json::as_str).map(str::to_string),
        },
        _ => RawField {
            value: String::new(),
            id: None,
        },
    }
}

fn parse_mutation(j: &Json) -> Option<RawMutation> {
    let proccode = str_field(j, "proccode")?;
    // argumentids / argumentnames / argumentdefaults arrive either as
    // JSON-encoded strings or as real arrays
    let string_list = |key: &str| -> Vec<Json> {
        match j.get(key) {
            Some(Json::String(s)) => serde_json::from_str::<Vec<Json>>(s).unwrap_or_default(),
            Some(Json::Array(a)) => a.clone(),
            _ => Vec::new(),
        }
    };
    let warp = match j.get("warp") {
        Some(Json::Bool(b)) => *b,
        Some(Json::String(s)) => s == "true",
        _ => false,
    };
    Some(RawMutation {
        proccode,
        argument_ids: string_list("argumentids")
            .iter()
            .map(|v| v.as_str().unwrap_or("").to_string())
            .collect(),
        argument_names: string_list("argumentnames")
            .iter()
            .map(|v| v.as_str().unwrap_or("").to_string())
            .collect(),
        argument_defaults: string_list("argumentdefaults")
            .iter()
            .map(json_to_value)
            .collect(),
        warp,
    })
}

fn parse_block(id: &str, j: &Json) -> Option<RawBlock> {
    // Top-level arrays are floating variable/list reporters kept for
    // the editor; they compile to nothing.
    let obj = j.as_object()?;
    let opcode = match obj.get("opcode").and_then(Json::as_str) {
        Some(op) => op.to_string(),
        None => {
            warn!(block = id, "block has no opcode, skipping");
            return None;
        }
    };
    let mut inputs = HashMap::new();
    if let Some(Json::Object(map)) = obj.get("inputs") {
        for (name, v) in map {
            inputs.insert(name.clone(), parse_input(v));
        }
    }
    let mut fields = HashMap::new();
    if let Some(Json::Object(map)) = obj.get("fields") {
        for (name, v) in map {
            fields.insert(name.clone(), parse_field(v));
        }
    }
    Some(RawBlock {
        opcode,
        next: str_field(j, "next"),
        parent: str_field(j, "parent"),
        inputs,
        fields,
        top_level: bool_field(j, "topLevel", false),
        shadow: bool_field(j, "shadow", false),
        mutation: obj.get("mutation").and_then(parse_mutation),
    })
}

fn parse_costume(j: &Json) -> Costume {
    Costume {
        name: str_field(j, "name").unwrap_or_default(),
        asset_id: str_field(j, "assetId").unwrap_or_default(),
        data_format: str_field(j, "dataFormat").unwrap_or_default(),
    }
}

fn parse_sound(j: &Json) -> Sound {
    Sound {
        name: str_field(j, "name").unwrap_or_default(),
        asset_id: str_field(j, "assetId").unwrap_or_default(),
        data_format: str_field(j, "dataFormat").unwrap_or_default(),
    }
}

fn parse_target(j: &Json) -> Result<RawTarget, CompileError> {
    let name = str_field(j, "name")
        .ok_or_else(|| CompileError::ProjectShape("target has no name".into()))?;
    let is_stage = bool_field(j, "isStage", false);

    let mut variables = Vec::new();
    if let Some(Json::Object(map)) = j.get("variables") {
        for (id, v) in map {
            // ["name", value] or ["name", value, true] for cloud
            if let Json::Array(arr) = v {
                variables.push(RawVariable {
                    id: id.clone(),
                    name: arr
                        .first()
                        .and_then(Json::as_str)
                        .unwrap_or("")
                        .to_string(),
                    value: json_to_value(arr.get(1).unwrap_or(&Json::Null)),
                    is_cloud: arr.get(2).and_then(Json::as_bool).unwrap_or(false),
                });
            }
        }
    }

    let mut lists = Vec::new();
    if let Some(Json::Object(map)) = j.get("lists") {
        for (id, v) in map {
            if let Json::Array(arr) = v {
                lists.push(RawList {
                    id: id.clone(),
                    name: arr
                        .first()
                        .and_then(Json::as_str)
                        .unwrap_or("")
                        .to_string(),
                    items: arr
                        .get(1)
                        .and_then(Json::as_array)
                        .map(|a| a.iter().map(json_to_value).collect())
                        .unwrap_or_default(),
                });
            }
        }
    }

    let mut broadcasts = Vec::new();
    if let Some(Json::Object(map)) = j.get("broadcasts") {
        for (id, v) in map {
            if let Some(name) = v.as_str() {
                broadcasts.push((id.clone(), name.to_string()));
            }
        }
    }

    let mut blocks = RawBlocks::default();
    if let Some(Json::Object(map)) = j.get("blocks") {
        for (id, v) in map {
            if let Some(block) = parse_block(id, v) {
                blocks.order.push(id.clone());
                blocks.map.insert(id.clone(), block);
            }
        }
    }

    Ok(RawTarget {
        name,
        is_stage,
        variables,
        lists,
        broadcasts,
        blocks,
        costumes: j
            .get("costumes")
            .and_then(Json::as_array)
            .map(|a| a.iter().map(parse_costume).collect())
            .unwrap_or_default(),
        sounds: j
            .get("sounds")
            .and_then(Json::as_array)
            .map(|a| a.iter().map(parse_sound).collect())
            .unwrap_or_default(),
        current_costume: f64_field(j, "currentCostume", 0.0).max(0.0) as usize,
        x: f64_field(j, "x", 0.0),
        y: f64_field(j, "y", 0.0),
        direction: f64_field(j, "direction", 90.0),
        size: f64_field(j, "size", 100.0),
        visible: bool_field(j, "visible", true),
        rotation_style: str_field(j, "rotationStyle").unwrap_or_else(|| "all around".into()),
        draggable: bool_field(j, "draggable", false),
        layer_order: f64_field(j, "layerOrder", 0.0).max(0.0) as usize,
        volume: f64_field(j, "volume", 100.0),
    })
}

/// Parse a whole project tree.
pub fn parse_project(json: &Json) -> Result<RawProject, CompileError> {
    let targets = json
        .get("targets")
        .and_then(Json::as_array)
        .ok_or_else(|| CompileError::ProjectShape("missing targets array".into()))?;
    let mut raw = RawProject::default();
    for t in targets {
        raw.targets.push(parse_target(t)?);
    }
    if !raw.targets.iter().any(|t| t.is_stage) {
        return Err(CompileError::ProjectShape("project has no stage".into()));
    }
    Ok(raw)
}

/// Build the initial mutable project state from the raw tree. Target
/// arena order matches raw target order, so compile-time target
/// indices double as arena ids for originals.
pub fn build_project(raw: &RawProject) -> Project {
    let mut project = Project::default();
    for (i, rt) in raw.targets.iter().enumerate() {
        let mut t = if rt.is_stage {
            Target::stage(rt.name.clone())
        } else {
            Target::sprite(rt.name.clone())
        };
        t.script_target = i;
        t.variables = rt
            .variables
            .iter()
            .map(|v| Variable {
                id: v.id.clone(),
                name: v.name.clone(),
                value: v.value.clone(),
                is_cloud: v.is_cloud,
            })
            .collect();
        t.lists = rt
            .lists
            .iter()
            .map(|l| List {
                id: l.id.clone(),
                name: l.name.clone(),
                items: l.items.clone(),
            })
            .collect();
        t.costumes = rt.costumes.clone();
        t.sounds = rt.sounds.clone();
        t.current_costume = rt.current_costume.min(t.costumes.len().saturating_sub(1));
        t.x = rt.x;
        t.y = rt.y;
        t.direction = rt.direction;
        t.size = rt.size;
        t.visible = rt.visible;
        t.rotation_style = RotationStyle::from_project_str(&rt.rotation_style);
        t.draggable = rt.draggable;
        t.layer_order = rt.layer_order;
        t.volume = rt.volume;
        project.targets.push(t);

        for (id, name) in &rt.broadcasts {
            if !project.broadcasts.iter().any(|b| &b.id == id) {
                project.broadcasts.push(Broadcast {
                    id: id.clone(),
                    name: name.clone(),
                });
            }
        }
    }
    project
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_minimal_project() {
        let j = json!({
            "targets": [
                {
                    "isStage": true,
                    "name": "Stage",
                    "variables": {"v1": ["score", 0]},
                    "lists": {"l1": ["items", ["a", "b"]]},
                    "broadcasts": {"b1": "go"},
                    "blocks": {}
                }
            ]
        });
        let raw = parse_project(&j).unwrap();
        assert_eq!(raw.targets.len(), 1);
        let t = &raw.targets[0];
        assert_eq!(t.variables[0].name, "score");
        assert_eq!(t.lists[0].items.len(), 2);
        assert_eq!(t.broadcasts[0].1, "go");
    }

    #[test]
    fn test_missing_targets_is_shape_error() {
        let j = json!({"meta": {}});
        assert!(matches!(
            parse_project(&j),
            Err(CompileError::ProjectShape(_))
        ));
    }

    #[test]
    fn test_parse_input_forms() {
        // primitive number
        let i = parse_input(&json!([1, [4, "3.5"]]));
        assert_eq!(i, RawInput::Literal(Value::from("3.5")));
        // block reference
        let i = parse_input(&json!([3, "blockid", [4, "0"]]));
        assert_eq!(i, RawInput::Block("blockid".into()));
        // variable primitive
        let i = parse_input(&json!([3, [12, "score", "v1"], [4, "0"]]));
        assert_eq!(
            i,
            RawInput::Variable {
                name: "score".into(),
                id: "v1".into()
            }
        );
        // compiled object form
        let i = parse_input(&json!({"block": "abc", "shadow": null}));
        assert_eq!(i, RawInput::Block("abc".into()));
        // empty slot
        let i = parse_input(&json!([2, null]));
        assert_eq!(i, RawInput::Empty);
    }

    #[test]
    fn test_parse_field_forms() {
        let f = parse_field(&json!(["myvar", "varid"]));
        assert_eq!(f.value, "myvar");
        assert_eq!(f.id.as_deref(), Some("varid"));
        let f = parse_field(&json!({"value": "left-right", "id": null}));
        assert_eq!(f.value, "left-right");
        assert_eq!(f.id, None);
    }

    #[test]
    fn test_parse_mutation_json_string_lists() {
        let m = parse_mutation(&json!({
            "proccode": "jump %s %b",
            "argumentids": "[\"a\",\"b\"]",
            "argumentnames": "[\"height\",\"fast\"]",
            "argumentdefaults": "[\"10\",\"false\"]",
            "warp": "true"
        }))
        .unwrap();
        assert_eq!(m.proccode, "jump %s %b");
        assert_eq!(m.argument_ids, vec!["a", "b"]);
        assert!(m.warp);
    }

    #[test]
    fn test_block_without_opcode_skipped() {
        let j = json!({
            "targets": [{
                "isStage": true,
                "name": "Stage",
                "blocks": {"bad": {"next": null}}
            }]
        });
        let raw = parse_project(&j).unwrap();
        assert!(raw.targets[0].blocks.get("bad").is_none());
    }

    #[test]
    fn test_build_project_state() {
        let j = json!({
            "targets": [
                {"isStage": true, "name": "Stage", "blocks": {},
                 "variables": {"g": ["global", 5]}},
                {"isStage": false, "name": "Cat", "blocks": {}, "x": 10,
                 "layerOrder": 1, "rotationStyle": "left-right"}
            ]
        });
        let raw = parse_project(&j).unwrap();
        let p = build_project(&raw);
        assert_eq!(p.targets.len(), 2);
        assert!(p.targets[0].is_stage);
        assert_eq!(p.targets[1].x, 10.0);
        assert_eq!(
            p.targets[1].rotation_style,
            RotationStyle::LeftRight
        );
        assert_eq!(p.targets[0].variables[0].value, Value::Number(5.0));
    }
}
