//! In-memory project entities
//!
//! A [`Project`] is the mutable world compiled scripts act on: the stage
//! plus the sprites, their clones, and everything they own (variables,
//! lists, costumes, sounds). Targets are stored in an arena and referred
//! to by [`TargetId`]; scripts and the scheduler never hold pointers
//! into the arena, only ids.
//!
//! Clones share their originating sprite's variables and lists by
//! reference: a clone's own `variables`/`lists` vectors stay empty and
//! every access resolves through [`Project::var_home`]. Position,
//! costume, effects and the rest of the sprite fields are copied at
//! clone time and diverge freely afterwards.

use crate::value::Value;

/// Index of a target in the project arena. Stable for the lifetime of a
/// run; slots of deleted clones are tombstoned, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TargetId(pub usize);

/// What kind of slot a variable occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Scalar,
    List,
    Broadcast,
}

/// A scalar variable.
#[derive(Debug, Clone)]
pub struct Variable {
    /// The project-file id (unique within the project)
    pub id: String,
    pub name: String,
    pub value: Value,
    /// Cloud variables forward writes to the storage collaborator
    pub is_cloud: bool,
}

/// A list variable.
#[derive(Debug, Clone)]
pub struct List {
    pub id: String,
    pub name: String,
    pub items: Vec<Value>,
}

/// A broadcast message name. Broadcasts are global: every target sees
/// every broadcast, and name matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub id: String,
    pub name: String,
}

/// Costume metadata. Decoding image data is the renderer's job; the
/// core only tracks identity and the current selection.
#[derive(Debug, Clone)]
pub struct Costume {
    pub name: String,
    pub asset_id: String,
    pub data_format: String,
}

/// Sound metadata, same deal as [`Costume`].
#[derive(Debug, Clone)]
pub struct Sound {
    pub name: String,
    pub asset_id: String,
    pub data_format: String,
}

/// Sprite rotation behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStyle {
    #[default]
    AllAround,
    LeftRight,
    DontRotate,
}

impl RotationStyle {
    /// Parse the project-file spelling; unknown strings fall back to
    /// all-around, matching the Scratch loader.
    pub fn from_project_str(s: &str) -> RotationStyle {
        match s {
            "left-right" => RotationStyle::LeftRight,
            "don't rotate" => RotationStyle::DontRotate,
            _ => RotationStyle::AllAround,
        }
    }
}

/// Graphic effect state. Rendering interprets these; the core only
/// stores and clamps them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphicEffects {
    pub color: f64,
    pub fisheye: f64,
    pub whirl: f64,
    pub pixelate: f64,
    pub mosaic: f64,
    pub brightness: f64,
    pub ghost: f64,
}

impl GraphicEffects {
    pub fn set(&mut self, name: &str, value: f64) {
        match name {
            "color" => self.color = value,
            "fisheye" => self.fisheye = value,
            "whirl" => self.whirl = value,
            "pixelate" => self.pixelate = value,
            "mosaic" => self.mosaic = value,
            "brightness" => self.brightness = value.clamp(-100.0, 100.0),
            "ghost" => self.ghost = value.clamp(0.0, 100.0),
            _ => {}
        }
    }

    pub fn get(&self, name: &str) -> f64 {
        match name {
            "color" => self.color,
            "fisheye" => self.fisheye,
            "whirl" => self.whirl,
            "pixelate" => self.pixelate,
            "mosaic" => self.mosaic,
            "brightness" => self.brightness,
            "ghost" => self.ghost,
            _ => 0.0,
        }
    }
}

/// Pen state for a sprite. The pen renderer is a collaborator; the core
/// tracks the state it would draw with.
#[derive(Debug, Clone)]
pub struct PenState {
    pub down: bool,
    pub size: f64,
    /// Packed RGB color
    pub color: u32,
}

impl Default for PenState {
    fn default() -> Self {
        PenState {
            down: false,
            size: 1.0,
            color: 0x0000FF,
        }
    }
}

/// The kind of speech bubble a sprite is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BubbleKind {
    Say,
    Think,
}

/// A target: the stage, an original sprite, or a clone.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub is_stage: bool,
    pub is_clone: bool,
    /// For clones, the arena id of the originating sprite. Variable and
    /// list storage resolves through this.
    pub origin: Option<TargetId>,
    /// Compile-time target index this target executes the scripts of.
    /// Equal to the arena index for originals; clones borrow their
    /// originator's.
    pub script_target: usize,
    /// Tombstone flag: deleted clones stay in the arena but are dead.
    pub alive: bool,

    pub variables: Vec<Variable>,
    pub lists: Vec<List>,
    pub costumes: Vec<Costume>,
    pub current_costume: usize,
    pub sounds: Vec<Sound>,
    pub volume: f64,

    pub x: f64,
    pub y: f64,
    pub direction: f64,
    pub size: f64,
    pub visible: bool,
    pub rotation_style: RotationStyle,
    pub draggable: bool,
    pub layer_order: usize,

    pub effects: GraphicEffects,
    pub pen: PenState,
    pub bubble: Option<(BubbleKind, String)>,
}

impl Target {
    /// A blank stage, suitable as a starting point for loaders.
    pub fn stage(name: impl Into<String>) -> Target {
        Target {
            name: name.into(),
            is_stage: true,
            ..Target::sprite("")
        }
    }

    /// A blank sprite with Scratch's default pose.
    pub fn sprite(name: impl Into<String>) -> Target {
        Target {
            name: name.into(),
            is_stage: false,
            is_clone: false,
            origin: None,
            script_target: 0,
            alive: true,
            variables: Vec::new(),
            lists: Vec::new(),
            costumes: Vec::new(),
            current_costume: 0,
            sounds: Vec::new(),
            volume: 100.0,
            x: 0.0,
            y: 0.0,
            direction: 90.0,
            size: 100.0,
            visible: true,
            rotation_style: RotationStyle::AllAround,
            draggable: false,
            layer_order: 0,
            effects: GraphicEffects::default(),
            pen: PenState::default(),
            bubble: None,
        }
    }

    pub fn find_variable(&self, id: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.id == id)
    }

    pub fn find_variable_by_name(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.name == name)
    }

    pub fn find_list(&self, id: &str) -> Option<usize> {
        self.lists.iter().position(|l| l.id == id)
    }

    pub fn find_list_by_name(&self, name: &str) -> Option<usize> {
        self.lists.iter().position(|l| l.name == name)
    }

    /// Costume name of the current costume, or "" with no costumes.
    pub fn costume_name(&self) -> &str {
        self.costumes
            .get(self.current_costume)
            .map(|c| c.name.as_str())
            .unwrap_or("")
    }

    /// Switch costume by 0-based index, wrapping per Scratch rules.
    pub fn set_costume(&mut self, index: f64) {
        if self.costumes.is_empty() {
            return;
        }
        let len = self.costumes.len() as f64;
        let mut i = index % len;
        if i < 0.0 {
            i += len;
        }
        self.current_costume = i as usize;
    }
}

/// The project arena: stage + sprites + live clones, plus the global
/// broadcast table.
#[derive(Debug, Clone, Default)]
pub struct Project {
    pub targets: Vec<Target>,
    pub broadcasts: Vec<Broadcast>,
}

impl Project {
    pub fn target(&self, id: TargetId) -> &Target {
        &self.targets[id.0]
    }

    pub fn target_mut(&mut self, id: TargetId) -> &mut Target {
        &mut self.targets[id.0]
    }

    pub fn stage_id(&self) -> Option<TargetId> {
        self.targets
            .iter()
            .position(|t| t.is_stage)
            .map(TargetId)
    }

    /// Find an original (non-clone) target by name.
    pub fn find_target_by_name(&self, name: &str) -> Option<TargetId> {
        self.targets
            .iter()
            .position(|t| !t.is_clone && t.alive && t.name == name)
            .map(TargetId)
    }

    /// Where a target's variables actually live: itself for originals,
    /// the originating sprite for clones.
    pub fn var_home(&self, id: TargetId) -> TargetId {
        match self.targets[id.0].origin {
            Some(origin) => origin,
            None => id,
        }
    }

    /// Number of live clones across the whole project.
    pub fn live_clone_count(&self) -> usize {
        self.targets
            .iter()
            .filter(|t| t.is_clone && t.alive)
            .count()
    }

    /// Spawn a clone of `original`. Copies pose and per-sprite state,
    /// shares variables through `origin`, and slots the clone into the
    /// draw order just behind the original. Returns the clone's id.
    pub fn make_clone(&mut self, original: TargetId) -> TargetId {
        let home = self.var_home(original);
        let src = &self.targets[original.0];
        let mut clone = Target {
            name: src.name.clone(),
            is_clone: true,
            origin: Some(home),
            script_target: src.script_target,
            variables: Vec::new(),
            lists: Vec::new(),
            // costume identity is shared metadata; clones keep a copy so
            // costume switching stays per-target
            costumes: src.costumes.clone(),
            sounds: src.sounds.clone(),
            ..src.clone()
        };
        clone.alive = true;
        let src_layer = self.targets[original.0].layer_order;
        // just behind the originator in draw order
        for t in &mut self.targets {
            if t.alive && t.layer_order >= src_layer {
                t.layer_order += 1;
            }
        }
        clone.layer_order = src_layer;
        self.targets[original.0].layer_order = src_layer + 1;
        let id = TargetId(self.targets.len());
        self.targets.push(clone);
        id
    }

    /// Tombstone a clone. Deleting an original is a no-op.
    pub fn delete_clone(&mut self, id: TargetId) {
        let t = &mut self.targets[id.0];
        if t.is_clone {
            t.alive = false;
        }
    }

    /// Execution order for one scheduler tick: stage first, then each
    /// original sprite in project order followed by its live clones in
    /// creation order.
    pub fn execution_order(&self) -> Vec<TargetId> {
        let mut order = Vec::with_capacity(self.targets.len());
        if let Some(stage) = self.stage_id() {
            order.push(stage);
        }
        for (i, t) in self.targets.iter().enumerate() {
            if t.is_stage || t.is_clone || !t.alive {
                continue;
            }
            let original = TargetId(i);
            order.push(original);
            for (j, c) in self.targets.iter().enumerate() {
                if c.is_clone && c.alive && c.origin == Some(self.var_home(original)) {
                    order.push(TargetId(j));
                }
            }
        }
        order
    }

    /// Global variable lookup by project-file id: the owning target's
    /// arena id plus the slot index. Stage variables are visible to
    /// everyone; sprite variables only to their sprite (and clones).
    pub fn resolve_variable(&self, from: TargetId, var_id: &str) -> Option<(TargetId, usize)> {
        let home = self.var_home(from);
        if let Some(slot) = self.targets[home.0].find_variable(var_id) {
            return Some((home, slot));
        }
        let stage = self.stage_id()?;
        self.targets[stage.0]
            .find_variable(var_id)
            .map(|slot| (stage, slot))
    }

    /// Same as [`Project::resolve_variable`] for lists.
    pub fn resolve_list(&self, from: TargetId, list_id: &str) -> Option<(TargetId, usize)> {
        let home = self.var_home(from);
        if let Some(slot) = self.targets[home.0].find_list(list_id) {
            return Some((home, slot));
        }
        let stage = self.stage_id()?;
        self.targets[stage.0]
            .find_list(list_id)
            .map(|slot| (stage, slot))
    }

    /// Case-insensitive broadcast lookup by name.
    pub fn find_broadcast(&self, name: &str) -> Option<&Broadcast> {
        self.broadcasts
            .iter()
            .find(|b| b.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with_sprite() -> Project {
        let mut stage = Target::stage("Stage");
        stage.variables.push(Variable {
            id: "g".into(),
            name: "global".into(),
            value: Value::Number(0.0),
            is_cloud: false,
        });
        let mut sprite = Target::sprite("Cat");
        sprite.script_target = 1;
        sprite.layer_order = 1;
        sprite.variables.push(Variable {
            id: "l".into(),
            name: "local".into(),
            value: Value::Number(0.0),
            is_cloud: false,
        });
        Project {
            targets: vec![stage, sprite],
            broadcasts: vec![Broadcast {
                id: "b1".into(),
                name: "Go".into(),
            }],
        }
    }

    #[test]
    fn test_variable_resolution_prefers_local() {
        let p = project_with_sprite();
        let sprite = TargetId(1);
        assert_eq!(p.resolve_variable(sprite, "l"), Some((sprite, 0)));
        assert_eq!(p.resolve_variable(sprite, "g"), Some((TargetId(0), 0)));
        assert_eq!(p.resolve_variable(sprite, "missing"), None);
    }

    #[test]
    fn test_clone_shares_variables_with_origin() {
        let mut p = project_with_sprite();
        let clone = p.make_clone(TargetId(1));
        assert!(p.target(clone).is_clone);
        assert!(p.target(clone).variables.is_empty());
        assert_eq!(p.var_home(clone), TargetId(1));
        assert_eq!(p.resolve_variable(clone, "l"), Some((TargetId(1), 0)));
    }

    #[test]
    fn test_clone_of_clone_resolves_to_original() {
        let mut p = project_with_sprite();
        let c1 = p.make_clone(TargetId(1));
        let c2 = p.make_clone(c1);
        assert_eq!(p.var_home(c2), TargetId(1));
    }

    #[test]
    fn test_clone_draw_order_behind_original() {
        let mut p = project_with_sprite();
        let original_layer = p.target(TargetId(1)).layer_order;
        let clone = p.make_clone(TargetId(1));
        assert_eq!(p.target(clone).layer_order, original_layer);
        assert_eq!(p.target(TargetId(1)).layer_order, original_layer + 1);
    }

    #[test]
    fn test_execution_order_stage_first_clones_after_origin() {
        let mut p = project_with_sprite();
        let clone = p.make_clone(TargetId(1));
        let order = p.execution_order();
        assert_eq!(order, vec![TargetId(0), TargetId(1), clone]);
        p.delete_clone(clone);
        assert_eq!(p.execution_order(), vec![TargetId(0), TargetId(1)]);
    }

    #[test]
    fn test_delete_original_is_noop() {
        let mut p = project_with_sprite();
        p.delete_clone(TargetId(1));
        assert!(p.target(TargetId(1)).alive);
    }

    #[test]
    fn test_broadcast_lookup_case_insensitive() {
        let p = project_with_sprite();
        assert!(p.find_broadcast("GO").is_some());
        assert!(p.find_broadcast("stop").is_none());
    }

    #[test]
    fn test_costume_wrapping() {
        let mut t = Target::sprite("s");
        for name in ["a", "b", "c"] {
            t.costumes.push(Costume {
                name: name.into(),
                asset_id: String::new(),
                data_format: "svg".into(),
            });
        }
        t.set_costume(4.0);
        assert_eq!(t.costume_name(), "b");
        t.set_costume(-1.0);
        assert_eq!(t.costume_name(), "c");
    }
}
