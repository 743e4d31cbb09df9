//! Monitor manager
//!
//! Monitors are read-through references to a variable or list; nothing
//! is cached and no dirty flag exists — the UI (or a test) asks for the
//! value between scheduler steps and gets it evaluated on demand.
//! Visibility is the only state, toggled by the show/hide blocks.

use sb3_core::{cast, Project, TargetId, Value};

/// What a monitor observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorKind {
    Variable { target: TargetId, slot: usize },
    List { target: TargetId, slot: usize },
}

#[derive(Debug, Clone)]
pub struct Monitor {
    pub kind: MonitorKind,
    pub visible: bool,
}

#[derive(Debug, Default)]
pub struct MonitorManager {
    entries: Vec<Monitor>,
}

impl MonitorManager {
    /// Toggle visibility, creating the monitor on first reference.
    pub fn set_visible(&mut self, kind: MonitorKind, visible: bool) {
        match self.entries.iter_mut().find(|m| m.kind == kind) {
            Some(m) => m.visible = visible,
            None => self.entries.push(Monitor { kind, visible }),
        }
    }

    pub fn is_visible(&self, kind: MonitorKind) -> bool {
        self.entries
            .iter()
            .find(|m| m.kind == kind)
            .map(|m| m.visible)
            .unwrap_or(false)
    }

    pub fn visible_monitors(&self) -> impl Iterator<Item = &Monitor> {
        self.entries.iter().filter(|m| m.visible)
    }

    /// Evaluate a monitor against current project state.
    pub fn value(&self, project: &Project, kind: MonitorKind) -> Value {
        match kind {
            MonitorKind::Variable { target, slot } => project
                .target(target)
                .variables
                .get(slot)
                .map(|v| v.value.clone())
                .unwrap_or_else(Value::empty),
            MonitorKind::List { target, slot } => project
                .target(target)
                .lists
                .get(slot)
                .map(|l| Value::from(cast::list_contents(&l.items)))
                .unwrap_or_else(Value::empty),
        }
    }
}
