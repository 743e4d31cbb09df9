//! Runtime and scheduler
//!
//! Single-threaded cooperative scheduling over logical thread records.
//! One tick (~1/30 s logical frame) steps every live thread in a
//! stable order: stage first, then sprites in project order with each
//! sprite's clones right behind it; within a target, scripts run in
//! project order. A thread executes until it yields; warp threads run
//! straight through, bounded only by stuck detection.
//!
//! Broadcast fan-out is synchronous — threads exist the moment the
//! broadcast happens — but spawned threads never run inside the
//! broadcaster's remaining slice; they get their first step later in
//! the same tick, after the threads that were already scheduled.
//!
//! Lifecycle statistics (spawned / retired / peak live) are tracked
//! for diagnostics; reading them never perturbs scheduling.

use crate::blocks::sensing::InputSnapshot;
use crate::blocks::sound::{AudioEngine, NullAudio};
use crate::clock::{Clock, RealClock};
use crate::cloud::{CloudBuffer, CloudStore, NullCloud};
use crate::config::RuntimeConfig;
use crate::interp;
use crate::monitor::MonitorManager;
use crate::thread::Thread;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sb3_compiler::codegen::{CompiledProgram, CompiledProject};
use sb3_compiler::ir::{GreaterThanKind, HatKind, ListSlot, VarScope, VarSlot};
use sb3_core::{Project, TargetId, Value};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, warn};

/// Scheduler lifecycle counters.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub spawned: u64,
    pub retired: u64,
    pub peak_live: usize,
    pub ticks: u64,
}

/// The runtime: compiled program, mutable project state, thread set,
/// and every collaborator handle. Passed explicitly everywhere — there
/// are no ambient globals.
pub struct Runtime {
    pub program: Arc<CompiledProgram>,
    pub project: Project,
    pub config: RuntimeConfig,
    pub clock: Rc<dyn Clock>,
    pub rng: StdRng,
    pub threads: Vec<Thread>,
    pub monitors: MonitorManager,
    pub cloud: CloudBuffer,
    pub cloud_store: Box<dyn CloudStore>,
    pub audio: Box<dyn AudioEngine>,
    pub input: InputSnapshot,
    pub redraw_requested: bool,
    pub timer_start: f64,
    /// Last `ask and wait` answer
    pub answer: String,
    /// Answer submitted by the embedder, consumed by the next ask
    pub pending_answer: Option<String>,
    pub stats: SchedulerStats,
    next_thread_id: u64,
    /// Rising-edge state per script for when-greater-than hats
    edge_state: Vec<bool>,
}

impl Runtime {
    pub fn new(compiled: CompiledProject, config: RuntimeConfig) -> Runtime {
        let script_count = compiled.program.scripts.len();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Runtime {
            program: Arc::new(compiled.program),
            project: compiled.project,
            config,
            clock: Rc::new(RealClock::new()),
            rng,
            threads: Vec::new(),
            monitors: MonitorManager::default(),
            cloud: CloudBuffer::default(),
            cloud_store: Box::new(NullCloud),
            audio: Box::new(NullAudio),
            input: InputSnapshot::default(),
            redraw_requested: false,
            timer_start: 0.0,
            answer: String::new(),
            pending_answer: None,
            stats: SchedulerStats::default(),
            next_thread_id: 1,
            edge_state: vec![false; script_count],
        }
    }

    pub fn with_clock(mut self, clock: Rc<dyn Clock>) -> Runtime {
        self.timer_start = clock.now();
        self.clock = clock;
        self
    }

    pub fn with_cloud_store(mut self, store: Box<dyn CloudStore>) -> Runtime {
        self.cloud_store = store;
        self
    }

    pub fn with_audio(mut self, audio: Box<dyn AudioEngine>) -> Runtime {
        self.audio = audio;
        self
    }

    // ------------------------------------------------------------------
    // Variable and list access
    // ------------------------------------------------------------------

    /// Resolve a compiled slot against the executing target: stage
    /// slots go to the stage, sprite slots to the clone's originator.
    pub fn var_location(&self, slot: VarSlot, current: TargetId) -> (TargetId, usize) {
        match slot.scope {
            VarScope::Stage => (self.project.stage_id().unwrap_or(TargetId(0)), slot.index),
            VarScope::Sprite => (self.project.var_home(current), slot.index),
        }
    }

    pub fn list_location(&self, slot: ListSlot, current: TargetId) -> (TargetId, usize) {
        match slot.scope {
            VarScope::Stage => (self.project.stage_id().unwrap_or(TargetId(0)), slot.index),
            VarScope::Sprite => (self.project.var_home(current), slot.index),
        }
    }

    pub fn read_var(&self, slot: VarSlot, current: TargetId) -> Value {
        let (home, index) = self.var_location(slot, current);
        self.project.target(home).variables[index].value.clone()
    }

    /// Write a variable; cloud-flagged slots also buffer a push to the
    /// storage collaborator (coalesced per id, flushed at tick end).
    pub fn write_var(&mut self, slot: VarSlot, current: TargetId, value: Value) {
        let (home, index) = self.var_location(slot, current);
        let var = &mut self.project.target_mut(home).variables[index];
        var.value = value.clone();
        if var.is_cloud {
            let id = var.id.clone();
            self.cloud.push(&id, value);
        }
    }

    /// Convenience for tests and monitors: first variable anywhere with
    /// this name.
    pub fn global_variable(&self, name: &str) -> Option<Value> {
        self.project
            .targets
            .iter()
            .flat_map(|t| t.variables.iter())
            .find(|v| v.name == name)
            .map(|v| v.value.clone())
    }

    /// Convenience for tests: first list anywhere with this name.
    pub fn global_list(&self, name: &str) -> Option<Vec<Value>> {
        self.project
            .targets
            .iter()
            .flat_map(|t| t.lists.iter())
            .find(|l| l.name == name)
            .map(|l| l.items.clone())
    }

    // ------------------------------------------------------------------
    // Thread lifecycle
    // ------------------------------------------------------------------

    /// Start (or restart) the script's thread on a target. A hat
    /// firing while its thread is live rewinds that thread instead of
    /// stacking a second instance.
    pub fn spawn_script(&mut self, script_index: usize, target: TargetId) -> u64 {
        if let Some(existing) = self.threads.iter_mut().find(|t| {
            t.id != 0 && t.script == script_index && t.target == target && t.status.is_live()
        }) {
            existing.restart();
            return existing.id;
        }
        let script = &self.program.scripts[script_index];
        let id = self.next_thread_id;
        self.next_thread_id += 1;
        self.threads
            .push(Thread::new(id, target, script_index, script.chunk));
        self.stats.spawned += 1;
        let live = self.threads.iter().filter(|t| t.status.is_live()).count();
        self.stats.peak_live = self.stats.peak_live.max(live);
        id
    }

    /// All live targets executing a compile-time target's scripts:
    /// the original plus its clones.
    fn targets_for(&self, script_target: usize) -> Vec<TargetId> {
        self.project
            .targets
            .iter()
            .enumerate()
            .filter(|(_, t)| t.alive && t.script_target == script_target)
            .map(|(i, _)| TargetId(i))
            .collect()
    }

    /// Spawn every script whose hat matches `pred`, in project order.
    /// Returns the started thread ids.
    fn spawn_matching(&mut self, pred: impl Fn(&HatKind) -> bool) -> Vec<u64> {
        let mut ids = Vec::new();
        for si in 0..self.program.scripts.len() {
            let script = &self.program.scripts[si];
            if !pred(&script.hat) {
                continue;
            }
            let script_target = script.target;
            for target in self.targets_for(script_target) {
                ids.push(self.spawn_script(si, target));
            }
        }
        ids
    }

    pub fn running(&self) -> bool {
        self.threads.iter().any(|t| t.status.is_live())
    }

    pub fn live_thread_count(&self) -> usize {
        self.threads.iter().filter(|t| t.status.is_live()).count()
    }

    pub fn all_retired(&self, ids: &[u64]) -> bool {
        ids.iter().all(|id| {
            self.threads
                .iter()
                .find(|t| t.id == *id)
                .map(|t| !t.status.is_live())
                .unwrap_or(true)
        })
    }

    /// Retire every thread and drop pending broadcast joins. Compiled
    /// scripts stay loaded.
    pub fn stop_all(&mut self) {
        for t in &mut self.threads {
            if t.status.is_live() {
                t.retire();
                self.stats.retired += 1;
            }
        }
    }

    /// Retire sibling threads on the same target, keeping `except`.
    pub fn stop_other_scripts(&mut self, target: TargetId, except: u64) {
        for t in &mut self.threads {
            if t.target == target && t.id != except && t.status.is_live() {
                t.retire();
                self.stats.retired += 1;
            }
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Green flag: stop everything, delete clones, reset the timer,
    /// start every flag hat in project order.
    pub fn green_flag(&mut self) {
        self.stop_all();
        for t in &mut self.project.targets {
            if t.is_clone {
                t.alive = false;
            }
        }
        self.timer_start = self.clock.now();
        self.edge_state.iter_mut().for_each(|s| *s = false);
        self.spawn_matching(|hat| matches!(hat, HatKind::FlagClicked));
        debug!(threads = self.live_thread_count(), "green flag");
    }

    /// Fire broadcast hats. Public entry: no self-restart bookkeeping.
    pub fn broadcast(&mut self, name: &str) -> Vec<u64> {
        self.broadcast_from(name, None).0
    }

    /// Broadcast with the executing thread's identity, so a broadcast
    /// that matches the broadcaster's own hat restarts it (the caller
    /// observes `true` and stops executing the current slice).
    pub fn broadcast_from(
        &mut self,
        name: &str,
        current: Option<(usize, TargetId, u64)>,
    ) -> (Vec<u64>, bool) {
        let wanted = name.to_lowercase();
        let mut self_restart = false;
        let mut ids = Vec::new();
        for si in 0..self.program.scripts.len() {
            let script = &self.program.scripts[si];
            let HatKind::BroadcastReceived { name: hat_name } = &script.hat else {
                continue;
            };
            if hat_name != &wanted {
                continue;
            }
            let script_target = script.target;
            for target in self.targets_for(script_target) {
                if let Some((cur_script, cur_target, _)) = current {
                    if cur_script == si && cur_target == target {
                        self_restart = true;
                        continue;
                    }
                }
                ids.push(self.spawn_script(si, target));
            }
        }
        (ids, self_restart)
    }

    /// Fire backdrop-switch hats for the new backdrop name.
    pub fn backdrop_switched(&mut self, backdrop: &str) -> Vec<u64> {
        let wanted = backdrop.to_string();
        self.spawn_matching(move |hat| {
            matches!(hat, HatKind::BackdropSwitchesTo { backdrop }
                if backdrop.eq_ignore_ascii_case(&wanted))
        })
    }

    /// Key-down event from the embedder.
    pub fn key_event(&mut self, key: &str) {
        let wanted = key.to_lowercase();
        self.spawn_matching(move |hat| {
            matches!(hat, HatKind::KeyPressed { key }
                if key.eq_ignore_ascii_case(&wanted) || key.as_str() == "any")
        });
    }

    /// Click event on a target (sprite or stage).
    pub fn clicked(&mut self, target: TargetId) {
        let is_stage = self.project.target(target).is_stage;
        let script_target = self.project.target(target).script_target;
        let mut to_spawn = Vec::new();
        for (si, script) in self.program.scripts.iter().enumerate() {
            let matches = if is_stage {
                matches!(script.hat, HatKind::StageClicked)
            } else {
                matches!(script.hat, HatKind::SpriteClicked)
            };
            if matches && script.target == script_target {
                to_spawn.push(si);
            }
        }
        for si in to_spawn {
            self.spawn_script(si, target);
        }
    }

    /// Answer the pending `ask and wait`.
    pub fn submit_answer(&mut self, text: impl Into<String>) {
        self.pending_answer = Some(text.into());
    }

    /// Hide every sprite (project-unload / presentation reset hook).
    pub fn hide_all_sprites(&mut self) {
        for t in &mut self.project.targets {
            if !t.is_stage {
                t.visible = false;
            }
        }
        self.redraw_requested = true;
    }

    // ------------------------------------------------------------------
    // Clones
    // ------------------------------------------------------------------

    /// Create a clone of `name` (`"_myself_"` for the current target).
    /// Enforces the global cap; starts the clone's start-as-clone hats.
    pub fn create_clone_from(&mut self, current: TargetId, name: &str) -> Option<TargetId> {
        let original = if name == "_myself_" {
            Some(current)
        } else {
            self.project.find_target_by_name(name)
        }?;
        if self.project.target(original).is_stage {
            return None;
        }
        if self.project.live_clone_count() >= self.config.clone_cap {
            warn!(cap = self.config.clone_cap, "clone cap reached");
            return None;
        }
        let clone = self.project.make_clone(original);
        let script_target = self.project.target(clone).script_target;
        let mut to_spawn = Vec::new();
        for (si, script) in self.program.scripts.iter().enumerate() {
            if matches!(script.hat, HatKind::StartAsClone) && script.target == script_target {
                to_spawn.push(si);
            }
        }
        for si in to_spawn {
            self.spawn_script(si, clone);
        }
        Some(clone)
    }

    /// Delete a clone: tombstone the target and retire its threads.
    pub fn delete_clone_target(&mut self, clone: TargetId) {
        self.project.delete_clone(clone);
        for t in &mut self.threads {
            if t.target == clone && t.status.is_live() {
                t.retire();
                self.stats.retired += 1;
            }
        }
    }

    // ------------------------------------------------------------------
    // The tick
    // ------------------------------------------------------------------

    /// Stable step order over currently live threads: target execution
    /// order, then script project order, then spawn order.
    fn schedule_order(&self) -> Vec<usize> {
        let ranks: HashMap<TargetId, usize> = self
            .project
            .execution_order()
            .into_iter()
            .enumerate()
            .map(|(rank, id)| (id, rank))
            .collect();
        let mut order: Vec<usize> = (0..self.threads.len())
            .filter(|&i| self.threads[i].status.is_live())
            .collect();
        order.sort_by_key(|&i| {
            let t = &self.threads[i];
            let target_rank = ranks.get(&t.target).copied().unwrap_or(usize::MAX);
            let script_order = self
                .program
                .scripts
                .get(t.script)
                .map(|s| s.order)
                .unwrap_or(usize::MAX);
            (target_rank, script_order, t.id)
        });
        order
    }

    fn step_index(&mut self, index: usize) {
        if !self.threads[index].status.is_live() {
            return;
        }
        let mut thread = std::mem::take(&mut self.threads[index]);
        let was_live = thread.status.is_live();
        interp::step(self, &mut thread);
        if was_live && !thread.status.is_live() {
            self.stats.retired += 1;
        }
        self.threads[index] = thread;
    }

    /// Rising-edge check for when-greater-than hats.
    fn check_edge_hats(&mut self) {
        for si in 0..self.program.scripts.len() {
            let HatKind::GreaterThan { what, threshold } = self.program.scripts[si].hat else {
                continue;
            };
            let value = match what {
                GreaterThanKind::Timer => crate::blocks::sensing::timer(self),
                GreaterThanKind::Loudness => self.input.loudness,
            };
            let above = value > threshold;
            if above && !self.edge_state[si] {
                let script_target = self.program.scripts[si].target;
                for target in self.targets_for(script_target) {
                    self.spawn_script(si, target);
                }
            }
            self.edge_state[si] = above;
        }
    }

    /// One logical frame: step every live thread once in stable order,
    /// then give threads spawned during the tick their first slice,
    /// then flush collaborator queues.
    pub fn tick(&mut self) {
        self.stats.ticks += 1;
        self.check_edge_hats();
        let order = self.schedule_order();
        let before = self.threads.len();
        for index in order {
            self.step_index(index);
        }
        let mut index = before;
        while index < self.threads.len() {
            self.step_index(index);
            index += 1;
        }
        self.cloud.drain_into(&mut *self.cloud_store);
    }

    /// Tick until no thread is live, up to `max_ticks`. Returns the
    /// number of ticks executed.
    pub fn run(&mut self, max_ticks: u64) -> u64 {
        let mut executed = 0;
        while self.running() && executed < max_ticks {
            self.tick();
            executed += 1;
        }
        executed
    }
}
