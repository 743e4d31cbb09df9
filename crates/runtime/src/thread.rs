//! Thread records
//!
//! Threads are logical records, not OS threads: one per running script
//! instance, stepped cooperatively by the scheduler. A thread's whole
//! execution state is here — frame stack, operand stack, resume index —
//! so suspending is just returning to the scheduler and resuming is
//! picking up at the saved program counter.
//!
//! Status transitions are monotonic within one step: a stepped thread
//! goes `Active` → one of the suspended states or `Retired`, and a
//! retired thread is never stepped again.

use sb3_core::{TargetId, Value};

/// Scheduling status of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadStatus {
    /// Currently executing instructions (only during a step)
    Active,
    /// Gave up its slice at a loop boundary or explicit yield
    Yielded,
    /// Parked on a wall-clock deadline (wait, glide, say-for-secs)
    Sleeping,
    /// Forced out by the stuck detector
    StuckWait,
    /// Parked until joined threads retire (broadcast-and-wait,
    /// backdrop-switch-and-wait)
    BroadcastWait,
    /// Terminal; removed from scheduling
    #[default]
    Retired,
}

impl ThreadStatus {
    pub fn is_live(self) -> bool {
        self != ThreadStatus::Retired
    }
}

/// One entry of the call stack: a chunk being executed.
#[derive(Debug, Clone)]
pub struct Frame {
    pub chunk: usize,
    pub pc: usize,
    /// Procedure arguments, by declaration position
    pub args: Vec<Value>,
    /// Operand-stack height at entry; Return truncates back to it
    pub stack_base: usize,
    /// Whether this call pushed a warp level (restored on return)
    pub warp_entered: bool,
}

/// Saved state of a timed helper being re-entered across steps.
#[derive(Debug, Clone)]
pub enum ResumeState {
    /// Plain deadline wait (say-for-secs, play-until-done)
    Timed { deadline: f64 },
    /// Glide interpolation between two points
    Glide {
        start: f64,
        duration: f64,
        from: (f64, f64),
        to: (f64, f64),
    },
    /// An `ask and wait` whose answer has not arrived yet
    Asked,
}

/// A cooperative thread.
#[derive(Debug, Clone, Default)]
pub struct Thread {
    pub id: u64,
    /// Runtime target this thread acts on (a clone runs its own copy)
    pub target: TargetId,
    /// Index of the compiled script, for stable ordering and restarts
    pub script: usize,
    pub status: ThreadStatus,
    pub frames: Vec<Frame>,
    /// Operand stack, shared by all frames (frames record their base)
    pub stack: Vec<Value>,
    /// Warp nesting depth; non-zero suppresses loop yields
    pub warp: u32,
    /// Wall-clock deadline for `wait`-style spins
    pub wait_deadline: Option<f64>,
    /// Thread ids this thread joins on before continuing
    pub join: Option<Vec<u64>>,
    /// Timed-helper state for the instruction being re-entered
    pub resume: Option<ResumeState>,
    /// When the current step started (stuck detection)
    pub step_start: f64,
}

impl Thread {
    /// A fresh thread parked at the entry of `chunk`.
    pub fn new(id: u64, target: TargetId, script: usize, chunk: usize) -> Thread {
        Thread {
            id,
            target,
            script,
            status: ThreadStatus::Yielded,
            frames: vec![Frame {
                chunk,
                pc: 0,
                args: Vec::new(),
                stack_base: 0,
                warp_entered: false,
            }],
            ..Thread::default()
        }
    }

    /// Reset to the entry point, keeping id and scheduling identity.
    /// Used when a hat re-fires while its thread is still live.
    pub fn restart(&mut self) {
        let chunk = self.frames.first().map(|f| f.chunk).unwrap_or(0);
        self.frames.clear();
        self.frames.push(Frame {
            chunk,
            pc: 0,
            args: Vec::new(),
            stack_base: 0,
            warp_entered: false,
        });
        self.stack.clear();
        self.status = ThreadStatus::Yielded;
        self.warp = 0;
        self.wait_deadline = None;
        self.join = None;
        self.resume = None;
    }

    /// Terminal stop: unwind every pending frame cleanly.
    pub fn retire(&mut self) {
        self.status = ThreadStatus::Retired;
        self.frames.clear();
        self.stack.clear();
        self.warp = 0;
        self.wait_deadline = None;
        self.join = None;
        self.resume = None;
    }
}
