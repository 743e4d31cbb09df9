//! sb3-runtime: cooperative execution of compiled Scratch projects
//!
//! The compiler crate produces bytecode; this crate runs it. The
//! [`Runtime`] owns the mutable project state, the logical thread set
//! and every collaborator handle (clock, cloud store, audio engine,
//! input snapshot), and steps threads cooperatively one tick at a
//! time.
//!
//! A minimal embedding:
//!
//! ```no_run
//! use sb3_runtime::{Runtime, RuntimeConfig};
//!
//! let compiled = sb3_compiler::compile_str("{ ... }").unwrap();
//! let mut rt = Runtime::new(compiled, RuntimeConfig::from_env());
//! rt.green_flag();
//! rt.run(10_000);
//! ```

pub mod blocks;
pub mod clock;
pub mod cloud;
pub mod config;
pub mod interp;
pub mod monitor;
pub mod scheduler;
pub mod thread;

pub use blocks::sensing::InputSnapshot;
pub use blocks::sound::{AudioEngine, NullAudio};
pub use clock::{Clock, MockClock, RealClock};
pub use cloud::{CloudStore, MemoryCloud, NullCloud};
pub use config::RuntimeConfig;
pub use monitor::{MonitorKind, MonitorManager};
pub use scheduler::{Runtime, SchedulerStats};
pub use thread::{Thread, ThreadStatus};
