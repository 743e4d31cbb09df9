//! sb3-run: compile and run a Scratch 3 project headless
//!
//! Takes a `project.json` path or a directory containing one (sb3
//! archives are unzipped by whatever fetched the project — this
//! binary only reads the JSON), compiles it, fires the green flag and
//! ticks the scheduler until every thread retires or the frame budget
//! runs out. Variable values print at exit, which is enough to script
//! against.
//!
//! Logging goes through `tracing`; set `SB3_LOG` (e.g.
//! `SB3_LOG=sb3_compiler=debug`) to see compile-time skips and
//! scheduler events.

use clap::Parser;
use sb3_core::Value;
use sb3_runtime::{CloudStore, Runtime, RuntimeConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum LoadError {
    Io(PathBuf, std::io::Error),
    NoProjectJson(PathBuf),
    Compile(sb3_compiler::CompileError),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io(path, e) => write!(f, "failed to read {}: {}", path.display(), e),
            LoadError::NoProjectJson(path) => {
                write!(f, "no project.json found under {}", path.display())
            }
            LoadError::Compile(e) => write!(f, "compile failed: {}", e),
        }
    }
}

impl std::error::Error for LoadError {}

/// Run a Scratch 3 project without a stage window.
#[derive(Parser, Debug)]
#[command(name = "sb3-run", version, about)]
struct Args {
    /// Path to project.json or a directory containing one
    project: PathBuf,

    /// Maximum number of logical frames to run
    #[arg(long, default_value_t = 36_000)]
    max_frames: u64,

    /// RNG seed for deterministic runs (overrides SB3_SEED)
    #[arg(long)]
    seed: Option<u64>,

    /// File to persist cloud variables into (JSON object)
    #[arg(long)]
    cloud_file: Option<PathBuf>,

    /// Print every variable instead of just stage globals
    #[arg(long)]
    all_variables: bool,

    /// Emit a machine-readable JSON run report instead of plain text
    #[arg(long)]
    json: bool,

    /// Pace frames at the configured frame rate instead of running
    /// as fast as possible
    #[arg(long)]
    realtime: bool,
}

/// Run summary for `--json` output.
#[derive(serde::Serialize)]
struct RunReport {
    frames: u64,
    threads_spawned: u64,
    threads_retired: u64,
    peak_live_threads: usize,
    finished: bool,
    variables: BTreeMap<String, String>,
}

impl RunReport {
    fn collect(rt: &Runtime, frames: u64) -> RunReport {
        let mut variables = BTreeMap::new();
        for target in &rt.project.targets {
            for v in &target.variables {
                variables.insert(v.name.clone(), sb3_core::cast::to_string(&v.value));
            }
            for l in &target.lists {
                variables.insert(l.name.clone(), sb3_core::cast::list_contents(&l.items));
            }
        }
        RunReport {
            frames,
            threads_spawned: rt.stats.spawned,
            threads_retired: rt.stats.retired,
            peak_live_threads: rt.stats.peak_live,
            finished: !rt.running(),
            variables,
        }
    }
}

/// Cloud store that rewrites a JSON file on every flush.
struct FileCloud {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileCloud {
    fn new(path: PathBuf) -> FileCloud {
        FileCloud {
            path,
            values: BTreeMap::new(),
        }
    }
}

impl CloudStore for FileCloud {
    fn save(&mut self, id: &str, value: &Value) {
        self.values
            .insert(id.to_string(), sb3_core::cast::to_string(value));
        match serde_json::to_string_pretty(&self.values) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    tracing::warn!("cloud file write failed: {}", e);
                }
            }
            Err(e) => tracing::warn!("cloud serialization failed: {}", e),
        }
    }
}

fn resolve_project_path(path: &Path) -> Result<PathBuf, LoadError> {
    if path.is_dir() {
        let candidate = path.join("project.json");
        if candidate.is_file() {
            return Ok(candidate);
        }
        return Err(LoadError::NoProjectJson(path.to_path_buf()));
    }
    Ok(path.to_path_buf())
}

fn load(args: &Args) -> Result<Runtime, LoadError> {
    let json_path = resolve_project_path(&args.project)?;
    let source = std::fs::read_to_string(&json_path)
        .map_err(|e| LoadError::Io(json_path.clone(), e))?;
    let compiled = sb3_compiler::compile_str(&source).map_err(LoadError::Compile)?;
    info!(
        scripts = compiled.program.scripts.len(),
        procedures = compiled.program.procedures.len(),
        targets = compiled.project.targets.len(),
        "compiled project"
    );

    let mut config = RuntimeConfig::from_env();
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    let mut rt = Runtime::new(compiled, config);
    if let Some(cloud_path) = &args.cloud_file {
        rt = rt.with_cloud_store(Box::new(FileCloud::new(cloud_path.clone())));
    }
    Ok(rt)
}

fn print_variables(rt: &Runtime, all: bool) {
    for target in &rt.project.targets {
        if !all && !target.is_stage {
            continue;
        }
        for v in &target.variables {
            println!("{} = {}", v.name, v.value);
        }
        for l in &target.lists {
            println!("{} = [{}]", l.name, sb3_core::cast::list_contents(&l.items));
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SB3_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let mut rt = match load(&args) {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("sb3-run: {}", e);
            std::process::exit(1);
        }
    };

    rt.green_flag();
    let frames = if args.realtime {
        let frame = std::time::Duration::from_secs_f64(rt.config.frame_secs());
        let mut executed = 0;
        while rt.running() && executed < args.max_frames {
            rt.tick();
            executed += 1;
            std::thread::sleep(frame);
        }
        executed
    } else {
        rt.run(args.max_frames)
    };
    info!(
        frames,
        spawned = rt.stats.spawned,
        retired = rt.stats.retired,
        peak = rt.stats.peak_live,
        "run finished"
    );
    if args.json {
        let report = RunReport::collect(&rt, frames);
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("sb3-run: report serialization failed: {}", e),
        }
        return;
    }
    if rt.running() {
        eprintln!(
            "sb3-run: stopped after {} frames with {} threads still live",
            frames,
            rt.live_thread_count()
        );
    }
    print_variables(&rt, args.all_variables);
}
