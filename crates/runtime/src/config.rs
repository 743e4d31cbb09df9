//! Runtime configuration
//!
//! Loaded from environment variables in the usual way; the CLI layers
//! its flags on top. Invalid values warn and fall back to defaults
//! rather than failing startup.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SB3_STUCK_BUDGET_MS` | `500` | Continuous-execution budget before a forced yield |
//! | `SB3_FRAME_RATE` | `30` | Logical frames per second |
//! | `SB3_CLONE_CAP` | `300` | Global live-clone limit |
//! | `SB3_SEED` | unset | RNG seed for deterministic replay |
//! | `SB3_USERNAME` | empty | Value of the `username` reporter |

use tracing::warn;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Wall-clock budget of continuous execution before the stuck
    /// detector forces a yield, in milliseconds
    pub stuck_budget_ms: u64,
    /// Logical frames per second (the tick length helpers assume)
    pub frame_rate: u32,
    /// Global cap on live clones
    pub clone_cap: usize,
    /// RNG seed; None seeds from entropy
    pub seed: Option<u64>,
    /// Reported by the `username` block
    pub username: String,
    /// Answer returned immediately by `ask and wait` when no embedder
    /// provides one; None parks the thread until an answer arrives
    pub auto_answer: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            stuck_budget_ms: 500,
            frame_rate: 30,
            clone_cap: 300,
            seed: None,
            username: String::new(),
            auto_answer: Some(String::new()),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(val) => match val.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("invalid {}={:?}, using default", key, val);
                default
            }
        },
        Err(_) => default,
    }
}

impl RuntimeConfig {
    /// Load configuration from `SB3_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = RuntimeConfig::default();
        RuntimeConfig {
            stuck_budget_ms: parse_env("SB3_STUCK_BUDGET_MS", defaults.stuck_budget_ms),
            frame_rate: {
                let rate: u32 = parse_env("SB3_FRAME_RATE", defaults.frame_rate);
                if rate == 0 {
                    warn!("SB3_FRAME_RATE=0 is invalid, using default");
                    defaults.frame_rate
                } else {
                    rate
                }
            },
            clone_cap: parse_env("SB3_CLONE_CAP", defaults.clone_cap),
            seed: std::env::var("SB3_SEED").ok().and_then(|s| s.parse().ok()),
            username: std::env::var("SB3_USERNAME").unwrap_or_default(),
            auto_answer: defaults.auto_answer,
        }
    }

    /// The stuck budget in seconds.
    pub fn stuck_budget_secs(&self) -> f64 {
        self.stuck_budget_ms as f64 / 1000.0
    }

    /// Length of one logical frame in seconds.
    pub fn frame_secs(&self) -> f64 {
        1.0 / self.frame_rate as f64
    }
}
