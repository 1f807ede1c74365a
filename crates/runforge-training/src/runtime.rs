//! Process-level collaborators: the distributed world and the RNG seed.

use crate::error::{ConfigResult, ConfigurationError};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Seeds the process-wide random state.
pub trait Reproducibility: Send + Sync {
    fn seed_all(&self, seed: u64);
}

static PROCESS_SEED: OnceLock<u64> = OnceLock::new();

/// Records the seed once per process for the engine's RNGs to pick up.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSeed;

impl ProcessSeed {
    /// The seed applied in this process, if any.
    #[must_use]
    pub fn current() -> Option<u64> {
        PROCESS_SEED.get().copied()
    }
}

impl Reproducibility for ProcessSeed {
    fn seed_all(&self, seed: u64) {
        let applied = *PROCESS_SEED.get_or_init(|| seed);
        if applied == seed {
            debug!(seed, "seeded process random state");
        } else {
            warn!(seed, applied, "process random state already seeded, ignoring new seed");
        }
    }
}

/// The set of cooperating workers this process belongs to.
pub trait DistributedRuntime: Send + Sync {
    fn world_size(&self) -> u64;

    fn global_rank(&self) -> u64;
}

pub const WORLD_SIZE_ENV: &str = "WORLD_SIZE";
pub const RANK_ENV: &str = "RANK";

/// World read from the launcher's `WORLD_SIZE` / `RANK` variables. A single
/// process when they are unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvDistributed {
    world_size: u64,
    global_rank: u64,
}

impl EnvDistributed {
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let read = |key: &str, default: u64| -> ConfigResult<u64> {
            match lookup(key) {
                None => Ok(default),
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigurationError::unparsable(key, raw.clone(), "expected a non-negative integer")),
            }
        };
        let world_size = read(WORLD_SIZE_ENV, 1)?;
        if world_size == 0 {
            return Err(ConfigurationError::unparsable(WORLD_SIZE_ENV, "0", "world size must be at least 1"));
        }
        let global_rank = read(RANK_ENV, 0)?;
        if global_rank >= world_size {
            return Err(ConfigurationError::unparsable(
                RANK_ENV,
                global_rank.to_string(),
                format!("rank must be below world size {world_size}"),
            ));
        }
        Ok(Self { world_size, global_rank })
    }
}

impl DistributedRuntime for EnvDistributed {
    fn world_size(&self) -> u64 {
        self.world_size
    }

    fn global_rank(&self) -> u64 {
        self.global_rank
    }
}

/// A fixed world, for tests and single-node tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticWorld {
    pub world_size: u64,
    pub global_rank: u64,
}

impl StaticWorld {
    #[must_use]
    pub fn new(world_size: u64) -> Self {
        Self { world_size, global_rank: 0 }
    }
}

impl DistributedRuntime for StaticWorld {
    fn world_size(&self) -> u64 {
        self.world_size
    }

    fn global_rank(&self) -> u64 {
        self.global_rank
    }
}
