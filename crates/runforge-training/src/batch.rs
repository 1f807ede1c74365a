//! Splitting a global batch across workers.
//!
//! The split must be exact: a global batch that does not divide evenly across
//! the world would silently drop samples or misalign workers, so it is a
//! configuration error rather than something to round away.

use crate::config::render_value;
use crate::error::{ConfigResult, ConfigurationError};
use serde::{Serialize, Serializer};
use serde_yaml::Value;
use std::fmt;
use tracing::warn;

/// Evaluation batch size used when training microbatching is `auto`.
pub const AUTO_EVAL_BATCH_SIZE: u64 = 1;

const AUTO: &str = "auto";

/// A value that is either concrete or left to the engine to pick at run time.
///
/// `Auto` is never a number: callers must branch on it instead of doing
/// arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaybeAuto<T> {
    Auto,
    Fixed(T),
}

impl<T: Copy> MaybeAuto<T> {
    #[must_use]
    pub fn fixed(&self) -> Option<T> {
        match self {
            Self::Auto => None,
            Self::Fixed(v) => Some(*v),
        }
    }

    #[must_use]
    pub fn is_auto(&self) -> bool {
        matches!(self, Self::Auto)
    }
}

impl<T: fmt::Display> fmt::Display for MaybeAuto<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str(AUTO),
            Self::Fixed(v) => v.fmt(f),
        }
    }
}

impl<T: Serialize> Serialize for MaybeAuto<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Auto => serializer.serialize_str(AUTO),
            Self::Fixed(v) => v.serialize(serializer),
        }
    }
}

impl From<MaybeAuto<u64>> for Value {
    fn from(value: MaybeAuto<u64>) -> Self {
        match value {
            MaybeAuto::Auto => Self::String(AUTO.to_string()),
            MaybeAuto::Fixed(v) => Self::from(v),
        }
    }
}

/// How one optimization step's samples are laid out over the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    pub global_batch_size: u64,
    pub world_size: u64,
    /// `global_batch_size / world_size`.
    pub device_batch_size: u64,
    pub device_microbatch_size: MaybeAuto<u64>,
    pub grad_accum: MaybeAuto<u64>,
    /// The configured microbatch size when it was larger than the device batch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clamped_from: Option<u64>,
}

/// Parse `device_train_microbatch_size`: a positive integer or the literal `auto`.
pub fn parse_microbatch(key: &str, value: &Value) -> ConfigResult<MaybeAuto<u64>> {
    match value {
        Value::String(s) if s == AUTO => Ok(MaybeAuto::Auto),
        Value::Number(n) => match n.as_u64() {
            Some(v) if v > 0 => Ok(MaybeAuto::Fixed(v)),
            _ => Err(ConfigurationError::unparsable(
                key,
                render_value(value),
                "expected a positive integer or \"auto\"",
            )),
        },
        _ => Err(ConfigurationError::unparsable(
            key,
            render_value(value),
            "expected a positive integer or \"auto\"",
        )),
    }
}

/// Compute the per-device batch layout.
///
/// A concrete microbatch larger than the device batch is clamped down to it
/// with a warning; one that does not divide the device batch is rejected.
pub fn partition(
    global_batch_size: u64,
    world_size: u64,
    device_microbatch_size: MaybeAuto<u64>,
) -> ConfigResult<BatchPlan> {
    if world_size == 0 {
        return Err(ConfigurationError::unparsable("world_size", "0", "world size must be at least 1"));
    }
    if global_batch_size == 0 {
        return Err(ConfigurationError::unparsable(
            "global_train_batch_size",
            "0",
            "expected a positive integer",
        ));
    }
    if global_batch_size % world_size != 0 {
        return Err(ConfigurationError::GlobalBatchDivisibility { global_batch_size, world_size });
    }
    let device_batch_size = global_batch_size / world_size;

    let (device_microbatch_size, grad_accum, clamped_from) = match device_microbatch_size {
        MaybeAuto::Auto => (MaybeAuto::Auto, MaybeAuto::Auto, None),
        MaybeAuto::Fixed(0) => {
            return Err(ConfigurationError::unparsable(
                "device_train_microbatch_size",
                "0",
                "expected a positive integer or \"auto\"",
            ));
        }
        MaybeAuto::Fixed(requested) if requested > device_batch_size => {
            warn!(
                requested,
                device_batch_size,
                "device_microbatch_size > device_batch_size, will be reduced from {requested} -> {device_batch_size}"
            );
            (MaybeAuto::Fixed(device_batch_size), MaybeAuto::Fixed(1), Some(requested))
        }
        MaybeAuto::Fixed(microbatch) => {
            if device_batch_size % microbatch != 0 {
                return Err(ConfigurationError::MicrobatchDivisibility {
                    device_batch_size,
                    microbatch_size: microbatch,
                });
            }
            (MaybeAuto::Fixed(microbatch), MaybeAuto::Fixed(device_batch_size / microbatch), None)
        }
    };

    Ok(BatchPlan {
        global_batch_size,
        world_size,
        device_batch_size,
        device_microbatch_size,
        grad_accum,
        clamped_from,
    })
}

/// Evaluation batch size: explicit if configured, else the training
/// microbatch, else [`AUTO_EVAL_BATCH_SIZE`] when that is `auto`.
pub fn eval_batch_size(configured: Option<u64>, plan: &BatchPlan) -> ConfigResult<u64> {
    match configured {
        Some(0) => Err(ConfigurationError::unparsable(
            "device_eval_batch_size",
            "0",
            "expected a positive integer",
        )),
        Some(size) => Ok(size),
        None => Ok(plan.device_microbatch_size.fixed().unwrap_or(AUTO_EVAL_BATCH_SIZE)),
    }
}
