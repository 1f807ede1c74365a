use crate::config::ConfigFragment;
use crate::error::{ConfigResult, ConfigurationError};
use crate::registry::ComponentRegistry;
use serde::Serialize;
use std::fmt;

/// Observer hooked into the training loop by the engine.
pub trait Callback: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;
}

/// Reports the learning rate of every parameter group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LrMonitor;

impl LrMonitor {
    pub const NAME: &'static str = "lr_monitor";
}

impl Callback for LrMonitor {
    fn name(&self) -> &str {
        Self::NAME
    }
}

/// Reports device memory statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryMonitor;

impl MemoryMonitor {
    pub const NAME: &'static str = "memory_monitor";
}

impl Callback for MemoryMonitor {
    fn name(&self) -> &str {
        Self::NAME
    }
}

/// Reports throughput averaged over the last `window_size` batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpeedMonitor {
    pub window_size: u64,
}

impl SpeedMonitor {
    pub const NAME: &'static str = "speed_monitor";

    pub fn from_kwargs(kwargs: &ConfigFragment) -> ConfigResult<Self> {
        kwargs.deny_unknown(&["window_size"])?;
        let window_size = kwargs.get_or("window_size", 1)?;
        if window_size == 0 {
            return Err(ConfigurationError::invalid_argument(kwargs.scope(), "window_size", "must be >= 1"));
        }
        Ok(Self { window_size })
    }
}

impl Callback for SpeedMonitor {
    fn name(&self) -> &str {
        Self::NAME
    }
}

/// Reports gradient norms, and optimizer state metrics when asked to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OptimizerMonitor {
    pub log_optimizer_metrics: Option<bool>,
}

impl OptimizerMonitor {
    pub const NAME: &'static str = "optimizer_monitor";

    pub fn from_kwargs(kwargs: &ConfigFragment) -> ConfigResult<Self> {
        kwargs.deny_unknown(&["log_optimizer_metrics"])?;
        Ok(Self { log_optimizer_metrics: kwargs.optional("log_optimizer_metrics")? })
    }
}

impl Callback for OptimizerMonitor {
    fn name(&self) -> &str {
        Self::NAME
    }
}

pub fn register_builtins(registry: &mut ComponentRegistry<Box<dyn Callback>>) {
    registry.register(LrMonitor::NAME, |_, _| Ok(Box::new(LrMonitor) as Box<dyn Callback>));
    registry.register(MemoryMonitor::NAME, |_, _| Ok(Box::new(MemoryMonitor) as Box<dyn Callback>));
    registry.register(SpeedMonitor::NAME, |kwargs, _| {
        Ok(Box::new(SpeedMonitor::from_kwargs(kwargs)?) as Box<dyn Callback>)
    });
    registry.register(OptimizerMonitor::NAME, |kwargs, _| {
        Ok(Box::new(OptimizerMonitor::from_kwargs(kwargs)?) as Box<dyn Callback>)
    });
}
