use crate::config::ConfigFragment;
use crate::error::{ConfigResult, ConfigurationError};
use crate::registry::ComponentRegistry;
use crate::time::TrainTime;
use serde::Serialize;
use std::fmt;

/// Learning-rate schedule applied on top of the optimizer.
pub trait Scheduler: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn warmup(&self) -> TrainTime;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstantWithWarmup {
    pub t_warmup: TrainTime,
}

impl ConstantWithWarmup {
    pub const NAME: &'static str = "constant_with_warmup";

    pub fn from_kwargs(kwargs: &ConfigFragment) -> ConfigResult<Self> {
        kwargs.deny_unknown(&["t_warmup"])?;
        Ok(Self { t_warmup: kwargs.require("t_warmup")? })
    }
}

impl Scheduler for ConstantWithWarmup {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn warmup(&self) -> TrainTime {
        self.t_warmup
    }
}

/// Linear warmup, then cosine decay down to `alpha_f` times the base rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CosineWithWarmup {
    pub t_warmup: TrainTime,
    pub alpha_f: f64,
}

impl CosineWithWarmup {
    pub const NAME: &'static str = "cosine_with_warmup";

    pub fn from_kwargs(kwargs: &ConfigFragment) -> ConfigResult<Self> {
        kwargs.deny_unknown(&["t_warmup", "alpha_f"])?;
        let scheduler = Self {
            t_warmup: kwargs.require("t_warmup")?,
            alpha_f: kwargs.get_or("alpha_f", 0.0)?,
        };
        if !(0.0..=1.0).contains(&scheduler.alpha_f) {
            return Err(ConfigurationError::invalid_argument(
                kwargs.scope(),
                "alpha_f",
                format!("must be in [0, 1], got {}", scheduler.alpha_f),
            ));
        }
        Ok(scheduler)
    }
}

impl Scheduler for CosineWithWarmup {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn warmup(&self) -> TrainTime {
        self.t_warmup
    }
}

pub fn register_builtins(registry: &mut ComponentRegistry<Box<dyn Scheduler>>) {
    registry.register(ConstantWithWarmup::NAME, |kwargs, _| {
        Ok(Box::new(ConstantWithWarmup::from_kwargs(kwargs)?) as Box<dyn Scheduler>)
    });
    registry.register(CosineWithWarmup::NAME, |kwargs, _| {
        Ok(Box::new(CosineWithWarmup::from_kwargs(kwargs)?) as Box<dyn Scheduler>)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigErrorKind;

    #[test]
    fn test_constant_with_warmup() {
        let kwargs = ConfigFragment::from_yaml_str("scheduler", "t_warmup: 100ba\n").unwrap();
        let scheduler = ConstantWithWarmup::from_kwargs(&kwargs).unwrap();
        assert_eq!(scheduler.warmup(), TrainTime::Batches(100));
    }

    #[test]
    fn test_cosine_alpha_range() {
        let ok = ConfigFragment::from_yaml_str("scheduler", "t_warmup: 0.1dur\nalpha_f: 0.1\n").unwrap();
        let scheduler = CosineWithWarmup::from_kwargs(&ok).unwrap();
        assert_eq!(scheduler.warmup(), TrainTime::Fraction(0.1));

        let bad = ConfigFragment::from_yaml_str("scheduler", "t_warmup: 10ba\nalpha_f: 1.5\n").unwrap();
        let err = CosineWithWarmup::from_kwargs(&bad).unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::InvalidArgument);
        assert!(err.to_string().contains("alpha_f"));
    }

    #[test]
    fn test_bad_warmup_unit() {
        let kwargs = ConfigFragment::from_yaml_str("scheduler", "t_warmup: 10parsecs\n").unwrap();
        let err = ConstantWithWarmup::from_kwargs(&kwargs).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidArgument { ref field, .. } if field == "t_warmup"));
    }
}
