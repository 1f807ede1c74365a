use crate::config::ConfigFragment;
use crate::error::{ConfigResult, ConfigurationError};
use crate::registry::ComponentRegistry;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A training-loop modification applied by the engine.
pub trait Algorithm: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClippingType {
    Adaptive,
    Norm,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GradientClipping {
    pub clipping_type: ClippingType,
    pub clipping_threshold: f64,
}

impl GradientClipping {
    pub const NAME: &'static str = "gradient_clipping";

    pub fn from_kwargs(kwargs: &ConfigFragment) -> ConfigResult<Self> {
        kwargs.deny_unknown(&["clipping_type", "clipping_threshold"])?;
        let algorithm = Self {
            clipping_type: kwargs.require("clipping_type")?,
            clipping_threshold: kwargs.require("clipping_threshold")?,
        };
        if !algorithm.clipping_threshold.is_finite() || algorithm.clipping_threshold <= 0.0 {
            return Err(ConfigurationError::invalid_argument(kwargs.scope(), "clipping_threshold", "must be > 0"));
        }
        Ok(algorithm)
    }
}

impl Algorithm for GradientClipping {
    fn name(&self) -> &str {
        Self::NAME
    }
}

pub fn register_builtins(registry: &mut ComponentRegistry<Box<dyn Algorithm>>) {
    registry.register(GradientClipping::NAME, |kwargs, _| {
        Ok(Box::new(GradientClipping::from_kwargs(kwargs)?) as Box<dyn Algorithm>)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gradient_clipping() {
        let kwargs = ConfigFragment::from_yaml_str(
            "algorithm 'gradient_clipping'",
            "clipping_type: norm\nclipping_threshold: 1.0\n",
        )
        .unwrap();
        let algorithm = GradientClipping::from_kwargs(&kwargs).unwrap();
        assert_eq!(algorithm.clipping_type, ClippingType::Norm);
    }

    #[test]
    fn test_gradient_clipping_rejects_bad_values() {
        for bad in [
            "clipping_type: clamp\nclipping_threshold: 1.0\n",
            "clipping_type: value\nclipping_threshold: 0\n",
            "clipping_type: adaptive\nclipping_threshold: 0.5\nextra: 1\n",
            "clipping_threshold: 1.0\n",
        ] {
            let kwargs = ConfigFragment::from_yaml_str("algorithm 'gradient_clipping'", bad).unwrap();
            assert!(GradientClipping::from_kwargs(&kwargs).is_err(), "{bad}");
        }
    }
}
