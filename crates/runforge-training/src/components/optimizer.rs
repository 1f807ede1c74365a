use crate::components::Model;
use crate::config::ConfigFragment;
use crate::error::{ConfigResult, ConfigurationError};
use crate::registry::ComponentRegistry;
use serde::Serialize;
use std::fmt;

pub trait Optimizer: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn learning_rate(&self) -> f64;

    /// Number of parameters this optimizer updates.
    fn num_parameters(&self) -> u64;
}

/// AdamW with weight decay decoupled from the learning rate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecoupledAdamW {
    pub lr: f64,
    pub betas: (f64, f64),
    pub eps: f64,
    pub weight_decay: f64,
    pub num_parameters: u64,
}

impl DecoupledAdamW {
    pub const NAME: &'static str = "decoupled_adamw";

    pub fn from_kwargs(kwargs: &ConfigFragment, model: &dyn Model) -> ConfigResult<Self> {
        let betas: Vec<f64> = kwargs.require("betas")?;
        let &[beta1, beta2] = betas.as_slice() else {
            return Err(ConfigurationError::invalid_argument(
                kwargs.scope(),
                "betas",
                format!("expected exactly two values, got {}", betas.len()),
            ));
        };

        let optimizer = Self {
            lr: kwargs.require("lr")?,
            betas: (beta1, beta2),
            eps: kwargs.require("eps")?,
            weight_decay: kwargs.require("weight_decay")?,
            num_parameters: model.num_parameters(),
        };
        optimizer.validate(kwargs.scope())?;
        Ok(optimizer)
    }

    fn validate(&self, scope: &str) -> ConfigResult<()> {
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(ConfigurationError::invalid_argument(scope, "lr", "must be > 0"));
        }
        for beta in [self.betas.0, self.betas.1] {
            if !(0.0..1.0).contains(&beta) {
                return Err(ConfigurationError::invalid_argument(
                    scope,
                    "betas",
                    format!("each beta must be in [0, 1), got {beta}"),
                ));
            }
        }
        if !self.eps.is_finite() || self.eps <= 0.0 {
            return Err(ConfigurationError::invalid_argument(scope, "eps", "must be > 0"));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(ConfigurationError::invalid_argument(scope, "weight_decay", "must be >= 0"));
        }
        Ok(())
    }
}

impl Optimizer for DecoupledAdamW {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn num_parameters(&self) -> u64 {
        self.num_parameters
    }
}

pub fn register_builtins(registry: &mut ComponentRegistry<Box<dyn Optimizer>, dyn Model>) {
    registry.register(DecoupledAdamW::NAME, |kwargs, model| {
        Ok(Box::new(DecoupledAdamW::from_kwargs(kwargs, model)?) as Box<dyn Optimizer>)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::MosaicGpt;

    fn tiny_model() -> MosaicGpt {
        let kwargs = ConfigFragment::from_yaml_str(
            "model 'mosaic_gpt'",
            "d_model: 8\nn_heads: 2\nn_layers: 1\nmax_seq_len: 4\nvocab_size: 16\n",
        )
        .unwrap();
        MosaicGpt::from_kwargs(&kwargs).unwrap()
    }

    fn kwargs(yaml: &str) -> ConfigFragment {
        ConfigFragment::from_yaml_str("optimizer 'decoupled_adamw'", yaml).unwrap()
    }

    #[test]
    fn test_builds_bound_to_model() {
        let model = tiny_model();
        let opt = DecoupledAdamW::from_kwargs(
            &kwargs("lr: 6.0e-4\nbetas: [0.9, 0.95]\neps: 1.0e-8\nweight_decay: 0.0\n"),
            &model,
        )
        .unwrap();
        assert!((opt.learning_rate() - 6.0e-4).abs() < f64::EPSILON);
        assert_eq!(opt.betas, (0.9, 0.95));
        assert_eq!(opt.num_parameters(), model.num_parameters());
    }

    #[test]
    fn test_betas_need_two_values() {
        let err = DecoupledAdamW::from_kwargs(
            &kwargs("lr: 1.0e-3\nbetas: [0.9]\neps: 1.0e-8\nweight_decay: 0.0\n"),
            &tiny_model(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("exactly two"));
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        for bad in [
            "lr: 0.0\nbetas: [0.9, 0.95]\neps: 1.0e-8\nweight_decay: 0.0\n",
            "lr: 1.0e-3\nbetas: [0.9, 1.5]\neps: 1.0e-8\nweight_decay: 0.0\n",
            "lr: 1.0e-3\nbetas: [0.9, 0.95]\neps: 0.0\nweight_decay: 0.0\n",
            "lr: 1.0e-3\nbetas: [0.9, 0.95]\neps: 1.0e-8\nweight_decay: -0.1\n",
        ] {
            assert!(DecoupledAdamW::from_kwargs(&kwargs(bad), &tiny_model()).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_missing_lr_is_named() {
        let err = DecoupledAdamW::from_kwargs(
            &kwargs("betas: [0.9, 0.95]\neps: 1.0e-8\nweight_decay: 0.0\n"),
            &tiny_model(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingArgument { ref field, .. } if field == "lr"));
    }
}
