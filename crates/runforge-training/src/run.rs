use crate::batch::BatchPlan;
use crate::components::{Algorithm, Callback, DataLoader, Logger, Model, Optimizer, Scheduler, Tokenizer};
use crate::config::{ConfigTree, render_value, yaml_to_json};
use crate::error::{ConfigResult, ConfigurationError};
use crate::evaluators::Evaluator;
use crate::time::TrainTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label of the held-out loss evaluation, listed before the ICL evaluators.
pub const EVAL_LOADER_LABEL: &str = "eval";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Fp32,
    AmpFp16,
    AmpBf16,
    AmpFp8,
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fp32 => "fp32",
            Self::AmpFp16 => "amp_fp16",
            Self::AmpBf16 => "amp_bf16",
            Self::AmpFp8 => "amp_fp8",
        })
    }
}

/// Where checkpoints go and where a run resumes from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointPolicy {
    pub save_folder: Option<String>,
    pub save_interval: TrainTime,
    /// `-1` keeps every checkpoint.
    pub save_num_checkpoints_to_keep: i64,
    pub load_path: Option<String>,
    pub load_weights_only: bool,
}

/// Scalar run settings passed through to the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSettings {
    pub max_seq_len: u64,
    pub max_duration: TrainTime,
    pub eval_interval: TrainTime,
    /// `-1` evaluates the whole eval set.
    pub eval_subset_num_batches: i64,
    pub precision: Precision,
    pub progress_bar: bool,
    pub log_to_console: bool,
    pub console_log_interval: TrainTime,
    pub fsdp_config: Option<serde_json::Value>,
    pub checkpoint: CheckpointPolicy,
}

impl RunSettings {
    pub fn from_config(config: &ConfigTree) -> ConfigResult<Self> {
        let max_seq_len: u64 = config.require("max_seq_len")?;
        if max_seq_len == 0 {
            return Err(ConfigurationError::unparsable("max_seq_len", "0", "expected a positive integer"));
        }

        let fsdp_config = match config.get("fsdp_config") {
            None => None,
            Some(value) if value.is_mapping() => Some(yaml_to_json(value)),
            Some(other) => {
                return Err(ConfigurationError::unparsable("fsdp_config", render_value(other), "expected a mapping"));
            }
        };

        let settings = Self {
            max_seq_len,
            max_duration: config.require("max_duration")?,
            eval_interval: config.require("eval_interval")?,
            eval_subset_num_batches: config.get_or("eval_loader.eval_subset_num_batches", -1)?,
            precision: config.require("precision")?,
            progress_bar: config.get_or("progress_bar", false)?,
            log_to_console: config.get_or("log_to_console", true)?,
            console_log_interval: config.get_or("console_log_interval", TrainTime::Batches(1))?,
            fsdp_config,
            checkpoint: CheckpointPolicy {
                save_folder: config.optional("save_folder")?,
                save_interval: config.get_or("save_interval", TrainTime::Batches(1000))?,
                save_num_checkpoints_to_keep: config.get_or("save_num_checkpoints_to_keep", -1)?,
                load_path: config.optional("load_path")?,
                load_weights_only: config.get_or("load_weights_only", false)?,
            },
        };

        for (key, value) in [
            ("eval_loader.eval_subset_num_batches", settings.eval_subset_num_batches),
            ("save_num_checkpoints_to_keep", settings.checkpoint.save_num_checkpoints_to_keep),
        ] {
            if value < -1 {
                return Err(ConfigurationError::unparsable(key, value.to_string(), "expected -1 or a non-negative integer"));
            }
        }
        Ok(settings)
    }
}

/// Everything the training engine needs for one run.
#[derive(Debug)]
pub struct RunSpec {
    pub run_name: String,
    pub seed: u64,
    pub batch_plan: BatchPlan,
    pub device_eval_batch_size: u64,
    pub model: Box<dyn Model>,
    pub tokenizer: Box<dyn Tokenizer>,
    pub train_loader: Box<dyn DataLoader>,
    pub eval_loader: Box<dyn DataLoader>,
    pub evaluators: Vec<Evaluator>,
    pub optimizer: Box<dyn Optimizer>,
    pub scheduler: Box<dyn Scheduler>,
    pub loggers: Vec<Box<dyn Logger>>,
    pub callbacks: Vec<Box<dyn Callback>>,
    pub algorithms: Vec<Box<dyn Algorithm>>,
    pub settings: RunSettings,
    /// The input configuration plus the derived batch and model keys.
    pub resolved_config: ConfigTree,
}

impl RunSpec {
    /// Evaluation data as the engine iterates it: the eval loader first, then
    /// each evaluator in declaration order.
    #[must_use]
    pub fn eval_sources(&self) -> Vec<(&str, &dyn DataLoader)> {
        let mut sources: Vec<(&str, &dyn DataLoader)> = Vec::with_capacity(self.evaluators.len() + 1);
        sources.push((EVAL_LOADER_LABEL, &*self.eval_loader));
        for evaluator in &self.evaluators {
            sources.push((evaluator.label.as_str(), &*evaluator.dataloader));
        }
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigErrorKind;

    const MINIMAL: &str = "max_seq_len: 2048\nmax_duration: 4800ba\neval_interval: 500ba\nprecision: amp_bf16\n";

    #[test]
    fn test_defaults() {
        let settings = RunSettings::from_config(&ConfigTree::from_yaml_str(MINIMAL).unwrap()).unwrap();
        assert_eq!(settings.precision, Precision::AmpBf16);
        assert_eq!(settings.max_duration, TrainTime::Batches(4800));
        assert_eq!(settings.eval_subset_num_batches, -1);
        assert!(!settings.progress_bar);
        assert!(settings.log_to_console);
        assert_eq!(settings.console_log_interval, TrainTime::Batches(1));
        assert_eq!(settings.checkpoint.save_interval, TrainTime::Batches(1000));
        assert_eq!(settings.checkpoint.save_num_checkpoints_to_keep, -1);
        assert!(!settings.checkpoint.load_weights_only);
        assert_eq!(settings.fsdp_config, None);
    }

    #[test]
    fn test_checkpoint_and_fsdp_passthrough() {
        let yaml = format!(
            "{MINIMAL}save_folder: ./ckpt\nsave_interval: 2ep\nsave_num_checkpoints_to_keep: 3\nload_path: ./ckpt/latest.pt\nfsdp_config:\n  sharding_strategy: FULL_SHARD\n  mixed_precision: PURE\n"
        );
        let settings = RunSettings::from_config(&ConfigTree::from_yaml_str(&yaml).unwrap()).unwrap();
        assert_eq!(settings.checkpoint.save_folder.as_deref(), Some("./ckpt"));
        assert_eq!(settings.checkpoint.save_interval, TrainTime::Epochs(2));
        assert_eq!(settings.checkpoint.save_num_checkpoints_to_keep, 3);
        assert_eq!(
            settings.fsdp_config,
            Some(serde_json::json!({"sharding_strategy": "FULL_SHARD", "mixed_precision": "PURE"}))
        );
    }

    #[test]
    fn test_rejects_unknown_precision() {
        let yaml = MINIMAL.replace("amp_bf16", "fp64");
        let err = RunSettings::from_config(&ConfigTree::from_yaml_str(&yaml).unwrap()).unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::Unparsable);
        assert!(err.to_string().contains("precision"));
    }

    #[test]
    fn test_missing_duration_is_missing_field() {
        let yaml = MINIMAL.replace("max_duration: 4800ba\n", "");
        let err = RunSettings::from_config(&ConfigTree::from_yaml_str(&yaml).unwrap()).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingField { ref field, .. } if field == "max_duration"));
    }

    #[test]
    fn test_retention_below_minus_one_fails() {
        let yaml = format!("{MINIMAL}save_num_checkpoints_to_keep: -2\n");
        assert!(RunSettings::from_config(&ConfigTree::from_yaml_str(&yaml).unwrap()).is_err());
    }
}
