use crate::config::ConfigFragment;
use crate::error::{ConfigResult, ConfigurationError};
use crate::registry::ComponentRegistry;
use serde::Serialize;
use std::fmt;

/// A source of batches for training or evaluation.
pub trait DataLoader: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Samples per device per batch.
    fn batch_size(&self) -> u64;
}

/// What a data loader builder needs from the run besides its own kwargs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLoaderContext {
    pub device_batch_size: u64,
}

/// Streaming pre-tokenized text, read from `local` and optionally mirrored
/// from `remote`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextDataLoader {
    pub local: String,
    pub remote: Option<String>,
    pub split: String,
    pub shuffle: bool,
    pub max_seq_len: u64,
    pub batch_size: u64,
    pub drop_last: bool,
    pub num_workers: u32,
}

impl TextDataLoader {
    pub const NAME: &'static str = "text";

    pub fn from_kwargs(kwargs: &ConfigFragment, ctx: &DataLoaderContext) -> ConfigResult<Self> {
        let dataset = kwargs.section("dataset")?;
        let loader = Self {
            local: dataset.require_name("local")?,
            remote: dataset.optional("remote")?,
            split: dataset.require_name("split")?,
            shuffle: dataset.get_or("shuffle", false)?,
            max_seq_len: dataset.require("max_seq_len")?,
            batch_size: ctx.device_batch_size,
            drop_last: kwargs.get_or("drop_last", false)?,
            num_workers: kwargs.get_or("num_workers", 8)?,
        };
        if loader.max_seq_len == 0 {
            return Err(ConfigurationError::invalid_argument(dataset.scope(), "max_seq_len", "must be >= 1"));
        }
        Ok(loader)
    }
}

impl DataLoader for TextDataLoader {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn batch_size(&self) -> u64 {
        self.batch_size
    }
}

/// In-context-learning task data, one per evaluation task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LmTaskDataLoader {
    pub dataset_uri: String,
    pub batch_size: u64,
    pub max_seq_len: u64,
    pub eos_token_id: Option<u32>,
}

impl DataLoader for LmTaskDataLoader {
    fn name(&self) -> &str {
        &self.dataset_uri
    }

    fn batch_size(&self) -> u64 {
        self.batch_size
    }
}

pub fn register_builtins(registry: &mut ComponentRegistry<Box<dyn DataLoader>, DataLoaderContext>) {
    registry.register(TextDataLoader::NAME, |kwargs, ctx| {
        Ok(Box::new(TextDataLoader::from_kwargs(kwargs, ctx)?) as Box<dyn DataLoader>)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigErrorKind;

    const TRAIN: &str = r"
dataset:
  local: /tmp/c4
  remote: s3://bucket/c4
  split: train
  shuffle: true
  max_seq_len: 2048
drop_last: true
num_workers: 4
";

    #[test]
    fn test_text_loader_uses_plan_batch_size() {
        let kwargs = ConfigFragment::from_yaml_str("dataloader 'text'", TRAIN).unwrap();
        let loader = TextDataLoader::from_kwargs(&kwargs, &DataLoaderContext { device_batch_size: 32 }).unwrap();
        assert_eq!(loader.batch_size(), 32);
        assert_eq!(loader.remote.as_deref(), Some("s3://bucket/c4"));
        assert!(loader.shuffle);
        assert_eq!(loader.num_workers, 4);
    }

    #[test]
    fn test_text_loader_defaults() {
        let kwargs = ConfigFragment::from_yaml_str(
            "dataloader 'text'",
            "dataset:\n  local: /tmp/c4\n  split: val\n  max_seq_len: 128\n",
        )
        .unwrap();
        let loader = TextDataLoader::from_kwargs(&kwargs, &DataLoaderContext { device_batch_size: 8 }).unwrap();
        assert!(!loader.shuffle);
        assert!(!loader.drop_last);
        assert_eq!(loader.num_workers, 8);
        assert_eq!(loader.remote, None);
    }

    #[test]
    fn test_text_loader_requires_split() {
        let kwargs = ConfigFragment::from_yaml_str("dataloader 'text'", "dataset:\n  local: /tmp/c4\n  max_seq_len: 128\n").unwrap();
        let err = TextDataLoader::from_kwargs(&kwargs, &DataLoaderContext { device_batch_size: 8 }).unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::InvalidArgument);
        assert!(err.to_string().contains("`split`"));
        assert!(err.to_string().contains("dataloader 'text'.dataset"));
    }
}
