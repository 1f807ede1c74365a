//! In-context-learning evaluators built from the `icl_tasks` list.

use crate::components::{DataLoader, LmTaskDataLoader, Tokenizer};
use crate::config::ConfigTree;
use crate::error::{ConfigResult, ConfigurationError};
use serde::Deserialize;
use tracing::debug;

/// Smallest batch handed to an evaluation task's data source.
pub const MIN_EVAL_BATCH_SIZE: u64 = 4;

/// One entry of `icl_tasks`, as written. Extra keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EvaluationTaskSpec {
    pub dataset_uri: Option<String>,
    pub name: Option<String>,
    pub metric_names: Option<Vec<String>>,
}

impl EvaluationTaskSpec {
    /// Read the optional `icl_tasks` sequence.
    pub fn list_from(config: &ConfigTree) -> ConfigResult<Vec<Self>> {
        config.get_or("icl_tasks", Vec::new())
    }

    fn validate(&self, index: usize) -> ConfigResult<ValidTask<'_>> {
        let missing = |field: &str| ConfigurationError::MissingField {
            context: format!("icl_tasks[{index}]"),
            field: field.to_string(),
        };
        let dataset_uri = self.dataset_uri.as_deref().filter(|s| !s.trim().is_empty());
        let name = self.name.as_deref().filter(|s| !s.trim().is_empty());
        let metric_names = self.metric_names.as_deref().filter(|m| !m.is_empty());
        Ok(ValidTask {
            dataset_uri: dataset_uri.ok_or_else(|| missing("dataset_uri"))?,
            name: name.ok_or_else(|| missing("name"))?,
            metric_names: metric_names.ok_or_else(|| missing("metric_names"))?,
        })
    }
}

struct ValidTask<'a> {
    dataset_uri: &'a str,
    name: &'a str,
    metric_names: &'a [String],
}

/// A labelled data source plus the metrics computed on it.
#[derive(Debug)]
pub struct Evaluator {
    pub label: String,
    pub dataloader: Box<dyn DataLoader>,
    /// In declaration order.
    pub metric_names: Vec<String>,
}

/// Everything needed to open one evaluation task's data.
#[derive(Debug, Clone, Copy)]
pub struct TaskLoaderRequest<'a> {
    pub dataset_uri: &'a str,
    pub tokenizer: &'a dyn Tokenizer,
    pub batch_size: u64,
    pub max_seq_len: u64,
}

/// Opens the data source for an evaluation task.
pub trait TaskLoaderFactory: Send + Sync {
    fn build(&self, request: &TaskLoaderRequest<'_>) -> ConfigResult<Box<dyn DataLoader>>;
}

/// Language-modeling task data, delimited by the tokenizer's EOS token.
#[derive(Debug, Clone, Copy, Default)]
pub struct LmTaskLoaderFactory;

impl TaskLoaderFactory for LmTaskLoaderFactory {
    fn build(&self, request: &TaskLoaderRequest<'_>) -> ConfigResult<Box<dyn DataLoader>> {
        Ok(Box::new(LmTaskDataLoader {
            dataset_uri: request.dataset_uri.to_string(),
            batch_size: request.batch_size,
            max_seq_len: request.max_seq_len,
            eos_token_id: request.tokenizer.eos_token_id(),
        }))
    }
}

pub struct EvaluatorAssembler<'a> {
    loaders: &'a dyn TaskLoaderFactory,
}

impl<'a> EvaluatorAssembler<'a> {
    #[must_use]
    pub fn new(loaders: &'a dyn TaskLoaderFactory) -> Self {
        Self { loaders }
    }

    /// One evaluator per task, in order. Every task is validated before any
    /// data source is opened.
    pub fn assemble(
        &self,
        specs: &[EvaluationTaskSpec],
        tokenizer: &dyn Tokenizer,
        eval_batch_size: u64,
        max_seq_len: u64,
    ) -> ConfigResult<Vec<Evaluator>> {
        let tasks = specs
            .iter()
            .enumerate()
            .map(|(index, spec)| spec.validate(index))
            .collect::<ConfigResult<Vec<_>>>()?;

        let batch_size = eval_batch_size.max(MIN_EVAL_BATCH_SIZE);
        tasks
            .into_iter()
            .map(|task| {
                debug!(label = task.name, dataset_uri = task.dataset_uri, batch_size, "building evaluator");
                let dataloader = self.loaders.build(&TaskLoaderRequest {
                    dataset_uri: task.dataset_uri,
                    tokenizer,
                    batch_size,
                    max_seq_len,
                })?;
                Ok(Evaluator {
                    label: task.name.to_string(),
                    dataloader,
                    metric_names: task.metric_names.to_vec(),
                })
            })
            .collect()
    }
}
