//! Turns a merged configuration into a [`RunSpec`] and hands it to an engine.
//!
//! Assembly walks the [`LaunchStage`]s in order. Every name is checked
//! against its registry before the model is built, and any failure aborts the
//! launch before the engine sees anything.

use crate::batch::{self, BatchPlan, MaybeAuto};
use crate::components::DataLoaderContext;
use crate::config::{ConfigTree, render_value};
use crate::engine::TrainingEngine;
use crate::error::{ConfigResult, ConfigurationError, RunError, RunResult};
use crate::evaluators::{EvaluationTaskSpec, EvaluatorAssembler, LmTaskLoaderFactory, TaskLoaderFactory};
use crate::progress::{LaunchStage, ProgressEvent, ProgressSink, StdoutProgressSink};
use crate::registry::{Category, ComponentSpec, Registries};
use crate::run::{RunSettings, RunSpec};
use crate::runtime::{DistributedRuntime, EnvDistributed, ProcessSeed, Reproducibility};
use serde_yaml::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Environment variable naming the run when the configuration does not.
pub const RUN_NAME_ENV: &str = "RUNFORGE_RUN_NAME";

pub const DEFAULT_RUN_NAME: &str = "llm";

const MICROBATCH_KEY: &str = "device_train_microbatch_size";

/// `run_name` from the configuration, else the environment value, else
/// [`DEFAULT_RUN_NAME`]. Any scalar is accepted; blank values count as absent.
pub fn resolve_run_name(config: &ConfigTree, env_value: Option<&str>) -> ConfigResult<String> {
    let configured = match config.get("run_name") {
        None => None,
        Some(Value::String(name)) => Some(name.clone()),
        Some(Value::Number(number)) => Some(number.to_string()),
        Some(Value::Bool(flag)) => Some(flag.to_string()),
        Some(other) => {
            return Err(ConfigurationError::unparsable(
                "run_name",
                render_value(other),
                "run name must be a scalar",
            ));
        }
    };
    let name = configured
        .filter(|name| !name.trim().is_empty())
        .or_else(|| env_value.map(str::trim).filter(|name| !name.is_empty()).map(str::to_string))
        .unwrap_or_else(|| DEFAULT_RUN_NAME.to_string());
    Ok(name)
}

/// Every component selection in a configuration, read before anything is built.
struct Selections {
    model: ComponentSpec,
    tokenizer: ComponentSpec,
    train_loader: ComponentSpec,
    eval_loader: ComponentSpec,
    optimizer: ComponentSpec,
    scheduler: ComponentSpec,
    loggers: Vec<ComponentSpec>,
    callbacks: Vec<ComponentSpec>,
    algorithms: Vec<ComponentSpec>,
    icl_tasks: Vec<EvaluationTaskSpec>,
}

impl Selections {
    fn read(config: &ConfigTree) -> ConfigResult<Self> {
        let tokenizer = config.require_fragment("tokenizer")?;
        Ok(Self {
            model: ComponentSpec::selected(config, "model", "name")?,
            tokenizer: ComponentSpec { name: tokenizer.require_name("type")?, kwargs: tokenizer.section("args")? },
            train_loader: ComponentSpec::selected(config, "train_loader", "name")?,
            eval_loader: {
                let spec = ComponentSpec::selected(config, "eval_loader", "name")?;
                ComponentSpec { kwargs: spec.kwargs.without(&["eval_subset_num_batches"]), ..spec }
            },
            optimizer: ComponentSpec::selected(config, "optimizer", "name")?,
            scheduler: ComponentSpec::selected(config, "scheduler", "name")?,
            loggers: ComponentSpec::collection(config, "loggers")?,
            callbacks: ComponentSpec::collection(config, "callbacks")?,
            algorithms: ComponentSpec::collection(config, "algorithms")?,
            icl_tasks: EvaluationTaskSpec::list_from(config)?,
        })
    }

    /// Fail on the first name no registry knows.
    fn ensure_known(&self, registries: &Registries) -> ConfigResult<()> {
        let singles = [
            (Category::Model, &self.model),
            (Category::Tokenizer, &self.tokenizer),
            (Category::DataLoader, &self.train_loader),
            (Category::DataLoader, &self.eval_loader),
            (Category::Optimizer, &self.optimizer),
            (Category::Scheduler, &self.scheduler),
        ];
        let collections = [
            (Category::Logger, &self.loggers),
            (Category::Callback, &self.callbacks),
            (Category::Algorithm, &self.algorithms),
        ];
        for (category, spec) in singles {
            registries.ensure_known(category, &spec.name)?;
        }
        for (category, specs) in collections {
            for spec in specs {
                registries.ensure_known(category, &spec.name)?;
            }
        }
        Ok(())
    }
}

/// Coordinates one launch. Consumed by [`RunOrchestrator::launch`], so a
/// launch cannot be retried on the same instance.
pub struct RunOrchestrator {
    registries: Registries,
    reproducibility: Arc<dyn Reproducibility>,
    distributed: Option<Arc<dyn DistributedRuntime>>,
    task_loaders: Arc<dyn TaskLoaderFactory>,
    progress: Arc<dyn ProgressSink>,
    env_run_name: Option<String>,
}

impl RunOrchestrator {
    /// Process seeding, the world from `WORLD_SIZE`/`RANK`, stdout progress,
    /// and the run name fallback read from [`RUN_NAME_ENV`].
    #[must_use]
    pub fn new(registries: Registries) -> Self {
        Self {
            registries,
            reproducibility: Arc::new(ProcessSeed),
            distributed: None,
            task_loaders: Arc::new(LmTaskLoaderFactory),
            progress: Arc::new(StdoutProgressSink),
            env_run_name: std::env::var(RUN_NAME_ENV).ok(),
        }
    }

    #[must_use]
    pub fn with_reproducibility(mut self, reproducibility: Arc<dyn Reproducibility>) -> Self {
        self.reproducibility = reproducibility;
        self
    }

    #[must_use]
    pub fn with_distributed(mut self, distributed: Arc<dyn DistributedRuntime>) -> Self {
        self.distributed = Some(distributed);
        self
    }

    #[must_use]
    pub fn with_task_loaders(mut self, task_loaders: Arc<dyn TaskLoaderFactory>) -> Self {
        self.task_loaders = task_loaders;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_env_run_name(mut self, env_run_name: Option<String>) -> Self {
        self.env_run_name = env_run_name;
        self
    }


    fn enter(&self, stage: LaunchStage) {
        debug!(stage = %stage, "entered launch stage");
        self.progress.on_event(ProgressEvent::Stage { stage });
    }

    fn say(&self, message: &str) {
        self.progress.on_event(ProgressEvent::Message { message: message.to_string() });
    }

    fn world_size(&self) -> ConfigResult<u64> {
        match &self.distributed {
            Some(distributed) => Ok(distributed.world_size()),
            None => Ok(EnvDistributed::from_env()?.world_size()),
        }
    }

    fn plan_batches(&self, config: &ConfigTree) -> ConfigResult<(BatchPlan, u64)> {
        let global_batch_size: u64 = config.require("global_train_batch_size")?;
        let microbatch = match config.get(MICROBATCH_KEY) {
            None => MaybeAuto::Auto,
            Some(value) => batch::parse_microbatch(MICROBATCH_KEY, value)?,
        };
        let plan = batch::partition(global_batch_size, self.world_size()?, microbatch)?;
        if let Some(requested) = plan.clamped_from {
            self.progress.on_event(ProgressEvent::Warning {
                message: format!(
                    "device_microbatch_size > device_batch_size, will be reduced from {requested} -> {}",
                    plan.device_batch_size
                ),
            });
        }
        let eval_batch_size = batch::eval_batch_size(config.optional("device_eval_batch_size")?, &plan)?;
        Ok((plan, eval_batch_size))
    }

    /// Run every stage up to [`LaunchStage::RunSpecComposed`].
    pub fn assemble(&self, config: &ConfigTree) -> RunResult<RunSpec> {
        let mut resolved = config.clone();

        let seed: u64 = config.require("seed")?;
        self.reproducibility.seed_all(seed);
        let run_name = resolve_run_name(config, self.env_run_name.as_deref())?;
        resolved.set("run_name", run_name.as_str());
        self.enter(LaunchStage::Seeded);

        let settings = RunSettings::from_config(config)?;
        let (plan, eval_batch_size) = self.plan_batches(config)?;
        resolved.set("n_gpus", plan.world_size);
        resolved.set("device_train_batch_size", plan.device_batch_size);
        resolved.set(MICROBATCH_KEY, plan.device_microbatch_size);
        resolved.set("device_train_grad_accum", plan.grad_accum);
        resolved.set("device_eval_batch_size", eval_batch_size);
        info!(
            run_name = %run_name,
            world_size = plan.world_size,
            device_batch_size = plan.device_batch_size,
            microbatch = %plan.device_microbatch_size,
            grad_accum = %plan.grad_accum,
            eval_batch_size,
            "planned batches"
        );
        self.enter(LaunchStage::BatchPlanned);

        let selections = Selections::read(config)?;
        selections.ensure_known(&self.registries)?;

        self.say("Initializing model...");
        let model = self.registries.models.resolve(&selections.model.name, &selections.model.kwargs, &())?;
        let n_params = model.num_parameters();
        info!(model = model.name(), n_params, "model initialized");
        self.progress.on_event(ProgressEvent::ParameterCount { n_params });
        resolved.set("n_params", n_params);

        let tokenizer =
            self.registries.tokenizers.resolve(&selections.tokenizer.name, &selections.tokenizer.kwargs, &())?;
        if tokenizer.max_seq_len() < settings.max_seq_len {
            warn!(
                tokenizer_max_seq_len = tokenizer.max_seq_len(),
                max_seq_len = settings.max_seq_len,
                "tokenizer max_seq_len is shorter than the run's max_seq_len"
            );
        }

        self.say("Building train loader...");
        let train_loader = self.registries.dataloaders.resolve(
            &selections.train_loader.name,
            &selections.train_loader.kwargs,
            &DataLoaderContext { device_batch_size: plan.device_batch_size },
        )?;
        self.say("Building eval loader...");
        let eval_loader = self.registries.dataloaders.resolve(
            &selections.eval_loader.name,
            &selections.eval_loader.kwargs,
            &DataLoaderContext { device_batch_size: eval_batch_size },
        )?;

        let optimizer = self.registries.optimizers.resolve(
            &selections.optimizer.name,
            &selections.optimizer.kwargs,
            model.as_ref(),
        )?;
        let scheduler =
            self.registries.schedulers.resolve(&selections.scheduler.name, &selections.scheduler.kwargs, &())?;
        let loggers = self.registries.loggers.resolve_all(&selections.loggers, &())?;
        let callbacks = self.registries.callbacks.resolve_all(&selections.callbacks, &())?;
        let algorithms = self.registries.algorithms.resolve_all(&selections.algorithms, &())?;
        self.enter(LaunchStage::ComponentsResolved);

        let evaluators = EvaluatorAssembler::new(self.task_loaders.as_ref()).assemble(
            &selections.icl_tasks,
            tokenizer.as_ref(),
            eval_batch_size,
            settings.max_seq_len,
        )?;
        self.enter(LaunchStage::EvaluatorsAssembled);

        let run = RunSpec {
            run_name,
            seed,
            batch_plan: plan,
            device_eval_batch_size: eval_batch_size,
            model,
            tokenizer,
            train_loader,
            eval_loader,
            evaluators,
            optimizer,
            scheduler,
            loggers,
            callbacks,
            algorithms,
            settings,
            resolved_config: resolved,
        };
        self.enter(LaunchStage::RunSpecComposed);
        Ok(run)
    }

    /// Assemble the run, record its configuration with every logger, and
    /// train it on `engine`.
    pub async fn launch(self, config: &ConfigTree, engine: &dyn TrainingEngine) -> RunResult<()> {
        let run = self.assemble(config)?;

        self.say("Logging config...");
        let yaml = run.resolved_config.to_yaml()?;
        info!("resolved configuration:\n{yaml}");
        let snapshot = run.resolved_config.flatten();
        for logger in &run.loggers {
            logger.log_config(&snapshot);
        }

        self.say("Starting training...");
        self.enter(LaunchStage::Delegated);
        info!(engine = engine.id(), run_name = %run.run_name, "delegating run to engine");
        engine.fit(run, self.progress.as_ref()).await.map_err(RunError::Delegation)?;
        self.say("Done.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> ConfigTree {
        ConfigTree::from_yaml_str(yaml).unwrap()
    }

    #[test]
    fn test_configured_run_name_wins() {
        assert_eq!(resolve_run_name(&config("run_name: mine\n"), Some("env")).unwrap(), "mine");
    }

    #[test]
    fn test_env_run_name_beats_default() {
        assert_eq!(resolve_run_name(&config("seed: 1\n"), Some("from-env")).unwrap(), "from-env");
        assert_eq!(resolve_run_name(&config("run_name: null\n"), Some("from-env")).unwrap(), "from-env");
    }

    #[test]
    fn test_default_run_name() {
        assert_eq!(resolve_run_name(&config("seed: 1\n"), None).unwrap(), DEFAULT_RUN_NAME);
        assert_eq!(resolve_run_name(&config("run_name: ''\n"), Some("  ")).unwrap(), "llm");
    }

    #[test]
    fn test_numeric_run_name_is_rendered() {
        assert_eq!(resolve_run_name(&config("run_name: 2024\n"), Some("env")).unwrap(), "2024");
        assert_eq!(resolve_run_name(&config("run_name: 1.5\n"), None).unwrap(), "1.5");
    }

    #[test]
    fn test_non_scalar_run_name_is_unparsable() {
        assert!(resolve_run_name(&config("run_name: [a, b]\n"), None).is_err());
    }
}
