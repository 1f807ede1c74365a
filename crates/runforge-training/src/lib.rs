//! Runforge Training
//!
//! Declarative assembly of a distributed LLM training run:
//! - Splitting the global batch across workers (`batch`)
//! - Building components by name from configuration (`registry`, `components`)
//! - In-context-learning evaluators (`evaluators`)
//! - Driving the launch and handing the run to an engine (`orchestrator`, `engine`)

pub mod batch;
pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluators;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod run;
pub mod runtime;
pub mod time;

pub use batch::{BatchPlan, MaybeAuto, partition};
pub use config::{ConfigFragment, ConfigSnapshot, ConfigTree};
pub use engine::{DryRunEngine, TrainingEngine};
pub use error::{ConfigErrorKind, ConfigResult, ConfigurationError, RunError, RunResult};
pub use evaluators::{EvaluationTaskSpec, Evaluator, EvaluatorAssembler, LmTaskLoaderFactory, TaskLoaderFactory};
pub use orchestrator::{RUN_NAME_ENV, RunOrchestrator, resolve_run_name};
pub use progress::{LaunchStage, ProgressEvent, ProgressSink, StdoutProgressSink};
pub use registry::{Category, ComponentRegistry, ComponentSpec, Registries};
pub use run::{CheckpointPolicy, Precision, RunSettings, RunSpec};
pub use runtime::{DistributedRuntime, EnvDistributed, ProcessSeed, Reproducibility, StaticWorld};
pub use time::TrainTime;
