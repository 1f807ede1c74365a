use crate::progress::{ProgressEvent, ProgressSink};
use crate::run::RunSpec;
use async_trait::async_trait;
use tracing::info;

/// The external trainer a composed run is handed to.
///
/// `fit` owns the run from here on and returns once training finishes or
/// fails. Its error is surfaced to the caller unchanged.
#[async_trait]
pub trait TrainingEngine: Send + Sync {
    fn id(&self) -> &'static str;

    async fn fit(&self, run: RunSpec, progress: &dyn ProgressSink) -> anyhow::Result<()>;
}

/// Reports what would be trained without training anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunEngine;

#[async_trait]
impl TrainingEngine for DryRunEngine {
    fn id(&self) -> &'static str {
        "dry-run"
    }

    async fn fit(&self, run: RunSpec, progress: &dyn ProgressSink) -> anyhow::Result<()> {
        let plan = &run.batch_plan;
        info!(
            engine = self.id(),
            run_name = %run.run_name,
            world_size = plan.world_size,
            device_batch_size = plan.device_batch_size,
            "dry run, skipping training"
        );

        let eval_labels: Vec<&str> = run.eval_sources().into_iter().map(|(label, _)| label).collect();
        let lines = [
            format!("run {} (seed {})", run.run_name, run.seed),
            format!(
                "model {} with {} parameters, optimizer {} (lr {}), scheduler {}",
                run.model.name(),
                run.model.num_parameters(),
                run.optimizer.name(),
                run.optimizer.learning_rate(),
                run.scheduler.name()
            ),
            format!(
                "global batch {} over {} workers: device batch {}, microbatch {}, grad accum {}",
                plan.global_batch_size,
                plan.world_size,
                plan.device_batch_size,
                plan.device_microbatch_size,
                plan.grad_accum
            ),
            format!("eval sources: {}", eval_labels.join(", ")),
            format!(
                "max_duration {}, eval_interval {}, precision {}",
                run.settings.max_duration, run.settings.eval_interval, run.settings.precision
            ),
        ];
        for message in lines {
            progress.on_event(ProgressEvent::Message { message });
        }
        Ok(())
    }
}
