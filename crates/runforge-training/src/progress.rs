use serde::{Deserialize, Serialize};
use std::fmt;

/// Launch states, in the only order they can be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchStage {
    Seeded,
    BatchPlanned,
    ComponentsResolved,
    EvaluatorsAssembled,
    RunSpecComposed,
    Delegated,
}

impl fmt::Display for LaunchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Seeded => "seeded",
            Self::BatchPlanned => "batch_planned",
            Self::ComponentsResolved => "components_resolved",
            Self::EvaluatorsAssembled => "evaluators_assembled",
            Self::RunSpecComposed => "run_spec_composed",
            Self::Delegated => "delegated",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Stage { stage: LaunchStage },
    Message { message: String },
    ParameterCount { n_params: u64 },
    Warning { message: String },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Stage { stage } => println!("[run] {stage}"),
            ProgressEvent::Message { message } => println!("{message}"),
            ProgressEvent::ParameterCount { n_params } => println!("n_params={:.2e}", n_params as f64),
            ProgressEvent::Warning { message } => println!("WARNING: {message}"),
        }
    }
}
