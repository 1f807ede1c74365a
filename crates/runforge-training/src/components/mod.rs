//! Capabilities the registries construct, plus the built-in builders.
//!
//! Each capability is a trait object so new kinds can be plugged in by
//! registering a builder, without the orchestrator knowing about them. The
//! built-ins describe what the external training engine should instantiate.

pub mod algorithm;
pub mod callback;
pub mod dataloader;
pub mod logger;
pub mod model;
pub mod optimizer;
pub mod scheduler;
pub mod tokenizer;

pub use algorithm::{Algorithm, ClippingType, GradientClipping};
pub use callback::{Callback, LrMonitor, MemoryMonitor, OptimizerMonitor, SpeedMonitor};
pub use dataloader::{DataLoader, DataLoaderContext, LmTaskDataLoader, TextDataLoader};
pub use logger::{Logger, WandbLogger};
pub use model::{Model, MosaicGpt};
pub use optimizer::{DecoupledAdamW, Optimizer};
pub use scheduler::{ConstantWithWarmup, CosineWithWarmup, Scheduler};
pub use tokenizer::{HfTokenizer, Tokenizer};
