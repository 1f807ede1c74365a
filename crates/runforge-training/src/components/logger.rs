use crate::config::{ConfigFragment, ConfigSnapshot};
use crate::error::ConfigResult;
use crate::registry::ComponentRegistry;
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// An experiment tracker that records the run.
pub trait Logger: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Record the resolved configuration before training starts.
    fn log_config(&self, config: &ConfigSnapshot);
}

/// Weights & Biases run settings. Upload itself belongs to the engine.
#[derive(Debug, Default, Serialize)]
pub struct WandbLogger {
    pub project: Option<String>,
    pub entity: Option<String>,
    pub group: Option<String>,
    pub name: Option<String>,
    pub tags: Vec<String>,
    pub log_artifacts: bool,
    pub rank_zero_only: bool,
    #[serde(skip)]
    config: Mutex<Option<ConfigSnapshot>>,
}

impl WandbLogger {
    pub const NAME: &'static str = "wandb";

    pub fn from_kwargs(kwargs: &ConfigFragment) -> ConfigResult<Self> {
        kwargs.deny_unknown(&["project", "entity", "group", "name", "tags", "log_artifacts", "rank_zero_only"])?;
        Ok(Self {
            project: kwargs.optional("project")?,
            entity: kwargs.optional("entity")?,
            group: kwargs.optional("group")?,
            name: kwargs.optional("name")?,
            tags: kwargs.get_or("tags", Vec::new())?,
            log_artifacts: kwargs.get_or("log_artifacts", false)?,
            rank_zero_only: kwargs.get_or("rank_zero_only", true)?,
            config: Mutex::new(None),
        })
    }

    /// The snapshot passed to the last `log_config` call.
    #[must_use]
    pub fn logged_config(&self) -> Option<ConfigSnapshot> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Logger for WandbLogger {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn log_config(&self, config: &ConfigSnapshot) {
        debug!(logger = Self::NAME, project = ?self.project, keys = config.len(), "recording run configuration");
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
    }
}

pub fn register_builtins(registry: &mut ComponentRegistry<Box<dyn Logger>>) {
    registry.register(WandbLogger::NAME, |kwargs, _| {
        Ok(Box::new(WandbLogger::from_kwargs(kwargs)?) as Box<dyn Logger>)
    });
}
