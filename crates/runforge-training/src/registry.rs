//! Name-keyed builder tables, one per component category.
//!
//! A registry maps the `name` written in the configuration to a builder that
//! turns the section's keyword arguments into a concrete component. Lookup
//! happens before any builder runs, so an unknown name never leaves a
//! half-built component behind.

use crate::components::{
    self, Algorithm, Callback, DataLoader, DataLoaderContext, Logger, Model, Optimizer, Scheduler,
    Tokenizer,
};
use crate::config::{ConfigFragment, ConfigTree, render_value};
use crate::error::{ConfigResult, ConfigurationError};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// The kinds of component a run is assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Logger,
    Callback,
    Algorithm,
    Optimizer,
    Scheduler,
    Model,
    DataLoader,
    Tokenizer,
}

impl Category {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logger => "logger",
            Self::Callback => "callback",
            Self::Algorithm => "algorithm",
            Self::Optimizer => "optimizer",
            Self::Scheduler => "scheduler",
            Self::Model => "model",
            Self::DataLoader => "dataloader",
            Self::Tokenizer => "tokenizer",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Builder<T, C> = Box<dyn Fn(&ConfigFragment, &C) -> ConfigResult<T> + Send + Sync>;

/// Builders for one category.
///
/// `C` is extra context a builder needs besides its kwargs, e.g. the model an
/// optimizer is bound to. Categories without one use `()`.
pub struct ComponentRegistry<T, C: ?Sized = ()> {
    category: Category,
    builders: BTreeMap<String, Builder<T, C>>,
}

impl<T, C: ?Sized> ComponentRegistry<T, C> {
    #[must_use]
    pub fn new(category: Category) -> Self {
        Self { category, builders: BTreeMap::new() }
    }

    /// Register `builder` under `name`. Returns `true` if it replaced an
    /// existing builder.
    pub fn register<F>(&mut self, name: impl Into<String>, builder: F) -> bool
    where
        F: Fn(&ConfigFragment, &C) -> ConfigResult<T> + Send + Sync + 'static,
    {
        let name = name.into();
        let replaced = self.builders.insert(name.clone(), Box::new(builder)).is_some();
        if replaced {
            warn!(category = %self.category, component = %name, "replacing registered builder");
        }
        replaced
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }

    pub fn ensure_known(&self, name: &str) -> ConfigResult<()> {
        if self.contains(name) { Ok(()) } else { Err(self.unknown(name)) }
    }

    fn unknown(&self, name: &str) -> ConfigurationError {
        let known: Vec<&str> = self.names().collect();
        ConfigurationError::UnknownComponent {
            category: self.category,
            name: name.to_string(),
            known: if known.is_empty() { "none".to_string() } else { known.join(", ") },
        }
    }

    /// Build the component registered as `name`. Builder errors are returned
    /// unchanged.
    pub fn resolve(&self, name: &str, kwargs: &ConfigFragment, ctx: &C) -> ConfigResult<T> {
        let builder = self.builders.get(name).ok_or_else(|| self.unknown(name))?;
        debug!(category = %self.category, component = name, "resolving component");
        builder(&kwargs.scoped(format!("{} '{name}'", self.category)), ctx)
    }

    /// Build every spec in declaration order. All names are checked before the
    /// first builder runs.
    pub fn resolve_all(&self, specs: &[ComponentSpec], ctx: &C) -> ConfigResult<Vec<T>> {
        for spec in specs {
            self.ensure_known(&spec.name)?;
        }
        specs.iter().map(|spec| self.resolve(&spec.name, &spec.kwargs, ctx)).collect()
    }
}

impl<T, C: ?Sized> fmt::Debug for ComponentRegistry<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("category", &self.category)
            .field("names", &self.builders.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One declared component: the builder name and its keyword arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSpec {
    pub name: String,
    pub kwargs: ConfigFragment,
}

impl ComponentSpec {
    /// Read the section at `key` whose `selector` field picks the builder, e.g.
    /// `optimizer.name`. The remaining keys are the kwargs.
    pub fn selected(config: &ConfigTree, key: &str, selector: &str) -> ConfigResult<Self> {
        let section = config.require_fragment(key)?;
        let name = section.require_name(selector)?;
        Ok(Self { name, kwargs: section.without(&[selector]) })
    }

    /// Read an ordered `name -> kwargs` mapping such as `callbacks`. Absent
    /// yields no specs; a `null` kwargs entry means no arguments.
    pub fn collection(config: &ConfigTree, key: &str) -> ConfigResult<Vec<Self>> {
        let section = config.fragment(key)?;
        section
            .as_mapping()
            .iter()
            .map(|(name, kwargs)| {
                let name = name.as_str().map(str::to_string).ok_or_else(|| {
                    ConfigurationError::unparsable(key, render_value(name), "component names must be strings")
                })?;
                let kwargs = ConfigFragment::from_value(format!("{key}.{name}"), kwargs)?;
                Ok(Self { name, kwargs })
            })
            .collect()
    }
}

/// One registry per category, populated at startup.
#[derive(Debug)]
pub struct Registries {
    pub models: ComponentRegistry<Box<dyn Model>>,
    pub tokenizers: ComponentRegistry<Box<dyn Tokenizer>>,
    pub dataloaders: ComponentRegistry<Box<dyn DataLoader>, DataLoaderContext>,
    pub optimizers: ComponentRegistry<Box<dyn Optimizer>, dyn Model>,
    pub schedulers: ComponentRegistry<Box<dyn Scheduler>>,
    pub loggers: ComponentRegistry<Box<dyn Logger>>,
    pub callbacks: ComponentRegistry<Box<dyn Callback>>,
    pub algorithms: ComponentRegistry<Box<dyn Algorithm>>,
}

impl Registries {
    /// Registries with nothing registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            models: ComponentRegistry::new(Category::Model),
            tokenizers: ComponentRegistry::new(Category::Tokenizer),
            dataloaders: ComponentRegistry::new(Category::DataLoader),
            optimizers: ComponentRegistry::new(Category::Optimizer),
            schedulers: ComponentRegistry::new(Category::Scheduler),
            loggers: ComponentRegistry::new(Category::Logger),
            callbacks: ComponentRegistry::new(Category::Callback),
            algorithms: ComponentRegistry::new(Category::Algorithm),
        }
    }

    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registries = Self::empty();
        components::model::register_builtins(&mut registries.models);
        components::tokenizer::register_builtins(&mut registries.tokenizers);
        components::dataloader::register_builtins(&mut registries.dataloaders);
        components::optimizer::register_builtins(&mut registries.optimizers);
        components::scheduler::register_builtins(&mut registries.schedulers);
        components::logger::register_builtins(&mut registries.loggers);
        components::callback::register_builtins(&mut registries.callbacks);
        components::algorithm::register_builtins(&mut registries.algorithms);
        registries
    }

    /// Check that `name` is registered for `category`.
    pub fn ensure_known(&self, category: Category, name: &str) -> ConfigResult<()> {
        match category {
            Category::Model => self.models.ensure_known(name),
            Category::Tokenizer => self.tokenizers.ensure_known(name),
            Category::DataLoader => self.dataloaders.ensure_known(name),
            Category::Optimizer => self.optimizers.ensure_known(name),
            Category::Scheduler => self.schedulers.ensure_known(name),
            Category::Logger => self.loggers.ensure_known(name),
            Category::Callback => self.callbacks.ensure_known(name),
            Category::Algorithm => self.algorithms.ensure_known(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigErrorKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_registry(built: &Arc<AtomicUsize>) -> ComponentRegistry<String> {
        let mut registry = ComponentRegistry::new(Category::Callback);
        for name in ["alpha", "beta", "gamma"] {
            let built = Arc::clone(built);
            registry.register(name, move |kwargs, _| {
                built.fetch_add(1, Ordering::SeqCst);
                Ok(format!("{name}:{}", kwargs.scope()))
            });
        }
        registry
    }

    #[test]
    fn test_unknown_name_names_category_and_builds_nothing() {
        let built = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(&built);
        let err = registry.resolve("nonexistent", &ConfigFragment::empty("callbacks"), &()).unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::UnknownComponent);
        let msg = err.to_string();
        assert!(msg.contains("callback"));
        assert!(msg.contains("nonexistent"));
        assert!(msg.contains("alpha, beta, gamma"));
        assert_eq!(built.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_resolve_all_checks_names_first() {
        let built = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(&built);
        let specs = vec![
            ComponentSpec { name: "alpha".into(), kwargs: ConfigFragment::empty("callbacks.alpha") },
            ComponentSpec { name: "delta".into(), kwargs: ConfigFragment::empty("callbacks.delta") },
        ];
        assert!(registry.resolve_all(&specs, &()).is_err());
        assert_eq!(built.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_resolve_all_keeps_declaration_order() {
        let built = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(&built);
        let config = ConfigTree::from_yaml_str("callbacks:\n  gamma: {}\n  alpha:\n  beta: {x: 1}\n").unwrap();
        let specs = ComponentSpec::collection(&config, "callbacks").unwrap();
        let out = registry.resolve_all(&specs, &()).unwrap();
        assert_eq!(out, vec!["gamma:callback 'gamma'", "alpha:callback 'alpha'", "beta:callback 'beta'"]);
    }

    #[test]
    fn test_builder_errors_pass_through() {
        let mut registry: ComponentRegistry<u64> = ComponentRegistry::new(Category::Optimizer);
        registry.register("needs_lr", |kwargs, _| kwargs.require("lr"));
        let err = registry.resolve("needs_lr", &ConfigFragment::empty("optimizer"), &()).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MissingArgument { ref scope, ref field }
                if scope == "optimizer 'needs_lr'" && field == "lr"
        ));
    }

    #[test]
    fn test_register_reports_replacement() {
        let mut registry: ComponentRegistry<u8> = ComponentRegistry::new(Category::Logger);
        assert!(!registry.register("x", |_, _| Ok(1)));
        assert!(registry.register("x", |_, _| Ok(2)));
        assert_eq!(registry.resolve("x", &ConfigFragment::empty("loggers"), &()).unwrap(), 2);
    }

    #[test]
    fn test_selected_splits_name_from_kwargs() {
        let config = ConfigTree::from_yaml_str("optimizer:\n  name: decoupled_adamw\n  lr: 0.1\n").unwrap();
        let spec = ComponentSpec::selected(&config, "optimizer", "name").unwrap();
        assert_eq!(spec.name, "decoupled_adamw");
        assert!(!spec.kwargs.contains("name"));
        assert!(spec.kwargs.contains("lr"));

        let missing = ComponentSpec::selected(&config, "scheduler", "name").unwrap_err();
        assert_eq!(missing.kind(), ConfigErrorKind::MissingField);
    }

    #[test]
    fn test_builtins_cover_every_category() {
        let registries = Registries::with_builtins();
        for (category, name) in [
            (Category::Model, "mosaic_gpt"),
            (Category::Tokenizer, "hftokenizer"),
            (Category::DataLoader, "text"),
            (Category::Optimizer, "decoupled_adamw"),
            (Category::Scheduler, "cosine_with_warmup"),
            (Category::Logger, "wandb"),
            (Category::Callback, "speed_monitor"),
            (Category::Algorithm, "gradient_clipping"),
        ] {
            assert!(registries.ensure_known(category, name).is_ok(), "{category} {name}");
        }
        let err = Registries::empty().ensure_known(Category::Model, "mosaic_gpt").unwrap_err();
        assert!(err.to_string().contains("registered: none"));
    }
}
