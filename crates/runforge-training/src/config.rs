//! Read-only access to the merged run configuration.
//!
//! The configuration is a YAML document whose top level is a mapping. Keys are
//! addressed with dot paths (`optimizer.lr`), overrides use `key=value`
//! arguments, and a `null` value is treated exactly like an absent key.

use crate::error::{ConfigResult, ConfigurationError, RunError, RunResult};
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Flattened `dot.key -> value` view of a configuration, as handed to loggers.
pub type ConfigSnapshot = BTreeMap<String, serde_json::Value>;

const ROOT_CONTEXT: &str = "run configuration";

/// The full hierarchical configuration of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigTree {
    root: Mapping,
}

impl ConfigTree {
    /// Parse a YAML document. An empty document yields an empty tree.
    pub fn from_yaml_str(content: &str) -> RunResult<Self> {
        let value: Value = serde_yaml::from_str(content)?;
        match value {
            Value::Null => Ok(Self::default()),
            Value::Mapping(root) => Ok(Self { root }),
            other => Err(ConfigurationError::unparsable(
                "<root>",
                render_value(&other),
                "top level of the configuration must be a mapping",
            )
            .into()),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> RunResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| RunError::ConfigRead { path: path.to_path_buf(), source })?;
        Self::from_yaml_str(&content)
    }

    /// Apply `key.path=value` overrides on top of this tree, override wins.
    pub fn with_overrides<S: AsRef<str>>(mut self, overrides: &[S]) -> ConfigResult<Self> {
        let mut overlay = Self::default();
        for raw in overrides {
            let (path, value) = parse_override(raw.as_ref())?;
            overlay.set(path, value);
        }
        self.merge(&overlay);
        Ok(self)
    }

    /// Deep-merge `overlay` into this tree. Mappings merge key by key, any
    /// other value in the overlay replaces what was there.
    pub fn merge(&mut self, overlay: &Self) {
        merge_mapping(&mut self.root, &overlay.root);
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.root.get(first)?;
        for segment in segments {
            current = current.as_mapping()?.get(segment)?;
        }
        (!current.is_null()).then_some(current)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Set a value at a dot path, creating intermediate mappings as needed.
    /// A non-mapping value in the way is replaced by a mapping.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(last) = segments.pop() else { return };
        let mut current = &mut self.root;
        for segment in segments {
            let key = Value::String(segment.to_string());
            let slot = current.entry(key).or_insert_with(|| Value::Mapping(Mapping::new()));
            if !slot.is_mapping() {
                *slot = Value::Mapping(Mapping::new());
            }
            let Value::Mapping(next) = slot else { unreachable!("slot was just made a mapping") };
            current = next;
        }
        current.insert(Value::String(last.to_string()), value.into());
    }

    pub fn require<T: DeserializeOwned>(&self, path: &str) -> ConfigResult<T> {
        self.optional(path)?.ok_or_else(|| ConfigurationError::MissingField {
            context: ROOT_CONTEXT.to_string(),
            field: path.to_string(),
        })
    }

    pub fn optional<T: DeserializeOwned>(&self, path: &str) -> ConfigResult<Option<T>> {
        self.get(path)
            .map(|value| {
                serde_yaml::from_value(value.clone()).map_err(|e| {
                    ConfigurationError::unparsable(path, render_value(value), e.to_string())
                })
            })
            .transpose()
    }

    pub fn get_or<T: DeserializeOwned>(&self, path: &str, default: T) -> ConfigResult<T> {
        Ok(self.optional(path)?.unwrap_or(default))
    }

    /// The sub-tree under `path` as a fragment; absent yields an empty one.
    pub fn fragment(&self, path: &str) -> ConfigResult<ConfigFragment> {
        match self.get(path) {
            None => Ok(ConfigFragment::empty(path)),
            Some(Value::Mapping(values)) => Ok(ConfigFragment::new(path, values.clone())),
            Some(other) => Err(ConfigurationError::unparsable(
                path,
                render_value(other),
                "expected a mapping",
            )),
        }
    }

    /// Like [`ConfigTree::fragment`], but the section must be present.
    pub fn require_fragment(&self, path: &str) -> ConfigResult<ConfigFragment> {
        if !self.contains(path) {
            return Err(ConfigurationError::MissingField {
                context: ROOT_CONTEXT.to_string(),
                field: path.to_string(),
            });
        }
        self.fragment(path)
    }

    pub fn to_yaml(&self) -> RunResult<String> {
        Ok(serde_yaml::to_string(&self.root)?)
    }

    /// Flatten leaves into `dot.path -> json` pairs. Sequences are kept whole.
    #[must_use]
    pub fn flatten(&self) -> ConfigSnapshot {
        let mut out = ConfigSnapshot::new();
        flatten_into(&mut out, None, &self.root);
        out
    }
}

/// An immutable, order-preserving view of one configuration section.
///
/// `scope` names where the values came from (`optimizer 'decoupled_adamw'`)
/// and is carried into every error raised while reading them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFragment {
    scope: String,
    values: Mapping,
}

impl ConfigFragment {
    #[must_use]
    pub fn new(scope: impl Into<String>, values: Mapping) -> Self {
        Self { scope: scope.into(), values }
    }

    #[must_use]
    pub fn empty(scope: impl Into<String>) -> Self {
        Self::new(scope, Mapping::new())
    }

    /// Build from an arbitrary node: `null` is empty, a mapping is used as-is.
    pub fn from_value(scope: impl Into<String>, value: &Value) -> ConfigResult<Self> {
        let scope = scope.into();
        match value {
            Value::Null => Ok(Self::empty(scope)),
            Value::Mapping(values) => Ok(Self::new(scope, values.clone())),
            other => Err(ConfigurationError::invalid_argument(
                scope,
                "<kwargs>",
                format!("expected a mapping of keyword arguments, got {}", render_value(other)),
            )),
        }
    }

    /// Parse YAML text into a fragment. Mostly useful in tests and tools.
    pub fn from_yaml_str(scope: impl Into<String>, content: &str) -> RunResult<Self> {
        let value: Value = serde_yaml::from_str(content)?;
        Ok(Self::from_value(scope, &value)?)
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    #[must_use]
    pub fn scoped(&self, scope: impl Into<String>) -> Self {
        Self { scope: scope.into(), values: self.values.clone() }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.values.keys().map(key_to_string)
    }

    #[must_use]
    pub fn as_mapping(&self) -> &Mapping {
        &self.values
    }

    pub fn require<T: DeserializeOwned>(&self, key: &str) -> ConfigResult<T> {
        self.optional(key)?.ok_or_else(|| ConfigurationError::MissingArgument {
            scope: self.scope.clone(),
            field: key.to_string(),
        })
    }

    pub fn optional<T: DeserializeOwned>(&self, key: &str) -> ConfigResult<Option<T>> {
        self.get(key)
            .map(|value| {
                serde_yaml::from_value(value.clone()).map_err(|e| {
                    ConfigurationError::invalid_argument(&self.scope, key, e.to_string())
                })
            })
            .transpose()
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> ConfigResult<T> {
        Ok(self.optional(key)?.unwrap_or(default))
    }

    /// A required non-blank string, e.g. the `name` selecting a builder.
    pub fn require_name(&self, key: &str) -> ConfigResult<String> {
        let name: String = self.require(key)?;
        if name.trim().is_empty() {
            return Err(ConfigurationError::invalid_argument(&self.scope, key, "must not be empty"));
        }
        Ok(name)
    }

    /// Nested mapping under `key`; absent yields an empty fragment.
    pub fn section(&self, key: &str) -> ConfigResult<Self> {
        let scope = format!("{}.{key}", self.scope);
        match self.get(key) {
            None => Ok(Self::empty(scope)),
            Some(value) => Self::from_value(scope, value),
        }
    }

    /// Copy of this fragment without the given keys.
    #[must_use]
    pub fn without(&self, keys: &[&str]) -> Self {
        let values = self
            .values
            .iter()
            .filter(|(k, _)| !k.as_str().is_some_and(|k| keys.contains(&k)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self { scope: self.scope.clone(), values }
    }

    /// Reject keyword arguments the builder does not understand.
    pub fn deny_unknown(&self, allowed: &[&str]) -> ConfigResult<()> {
        for key in self.keys() {
            if !allowed.contains(&key.as_str()) {
                return Err(ConfigurationError::invalid_argument(
                    &self.scope,
                    key,
                    format!("unexpected keyword argument (accepted: {})", allowed.join(", ")),
                ));
            }
        }
        Ok(())
    }
}

/// Split `a.b=value` and parse the value as a YAML node.
fn parse_override(raw: &str) -> ConfigResult<(&str, Value)> {
    let Some((path, value)) = raw.split_once('=') else {
        return Err(ConfigurationError::unparsable(raw, raw, "override must have the form key=value"));
    };
    let path = path.trim();
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(ConfigurationError::unparsable(raw, value, "override key must be a non-empty dot path"));
    }
    let value = serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((path, value))
}

fn merge_mapping(base: &mut Mapping, overlay: &Mapping) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Mapping(existing)), Value::Mapping(incoming)) => {
                merge_mapping(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

fn flatten_into(out: &mut ConfigSnapshot, prefix: Option<&str>, mapping: &Mapping) {
    for (key, value) in mapping {
        let key = key_to_string(key);
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key,
        };
        match value {
            Value::Mapping(nested) if !nested.is_empty() => flatten_into(out, Some(&path), nested),
            leaf => {
                out.insert(path, yaml_to_json(leaf));
            }
        }
    }
}

pub(crate) fn yaml_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into()
            } else if let Some(u) = n.as_u64() {
                u.into()
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
        }
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Sequence(items) => serde_json::Value::Array(items.iter().map(yaml_to_json).collect()),
        Value::Mapping(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (key_to_string(k), yaml_to_json(v))).collect(),
        ),
        Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

fn key_to_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => render_value(other),
    }
}

/// Compact single-line rendering of a node for error messages.
pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{s:?}"),
        other => serde_json::to_string(&yaml_to_json(other)).unwrap_or_else(|_| format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigErrorKind;

    const BASE: &str = r"
seed: 17
run_name: base
optimizer:
  name: decoupled_adamw
  lr: 6.0e-4
  betas: [0.9, 0.95]
loggers:
  wandb: {}
empty_key: null
";

    #[test]
    fn test_dot_path_lookup() {
        let cfg = ConfigTree::from_yaml_str(BASE).unwrap();
        assert_eq!(cfg.require::<u64>("seed").unwrap(), 17);
        assert_eq!(cfg.require::<String>("optimizer.name").unwrap(), "decoupled_adamw");
        assert!(cfg.get("optimizer.missing").is_none());
        assert!(cfg.get("seed.nested").is_none());
    }

    #[test]
    fn test_null_is_absent() {
        let cfg = ConfigTree::from_yaml_str(BASE).unwrap();
        assert!(!cfg.contains("empty_key"));
        let err = cfg.require::<u64>("empty_key").unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::MissingField);
    }

    #[test]
    fn test_wrong_type_is_unparsable() {
        let cfg = ConfigTree::from_yaml_str(BASE).unwrap();
        let err = cfg.require::<u64>("run_name").unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::Unparsable);
        assert!(err.to_string().contains("run_name"));
    }

    #[test]
    fn test_overrides_win_and_parse_yaml_values() {
        let cfg = ConfigTree::from_yaml_str(BASE)
            .unwrap()
            .with_overrides(&["seed=3", "optimizer.betas=[0.8, 0.99]", "device_train_microbatch_size=auto", "new.deep.key=1"])
            .unwrap();
        assert_eq!(cfg.require::<u64>("seed").unwrap(), 3);
        assert_eq!(cfg.require::<Vec<f64>>("optimizer.betas").unwrap(), vec![0.8, 0.99]);
        assert_eq!(cfg.require::<String>("device_train_microbatch_size").unwrap(), "auto");
        assert_eq!(cfg.require::<u64>("new.deep.key").unwrap(), 1);
        // Siblings of an overridden key survive the merge.
        assert_eq!(cfg.require::<String>("optimizer.name").unwrap(), "decoupled_adamw");
    }

    #[test]
    fn test_empty_override_value_unsets_key() {
        let cfg = ConfigTree::from_yaml_str(BASE).unwrap().with_overrides(&["run_name="]).unwrap();
        assert!(!cfg.contains("run_name"));
    }

    #[test]
    fn test_malformed_override_is_rejected() {
        let base = ConfigTree::from_yaml_str(BASE).unwrap();
        let err = base.clone().with_overrides(&["seed"]).unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::Unparsable);
        let err = base.with_overrides(&["optimizer..lr=1"]).unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::Unparsable);
    }

    #[test]
    fn test_top_level_must_be_mapping() {
        assert!(ConfigTree::from_yaml_str("- a\n- b\n").is_err());
        assert_eq!(ConfigTree::from_yaml_str("").unwrap(), ConfigTree::default());
    }

    #[test]
    fn test_load_reports_missing_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = ConfigTree::load(temp.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, RunError::ConfigRead { .. }));
    }

    #[test]
    fn test_flatten_uses_dot_keys() {
        let cfg = ConfigTree::from_yaml_str(BASE).unwrap();
        let flat = cfg.flatten();
        assert_eq!(flat["seed"], serde_json::json!(17));
        assert_eq!(flat["optimizer.betas"], serde_json::json!([0.9, 0.95]));
        assert_eq!(flat["loggers.wandb"], serde_json::json!({}));
    }

    #[test]
    fn test_fragment_scope_in_errors() {
        let cfg = ConfigTree::from_yaml_str(BASE).unwrap();
        let optimizer = cfg.fragment("optimizer").unwrap().scoped("optimizer 'decoupled_adamw'");
        let err = optimizer.require::<f64>("eps").unwrap_err();
        assert_eq!(err.kind(), ConfigErrorKind::InvalidArgument);
        assert!(err.to_string().contains("optimizer 'decoupled_adamw'"));
        assert!(err.to_string().contains("`eps`"));
    }

    #[test]
    fn test_fragment_deny_unknown_and_without() {
        let fragment = ConfigFragment::from_yaml_str("algo", "clipping_type: norm\nextra: 1\n").unwrap();
        assert!(fragment.deny_unknown(&["clipping_type", "extra"]).is_ok());
        let err = fragment.deny_unknown(&["clipping_type"]).unwrap_err();
        assert!(err.to_string().contains("extra"));
        assert!(fragment.without(&["extra"]).deny_unknown(&["clipping_type"]).is_ok());
    }

    #[test]
    fn test_fragment_keys_keep_declaration_order() {
        let fragment = ConfigFragment::from_yaml_str("callbacks", "speed_monitor: {}\nlr_monitor: {}\nmemory_monitor: {}\n").unwrap();
        let keys: Vec<String> = fragment.keys().collect();
        assert_eq!(keys, vec!["speed_monitor", "lr_monitor", "memory_monitor"]);
    }
}
