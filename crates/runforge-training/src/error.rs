use crate::registry::Category;
use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;

pub type RunResult<T> = std::result::Result<T, RunError>;

/// A configuration problem detected while assembling a run.
///
/// Every variant is fatal to the run and carries the offending key, category
/// or value so the message is actionable on its own.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error(
        "global batch size {global_batch_size} is not divisible by world size {world_size}; \
         the batch would be truncated, adjust `global_train_batch_size` to a multiple of \
         {world_size} ({})",
        nearest_multiples(.global_batch_size, .world_size)
    )]
    GlobalBatchDivisibility { global_batch_size: u64, world_size: u64 },

    #[error(
        "device microbatch size {microbatch_size} does not evenly divide device batch size \
         {device_batch_size}; set `device_train_microbatch_size` to a divisor of \
         {device_batch_size} or to `auto`"
    )]
    MicrobatchDivisibility { device_batch_size: u64, microbatch_size: u64 },

    #[error("could not parse `{key}` = {value}: {reason}")]
    Unparsable { key: String, value: String, reason: String },

    #[error("unknown {category} '{name}' (registered: {known})")]
    UnknownComponent { category: Category, name: String, known: String },

    #[error("missing required argument `{field}` for {scope}")]
    MissingArgument { scope: String, field: String },

    #[error("invalid argument `{field}` for {scope}: {reason}")]
    InvalidArgument { scope: String, field: String, reason: String },

    #[error("missing required field `{field}` in {context}")]
    MissingField { context: String, field: String },
}

/// Coarse classification of a [`ConfigurationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    Divisibility,
    Unparsable,
    UnknownComponent,
    /// Missing or invalid builder argument.
    InvalidArgument,
    MissingField,
}

impl ConfigurationError {
    #[must_use]
    pub fn kind(&self) -> ConfigErrorKind {
        match self {
            Self::GlobalBatchDivisibility { .. } | Self::MicrobatchDivisibility { .. } => {
                ConfigErrorKind::Divisibility
            }
            Self::Unparsable { .. } => ConfigErrorKind::Unparsable,
            Self::UnknownComponent { .. } => ConfigErrorKind::UnknownComponent,
            Self::MissingArgument { .. } | Self::InvalidArgument { .. } => {
                ConfigErrorKind::InvalidArgument
            }
            Self::MissingField { .. } => ConfigErrorKind::MissingField,
        }
    }

    pub(crate) fn unparsable(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Unparsable { key: key.into(), value: value.into(), reason: reason.into() }
    }

    pub(crate) fn invalid_argument(
        scope: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidArgument { scope: scope.into(), field: field.into(), reason: reason.into() }
    }
}

fn nearest_multiples(global_batch_size: &u64, world_size: &u64) -> String {
    let lower = global_batch_size / world_size * world_size;
    match (lower, lower.checked_add(*world_size)) {
        (0, Some(upper)) => format!("e.g. {upper}"),
        (_, Some(upper)) => format!("e.g. {lower} or {upper}"),
        (_, None) => format!("e.g. {lower}"),
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The training engine failed; its error is surfaced as-is.
    #[error(transparent)]
    Delegation(anyhow::Error),

    #[error("failed to read configuration {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

impl RunError {
    /// The configuration error behind this failure, if that is what it was.
    #[must_use]
    pub fn as_configuration(&self) -> Option<&ConfigurationError> {
        match self {
            Self::Configuration(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divisibility_message_names_values_and_fix() {
        let err = ConfigurationError::GlobalBatchDivisibility { global_batch_size: 1001, world_size: 8 };
        let msg = err.to_string();
        assert!(msg.contains("1001"));
        assert!(msg.contains("world size 8"));
        assert!(msg.contains("1000 or 1008"));
        assert_eq!(err.kind(), ConfigErrorKind::Divisibility);
    }

    #[test]
    fn test_divisibility_hint_when_batch_smaller_than_world() {
        let err = ConfigurationError::GlobalBatchDivisibility { global_batch_size: 3, world_size: 8 };
        assert!(err.to_string().contains("e.g. 8"));
    }

    #[test]
    fn test_divisibility_hint_near_u64_max() {
        let err = ConfigurationError::GlobalBatchDivisibility { global_batch_size: u64::MAX, world_size: 2 };
        let msg = err.to_string();
        assert!(msg.contains(&format!("e.g. {}", u64::MAX - 1)));
        assert!(!msg.contains(" or "));
    }

    #[test]
    fn test_argument_errors_share_a_kind() {
        let missing = ConfigurationError::MissingArgument {
            scope: "optimizer 'decoupled_adamw'".to_string(),
            field: "lr".to_string(),
        };
        let invalid = ConfigurationError::invalid_argument("optimizer 'decoupled_adamw'", "eps", "must be > 0");
        assert_eq!(missing.kind(), ConfigErrorKind::InvalidArgument);
        assert_eq!(invalid.kind(), ConfigErrorKind::InvalidArgument);
        assert!(missing.to_string().contains("`lr`"));
    }
}
