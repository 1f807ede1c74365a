use crate::config::ConfigFragment;
use crate::error::{ConfigResult, ConfigurationError};
use crate::registry::ComponentRegistry;
use serde::Serialize;
use std::fmt;

pub trait Tokenizer: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn max_seq_len(&self) -> u64;

    /// End-of-sequence token, used to delimit in-context evaluation examples.
    fn eos_token_id(&self) -> Option<u32>;
}

/// A pretrained tokenizer referenced by its hub name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HfTokenizer {
    pub tokenizer_name: String,
    pub max_seq_len: u64,
    pub eos_token_id: Option<u32>,
}

impl HfTokenizer {
    pub const NAME: &'static str = "hftokenizer";

    pub fn from_kwargs(kwargs: &ConfigFragment) -> ConfigResult<Self> {
        kwargs.deny_unknown(&["tokenizer_name", "max_seq_len", "eos_token_id"])?;
        let tokenizer = Self {
            tokenizer_name: kwargs.require_name("tokenizer_name")?,
            max_seq_len: kwargs.require("max_seq_len")?,
            eos_token_id: kwargs.optional("eos_token_id")?,
        };
        if tokenizer.max_seq_len == 0 {
            return Err(ConfigurationError::invalid_argument(kwargs.scope(), "max_seq_len", "must be >= 1"));
        }
        Ok(tokenizer)
    }
}

impl Tokenizer for HfTokenizer {
    fn name(&self) -> &str {
        &self.tokenizer_name
    }

    fn max_seq_len(&self) -> u64 {
        self.max_seq_len
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }
}

pub fn register_builtins(registry: &mut ComponentRegistry<Box<dyn Tokenizer>>) {
    registry.register(HfTokenizer::NAME, |kwargs, _| {
        Ok(Box::new(HfTokenizer::from_kwargs(kwargs)?) as Box<dyn Tokenizer>)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hftokenizer_from_args() {
        let kwargs = ConfigFragment::from_yaml_str(
            "tokenizer 'hftokenizer'",
            "tokenizer_name: gpt2\nmax_seq_len: 2048\neos_token_id: 50256\n",
        )
        .unwrap();
        let tokenizer = HfTokenizer::from_kwargs(&kwargs).unwrap();
        assert_eq!(tokenizer.name(), "gpt2");
        assert_eq!(tokenizer.max_seq_len(), 2048);
        assert_eq!(tokenizer.eos_token_id(), Some(50256));
    }

    #[test]
    fn test_hftokenizer_rejects_unknown_args() {
        let kwargs = ConfigFragment::from_yaml_str("tokenizer", "tokenizer_name: gpt2\nmax_seq_len: 8\npadding: left\n").unwrap();
        assert!(HfTokenizer::from_kwargs(&kwargs).unwrap_err().to_string().contains("padding"));
    }
}
