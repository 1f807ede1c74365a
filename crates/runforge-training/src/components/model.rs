use crate::config::ConfigFragment;
use crate::error::{ConfigResult, ConfigurationError};
use crate::registry::ComponentRegistry;
use serde::Serialize;
use std::fmt;

/// A trainable model handed to the engine.
pub trait Model: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Number of trainable parameters.
    fn num_parameters(&self) -> u64;
}

/// Decoder-only GPT with tied input/output embeddings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MosaicGpt {
    pub d_model: u64,
    pub n_heads: u64,
    pub n_layers: u64,
    pub mlp_ratio: u64,
    pub max_seq_len: u64,
    pub vocab_size: u64,
    pub learned_pos_emb: bool,
    pub init_device: String,
    #[serde(skip)]
    num_parameters: u64,
}

impl MosaicGpt {
    pub const NAME: &'static str = "mosaic_gpt";

    pub fn from_kwargs(kwargs: &ConfigFragment) -> ConfigResult<Self> {
        let model = Self {
            d_model: kwargs.require("d_model")?,
            n_heads: kwargs.require("n_heads")?,
            n_layers: kwargs.require("n_layers")?,
            mlp_ratio: kwargs.get_or("mlp_ratio", 4)?,
            max_seq_len: kwargs.require("max_seq_len")?,
            vocab_size: kwargs.require("vocab_size")?,
            learned_pos_emb: kwargs.get_or("learned_pos_emb", true)?,
            init_device: kwargs.get_or("init_device", "cpu".to_string())?,
            num_parameters: 0,
        };

        for (field, value) in [
            ("d_model", model.d_model),
            ("n_heads", model.n_heads),
            ("n_layers", model.n_layers),
            ("mlp_ratio", model.mlp_ratio),
            ("max_seq_len", model.max_seq_len),
            ("vocab_size", model.vocab_size),
        ] {
            if value == 0 {
                return Err(ConfigurationError::invalid_argument(kwargs.scope(), field, "must be >= 1"));
            }
        }
        if model.d_model % model.n_heads != 0 {
            return Err(ConfigurationError::invalid_argument(
                kwargs.scope(),
                "n_heads",
                format!("d_model ({}) must be divisible by n_heads ({})", model.d_model, model.n_heads),
            ));
        }
        let num_parameters = model.count_parameters().ok_or_else(|| {
            ConfigurationError::invalid_argument(kwargs.scope(), "d_model", "parameter count overflows u64")
        })?;
        Ok(Self { num_parameters, ..model })
    }

    /// Per block: two layer norms, fused qkv and output projections, and the
    /// MLP, all with biases.
    fn block_parameters(&self) -> Option<u64> {
        let d = self.d_model;
        let r = self.mlp_ratio;
        let projections = r.checked_mul(2)?.checked_add(4)?.checked_mul(d)?.checked_mul(d)?;
        let vectors = r.checked_add(9)?.checked_mul(d)?;
        projections.checked_add(vectors)
    }

    fn count_parameters(&self) -> Option<u64> {
        let d = self.d_model;
        let token_embedding = self.vocab_size.checked_mul(d)?;
        let position_embedding = if self.learned_pos_emb { self.max_seq_len.checked_mul(d)? } else { 0 };
        let final_norm = d.checked_mul(2)?;
        let blocks = self.n_layers.checked_mul(self.block_parameters()?)?;
        token_embedding.checked_add(position_embedding)?.checked_add(blocks)?.checked_add(final_norm)
    }
}

impl Model for MosaicGpt {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn num_parameters(&self) -> u64 {
        self.num_parameters
    }
}

pub fn register_builtins(registry: &mut ComponentRegistry<Box<dyn Model>>) {
    registry.register(MosaicGpt::NAME, |kwargs, _| {
        Ok(Box::new(MosaicGpt::from_kwargs(kwargs)?) as Box<dyn Model>)
    });
}
