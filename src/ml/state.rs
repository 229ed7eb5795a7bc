// ============================================================
// Layer 5 — Named Parameter Export / Import
// ============================================================
// Walks the model field by field and gives every parameter a
// dotted name, e.g.
//
//   image.patch_embedding.weight
//   text.layers.1.self_attn.value.bias
//   logit_scale
//
// export → StateDict (name → shape + f32 values)
// import ← StateDict, replacing only the names present in it
//
// Import is only ever handed entries whose shapes were already
// checked against this same model (see partition_compatible), so
// it never fails.

use anyhow::{anyhow, Result};
use burn::{
    module::Param,
    nn::{attention::MultiHeadAttention, conv::Conv2d, Embedding, LayerNorm, Linear},
    prelude::*,
};

use crate::domain::state_dict::{StateDict, TensorEntry};
use crate::ml::model::{Cli2pModel, EncoderBlock, ImageEncoder, TextEncoder};

/// Modules whose parameters can be exported and re-imported by name.
pub trait NamedParams: Sized {
    fn export_params(&self, prefix: &str, dict: &mut StateDict) -> Result<()>;

    fn import_params(self, prefix: &str, dict: &StateDict) -> Self;
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn export_tensor<B: Backend, const D: usize>(
    param: &Param<Tensor<B, D>>,
    name:  String,
    dict:  &mut StateDict,
) -> Result<()> {
    let tensor = param.val();
    let shape  = tensor.dims().to_vec();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("Cannot read parameter '{name}': {e:?}"))?;
    dict.insert(name, TensorEntry::new(shape, values));
    Ok(())
}

fn import_tensor<B: Backend, const D: usize>(
    param: Param<Tensor<B, D>>,
    name:  &str,
    dict:  &StateDict,
) -> Param<Tensor<B, D>> {
    let Some(entry) = dict.get(name) else {
        return param;
    };
    param.map(|tensor| {
        let require_grad = tensor.is_require_grad();
        Tensor::<B, D>::from_data(
            TensorData::new(entry.values.clone(), entry.shape.clone()),
            &tensor.device(),
        )
        .set_require_grad(require_grad)
    })
}

// ─── Burn building blocks ─────────────────────────────────────────────────────

impl<B: Backend> NamedParams for Linear<B> {
    fn export_params(&self, prefix: &str, dict: &mut StateDict) -> Result<()> {
        export_tensor(&self.weight, join(prefix, "weight"), dict)?;
        if let Some(bias) = &self.bias {
            export_tensor(bias, join(prefix, "bias"), dict)?;
        }
        Ok(())
    }

    fn import_params(mut self, prefix: &str, dict: &StateDict) -> Self {
        self.weight = import_tensor(self.weight, &join(prefix, "weight"), dict);
        self.bias   = self.bias.map(|b| import_tensor(b, &join(prefix, "bias"), dict));
        self
    }
}

impl<B: Backend> NamedParams for LayerNorm<B> {
    fn export_params(&self, prefix: &str, dict: &mut StateDict) -> Result<()> {
        export_tensor(&self.gamma, join(prefix, "gamma"), dict)?;
        export_tensor(&self.beta, join(prefix, "beta"), dict)
    }

    fn import_params(mut self, prefix: &str, dict: &StateDict) -> Self {
        self.gamma = import_tensor(self.gamma, &join(prefix, "gamma"), dict);
        self.beta  = import_tensor(self.beta, &join(prefix, "beta"), dict);
        self
    }
}

impl<B: Backend> NamedParams for Embedding<B> {
    fn export_params(&self, prefix: &str, dict: &mut StateDict) -> Result<()> {
        export_tensor(&self.weight, join(prefix, "weight"), dict)
    }

    fn import_params(mut self, prefix: &str, dict: &StateDict) -> Self {
        self.weight = import_tensor(self.weight, &join(prefix, "weight"), dict);
        self
    }
}

impl<B: Backend> NamedParams for Conv2d<B> {
    fn export_params(&self, prefix: &str, dict: &mut StateDict) -> Result<()> {
        export_tensor(&self.weight, join(prefix, "weight"), dict)?;
        if let Some(bias) = &self.bias {
            export_tensor(bias, join(prefix, "bias"), dict)?;
        }
        Ok(())
    }

    fn import_params(mut self, prefix: &str, dict: &StateDict) -> Self {
        self.weight = import_tensor(self.weight, &join(prefix, "weight"), dict);
        self.bias   = self.bias.map(|b| import_tensor(b, &join(prefix, "bias"), dict));
        self
    }
}

impl<B: Backend> NamedParams for MultiHeadAttention<B> {
    fn export_params(&self, prefix: &str, dict: &mut StateDict) -> Result<()> {
        self.query.export_params(&join(prefix, "query"), dict)?;
        self.key.export_params(&join(prefix, "key"), dict)?;
        self.value.export_params(&join(prefix, "value"), dict)?;
        self.output.export_params(&join(prefix, "output"), dict)
    }

    fn import_params(mut self, prefix: &str, dict: &StateDict) -> Self {
        self.query  = self.query.import_params(&join(prefix, "query"), dict);
        self.key    = self.key.import_params(&join(prefix, "key"), dict);
        self.value  = self.value.import_params(&join(prefix, "value"), dict);
        self.output = self.output.import_params(&join(prefix, "output"), dict);
        self
    }
}

// ─── CLI2P modules ────────────────────────────────────────────────────────────

impl<B: Backend> NamedParams for EncoderBlock<B> {
    fn export_params(&self, prefix: &str, dict: &mut StateDict) -> Result<()> {
        self.self_attn.export_params(&join(prefix, "self_attn"), dict)?;
        self.ffn_linear1.export_params(&join(prefix, "ffn_linear1"), dict)?;
        self.ffn_linear2.export_params(&join(prefix, "ffn_linear2"), dict)?;
        self.norm1.export_params(&join(prefix, "norm1"), dict)?;
        self.norm2.export_params(&join(prefix, "norm2"), dict)
    }

    fn import_params(mut self, prefix: &str, dict: &StateDict) -> Self {
        self.self_attn   = self.self_attn.import_params(&join(prefix, "self_attn"), dict);
        self.ffn_linear1 = self.ffn_linear1.import_params(&join(prefix, "ffn_linear1"), dict);
        self.ffn_linear2 = self.ffn_linear2.import_params(&join(prefix, "ffn_linear2"), dict);
        self.norm1       = self.norm1.import_params(&join(prefix, "norm1"), dict);
        self.norm2       = self.norm2.import_params(&join(prefix, "norm2"), dict);
        self
    }
}

fn export_layers<B: Backend>(
    layers: &[EncoderBlock<B>],
    prefix: &str,
    dict:   &mut StateDict,
) -> Result<()> {
    for (i, layer) in layers.iter().enumerate() {
        layer.export_params(&join(prefix, &format!("layers.{i}")), dict)?;
    }
    Ok(())
}

fn import_layers<B: Backend>(
    layers: Vec<EncoderBlock<B>>,
    prefix: &str,
    dict:   &StateDict,
) -> Vec<EncoderBlock<B>> {
    layers
        .into_iter()
        .enumerate()
        .map(|(i, layer)| layer.import_params(&join(prefix, &format!("layers.{i}")), dict))
        .collect()
}

impl<B: Backend> NamedParams for ImageEncoder<B> {
    fn export_params(&self, prefix: &str, dict: &mut StateDict) -> Result<()> {
        self.patch_embedding.export_params(&join(prefix, "patch_embedding"), dict)?;
        export_tensor(&self.class_embedding, join(prefix, "class_embedding"), dict)?;
        self.position_embedding.export_params(&join(prefix, "position_embedding"), dict)?;
        export_layers(&self.layers, prefix, dict)?;
        self.final_norm.export_params(&join(prefix, "final_norm"), dict)?;
        self.projection.export_params(&join(prefix, "projection"), dict)
    }

    fn import_params(mut self, prefix: &str, dict: &StateDict) -> Self {
        self.patch_embedding    = self.patch_embedding.import_params(&join(prefix, "patch_embedding"), dict);
        self.class_embedding    = import_tensor(self.class_embedding, &join(prefix, "class_embedding"), dict);
        self.position_embedding = self.position_embedding.import_params(&join(prefix, "position_embedding"), dict);
        self.layers             = import_layers(self.layers, prefix, dict);
        self.final_norm         = self.final_norm.import_params(&join(prefix, "final_norm"), dict);
        self.projection         = self.projection.import_params(&join(prefix, "projection"), dict);
        self
    }
}

impl<B: Backend> NamedParams for TextEncoder<B> {
    fn export_params(&self, prefix: &str, dict: &mut StateDict) -> Result<()> {
        self.token_embedding.export_params(&join(prefix, "token_embedding"), dict)?;
        self.position_embedding.export_params(&join(prefix, "position_embedding"), dict)?;
        export_layers(&self.layers, prefix, dict)?;
        self.final_norm.export_params(&join(prefix, "final_norm"), dict)?;
        self.projection.export_params(&join(prefix, "projection"), dict)
    }

    fn import_params(mut self, prefix: &str, dict: &StateDict) -> Self {
        self.token_embedding    = self.token_embedding.import_params(&join(prefix, "token_embedding"), dict);
        self.position_embedding = self.position_embedding.import_params(&join(prefix, "position_embedding"), dict);
        self.layers             = import_layers(self.layers, prefix, dict);
        self.final_norm         = self.final_norm.import_params(&join(prefix, "final_norm"), dict);
        self.projection         = self.projection.import_params(&join(prefix, "projection"), dict);
        self
    }
}

impl<B: Backend> NamedParams for Cli2pModel<B> {
    fn export_params(&self, prefix: &str, dict: &mut StateDict) -> Result<()> {
        self.image.export_params(&join(prefix, "image"), dict)?;
        self.text.export_params(&join(prefix, "text"), dict)?;
        export_tensor(&self.logit_scale, join(prefix, "logit_scale"), dict)
    }

    fn import_params(mut self, prefix: &str, dict: &StateDict) -> Self {
        self.image       = self.image.import_params(&join(prefix, "image"), dict);
        self.text        = self.text.import_params(&join(prefix, "text"), dict);
        self.logit_scale = import_tensor(self.logit_scale, &join(prefix, "logit_scale"), dict);
        self
    }
}

impl<B: Backend> Cli2pModel<B> {
    /// Every parameter of the model under its dotted name.
    pub fn state_dict(&self) -> Result<StateDict> {
        let mut dict = StateDict::new();
        self.export_params("", &mut dict)?;
        Ok(dict)
    }

    /// Replace the parameters named in `matched`; the rest stay as they are.
    pub fn load_state_dict(self, matched: &StateDict) -> Self {
        self.import_params("", matched)
    }
}
