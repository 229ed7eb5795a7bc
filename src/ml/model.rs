// ============================================================
// Layer 5 — CLI2P Dual Encoder
// ============================================================
// Two transformer towers mapping images and captions into one
// embedding space:
//
//   image  [B, 3, H, W] → patches → class token → blocks → proj
//   text   [B, T]       → tokens + positions → blocks → [CLS] → proj
//
// Both outputs are L2-normalised; `logit_scale` is learned.

use anyhow::{ensure, Result};
use burn::{
    module::Param,
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        conv::{Conv2d, Conv2dConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::{activation::gelu, Distribution},
};

// #[derive(Config)] already implements Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct Cli2pConfig {
    /// Size of the shared image/text embedding space
    pub embed_dim:      usize,
    pub image_height:   usize,
    pub image_width:    usize,
    pub patch_size:     usize,
    pub vision_width:   usize,
    pub vision_layers:  usize,
    pub vision_heads:   usize,
    pub vocab_size:     usize,
    pub context_length: usize,
    pub text_width:     usize,
    pub text_layers:    usize,
    pub text_heads:     usize,
    #[config(default = 0.0)]
    pub dropout:        f64,
    /// ln(1 / 0.07), the usual CLIP starting temperature
    #[config(default = 2.6592)]
    pub logit_scale_init: f64,
}

impl Cli2pConfig {
    /// Reject shapes the towers cannot be built with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.patch_size > 0, "patch_size must be positive");
        ensure!(
            self.image_height % self.patch_size == 0 && self.image_width % self.patch_size == 0,
            "input shape {}x{} is not divisible by patch size {}",
            self.image_height, self.image_width, self.patch_size
        );
        ensure!(
            self.vision_heads > 0 && self.vision_width % self.vision_heads == 0,
            "vision_width {} must be divisible by vision_heads {}",
            self.vision_width, self.vision_heads
        );
        ensure!(
            self.text_heads > 0 && self.text_width % self.text_heads == 0,
            "text_width {} must be divisible by text_heads {}",
            self.text_width, self.text_heads
        );
        ensure!(self.context_length >= 2, "context_length must be at least 2");
        ensure!(self.embed_dim > 0, "embed_dim must be positive");
        Ok(())
    }

    pub fn num_patches(&self) -> usize {
        (self.image_height / self.patch_size) * (self.image_width / self.patch_size)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Cli2pModel<B> {
        let logit_scale = Param::from_tensor(
            Tensor::<B, 1>::from_floats([self.logit_scale_init as f32], device),
        );
        Cli2pModel {
            image: self.init_image_encoder(device),
            text:  self.init_text_encoder(device),
            logit_scale,
        }
    }

    fn init_image_encoder<B: Backend>(&self, device: &B::Device) -> ImageEncoder<B> {
        let width = self.vision_width;
        let patch_embedding = Conv2dConfig::new([3, width], [self.patch_size, self.patch_size])
            .with_stride([self.patch_size, self.patch_size])
            .with_bias(false)
            .init(device);
        let class_embedding = Param::from_tensor(Tensor::random(
            [width],
            Distribution::Normal(0.0, 0.02),
            device,
        ));
        let position_embedding = EmbeddingConfig::new(self.num_patches() + 1, width).init(device);
        let layers = (0..self.vision_layers)
            .map(|_| self.build_encoder_block(width, self.vision_heads, device))
            .collect();
        ImageEncoder {
            patch_embedding,
            class_embedding,
            position_embedding,
            layers,
            final_norm: LayerNormConfig::new(width).init(device),
            projection: LinearConfig::new(width, self.embed_dim).with_bias(false).init(device),
            dropout:    DropoutConfig::new(self.dropout).init(),
        }
    }

    fn init_text_encoder<B: Backend>(&self, device: &B::Device) -> TextEncoder<B> {
        let width = self.text_width;
        let layers = (0..self.text_layers)
            .map(|_| self.build_encoder_block(width, self.text_heads, device))
            .collect();
        TextEncoder {
            token_embedding:    EmbeddingConfig::new(self.vocab_size, width).init(device),
            position_embedding: EmbeddingConfig::new(self.context_length, width).init(device),
            layers,
            final_norm: LayerNormConfig::new(width).init(device),
            projection: LinearConfig::new(width, self.embed_dim).with_bias(false).init(device),
            dropout:    DropoutConfig::new(self.dropout).init(),
        }
    }

    fn build_encoder_block<B: Backend>(
        &self,
        width:  usize,
        heads:  usize,
        device: &B::Device,
    ) -> EncoderBlock<B> {
        let self_attn = MultiHeadAttentionConfig::new(width, heads)
            .with_dropout(self.dropout)
            .init(device);
        EncoderBlock {
            self_attn,
            ffn_linear1: LinearConfig::new(width, 4 * width).init(device),
            ffn_linear2: LinearConfig::new(4 * width, width).init(device),
            norm1:       LayerNormConfig::new(width).init(device),
            norm2:       LayerNormConfig::new(width).init(device),
            dropout:     DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Pre-norm transformer block shared by both towers.
#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    /// `pad_mask` is true where a position is padding.
    pub fn forward(&self, x: Tensor<B, 3>, pad_mask: Option<Tensor<B, 2, Bool>>) -> Tensor<B, 3> {
        let mut input = MhaInput::self_attn(self.norm1.forward(x.clone()));
        if let Some(mask) = pad_mask {
            input = input.mask_pad(mask);
        }
        let attn_output = self.self_attn.forward(input).context;
        let x = x + self.dropout.forward(attn_output);

        let ffn_out = self.ffn_linear2.forward(gelu(
            self.ffn_linear1.forward(self.norm2.forward(x.clone())),
        ));
        x + self.dropout.forward(ffn_out)
    }
}

/// Vision tower: patches → transformer → class-token embedding.
#[derive(Module, Debug)]
pub struct ImageEncoder<B: Backend> {
    pub patch_embedding:    Conv2d<B>,
    pub class_embedding:    Param<Tensor<B, 1>>,
    pub position_embedding: Embedding<B>,
    pub layers:             Vec<EncoderBlock<B>>,
    pub final_norm:         LayerNorm<B>,
    pub projection:         Linear<B>,
    pub dropout:            Dropout,
}

impl<B: Backend> ImageEncoder<B> {
    /// images: [batch, 3, height, width] → [batch, embed_dim]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let patches = self.patch_embedding.forward(images);
        let [batch, width, grid_h, grid_w] = patches.dims();
        let tokens = grid_h * grid_w + 1;

        let patches = patches
            .reshape([batch, width, grid_h * grid_w])
            .swap_dims(1, 2);
        let class_token = self
            .class_embedding
            .val()
            .reshape([1, 1, width])
            .expand([batch, 1, width]);
        let x = Tensor::cat(vec![class_token, patches], 1);

        let positions = Tensor::<B, 1, Int>::arange(0..tokens as i64, &x.device())
            .unsqueeze::<2>()
            .expand([batch, tokens]);
        let mut x = self.dropout.forward(x + self.position_embedding.forward(positions));

        for layer in &self.layers {
            x = layer.forward(x, None);
        }
        let x = self.final_norm.forward(x);

        let pooled = x.slice([0..batch, 0..1, 0..width]).reshape([batch, width]);
        self.projection.forward(pooled)
    }
}

/// Text tower: tokens → transformer (padding masked) → [CLS] embedding.
#[derive(Module, Debug)]
pub struct TextEncoder<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub layers:             Vec<EncoderBlock<B>>,
    pub final_norm:         LayerNorm<B>,
    pub projection:         Linear<B>,
    pub dropout:            Dropout,
}

impl<B: Backend> TextEncoder<B> {
    /// input_ids, attention_mask: [batch, seq_len] → [batch, embed_dim]
    pub fn forward(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Tensor<B, 2> {
        let [batch, seq_len] = input_ids.dims();

        let tok_emb = self.token_embedding.forward(input_ids);
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &tok_emb.device())
            .unsqueeze::<2>()
            .expand([batch, seq_len]);
        let pos_emb = self.position_embedding.forward(positions);

        let pad_mask = attention_mask.equal_elem(0);
        let mut x = self.dropout.forward(tok_emb + pos_emb);
        for layer in &self.layers {
            x = layer.forward(x, Some(pad_mask.clone()));
        }
        let x = self.final_norm.forward(x);

        let width  = x.dims()[2];
        let pooled = x.slice([0..batch, 0..1, 0..width]).reshape([batch, width]);
        self.projection.forward(pooled)
    }
}

#[derive(Module, Debug)]
pub struct Cli2pModel<B: Backend> {
    pub image:       ImageEncoder<B>,
    pub text:        TextEncoder<B>,
    /// Log of the similarity scale applied before the softmax
    pub logit_scale: Param<Tensor<B, 1>>,
}

/// Paired, L2-normalised embeddings plus the current logit scale.
pub struct Cli2pOutput<B: Backend> {
    pub image_embeddings: Tensor<B, 2>,
    pub text_embeddings:  Tensor<B, 2>,
    pub logit_scale:      Tensor<B, 1>,
}

impl<B: Backend> Cli2pModel<B> {
    pub fn forward(
        &self,
        images:         Tensor<B, 4>,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Cli2pOutput<B> {
        Cli2pOutput {
            image_embeddings: l2_normalize(self.image.forward(images)),
            text_embeddings:  l2_normalize(self.text.forward(input_ids, attention_mask)),
            logit_scale:      self.logit_scale.val(),
        }
    }
}

/// Row-wise unit-length normalisation of [batch, dim] embeddings.
fn l2_normalize<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = x.clone().powf_scalar(2.0).sum_dim(1).sqrt().clamp_min(1e-12);
    x / norm
}
