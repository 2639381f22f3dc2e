//! Vision Transformer binary classifier with attention capture.
//!
//! A ViT-Base/16 style encoder with a 2-way classification head, built from
//! a fine-tuned checkpoint. The forward pass can return the per-layer
//! self-attention probabilities consumed by the heatmap renderer.

#![allow(clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use candle_core::{Module, Tensor, D};
use candle_nn::{
    conv2d, layer_norm, linear, ops::softmax, Conv2d, Conv2dConfig, LayerNorm, Linear, VarBuilder,
};

/// Per-layer attention probabilities from one forward pass.
///
/// Each tensor has shape `(batch, heads, tokens, tokens)` where `tokens`
/// includes the leading CLS token. Consumed only by the heatmap renderer.
pub type AttentionMaps = Vec<Tensor>;

/// Architecture hyperparameters.
#[derive(Debug, Clone)]
pub struct VitConfig {
    /// Square input resolution in pixels.
    pub image_size: usize,
    /// Square patch size in pixels; must divide `image_size`.
    pub patch_size: usize,
    /// Embedding width.
    pub hidden_size: usize,
    /// Number of encoder blocks.
    pub num_layers: usize,
    /// Number of attention heads; must divide `hidden_size`.
    pub num_heads: usize,
    /// Width of the MLP hidden layer.
    pub intermediate_size: usize,
    /// Number of output classes.
    pub num_classes: usize,
    /// Layer norm epsilon.
    pub layer_norm_eps: f64,
}

impl VitConfig {
    /// ViT-Base/16 with a binary head, the fine-tuned screening architecture.
    #[must_use]
    pub fn base() -> Self {
        Self {
            image_size: 224,
            patch_size: 16,
            hidden_size: 768,
            num_layers: 12,
            num_heads: 12,
            intermediate_size: 3072,
            num_classes: 2,
            layer_norm_eps: 1e-12,
        }
    }

    /// Patches per image side.
    #[must_use]
    pub const fn grid_size(&self) -> usize {
        self.image_size / self.patch_size
    }

    /// Total patch count (tokens excluding CLS).
    #[must_use]
    pub const fn num_patches(&self) -> usize {
        self.grid_size() * self.grid_size()
    }
}

impl Default for VitConfig {
    fn default() -> Self {
        Self::base()
    }
}

/// Patch embedding: strided convolution plus CLS token and position embeddings.
struct Embeddings {
    projection: Conv2d,
    cls_token: Tensor,
    position_embeddings: Tensor,
    hidden_size: usize,
}

impl Embeddings {
    fn new(cfg: &VitConfig, vb: VarBuilder) -> Result<Self> {
        let projection = conv2d(
            3,
            cfg.hidden_size,
            cfg.patch_size,
            Conv2dConfig {
                stride: cfg.patch_size,
                ..Conv2dConfig::default()
            },
            vb.pp("patch_embeddings.projection"),
        )?;

        let cls_token = vb.get_with_hints(
            (1, 1, cfg.hidden_size),
            "cls_token",
            candle_nn::Init::Randn {
                mean: 0.0,
                stdev: 0.02,
            },
        )?;

        let position_embeddings = vb.get_with_hints(
            (1, cfg.num_patches() + 1, cfg.hidden_size),
            "position_embeddings",
            candle_nn::Init::Randn {
                mean: 0.0,
                stdev: 0.02,
            },
        )?;

        Ok(Self {
            projection,
            cls_token,
            position_embeddings,
            hidden_size: cfg.hidden_size,
        })
    }

    fn forward(&self, pixels: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, _, _, _) = pixels.dims4()?;

        // (b, hidden, grid, grid) -> (b, patches, hidden)
        let patches = self
            .projection
            .forward(pixels)?
            .flatten_from(2)?
            .transpose(1, 2)?
            .contiguous()?;

        let cls = self
            .cls_token
            .expand((batch, 1, self.hidden_size))?
            .contiguous()?;

        Tensor::cat(&[cls, patches], 1)?.broadcast_add(&self.position_embeddings)
    }
}

/// Multi-head self-attention returning both output and attention probabilities.
struct Attention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    num_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn new(cfg: &VitConfig, vb: VarBuilder) -> Result<Self> {
        let h = cfg.hidden_size;
        let query = linear(h, h, vb.pp("attention.query"))?;
        let key = linear(h, h, vb.pp("attention.key"))?;
        let value = linear(h, h, vb.pp("attention.value"))?;
        let output = linear(h, h, vb.pp("output.dense"))?;

        Ok(Self {
            query,
            key,
            value,
            output,
            num_heads: cfg.num_heads,
            head_dim: h / cfg.num_heads,
        })
    }

    /// Splits `(b, n, hidden)` into `(b, heads, n, head_dim)`.
    fn split_heads(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (b, n, _) = xs.dims3()?;
        xs.reshape((b, n, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        let (b, n, _) = xs.dims3()?;

        let q = self.split_heads(&self.query.forward(xs)?)?;
        let k = self.split_heads(&self.key.forward(xs)?)?;
        let v = self.split_heads(&self.value.forward(xs)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.transpose(D::Minus2, D::Minus1)?)? * scale)?;
        let probs = softmax(&scores, D::Minus1)?;

        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, n, self.num_heads * self.head_dim))?;

        Ok((self.output.forward(&context)?, probs))
    }
}

/// Pre-LN encoder block.
struct Block {
    layernorm_before: LayerNorm,
    attention: Attention,
    layernorm_after: LayerNorm,
    intermediate: Linear,
    mlp_output: Linear,
}

impl Block {
    fn new(cfg: &VitConfig, vb: VarBuilder) -> Result<Self> {
        let layernorm_before = layer_norm(
            cfg.hidden_size,
            cfg.layer_norm_eps,
            vb.pp("layernorm_before"),
        )?;
        let attention = Attention::new(cfg, vb.pp("attention"))?;
        let layernorm_after =
            layer_norm(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("layernorm_after"))?;
        let intermediate = linear(
            cfg.hidden_size,
            cfg.intermediate_size,
            vb.pp("intermediate.dense"),
        )?;
        let mlp_output = linear(
            cfg.intermediate_size,
            cfg.hidden_size,
            vb.pp("output.dense"),
        )?;

        Ok(Self {
            layernorm_before,
            attention,
            layernorm_after,
            intermediate,
            mlp_output,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        let (attn, probs) = self.attention.forward(&self.layernorm_before.forward(xs)?)?;
        let xs = (xs + attn)?;

        let mlp = self
            .mlp_output
            .forward(&self.intermediate.forward(&self.layernorm_after.forward(&xs)?)?.gelu_erf()?)?;

        Ok(((xs + mlp)?, probs))
    }
}

/// Vision Transformer classifier.
///
/// Immutable after construction; inference only, no gradient state.
pub struct VitModel {
    embeddings: Embeddings,
    blocks: Vec<Block>,
    layernorm: LayerNorm,
    classifier: Linear,
    config: VitConfig,
}

impl VitModel {
    /// Builds the architecture from a weight source.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is inconsistent or any weight
    /// tensor is missing or mis-shaped.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new(cfg: &VitConfig, vb: VarBuilder) -> Result<Self> {
        anyhow::ensure!(
            cfg.image_size % cfg.patch_size == 0,
            "image_size {} must be divisible by patch_size {}",
            cfg.image_size,
            cfg.patch_size
        );
        anyhow::ensure!(
            cfg.hidden_size % cfg.num_heads == 0,
            "hidden_size {} must be divisible by num_heads {}",
            cfg.hidden_size,
            cfg.num_heads
        );

        let embeddings =
            Embeddings::new(cfg, vb.pp("embeddings")).context("Failed to build embeddings")?;

        let mut blocks = Vec::with_capacity(cfg.num_layers);
        for i in 0..cfg.num_layers {
            let block = Block::new(cfg, vb.pp(format!("encoder.layer.{i}")))
                .with_context(|| format!("Failed to build encoder layer {i}"))?;
            blocks.push(block);
        }

        let layernorm = layer_norm(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("layernorm"))
            .context("Failed to build final layer norm")?;
        let classifier = linear(cfg.hidden_size, cfg.num_classes, vb.pp("classifier"))
            .context("Failed to build classifier head")?;

        Ok(Self {
            embeddings,
            blocks,
            layernorm,
            classifier,
            config: cfg.clone(),
        })
    }

    /// Architecture this model was built with.
    #[must_use]
    pub const fn config(&self) -> &VitConfig {
        &self.config
    }

    /// Runs the forward pass, returning logits only.
    ///
    /// # Errors
    ///
    /// Returns an error if any tensor operation fails.
    pub fn forward(&self, pixels: &Tensor) -> Result<Tensor> {
        let (logits, _) = self.forward_with_attentions(pixels)?;
        Ok(logits)
    }

    /// Runs the forward pass, returning logits and per-layer attention maps.
    ///
    /// Logits have shape `(batch, num_classes)`; each attention map has shape
    /// `(batch, heads, tokens, tokens)`.
    ///
    /// # Errors
    ///
    /// Returns an error if any tensor operation fails.
    pub fn forward_with_attentions(&self, pixels: &Tensor) -> Result<(Tensor, AttentionMaps)> {
        let mut hidden = self
            .embeddings
            .forward(pixels)
            .context("Embedding forward failed")?;

        let mut attentions = Vec::with_capacity(self.blocks.len());
        for (i, block) in self.blocks.iter().enumerate() {
            let (next, probs) = block
                .forward(&hidden)
                .with_context(|| format!("Encoder layer {i} failed"))?;
            hidden = next;
            attentions.push(probs);
        }

        let hidden = self.layernorm.forward(&hidden)?;
        let cls = hidden.narrow(1, 0, 1)?.squeeze(1)?;
        let logits = self.classifier.forward(&cls)?;

        Ok((logits, attentions))
    }
}
