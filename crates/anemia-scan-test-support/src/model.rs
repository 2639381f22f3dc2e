//! Reduced-dimension ViT configuration and weight synthesis for tests.

use std::path::Path;

use anemia_scan_core::inference::{VitConfig, VitModel};
use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};

/// A ViT small enough to run forward passes in unit tests.
///
/// Four encoder layers keep the default heatmap layer index (3) in range;
/// a 4x4 patch grid keeps attention tensors tiny.
#[must_use]
pub fn tiny_vit_config() -> VitConfig {
    VitConfig {
        image_size: 32,
        patch_size: 8,
        hidden_size: 32,
        num_layers: 4,
        num_heads: 2,
        intermediate_size: 64,
        num_classes: 2,
        layer_norm_eps: 1e-12,
    }
}

/// Builds a model with all-zero weights on the CPU.
///
/// Zero weights yield logits of exactly zero, so class probabilities are
/// balanced at 0.5 and the MSP confidence is deterministic. Useful for
/// exercising gate decisions without a checkpoint.
///
/// # Errors
///
/// Returns an error if the architecture cannot be constructed.
pub fn zero_weight_model(cfg: &VitConfig) -> Result<VitModel> {
    let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
    VitModel::new(cfg, vb)
}

/// Writes a complete randomly initialized checkpoint for `cfg` to `path`.
///
/// Constructs the model against a `VarMap`-backed builder so every tensor
/// the architecture reads is created with its exact name and shape, then
/// saves the map as safetensors. The result loads through the production
/// loader path.
///
/// # Errors
///
/// Returns an error if construction or saving fails.
pub fn write_synthetic_weights(cfg: &VitConfig, path: impl AsRef<Path>) -> Result<()> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let _model = VitModel::new(cfg, vb).context("Failed to build model for weight synthesis")?;

    varmap
        .save(path.as_ref())
        .context("Failed to save synthetic checkpoint")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Tensor;

    #[test]
    fn test_zero_model_forward() {
        let cfg = tiny_vit_config();
        let model = zero_weight_model(&cfg).expect("build");

        let pixels = Tensor::zeros((1, 3, 32, 32), DType::F32, &Device::Cpu).expect("input");
        let logits = model.forward(&pixels).expect("forward");
        assert_eq!(logits.dims(), &[1, 2]);
    }

    #[test]
    fn test_synthetic_weights_round_trip() {
        let cfg = tiny_vit_config();
        let dir = std::env::temp_dir().join("anemia-scan-test-weights");
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join(format!("tiny-{}.safetensors", std::process::id()));

        write_synthetic_weights(&cfg, &path).expect("write weights");
        assert!(path.exists());

        let device = Device::Cpu;
        let vb = anemia_scan_core::inference::load_safetensors(&path, &device).expect("load");
        let model = VitModel::new(&cfg, vb).expect("rebuild from checkpoint");

        let pixels = Tensor::zeros((1, 3, 32, 32), DType::F32, &device).expect("input");
        let (logits, attentions) = model.forward_with_attentions(&pixels).expect("forward");
        assert_eq!(logits.dims(), &[1, 2]);
        assert_eq!(attentions.len(), 4);

        let _ = std::fs::remove_file(&path);
    }
}
