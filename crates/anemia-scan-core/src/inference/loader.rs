//! Weight loading from safetensors checkpoints.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use safetensors::SafeTensors;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Loads a fine-tuned safetensors checkpoint and wraps it in a `VarBuilder`.
///
/// The checkpoint must exist; a missing file is a fatal error since the
/// process cannot serve predictions without it.
///
/// # Errors
///
/// Returns an error if:
/// - The checkpoint file is missing or cannot be read
/// - The safetensors data is invalid
pub fn load_safetensors(path: impl AsRef<Path>, device: &Device) -> Result<VarBuilder<'static>> {
    let path = path.as_ref();

    anyhow::ensure!(
        path.exists(),
        "Model weights not found at {}. The fine-tuned checkpoint must be \
         present before screening can start.",
        path.display()
    );

    debug!("Loading checkpoint from {}", path.display());

    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read model weights: {}", path.display()))?;

    let tensors = SafeTensors::deserialize(&data)
        .with_context(|| format!("Failed to parse safetensors: {}", path.display()))?;

    let mut tensor_map: HashMap<String, Tensor> = HashMap::new();

    for name in tensors.names() {
        let view = tensors
            .tensor(name)
            .with_context(|| format!("Failed to get tensor '{name}'"))?;

        let dtype = convert_dtype(view.dtype())?;
        let shape: Vec<usize> = view.shape().to_vec();

        let tensor = Tensor::from_raw_buffer(view.data(), dtype, &shape, device)
            .with_context(|| format!("Failed to create tensor '{name}'"))?;

        tensor_map.insert(name.clone(), tensor);
    }

    Ok(VarBuilder::from_tensors(tensor_map, DType::F32, device))
}

/// Converts safetensors dtype to candle dtype.
fn convert_dtype(dtype: safetensors::Dtype) -> Result<DType> {
    use safetensors::Dtype as S;
    match dtype {
        S::F32 => Ok(DType::F32),
        S::F64 => Ok(DType::F64),
        S::F16 => Ok(DType::F16),
        S::BF16 => Ok(DType::BF16),
        S::I64 => Ok(DType::I64),
        S::U8 => Ok(DType::U8),
        S::U32 => Ok(DType::U32),
        other => anyhow::bail!("Unsupported dtype in checkpoint: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_checkpoint_is_fatal() {
        let result = load_safetensors("/nonexistent/anemia_vit.safetensors", &Device::Cpu);
        let err = match result {
            Ok(_) => panic!("missing file must error"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("not found"));
    }
}
