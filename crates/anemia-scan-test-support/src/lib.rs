//! Test support for anemia-scan: synthetic images and synthetic model
//! weights.
//!
//! Inference tests run real forward passes against a reduced-dimension ViT
//! whose weights are generated at test time, so no checkpoint ships with the
//! repository.

mod builders;
mod model;

pub use builders::SyntheticImageBuilder;
pub use model::{tiny_vit_config, write_synthetic_weights, zero_weight_model};
