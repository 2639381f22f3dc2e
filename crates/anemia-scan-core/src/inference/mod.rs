//! ML inference engine using Candle.
//!
//! Provides device selection, safetensors weight loading, the two image
//! preprocessing pipelines, and the Vision Transformer classifier with
//! attention capture.

mod device;
mod loader;
mod preprocess;
mod vit;

pub use device::get_device;
pub use loader::load_safetensors;
pub use preprocess::{ClassifierTransform, OodProcessor};
pub use vit::{AttentionMaps, VitConfig, VitModel};
