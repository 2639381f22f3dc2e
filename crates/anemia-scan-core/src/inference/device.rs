//! Device selection for inference.

use candle_core::Device;
use tracing::info;

/// Returns the best available device for model placement.
///
/// Prefers a GPU (Metal on macOS, CUDA elsewhere) when the matching cargo
/// feature is enabled and a device is present, falling back to CPU. There is
/// no runtime override; the selected device holds the model for the process
/// lifetime.
#[must_use]
pub fn get_device() -> Device {
    #[cfg(feature = "metal")]
    if let Ok(device) = Device::new_metal(0) {
        info!("Screening model placed on Metal device");
        return device;
    }

    #[cfg(feature = "cuda")]
    if let Ok(device) = Device::new_cuda(0) {
        info!("Screening model placed on CUDA device");
        return device;
    }

    info!("Screening model placed on CPU");
    Device::Cpu
}
