//! Ports implemented by the surrounding application.

mod image_source;
mod result_output;

pub use image_source::ImageSource;
pub use result_output::ResultOutput;
