//! Output adapters for screening records.

mod json;

pub use json::JsonOutput;
