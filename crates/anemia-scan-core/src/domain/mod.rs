//! Core domain types for anemia screening.

mod image_info;
mod prediction;
mod record;

pub use image_info::ImageInfo;
pub use prediction::{
    ClassProbabilities, Label, PredictOptions, Prediction, QualityRejection, QualityReport,
    QualitySummary, Screening, ScreeningOutcome,
};
pub use record::{ScreeningRecord, ScreeningStatus};
