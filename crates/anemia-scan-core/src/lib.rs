//! Anemia Scan Core - conjunctiva screening pipeline
//!
//! Classifies ocular conjunctiva images as anemic / non-anemic with a
//! fine-tuned Vision Transformer, gates predictions with an
//! out-of-distribution confidence filter, and renders attention-based
//! heatmap explanations.

pub mod detector;
pub mod domain;
pub mod heatmap;
pub mod inference;
pub mod ood;
pub mod ports;

pub use detector::{AnemiaDetector, DetectorConfig, LazyDetector};
pub use domain::{
    ClassProbabilities, ImageInfo, Label, PredictOptions, Prediction, QualityRejection,
    QualityReport, QualitySummary, Screening, ScreeningOutcome, ScreeningRecord, ScreeningStatus,
};
pub use heatmap::HeatmapConfig;
pub use inference::{VitConfig, VitModel};
pub use ood::{QualityConfig, QualityGate};
pub use ports::{ImageSource, ResultOutput};
