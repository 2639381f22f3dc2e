//! The anemia screening service.
//!
//! [`AnemiaDetector`] owns the loaded model, both preprocessing pipelines,
//! and the quality gate. It is constructed once by the application's
//! composition root and passed by reference to callers; [`LazyDetector`]
//! provides load-on-first-use semantics without hidden global state.

use std::path::PathBuf;

use anyhow::{Context, Result};
use candle_core::{Device, D};
use candle_nn::ops::softmax;
use image::DynamicImage;
use once_cell::sync::OnceCell;
use tracing::{error, info};

use crate::domain::{
    ClassProbabilities, Label, PredictOptions, Prediction, QualityRejection, QualityReport,
    QualitySummary, Screening, ScreeningOutcome,
};
use crate::heatmap::{self, HeatmapConfig};
use crate::inference::{
    get_device, load_safetensors, ClassifierTransform, OodProcessor, VitConfig, VitModel,
};
use crate::ood::{QualityConfig, QualityGate};

/// Everything needed to construct a detector.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Path to the fine-tuned safetensors checkpoint.
    pub weights_path: PathBuf,
    /// Model architecture.
    pub vit: VitConfig,
    /// Quality gate settings.
    pub quality: QualityConfig,
    /// Heatmap rendering settings.
    pub heatmap: HeatmapConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            weights_path: PathBuf::from("models/anemia_vit.safetensors"),
            vit: VitConfig::base(),
            quality: QualityConfig::default(),
            heatmap: HeatmapConfig::default(),
        }
    }
}

/// Conjunctiva anemia detector: ViT classifier, OOD gate, heatmap renderer.
///
/// Immutable after construction. Inference is synchronous and compute-bound;
/// the detector does not coordinate concurrent access to the device-bound
/// model.
pub struct AnemiaDetector {
    model: VitModel,
    ood_processor: OodProcessor,
    transform: ClassifierTransform,
    gate: QualityGate,
    heatmap: HeatmapConfig,
    device: Device,
}

impl AnemiaDetector {
    /// Loads the fine-tuned checkpoint and builds the detector.
    ///
    /// # Errors
    ///
    /// Returns an error if the weights file is missing or the model cannot
    /// be constructed; both are fatal, the process cannot serve predictions.
    pub fn load(config: &DetectorConfig) -> Result<Self> {
        info!(
            "Loading anemia screening model from {}",
            config.weights_path.display()
        );

        let device = get_device();
        let vb = load_safetensors(&config.weights_path, &device)
            .context("Failed to load screening checkpoint")?;
        let model = VitModel::new(&config.vit, vb).context("Failed to build ViT classifier")?;

        info!("Anemia screening model loaded");
        Ok(Self::with_model(model, config, device))
    }

    /// Builds a detector around an already-constructed model.
    ///
    /// Used by tests and by callers that manage weights themselves.
    #[must_use]
    pub fn with_model(model: VitModel, config: &DetectorConfig, device: Device) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let size = model.config().image_size as u32;
        Self {
            model,
            ood_processor: OodProcessor::new(size),
            transform: ClassifierTransform::new(size),
            gate: QualityGate::new(config.quality),
            heatmap: config.heatmap,
            device,
        }
    }

    /// Runs the OOD quality gate on an image.
    ///
    /// Uses the gate's dedicated preprocessor, not the classification
    /// transform. Returns the scores regardless of outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if preprocessing or the forward pass fails.
    pub fn check_image_quality(&self, image: &DynamicImage) -> Result<QualityReport> {
        let pixels = self
            .ood_processor
            .process(image, &self.device)
            .context("OOD preprocessing failed")?;
        let logits = self
            .model
            .forward(&pixels)
            .context("OOD forward pass failed")?;
        self.gate.evaluate(&logits)
    }

    /// Screens an image: optional quality gate, classification, optional
    /// heatmap.
    ///
    /// When gating is enabled and fails, returns
    /// [`ScreeningOutcome::Rejected`] without classifying. The gate runs
    /// once; its scores annotate the accepted prediction.
    ///
    /// # Errors
    ///
    /// Returns an error on preprocessing or inference failure. Such errors
    /// are logged before propagating; rejection is not an error.
    pub fn predict(
        &self,
        image: &DynamicImage,
        options: &PredictOptions,
    ) -> Result<ScreeningOutcome> {
        self.predict_inner(image, options).map_err(|e| {
            error!("Screening failed: {e:#}");
            e
        })
    }

    fn predict_inner(
        &self,
        image: &DynamicImage,
        options: &PredictOptions,
    ) -> Result<ScreeningOutcome> {
        // Gate first; classification must not run on a rejected image.
        let quality = if options.validate_quality {
            let report = self.check_image_quality(image)?;
            if !report.is_valid {
                return Ok(ScreeningOutcome::Rejected(QualityRejection::from_report(
                    &report,
                )));
            }
            Some(report)
        } else {
            None
        };

        let pixels = self
            .transform
            .process(image, &self.device)
            .context("Classification preprocessing failed")?;
        let (logits, attentions) = self
            .model
            .forward_with_attentions(&pixels)
            .context("Classification forward pass failed")?;

        let probs: Vec<f32> = softmax(&logits, D::Minus1)
            .and_then(|t| t.flatten_all()?.to_vec1())
            .context("Failed to read class probabilities")?;
        anyhow::ensure!(probs.len() == 2, "Expected 2 class probabilities");

        let (label, confidence) = if probs[0] >= probs[1] {
            (Label::Anemia, probs[0])
        } else {
            (Label::NoAnemia, probs[1])
        };

        let prediction = Prediction {
            label,
            confidence: percent(confidence),
            probabilities: ClassProbabilities {
                anemia: percent(probs[0]),
                no_anemia: percent(probs[1]),
            },
            quality: quality.as_ref().map(QualitySummary::from_report),
        };

        let heatmap = options.generate_heatmap.then(|| {
            heatmap::render(
                &attentions,
                image,
                &self.heatmap,
                self.model.config().grid_size(),
            )
        });

        info!(
            "Screening result: {} ({:.2}%)",
            prediction.label, prediction.confidence
        );

        Ok(ScreeningOutcome::Accepted(Screening {
            prediction,
            heatmap,
        }))
    }
}

/// Converts a probability to a percentage rounded to 2 decimals.
fn percent(fraction: f32) -> f32 {
    (fraction * 10_000.0).round() / 100.0
}

/// A detector that defers loading until first use.
///
/// Holds the configuration and constructs the [`AnemiaDetector`] on the
/// first `get()`, returning the same instance afterwards. Owned by the
/// composition root; there is no invalidation or reload path.
pub struct LazyDetector {
    config: DetectorConfig,
    cell: OnceCell<AnemiaDetector>,
}

impl LazyDetector {
    /// Creates a lazy detector; nothing is loaded yet.
    #[must_use]
    pub const fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            cell: OnceCell::new(),
        }
    }

    /// Returns the detector, loading the model on first call.
    ///
    /// # Errors
    ///
    /// Returns the load error if construction fails. A failed load is
    /// retried on the next call.
    pub fn get(&self) -> Result<&AnemiaDetector> {
        self.cell.get_or_try_init(|| AnemiaDetector::load(&self.config))
    }

    /// Returns true if the model has been loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }
}
