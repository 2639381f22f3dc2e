//! Out-of-distribution quality gate.
//!
//! Scores model logits with the maximum softmax probability (MSP) and an
//! energy score to decide whether an input resembles the training
//! distribution closely enough to trust the classification. The gate only
//! reports; rejecting an invalid result is the caller's decision.

use anyhow::{Context, Result};
use candle_core::Tensor;
use tracing::{info, warn};

use crate::domain::QualityReport;

/// Quality gate configuration.
#[derive(Debug, Clone, Copy)]
pub struct QualityConfig {
    /// Minimum MSP confidence for an image to be considered in-distribution.
    pub msp_threshold: f32,
    /// Temperature for the energy score.
    pub energy_temperature: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            msp_threshold: 0.75,
            energy_temperature: 2.0,
        }
    }
}

/// OOD gate over classifier logits.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityGate {
    config: QualityConfig,
}

impl QualityGate {
    /// Creates a gate with the given configuration.
    #[must_use]
    pub const fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Threshold this gate compares MSP confidence against.
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.config.msp_threshold
    }

    /// Scores a logits tensor and decides validity.
    ///
    /// Returns both scores and the threshold regardless of the outcome;
    /// never errors on rejection.
    ///
    /// # Errors
    ///
    /// Returns an error if the logits tensor cannot be read.
    pub fn evaluate(&self, logits: &Tensor) -> Result<QualityReport> {
        let values: Vec<f32> = logits
            .flatten_all()
            .and_then(|t| t.to_vec1())
            .context("Failed to read logits for OOD scoring")?;
        anyhow::ensure!(!values.is_empty(), "Empty logits tensor");

        let confidence = max_softmax_probability(&values);
        let energy = energy_score(&values, self.config.energy_temperature);
        let is_valid = confidence >= self.config.msp_threshold;

        if is_valid {
            info!(
                "Image passed quality gate: confidence {:.1}% (threshold {:.0}%)",
                confidence * 100.0,
                self.config.msp_threshold * 100.0
            );
        } else {
            warn!(
                "Image rejected by quality gate: confidence {:.1}% (threshold {:.0}%)",
                confidence * 100.0,
                self.config.msp_threshold * 100.0
            );
        }

        Ok(QualityReport {
            is_valid,
            confidence,
            energy,
            threshold: self.config.msp_threshold,
        })
    }
}

/// Maximum softmax probability of a logits vector, in `[0, 1]`.
#[must_use]
pub fn max_softmax_probability(logits: &[f32]) -> f32 {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = logits.iter().map(|l| (l - max).exp()).sum();
    // softmax peaks at the max logit, whose shifted exponent is exp(0) = 1
    1.0 / sum
}

/// Energy score `-T * logsumexp(logits / T)`.
///
/// Computed in shifted form so it stays finite for any finite logits.
#[must_use]
pub fn energy_score(logits: &[f32], temperature: f32) -> f32 {
    let scaled_max = logits
        .iter()
        .map(|l| l / temperature)
        .fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = logits
        .iter()
        .map(|l| (l / temperature - scaled_max).exp())
        .sum();
    -temperature * (scaled_max + sum.ln())
}
