//! Screening outcome types.
//!
//! A screening either produces an accepted [`Prediction`] or a
//! [`QualityRejection`] when the input fails the out-of-distribution gate.
//! Rejection is an expected outcome, not an error, so the two cases form a
//! discriminated [`ScreeningOutcome`] rather than an error path.

use serde::{Deserialize, Serialize};

/// Classification label for a conjunctiva image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    /// Anemic conjunctiva.
    #[serde(rename = "Anemia")]
    Anemia,
    /// Non-anemic conjunctiva.
    #[serde(rename = "No Anemia")]
    NoAnemia,
}

impl Label {
    /// Human-readable label text.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anemia => "Anemia",
            Self::NoAnemia => "No Anemia",
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-class probabilities as percentages (rounded to 2 decimals).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClassProbabilities {
    /// Probability of the anemia class, in percent.
    pub anemia: f32,
    /// Probability of the no-anemia class, in percent.
    pub no_anemia: f32,
}

/// Raw quality gate scores for one evaluation.
///
/// `confidence` is the maximum softmax probability in `[0, 1]`; `energy` is
/// the temperature-scaled negative log-sum-exp of the logits. Produced per
/// call, never persisted.
#[derive(Debug, Clone, Copy)]
pub struct QualityReport {
    /// Whether the image passed the gate (`confidence >= threshold`).
    pub is_valid: bool,
    /// Maximum softmax probability in `[0, 1]`.
    pub confidence: f32,
    /// Energy score; lower values indicate higher in-distribution likelihood.
    pub energy: f32,
    /// Threshold the confidence was compared against.
    pub threshold: f32,
}

/// Quality gate scores attached to an accepted prediction, percent-formatted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualitySummary {
    /// Gate confidence in percent.
    pub confidence: f32,
    /// Gate threshold in percent.
    pub threshold: f32,
    /// Energy score, rounded to 2 decimals.
    pub energy: f32,
}

impl QualitySummary {
    /// Builds a percent-formatted summary from a raw report.
    #[must_use]
    pub fn from_report(report: &QualityReport) -> Self {
        Self {
            confidence: round2(report.confidence * 100.0),
            threshold: round2(report.threshold * 100.0),
            energy: round2(report.energy),
        }
    }
}

/// An accepted classification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Winning class label.
    pub label: Label,
    /// Confidence of the winning class, in percent.
    pub confidence: f32,
    /// Per-class probabilities, in percent.
    pub probabilities: ClassProbabilities,
    /// Quality gate scores, present when validation was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualitySummary>,
}

/// A full screening result: the prediction plus the optional rendered heatmap.
#[derive(Debug, Clone)]
pub struct Screening {
    /// The classification result.
    pub prediction: Prediction,
    /// Side-by-side original/attention-overlay image, when requested.
    pub heatmap: Option<image::DynamicImage>,
}

/// Rejection by the quality gate, with percent-formatted scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityRejection {
    /// User-facing explanation with recapture guidance.
    pub message: String,
    /// Gate confidence in percent.
    pub confidence: f32,
    /// Gate threshold in percent.
    pub threshold: f32,
    /// Energy score, rounded to 2 decimals.
    pub energy: f32,
}

impl QualityRejection {
    /// Builds a rejection from a raw gate report.
    #[must_use]
    pub fn from_report(report: &QualityReport) -> Self {
        let confidence = round1(report.confidence * 100.0);
        let threshold = round1(report.threshold * 100.0);
        Self {
            message: format!(
                "Image rejected for low quality. Confidence: {confidence:.1}% \
                 (at least {threshold:.0}% required). Please capture a new, clear, \
                 centered image of the ocular conjunctiva."
            ),
            confidence,
            threshold,
            energy: round2(report.energy),
        }
    }
}

/// Outcome of a screening: accepted with a prediction, or rejected by the gate.
#[derive(Debug, Clone)]
pub enum ScreeningOutcome {
    /// The image passed the gate (or gating was disabled) and was classified.
    Accepted(Screening),
    /// The image failed the quality gate; no classification was attempted.
    Rejected(QualityRejection),
}

/// Flags controlling a single prediction call.
#[derive(Debug, Clone, Copy)]
pub struct PredictOptions {
    /// Render the attention heatmap and attach it to the result.
    pub generate_heatmap: bool,
    /// Run the OOD quality gate before classifying.
    pub validate_quality: bool,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            generate_heatmap: true,
            validate_quality: true,
        }
    }
}

/// Rounds to 2 decimal places.
#[must_use]
pub(crate) fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

/// Rounds to 1 decimal place.
fn round1(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_text() {
        assert_eq!(Label::Anemia.to_string(), "Anemia");
        assert_eq!(Label::NoAnemia.to_string(), "No Anemia");
    }

    #[test]
    fn test_default_options_enable_gate_and_heatmap() {
        let opts = PredictOptions::default();
        assert!(opts.generate_heatmap);
        assert!(opts.validate_quality);
    }

    #[test]
    fn test_rejection_percent_formatting() {
        let report = QualityReport {
            is_valid: false,
            confidence: 0.401_23,
            energy: -1.234_56,
            threshold: 0.75,
        };
        let rejection = QualityRejection::from_report(&report);
        assert!((rejection.confidence - 40.1).abs() < 1e-4);
        assert!((rejection.threshold - 75.0).abs() < 1e-4);
        assert!((rejection.energy - (-1.23)).abs() < 1e-4);
        assert!(rejection.message.contains("40.1%"));
        assert!(rejection.message.contains("75%"));
    }

    #[test]
    fn test_summary_rounding() {
        let report = QualityReport {
            is_valid: true,
            confidence: 0.876_543,
            energy: -2.987_65,
            threshold: 0.75,
        };
        let summary = QualitySummary::from_report(&report);
        assert!((summary.confidence - 87.65).abs() < 1e-4);
        assert!((summary.threshold - 75.0).abs() < 1e-4);
        assert!((summary.energy - (-2.99)).abs() < 1e-4);
    }

    #[test]
    fn test_round2() {
        assert!((round2(92.304_9) - 92.3).abs() < 1e-5);
        assert!((round2(7.695) - 7.7).abs() < 1e-5);
    }
}
