//! Serializable per-image screening record.

use serde::{Deserialize, Serialize};

use super::{Prediction, QualityRejection};

/// Whether a screened image was accepted or rejected by the quality gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningStatus {
    /// Image was classified.
    Accepted,
    /// Image failed the quality gate.
    Rejected,
}

/// Complete screening record for a single image, as emitted by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningRecord {
    /// Path to the screened image.
    pub path: String,
    /// Timestamp of the screening (RFC 3339).
    pub timestamp: String,
    /// Accepted or rejected.
    pub status: ScreeningStatus,
    /// Classification result, present when accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<Prediction>,
    /// Rejection details, present when rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<QualityRejection>,
    /// Path the rendered heatmap was written to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heatmap_path: Option<String>,
}
