//! Configuration file support for anemia-scan.
//!
//! Supports TOML configuration from:
//! - XDG config: `~/.config/anemia-scan/config.toml` (lowest priority)
//! - Project-local: `.anemia-scan.toml` (searched up directory tree)
//! - CLI flags (highest priority, applied separately)

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

/// Top-level configuration structure.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// General options.
    pub general: GeneralConfig,
    /// Model checkpoint and architecture settings.
    pub model: ModelConfig,
    /// Quality gate settings.
    pub quality: QualityConfig,
    /// Heatmap rendering settings.
    pub heatmap: HeatmapConfig,
    /// Output formatting settings.
    pub output: OutputConfig,
}

/// General configuration options.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Recurse into subdirectories by default.
    pub recursive: Option<bool>,
}

/// Model configuration.
///
/// Architecture fields default to ViT-Base/16; they exist so a reduced
/// checkpoint can be screened against a matching architecture.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the fine-tuned safetensors checkpoint.
    pub weights: Option<PathBuf>,
    /// Square input resolution in pixels.
    pub image_size: Option<usize>,
    /// Square patch size in pixels.
    pub patch_size: Option<usize>,
    /// Embedding width.
    pub hidden_size: Option<usize>,
    /// Number of encoder layers.
    pub layers: Option<usize>,
    /// Number of attention heads.
    pub heads: Option<usize>,
    /// MLP hidden width.
    pub intermediate_size: Option<usize>,
}

/// Quality gate configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Enable/disable the OOD quality gate.
    pub enabled: Option<bool>,
    /// MSP confidence threshold (0.0-1.0).
    pub threshold: Option<f32>,
    /// Energy score temperature.
    pub energy_temperature: Option<f32>,
}

/// Heatmap configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct HeatmapConfig {
    /// Patch index whose attention row is visualized.
    pub grid_index: Option<usize>,
    /// Encoder layer whose attention is used.
    pub layer_index: Option<usize>,
    /// Overlay opacity (0.0-1.0).
    pub alpha: Option<f32>,
}

/// Output formatting configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format: "json" or "jsonl".
    pub format: Option<String>,
    /// Pretty-print JSON output.
    pub pretty: Option<bool>,
}

impl AppConfig {
    /// Load configuration from XDG and project-local files.
    ///
    /// Priority (lowest to highest):
    /// 1. XDG config: `~/.config/anemia-scan/config.toml`
    /// 2. Project-local: `.anemia-scan.toml` (searched up from cwd)
    ///
    /// Missing files are silently ignored. Invalid values are logged as
    /// warnings.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(xdg_path) = xdg_config_path() {
            if xdg_path.exists() {
                info!("Loading XDG config: {}", xdg_path.display());
                if let Some(xdg_config) = load_file(&xdg_path) {
                    config = xdg_config;
                }
            } else {
                debug!("XDG config not found: {}", xdg_path.display());
            }
        }

        if let Some(project_path) = find_project_config() {
            info!("Loading project config: {}", project_path.display());
            if let Some(project_config) = load_file(&project_path) {
                config.merge(project_config);
            }
        }

        if let Err(e) = config.validate() {
            eprintln!("warning: {e}");
        }

        config
    }

    /// Validate configuration values are within acceptable ranges.
    fn validate(&self) -> Result<(), String> {
        if let Some(t) = self.quality.threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(format!("quality.threshold must be 0.0-1.0, got {t}"));
            }
        }
        if let Some(t) = self.quality.energy_temperature {
            if t <= 0.0 {
                return Err(format!(
                    "quality.energy_temperature must be positive, got {t}"
                ));
            }
        }
        if let Some(a) = self.heatmap.alpha {
            if !(0.0..=1.0).contains(&a) {
                return Err(format!("heatmap.alpha must be 0.0-1.0, got {a}"));
            }
        }
        if let (Some(img), Some(patch)) = (self.model.image_size, self.model.patch_size) {
            if patch == 0 || img % patch != 0 {
                return Err(format!(
                    "model.image_size {img} must be divisible by model.patch_size {patch}"
                ));
            }
        }
        if let Some(ref f) = self.output.format {
            if f != "json" && f != "jsonl" {
                return Err(format!("output.format must be 'json' or 'jsonl', got '{f}'"));
            }
        }

        Ok(())
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` when present.
    fn merge(&mut self, other: Self) {
        self.general.recursive = other.general.recursive.or(self.general.recursive);

        self.model.weights = other.model.weights.or_else(|| self.model.weights.take());
        self.model.image_size = other.model.image_size.or(self.model.image_size);
        self.model.patch_size = other.model.patch_size.or(self.model.patch_size);
        self.model.hidden_size = other.model.hidden_size.or(self.model.hidden_size);
        self.model.layers = other.model.layers.or(self.model.layers);
        self.model.heads = other.model.heads.or(self.model.heads);
        self.model.intermediate_size = other
            .model
            .intermediate_size
            .or(self.model.intermediate_size);

        self.quality.enabled = other.quality.enabled.or(self.quality.enabled);
        self.quality.threshold = other.quality.threshold.or(self.quality.threshold);
        self.quality.energy_temperature = other
            .quality
            .energy_temperature
            .or(self.quality.energy_temperature);

        self.heatmap.grid_index = other.heatmap.grid_index.or(self.heatmap.grid_index);
        self.heatmap.layer_index = other.heatmap.layer_index.or(self.heatmap.layer_index);
        self.heatmap.alpha = other.heatmap.alpha.or(self.heatmap.alpha);

        self.output.format = other.output.format.or_else(|| self.output.format.take());
        self.output.pretty = other.output.pretty.or(self.output.pretty);
    }
}

/// Get the XDG config file path.
fn xdg_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("anemia-scan").join("config.toml"))
}

/// Find project-local config by searching up from current directory.
fn find_project_config() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    find_config_in_parents(&cwd)
}

/// Search for `.anemia-scan.toml` in the given directory and its parents.
fn find_config_in_parents(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);

    while let Some(dir) = current {
        let config_path = dir.join(".anemia-scan.toml");
        if config_path.exists() {
            return Some(config_path);
        }
        current = dir.parent();
    }

    None
}

/// Load and parse a TOML config file.
fn load_file(path: &Path) -> Option<AppConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Failed to read config file {}: {}", path.display(), e);
            return None;
        }
    };

    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_empty() {
        let config = AppConfig::default();
        assert!(config.model.weights.is_none());
        assert!(config.quality.threshold.is_none());
        assert!(config.heatmap.alpha.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r"
[general]
recursive = true

[model]
weights = 'models/anemia_vit.safetensors'
image_size = 224
patch_size = 16

[quality]
enabled = true
threshold = 0.75
energy_temperature = 2.0

[heatmap]
grid_index = 90
layer_index = 3
alpha = 0.6

[output]
format = 'json'
pretty = true
";
        let config: AppConfig = toml::from_str(toml).expect("parse full config");

        assert_eq!(config.general.recursive, Some(true));
        assert_eq!(
            config.model.weights,
            Some(PathBuf::from("models/anemia_vit.safetensors"))
        );
        assert_eq!(config.quality.threshold, Some(0.75));
        assert_eq!(config.heatmap.grid_index, Some(90));
        assert_eq!(config.output.format, Some("json".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_override_wins() {
        let mut base: AppConfig = toml::from_str(
            r"
[quality]
threshold = 0.5

[heatmap]
alpha = 0.4
",
        )
        .expect("parse base");

        let override_config: AppConfig = toml::from_str(
            r"
[quality]
threshold = 0.9
",
        )
        .expect("parse override");

        base.merge(override_config);

        assert_eq!(base.quality.threshold, Some(0.9));
        // Untouched values preserved from base
        assert_eq!(base.heatmap.alpha, Some(0.4));
    }

    #[test]
    fn test_merge_empty_override_preserves_base() {
        let mut base: AppConfig = toml::from_str(
            r"
[model]
weights = 'custom.safetensors'
",
        )
        .expect("parse base");

        base.merge(AppConfig::default());
        assert_eq!(base.model.weights, Some(PathBuf::from("custom.safetensors")));
    }

    #[test]
    fn test_validate_threshold_out_of_range() {
        let mut config = AppConfig::default();
        config.quality.threshold = Some(1.5);

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("quality.threshold"));
    }

    #[test]
    fn test_validate_alpha_out_of_range() {
        let mut config = AppConfig::default();
        config.heatmap.alpha = Some(-0.1);

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("heatmap.alpha"));
    }

    #[test]
    fn test_validate_patch_divisibility() {
        let mut config = AppConfig::default();
        config.model.image_size = Some(224);
        config.model.patch_size = Some(15);

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("divisible"));
    }

    #[test]
    fn test_validate_output_format() {
        let mut config = AppConfig::default();
        config.output.format = Some("xml".to_string());

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("output.format"));
    }

    #[test]
    fn test_invalid_toml_syntax_handled() {
        let toml = r"
[quality
threshold = 0.5
";
        let result: Result<AppConfig, _> = toml::from_str(toml);
        assert!(result.is_err(), "invalid TOML should return error");
    }
}
