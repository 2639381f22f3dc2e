//! Analyze command - screen conjunctiva images for anemia.

use std::path::{Path, PathBuf};

use anemia_scan_core::{
    DetectorConfig, HeatmapConfig, ImageSource, LazyDetector, PredictOptions, QualityConfig,
    ResultOutput, ScreeningOutcome, ScreeningRecord, ScreeningStatus, VitConfig,
};
use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::{debug, info, warn};

use super::ExitCode;
use crate::config::AppConfig;
use crate::output::JsonOutput;
use crate::source::FsImageSource;

/// Output format for results.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// JSON Lines (one JSON object per line)
    #[default]
    Jsonl,
    /// Single JSON array
    Json,
}

/// Hardcoded default values.
mod defaults {
    pub const QUALITY_THRESHOLD: f32 = 0.75;
    pub const ENERGY_TEMPERATURE: f32 = 2.0;
    pub const WEIGHTS_PATH: &str = "models/anemia_vit.safetensors";
}

/// Parse and validate a threshold value (0.0-1.0).
fn parse_threshold(s: &str) -> Result<f32, String> {
    let value: f32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is not in 0.0..=1.0"))
    }
}

/// Shared arguments for image screening.
#[derive(Args, Clone)]
pub struct AnalyzeArgs {
    /// Files or directories to screen
    pub paths: Vec<PathBuf>,

    /// Recurse into subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Disable the OOD quality gate
    #[arg(long)]
    pub no_quality_check: bool,

    /// Quality gate confidence threshold (0.0-1.0)
    #[arg(long, value_parser = parse_threshold)]
    pub quality_threshold: Option<f32>,

    /// Directory to write rendered heatmaps to (heatmaps are skipped when
    /// not set)
    #[arg(long, value_name = "DIR")]
    pub heatmap_dir: Option<PathBuf>,

    /// Path to the fine-tuned checkpoint
    #[arg(long, value_name = "FILE")]
    pub weights: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Pretty-print JSON output (only affects --format json)
    #[arg(long)]
    pub pretty: bool,

    /// Merged config (populated by `with_config`, not from CLI).
    #[arg(skip)]
    config: Option<AppConfig>,
}

impl AnalyzeArgs {
    /// Apply configuration file values, respecting CLI precedence.
    ///
    /// Layering priority (lowest to highest):
    /// 1. Hardcoded defaults (in accessor methods)
    /// 2. Config file values (XDG, then project-local)
    /// 3. CLI arguments (already set on self)
    pub fn with_config(mut args: Self, config: &AppConfig) -> Self {
        if !args.recursive {
            args.recursive = config.general.recursive.unwrap_or(false);
        }

        // CLI --no-quality-check always wins; config can disable the gate
        // only when the flag wasn't passed.
        if !args.no_quality_check {
            if let Some(enabled) = config.quality.enabled {
                args.no_quality_check = !enabled;
            }
        }

        args.quality_threshold = args.quality_threshold.or(config.quality.threshold);
        if args.weights.is_none() {
            args.weights.clone_from(&config.model.weights);
        }

        if args.format.is_none() {
            args.format = config
                .output
                .format
                .as_ref()
                .and_then(|s| match s.as_str() {
                    "json" => Some(OutputFormat::Json),
                    "jsonl" => Some(OutputFormat::Jsonl),
                    _ => None,
                });
        }
        if !args.pretty {
            args.pretty = config.output.pretty.unwrap_or(false);
        }

        args.config = Some(config.clone());
        args
    }

    /// Get the quality threshold with fallback to the production default.
    fn quality_threshold(&self) -> f32 {
        self.quality_threshold
            .unwrap_or(defaults::QUALITY_THRESHOLD)
    }

    /// Get the checkpoint path with fallback to the conventional location.
    fn weights_path(&self) -> PathBuf {
        self.weights
            .clone()
            .unwrap_or_else(|| PathBuf::from(defaults::WEIGHTS_PATH))
    }

    /// Get output format with fallback to JSONL.
    fn format(&self) -> OutputFormat {
        self.format.unwrap_or(OutputFormat::Jsonl)
    }

    /// Builds the detector configuration from merged args and config.
    fn detector_config(&self) -> DetectorConfig {
        let config = self.config.as_ref();

        let mut vit = VitConfig::base();
        if let Some(c) = config {
            if let Some(v) = c.model.image_size {
                vit.image_size = v;
            }
            if let Some(v) = c.model.patch_size {
                vit.patch_size = v;
            }
            if let Some(v) = c.model.hidden_size {
                vit.hidden_size = v;
            }
            if let Some(v) = c.model.layers {
                vit.num_layers = v;
            }
            if let Some(v) = c.model.heads {
                vit.num_heads = v;
            }
            if let Some(v) = c.model.intermediate_size {
                vit.intermediate_size = v;
            }
        }

        let mut heatmap = HeatmapConfig::default();
        if let Some(c) = config {
            if let Some(v) = c.heatmap.grid_index {
                heatmap.grid_index = v;
            }
            if let Some(v) = c.heatmap.layer_index {
                heatmap.layer_index = v;
            }
            if let Some(v) = c.heatmap.alpha {
                heatmap.alpha = v;
            }
        }

        DetectorConfig {
            weights_path: self.weights_path(),
            vit,
            quality: QualityConfig {
                msp_threshold: self.quality_threshold(),
                energy_temperature: config
                    .and_then(|c| c.quality.energy_temperature)
                    .unwrap_or(defaults::ENERGY_TEMPERATURE),
            },
            heatmap,
        }
    }
}

/// Result of running the analyze command.
#[allow(dead_code)] // Fields exposed for programmatic use
pub struct AnalyzeResult {
    /// Number of images screened.
    pub processed: usize,
    /// Number of images skipped.
    pub skipped: usize,
    /// Number of images rejected by the quality gate.
    pub rejected: usize,
    /// Exit code.
    pub exit_code: ExitCode,
}

/// Run the analyze command.
///
/// Expects `args` to have been processed through `with_config()` first.
pub fn run(args: &AnalyzeArgs) -> Result<AnalyzeResult> {
    info!("Screening {} paths", args.paths.len());

    if args.paths.is_empty() {
        anyhow::bail!("No paths specified");
    }

    if let Some(ref dir) = args.heatmap_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create heatmap directory {}", dir.display()))?;
    }

    let source = FsImageSource::new(args.paths.clone(), args.recursive);
    let output = JsonOutput::stdout();

    // The detector is held here, at the composition root, and loaded on the
    // first image.
    let detector = LazyDetector::new(args.detector_config());

    process_images(&source, &detector, &output, args)
}

/// Screen every image from the source, isolating per-image failures.
fn process_images(
    source: &FsImageSource,
    detector: &LazyDetector,
    output: &JsonOutput,
    args: &AnalyzeArgs,
) -> Result<AnalyzeResult> {
    let options = PredictOptions {
        generate_heatmap: args.heatmap_dir.is_some(),
        validate_quality: !args.no_quality_check,
    };

    let mut processed = 0usize;
    let mut skipped = 0usize;
    let mut rejected = 0usize;
    let mut all_records: Vec<ScreeningRecord> = Vec::new();

    for image_result in source.images() {
        let image = match image_result {
            Ok(img) => img,
            Err(e) => {
                warn!("Skipping image: {e:#}");
                skipped += 1;
                continue;
            }
        };

        debug!("Screening {}", image.path);

        // A load failure is fatal; a per-image inference failure is not.
        let detector = detector.get()?;
        let outcome = match detector.predict(&image.image, &options) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Screening failed for {}: {e:#}", image.path);
                skipped += 1;
                continue;
            }
        };

        let record = match outcome {
            ScreeningOutcome::Accepted(screening) => {
                let heatmap_path = screening
                    .heatmap
                    .as_ref()
                    .and_then(|h| save_heatmap(h, &image.path, args.heatmap_dir.as_deref()));
                ScreeningRecord {
                    path: image.path,
                    timestamp: iso_timestamp(),
                    status: ScreeningStatus::Accepted,
                    prediction: Some(screening.prediction),
                    rejection: None,
                    heatmap_path,
                }
            }
            ScreeningOutcome::Rejected(rejection) => {
                rejected += 1;
                ScreeningRecord {
                    path: image.path,
                    timestamp: iso_timestamp(),
                    status: ScreeningStatus::Rejected,
                    prediction: None,
                    rejection: Some(rejection),
                    heatmap_path: None,
                }
            }
        };

        match args.format() {
            OutputFormat::Jsonl => output.write(&record)?,
            OutputFormat::Json => all_records.push(record),
        }

        processed += 1;
    }

    if matches!(args.format(), OutputFormat::Json) {
        output.write_array(&all_records, args.pretty)?;
    }
    output.flush()?;

    info!("Screened {processed} images ({rejected} rejected, {skipped} skipped)");

    let exit_code = if rejected > 0 {
        ExitCode::Rejected
    } else {
        ExitCode::Success
    };

    Ok(AnalyzeResult {
        processed,
        skipped,
        rejected,
        exit_code,
    })
}

/// Writes a heatmap PNG next to the configured directory.
///
/// Failures are logged and ignored; the screening record simply carries no
/// heatmap path.
fn save_heatmap(
    heatmap: &image::DynamicImage,
    image_path: &str,
    dir: Option<&Path>,
) -> Option<String> {
    let dir = dir?;
    let stem = Path::new(image_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    let out = dir.join(format!("{stem}_heatmap.png"));

    match heatmap.save(&out) {
        Ok(()) => Some(out.to_string_lossy().into_owned()),
        Err(e) => {
            warn!("Failed to save heatmap for {image_path}: {e}");
            None
        }
    }
}

/// Generate ISO 8601 UTC timestamp (RFC 3339 format).
fn iso_timestamp() -> String {
    match time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339) {
        Ok(ts) => ts,
        Err(e) => {
            debug!("Timestamp format failed: {e}");
            String::from("1970-01-01T00:00:00Z")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_threshold() {
        assert!(parse_threshold("0.75").is_ok());
        assert!(parse_threshold("0").is_ok());
        assert!(parse_threshold("1").is_ok());
        assert!(parse_threshold("1.5").is_err());
        assert!(parse_threshold("abc").is_err());
    }

    #[test]
    fn test_defaults_match_production_constants() {
        assert!((defaults::QUALITY_THRESHOLD - 0.75).abs() < f32::EPSILON);
        assert!((defaults::ENERGY_TEMPERATURE - 2.0).abs() < f32::EPSILON);
    }
}
