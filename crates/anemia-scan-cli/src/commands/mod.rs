//! CLI command definitions and handlers.

pub mod analyze;

use clap::{Parser, Subcommand};

/// Anemia Scan - conjunctiva anemia screening
#[derive(Parser)]
#[command(name = "anemia-scan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Shared analyze arguments (paths, thresholds, flags).
    #[command(flatten)]
    pub analyze: analyze::AnalyzeArgs,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Screen conjunctiva images for anemia
    Analyze(analyze::AnalyzeArgs),
}

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// All images screened and accepted.
    Success,
    /// At least one image was rejected by the quality gate.
    Rejected,
    /// The run failed.
    Error,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        match code {
            ExitCode::Success => Self::from(0),
            ExitCode::Rejected => Self::from(1),
            ExitCode::Error => Self::from(2),
        }
    }
}
