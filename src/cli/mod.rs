//! Shared CLI utilities for the harness binary.

pub mod backend;

use clap::ValueEnum;

/// Exit code for invalid arguments, configuration or backend selection.
///
/// Mismatch totals are clamped below it, see
/// [`crate::orchestrator::MAX_MISMATCH_EXIT_CODE`].
pub const USAGE_ERROR_EXIT_CODE: i32 = 255;

/// Initialize tracing/logging to stderr.
///
/// If `disable` is true, no output is produced.
/// Otherwise respects `RUST_LOG` env var, defaulting to WARN.
pub fn init_logging(disable: bool) {
    use tracing_subscriber::EnvFilter;

    if disable {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// How the final summary is reported on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Console lines only.
    #[default]
    Text,
    /// Console lines, then the summary as one JSON document.
    Json,
}

/// Render the summary for `format`. `None` means nothing beyond the console lines.
pub fn render_summary(
    summary: &crate::HarnessSummary,
    format: OutputFormat,
) -> Result<Option<String>, serde_json::Error> {
    match format {
        OutputFormat::Text => Ok(None),
        OutputFormat::Json => serde_json::to_string_pretty(summary).map(Some),
    }
}
