use anyhow::Result;
use std::path::Path;

use crate::commands::{CommandReport, read_json};
use aistudio_compressor::compressor::summary::extract_summary;

pub fn run(file: &Path, pattern: Option<&str>) -> Result<CommandReport> {
    let payload = read_json(file)?;
    let mut report = CommandReport::new("extract-summary");
    report.detail(format!("source={}", file.display()));
    if let Some(pattern) = pattern {
        report.detail(format!("pattern={pattern}"));
    }

    match extract_summary(&payload, pattern) {
        Some(summary) => {
            report.detail(format!("summary_chars={}", summary.chars().count()));
            report.detail(format!("summary={summary}"));
        }
        None => report.issue("model output stream carried no visible text"),
    }
    Ok(report)
}
