use anyhow::Result;
use std::path::Path;

use crate::commands::{CommandReport, read_json};
use aistudio_compressor::compressor::wire::{describe_history, extract_turns};

pub fn run(file: &Path) -> Result<CommandReport> {
    let payload = read_json(file)?;
    let mut report = CommandReport::new("decode-history");

    let description = describe_history(&payload);
    report.detail(format!("source={}", file.display()));
    report.detail(format!("records={}", description.turn_count));
    if let Some(role) = &description.first_role {
        report.detail(format!("first_role={role}"));
    }
    if let Some(kind) = &description.first_chunk_type {
        report.detail(format!("first_chunk_type={kind}"));
    }
    if !description.valid {
        report.issue(format!(
            "history payload invalid: {}",
            description.reason.as_deref().unwrap_or("unknown shape")
        ));
        return Ok(report);
    }

    let turns = extract_turns(&payload);
    report.detail(format!("turns={}", turns.len()));
    for (idx, turn) in turns.iter().enumerate() {
        report.detail(format!(
            "turn[{idx}] role={} chars={}",
            turn.role.as_str(),
            turn.char_len()
        ));
    }
    if turns.is_empty() {
        report.issue("no turns with a role and visible text");
    }
    Ok(report)
}
