use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::commands::{CommandReport, read_json, read_text};
use aistudio_compressor::compressor::fingerprint::Fingerprint;
use aistudio_compressor::compressor::injection::{InjectionScheduler, PendingInjection};
use aistudio_compressor::compressor::paths::resolve_paths;
use aistudio_compressor::compressor::settings::{Settings, SettingsSource, SettingsStore};
use aistudio_compressor::compressor::summary::extract_summary;
use aistudio_compressor::compressor::tail::{pick_tail_turns, strip_compression_prompt_turn};
use aistudio_compressor::compressor::wire::extract_turns;

#[derive(Debug, Clone)]
pub struct RebuildOptions {
    pub history: PathBuf,
    pub response: PathBuf,
    pub create_body: Option<PathBuf>,
    pub out: Option<PathBuf>,
}

pub fn load_settings() -> Result<Settings> {
    let paths = resolve_paths()?;
    Ok(SettingsStore::from_paths(&paths).snapshot())
}

/// Offline equivalent of a completed run: decode both captures and install
/// the pending injection in `scheduler`.
pub fn prepare_offline(
    history: &Path,
    response: &Path,
    settings: &Settings,
    scheduler: &InjectionScheduler,
    report: &mut CommandReport,
) -> Result<Option<PendingInjection>> {
    let history_payload = read_json(history)?;
    let response_payload = read_json(response)?;

    let Some(summary) = extract_summary(&response_payload, settings.snapshot_pattern()) else {
        report.issue("model output stream carried no visible text");
        return Ok(None);
    };
    report.detail(format!("summary_chars={}", summary.chars().count()));

    let turns = extract_turns(&history_payload);
    report.detail(format!("history_turns={}", turns.len()));
    if turns.is_empty() {
        report.issue("no turns extracted from prompt history");
        return Ok(None);
    }

    let fingerprint = Fingerprint::from_prompt(settings.effective_prompt());
    let turns = strip_compression_prompt_turn(turns, &fingerprint);
    if turns.is_empty() {
        report.issue("history only contained the compression prompt turn");
        return Ok(None);
    }

    let retention = settings.tail_retention();
    let tail = pick_tail_turns(&turns, retention);
    report.detail(format!(
        "tail_turns={} (percent={} min_chars={})",
        tail.len(),
        retention.percent,
        retention.min_chars
    ));

    let pending = scheduler.prepare(&summary, tail);
    report.detail(format!("injected_turns={}", pending.turns.len()));
    Ok(Some(pending))
}

pub fn run(options: &RebuildOptions) -> Result<CommandReport> {
    let settings = load_settings()?;
    let scheduler = InjectionScheduler::new();
    let mut report = CommandReport::new("rebuild");

    let Some(pending) = prepare_offline(
        &options.history,
        &options.response,
        &settings,
        &scheduler,
        &mut report,
    )?
    else {
        return Ok(report);
    };

    let rewritten = match &options.create_body {
        Some(path) => {
            let body = read_text(path)?;
            match scheduler.try_rewrite(&body) {
                Some(rewritten) => {
                    report.detail("create_body=rewritten");
                    Some(rewritten)
                }
                None => {
                    report.issue(format!(
                        "create body {} does not match the expected shape",
                        path.display()
                    ));
                    None
                }
            }
        }
        None => None,
    };

    match &options.out {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            write_output(dir, "resolve.json", &pending.resolve_body, &mut report)?;
            write_output(dir, "list.json", &pending.list_body, &mut report)?;
            if let Some(rewritten) = &rewritten {
                write_output(dir, "create.json", rewritten, &mut report)?;
            }
        }
        None => {
            report.detail(format!("resolve_body={}", pending.resolve_body));
            report.detail(format!("list_body={}", pending.list_body));
            if let Some(rewritten) = &rewritten {
                report.detail(format!("create_body={rewritten}"));
            }
        }
    }
    Ok(report)
}

fn write_output(dir: &Path, name: &str, body: &str, report: &mut CommandReport) -> Result<()> {
    let path = dir.join(name);
    fs::write(&path, format!("{body}\n"))
        .with_context(|| format!("failed to write {}", path.display()))?;
    report.detail(format!("wrote={}", path.display()));
    Ok(())
}
